use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::ReconcileError;

/// Identity policies attach to, normally a certificate ARN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttachmentTarget(String);

impl AttachmentTarget {
    pub fn new(s: impl Into<String>) -> Result<Self, ReconcileError> {
        let s = s.into();
        if s.is_empty() {
            return Err(ReconcileError::invalid("attachment target must not be empty"));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(ReconcileError::invalid(format!("attachment target '{s}' contains whitespace")));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

fn policy_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w+=,.@-]{1,128}$").expect("static regex"))
}

/// Name of an IoT policy, unique within an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyReference(String);

impl PolicyReference {
    pub fn new(s: impl Into<String>) -> Result<Self, ReconcileError> {
        let s = s.into();
        if s.is_empty() {
            return Err(ReconcileError::invalid("policy name must not be empty"));
        }
        if !policy_name_re().is_match(&s) {
            return Err(ReconcileError::invalid(format!(
                "policy name '{s}' must be 1-128 characters of letters, digits and +=,.@-_"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

macro_rules! string_newtype_impls {
    ($t:ty) => {
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
        }
        impl FromStr for $t {
            type Err = ReconcileError;
            fn from_str(s: &str) -> Result<Self, Self::Err> { Self::new(s) }
        }
        impl TryFrom<String> for $t {
            type Error = ReconcileError;
            fn try_from(s: String) -> Result<Self, Self::Error> { Self::new(s) }
        }
        impl From<$t> for String {
            fn from(v: $t) -> String { v.0 }
        }
        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str { &self.0 }
        }
    };
}

string_newtype_impls!(AttachmentTarget);
string_newtype_impls!(PolicyReference);

/// Opaque continuation token of the remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListAttachedPolicies {
    pub target: AttachmentTarget,
    pub page_size: u32,
    pub recursive: bool,
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentPage {
    pub policies: Vec<PolicyReference>,
    pub next_cursor: Option<Cursor>,
}

impl AttachmentPage {
    pub fn has_more(&self) -> bool { self.next_cursor.is_some() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Active,
    Inactive,
    Revoked,
    PendingTransfer,
    RegisterInactive,
    PendingActivation,
    #[serde(untagged)]
    Other(String),
}

impl CertificateStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "ACTIVE" => Self::Active,
            "INACTIVE" => Self::Inactive,
            "REVOKED" => Self::Revoked,
            "PENDING_TRANSFER" => Self::PendingTransfer,
            "REGISTER_INACTIVE" => Self::RegisterInactive,
            "PENDING_ACTIVATION" => Self::PendingActivation,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDescription {
    pub certificate_id: String,
    pub certificate_arn: String,
    pub status: CertificateStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingTypeDescription {
    pub thing_type_name: String,
    pub thing_type_arn: String,
    pub deprecated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EndpointType {
    Data,
    #[default]
    DataAts,
    CredentialProvider,
    Jobs,
}

impl EndpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointType::Data => "iot:Data",
            EndpointType::DataAts => "iot:Data-ATS",
            EndpointType::CredentialProvider => "iot:CredentialProvider",
            EndpointType::Jobs => "iot:Jobs",
        }
    }
}

impl FromStr for EndpointType {
    type Err = ReconcileError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iot:Data" => Ok(Self::Data),
            "iot:Data-ATS" => Ok(Self::DataAts),
            "iot:CredentialProvider" => Ok(Self::CredentialProvider),
            "iot:Jobs" => Ok(Self::Jobs),
            other => Err(ReconcileError::invalid(format!("unknown endpoint type '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_rejects_empty_and_whitespace() {
        assert!(AttachmentTarget::new("").is_err());
        assert!(AttachmentTarget::new("arn:aws:iot:us-east-1:123456789012:cert/ab cd").is_err());
        let t = AttachmentTarget::new("arn:aws:iot:us-east-1:123456789012:cert/abcd").unwrap();
        assert_eq!(t.as_str(), "arn:aws:iot:us-east-1:123456789012:cert/abcd");
    }

    #[test]
    fn policy_name_grammar() {
        assert!(PolicyReference::new("").is_err());
        assert!(PolicyReference::new("has space").is_err());
        assert!(PolicyReference::new("x".repeat(129)).is_err());
        assert!(PolicyReference::new("tf-acc-test_policy.v2@team=a,b+c").is_ok());
    }

    #[test]
    fn newtypes_deserialize_through_validation() {
        let p: PolicyReference = serde_json::from_str("\"policy-A\"").unwrap();
        assert_eq!(p.to_string(), "policy-A");
        assert!(serde_json::from_str::<PolicyReference>("\"\"").is_err());
    }

    #[test]
    fn certificate_status_parse() {
        assert_eq!(CertificateStatus::parse("ACTIVE"), CertificateStatus::Active);
        assert_eq!(CertificateStatus::parse("WEIRD"), CertificateStatus::Other("WEIRD".into()));
    }

    #[test]
    fn endpoint_type_names() {
        assert_eq!(EndpointType::default().as_str(), "iot:Data-ATS");
        assert_eq!("iot:Jobs".parse::<EndpointType>().unwrap(), EndpointType::Jobs);
        assert!("iot:Nope".parse::<EndpointType>().is_err());
    }
}
