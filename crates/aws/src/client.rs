//! [`PolicyDirectory`] and [`IotRegistry`] over the AWS IoT control plane.

use async_trait::async_trait;
use aws_sdk_iot::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iot::Client as IotClient;
use tracing::debug;

use iotctl_core::{
    AttachmentPage, AttachmentTarget, CertificateDescription, CertificateStatus, Cursor, DirectoryError,
    DirectoryErrorKind, EndpointType, IotRegistry, ListAttachedPolicies, PolicyDirectory, PolicyReference,
    ThingTypeDescription,
};

use crate::settings::AwsSettings;

#[derive(Clone)]
pub struct IotDirectory {
    client: IotClient,
}

impl IotDirectory {
    pub fn new(client: IotClient) -> Self {
        Self { client }
    }

    pub async fn from_settings(settings: &AwsSettings) -> Self {
        let config = settings.load().await;
        Self::new(IotClient::new(&config))
    }
}

/// Maps an IoT error code onto the directory error kinds.
pub fn classify_code(code: Option<&str>) -> DirectoryErrorKind {
    match code {
        Some("ResourceNotFoundException") => DirectoryErrorKind::NotFound,
        Some("ThrottlingException" | "LimitExceededException" | "TooManyRequestsException") => DirectoryErrorKind::Throttled,
        Some("UnauthorizedException" | "AccessDeniedException" | "ExpiredTokenException" | "UnrecognizedClientException") => {
            DirectoryErrorKind::AccessDenied
        }
        Some("InvalidRequestException" | "ValidationException" | "MalformedPolicyException") => DirectoryErrorKind::InvalidRequest,
        Some("ServiceUnavailableException" | "InternalFailureException" | "InternalException") => DirectoryErrorKind::Unavailable,
        _ => DirectoryErrorKind::Other,
    }
}

fn classify<E, R>(operation: &str, err: SdkError<E, R>) -> DirectoryError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => DirectoryErrorKind::Unavailable,
        _ => classify_code(err.as_service_error().and_then(|e| e.code())),
    };
    let err = DirectoryError::new(kind, operation, DisplayErrorContext(&err).to_string());
    debug!(operation, kind = %err.kind, "iot call failed");
    err
}

fn malformed(operation: &str, message: impl Into<String>) -> DirectoryError {
    DirectoryError::new(DirectoryErrorKind::Other, operation, message)
}

#[async_trait]
impl PolicyDirectory for IotDirectory {
    async fn list_attached_policies(&self, req: ListAttachedPolicies) -> Result<AttachmentPage, DirectoryError> {
        const OP: &str = "ListAttachedPolicies";
        let out = self
            .client
            .list_attached_policies()
            .target(req.target.as_str())
            .page_size(i32::try_from(req.page_size).unwrap_or(i32::MAX))
            .recursive(req.recursive)
            .set_marker(req.cursor.map(|c| c.0))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        let policies = out
            .policies()
            .iter()
            .filter_map(|p| p.policy_name())
            .map(|name| PolicyReference::new(name))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| malformed(OP, e.to_string()))?;
        let next_cursor = out.next_marker().filter(|m| !m.is_empty()).map(|m| Cursor(m.to_string()));
        Ok(AttachmentPage { policies, next_cursor })
    }

    async fn attach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<(), DirectoryError> {
        self.client
            .attach_policy()
            .policy_name(policy.as_str())
            .target(target.as_str())
            .send()
            .await
            .map_err(|e| classify("AttachPolicy", e))?;
        Ok(())
    }

    /// IoT answers DetachPolicy with success when the policy and target both
    /// exist but are not related, so this backend never reports `NotAttached`.
    /// `ResourceNotFoundException` here means the target or the policy itself
    /// is missing and surfaces as `NotFound`.
    async fn detach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<(), DirectoryError> {
        self.client
            .detach_policy()
            .policy_name(policy.as_str())
            .target(target.as_str())
            .send()
            .await
            .map_err(|e| classify("DetachPolicy", e))?;
        Ok(())
    }
}

#[async_trait]
impl IotRegistry for IotDirectory {
    async fn describe_certificate(&self, certificate_id: &str) -> Result<CertificateDescription, DirectoryError> {
        const OP: &str = "DescribeCertificate";
        let out = self
            .client
            .describe_certificate()
            .certificate_id(certificate_id)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        let d = out
            .certificate_description()
            .ok_or_else(|| malformed(OP, format!("no description returned for {certificate_id}")))?;
        Ok(CertificateDescription {
            certificate_id: d.certificate_id().unwrap_or(certificate_id).to_string(),
            certificate_arn: d.certificate_arn().unwrap_or_default().to_string(),
            status: d
                .status()
                .map(|s| CertificateStatus::parse(s.as_str()))
                .unwrap_or_else(|| CertificateStatus::Other("UNKNOWN".to_string())),
        })
    }

    async fn describe_thing_type(&self, name: &str) -> Result<ThingTypeDescription, DirectoryError> {
        let out = self
            .client
            .describe_thing_type()
            .thing_type_name(name)
            .send()
            .await
            .map_err(|e| classify("DescribeThingType", e))?;
        Ok(ThingTypeDescription {
            thing_type_name: out.thing_type_name().unwrap_or(name).to_string(),
            thing_type_arn: out.thing_type_arn().unwrap_or_default().to_string(),
            deprecated: out
                .thing_type_metadata()
                .and_then(|m| Option::<bool>::from(m.deprecated))
                .unwrap_or(false),
        })
    }

    async fn describe_endpoint(&self, endpoint_type: EndpointType) -> Result<String, DirectoryError> {
        const OP: &str = "DescribeEndpoint";
        let out = self
            .client
            .describe_endpoint()
            .endpoint_type(endpoint_type.as_str())
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        out.endpoint_address()
            .map(str::to_string)
            .ok_or_else(|| malformed(OP, format!("no address returned for {}", endpoint_type.as_str())))
    }
}
