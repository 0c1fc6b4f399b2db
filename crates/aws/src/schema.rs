//! Terraform JSON for the IoT resources iotctl manages.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsProvider { pub region: String }

impl AwsProvider {
    pub fn to_tf_json(&self) -> Json {
        json!({
            "terraform": { "required_providers": { "aws": { "source": "hashicorp/aws", "version": "~> 5.0" } } },
            "provider": { "aws": { "region": self.region } }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag="type")]
pub enum IotResource {
    #[serde(rename="aws_iot_certificate")]
    Certificate {
        name: String,
        #[serde(default = "default_true")]
        active: bool,
        #[serde(default)]
        csr: Option<String>,
    },
    #[serde(rename="aws_iot_policy")]
    Policy {
        name: String,
        #[serde(default)]
        policy_name: Option<String>,
        document: Json,
    },
    #[serde(rename="aws_iot_policy_attachment")]
    PolicyAttachment {
        name: String,
        policy: String,
        target: String,
    },
    #[serde(rename="aws_iot_thing_type")]
    ThingType {
        name: String,
        #[serde(default)]
        thing_type_name: Option<String>,
        #[serde(default)]
        deprecated: bool,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        searchable_attributes: Vec<String>,
    },
    #[serde(rename="aws_iot_logging_options")]
    LoggingOptions {
        name: String,
        role_arn: String,
        default_log_level: String,
        #[serde(default)]
        disable_all_logs: Option<bool>,
    },
    #[serde(rename="aws_iot_indexing_configuration")]
    IndexingConfiguration {
        name: String,
        thing_indexing_mode: String,
        #[serde(default)]
        thing_connectivity_indexing_mode: Option<String>,
        #[serde(default)]
        thing_group_indexing_mode: Option<String>,
    },
    /// Data source; renders under `data`.
    #[serde(rename="aws_iot_endpoint")]
    Endpoint {
        name: String,
        #[serde(default)]
        endpoint_type: Option<String>,
    },
}

fn default_true() -> bool { true }

impl IotResource {
    pub fn name(&self) -> &str {
        match self {
            IotResource::Certificate { name, .. }
            | IotResource::Policy { name, .. }
            | IotResource::PolicyAttachment { name, .. }
            | IotResource::ThingType { name, .. }
            | IotResource::LoggingOptions { name, .. }
            | IotResource::IndexingConfiguration { name, .. }
            | IotResource::Endpoint { name, .. } => name,
        }
    }

    pub fn to_tf_json(&self) -> Json {
        match self {
            IotResource::Certificate { name, active, csr } => {
                let mut body = json!({ "active": active });
                if let Some(c) = csr { body["csr"] = json!(c); }
                json!({ "resource": { "aws_iot_certificate": { name: body } } })
            }
            IotResource::Policy { name, policy_name, document } => {
                let doc = match document {
                    Json::String(s) => s.clone(),
                    other => other.to_string(),
                };
                json!({ "resource": { "aws_iot_policy": {
                    name: { "name": policy_name.as_deref().unwrap_or(name), "policy": doc }
                }}})
            }
            IotResource::PolicyAttachment { name, policy, target } => json!({
                "resource": { "aws_iot_policy_attachment": { name: { "policy": policy, "target": target } } }
            }),
            IotResource::ThingType { name, thing_type_name, deprecated, description, searchable_attributes } => {
                let mut props = json!({});
                if let Some(d) = description { props["description"] = json!(d); }
                if !searchable_attributes.is_empty() { props["searchable_attributes"] = json!(searchable_attributes); }
                let mut body = json!({ "name": thing_type_name.as_deref().unwrap_or(name), "deprecated": deprecated });
                if props.as_object().is_some_and(|p| !p.is_empty()) { body["properties"] = props; }
                json!({ "resource": { "aws_iot_thing_type": { name: body } } })
            }
            IotResource::LoggingOptions { name, role_arn, default_log_level, disable_all_logs } => {
                let mut body = json!({ "role_arn": role_arn, "default_log_level": default_log_level });
                if let Some(d) = disable_all_logs { body["disable_all_logs"] = json!(d); }
                json!({ "resource": { "aws_iot_logging_options": { name: body } } })
            }
            IotResource::IndexingConfiguration { name, thing_indexing_mode, thing_connectivity_indexing_mode, thing_group_indexing_mode } => {
                let mut thing = json!({ "thing_indexing_mode": thing_indexing_mode });
                if let Some(m) = thing_connectivity_indexing_mode { thing["thing_connectivity_indexing_mode"] = json!(m); }
                let mut body = json!({ "thing_indexing_configuration": thing });
                if let Some(m) = thing_group_indexing_mode {
                    body["thing_group_indexing_configuration"] = json!({ "thing_group_indexing_mode": m });
                }
                json!({ "resource": { "aws_iot_indexing_configuration": { name: body } } })
            }
            IotResource::Endpoint { name, endpoint_type } => {
                let mut body = json!({});
                if let Some(t) = endpoint_type { body["endpoint_type"] = json!(t); }
                json!({ "data": { "aws_iot_endpoint": { name: body } } })
            }
        }
    }
}

/// Deep-merges `b` into `a`; objects merge key by key, anything else is replaced.
pub fn merge(a: Json, b: Json) -> Json {
    match (a, b) {
        (Json::Object(mut ma), Json::Object(mb)) => {
            for (k, v) in mb {
                let existing = ma.remove(&k).unwrap_or(Json::Null);
                ma.insert(k, merge(existing, v));
            }
            Json::Object(ma)
        }
        (_, v) => v,
    }
}

pub fn render(provider: Option<&AwsProvider>, resources: &[IotResource]) -> Json {
    let mut tf = provider.map(AwsProvider::to_tf_json).unwrap_or_else(|| json!({}));
    for r in resources {
        tf = merge(tf, r.to_tf_json());
    }
    tf
}

pub fn write_tf_json(tf: &Json, out: &Path) -> Result<()> {
    std::fs::create_dir_all(out)?;
    std::fs::write(out.join("main.tf.json"), serde_json::to_string_pretty(tf)?)?;
    Ok(())
}
