use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use iotctl_aws::{AwsProvider, AwsSettings, IotResource};
use iotctl_core::{AttachmentTarget, Ensure, PolicyReference};

/// Contents of the `--file` YAML document.
#[derive(Debug, Default, Deserialize)]
pub struct Stack {
    #[serde(default)]
    pub aws: AwsSettings,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub attachments: Vec<DesiredAttachment>,
    #[serde(default)]
    pub provider: Option<AwsProvider>,
    #[serde(default)]
    pub resources: Vec<IotResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DesiredAttachment {
    pub target: AttachmentTarget,
    pub policies: Vec<PolicyReference>,
    #[serde(default)]
    pub ensure: Ensure,
}

impl Stack {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        serde_yaml::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }
}
