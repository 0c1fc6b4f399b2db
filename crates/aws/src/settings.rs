use serde::{Deserialize, Serialize};

/// Where and as whom to call AWS. Unset fields fall back to the SDK default chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsSettings {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl AwsSettings {
    /// Fields set in `over` win.
    pub fn overlay(self, over: AwsSettings) -> AwsSettings {
        AwsSettings {
            region: over.region.or(self.region),
            profile: over.profile.or(self.profile),
            endpoint_url: over.endpoint_url.or(self.endpoint_url),
        }
    }

    pub async fn load(&self) -> aws_config::SdkConfig {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(r) = &self.region { loader = loader.region(aws_config::Region::new(r.clone())); }
        if let Some(p) = &self.profile { loader = loader.profile_name(p); }
        if let Some(u) = &self.endpoint_url { loader = loader.endpoint_url(u); }
        loader.load().await
    }
}
