//! Shared AWS SDK configuration.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Overrides applied on top of the default AWS provider chain.
///
/// Credentials always come from the standard chain (environment, profile,
/// instance role).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsSettings {
    /// Region to call. Falls back to `AWS_REGION` / the active profile.
    pub region: Option<String>,
    /// Endpoint override, e.g. a local emulator.
    pub endpoint_url: Option<String>,
}

impl AwsSettings {
    /// Layer `other` over `self`: values set in `other` win.
    pub fn merge(self, other: AwsSettings) -> AwsSettings {
        AwsSettings {
            region: other.region.or(self.region),
            endpoint_url: other.endpoint_url.or(self.endpoint_url),
        }
    }
}

/// Load the SDK config both fleet clients are built from.
pub async fn load_sdk_config(settings: &AwsSettings) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = &settings.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = settings.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        loader = loader.endpoint_url(url);
    }

    let config = loader.load().await;
    info!(
        region = config.region().map(|r| r.as_ref()).unwrap_or("<default>"),
        endpoint = settings.endpoint_url.as_deref().unwrap_or("<default>"),
        "AWS SDK config loaded"
    );
    config
}
