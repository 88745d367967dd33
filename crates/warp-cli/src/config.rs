//! warp-fleet.toml configuration parser.
//!
//! ```toml
//! [drain]
//! max_attempts = 30
//! poll_interval = "10s"
//!
//! [aws]
//! region = "eu-west-1"
//! endpoint_url = "http://localhost:4566"
//! ```
//!
//! Every section and key is optional. Command-line flags override the file,
//! and the file overrides built-in defaults.

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use warpgrid_aws::AwsSettings;
use warpgrid_scaledown::{parse_duration, DrainPolicy};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "warp-fleet.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    pub drain: Option<DrainConfig>,
    pub aws: Option<AwsSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrainConfig {
    pub max_attempts: Option<u32>,
    pub poll_interval: Option<String>,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: FleetConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load an explicit config file, or `warp-fleet.toml` from `dir` if it
    /// exists, or fall back to defaults.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let default = dir.join(DEFAULT_CONFIG_FILE);
        if default.is_file() {
            return Self::from_file(&default);
        }
        Ok(Self::default())
    }

    /// Resolve the drain policy, with flags taking precedence.
    pub fn drain_policy(
        &self,
        attempts_flag: Option<u32>,
        interval_flag: Option<&str>,
    ) -> anyhow::Result<DrainPolicy> {
        let defaults = DrainPolicy::default();
        let file = self.drain.clone().unwrap_or_default();

        let max_attempts = attempts_flag.or(file.max_attempts).unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            bail!("drain max_attempts must be at least 1");
        }

        let poll_interval = match interval_flag.or(file.poll_interval.as_deref()) {
            Some(raw) => parse_duration(raw)
                .with_context(|| format!("invalid drain poll interval {raw:?}"))?,
            None => defaults.poll_interval,
        };

        Ok(DrainPolicy {
            max_attempts,
            poll_interval,
        })
    }

    /// Resolve AWS settings, with flags taking precedence.
    pub fn aws_settings(&self, flags: AwsSettings) -> AwsSettings {
        self.aws.clone().unwrap_or_default().merge(flags)
    }
}
