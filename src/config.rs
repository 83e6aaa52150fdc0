//! YAML configuration for the retouch pipeline
//!
//! One file describes every external service plus the pipeline defaults. API keys may be
//! left out of the file and supplied through the environment instead.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "production"
//!
//! pipeline:
//!   cutout_timeout: 60000
//!   edit_timeout: 120000
//!   harmonize_timeout: 60000
//!   upscale_timeout: 90000
//!   default_profile: "general"
//!   default_harmonize_mode: "relight"
//!   default_upscale_factor: 2
//!
//! services:
//!   segmentation:
//!     endpoint:
//!       url: "https://fal.run/fal-ai/birefnet/v2"
//!   edit:
//!     endpoint:
//!       url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent"
//!       timeout: 90000
//!   harmonization:
//!     endpoint:
//!       url: "https://fal.run/fal-ai/flux/dev/image-to-image"
//!     steps: 28
//!   upscale:
//!     endpoint:
//!       url: "https://api.replicate.com/v1/predictions"
//!     version: "f121d640bd286e1fdc67f9799164c1d5be36ff74576ee11c803ae5b665dd46aa"
//!     poll_interval: 2000
//!     max_poll_attempts: 30
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stages::config::{ServiceEndpoint, StagesConfig};
use stages::{HarmonizeMode, SegmentationProfile, StageKind};

/// Largest upscale factor accepted anywhere in the pipeline.
pub const MAX_UPSCALE_FACTOR: u32 = 8;

/// Environment variables consulted for credentials missing from the file.
pub const SEGMENTATION_KEY_VAR: &str = "RETOUCH_SEGMENTATION_API_KEY";
pub const EDIT_KEY_VAR: &str = "RETOUCH_EDIT_API_KEY";
pub const HARMONIZATION_KEY_VAR: &str = "RETOUCH_HARMONIZATION_API_KEY";
pub const UPSCALE_KEY_VAR: &str = "RETOUCH_UPSCALE_API_KEY";

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration for the whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetouchConfig {
    /// Configuration format version
    pub version: String,

    /// Optional configuration name/description
    #[serde(default)]
    pub name: Option<String>,

    /// Orchestrator defaults
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// External services, one per stage
    #[serde(default)]
    pub services: StagesConfig,
}

impl RetouchConfig {
    /// Load a YAML configuration file and fill missing API keys from the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_keys(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: RetouchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Fill every endpoint whose `api_key` is unset from `lookup`. Keys present in the
    /// file win; empty values are ignored.
    pub fn apply_env_keys<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let services = &mut self.services;
        let slots: [(&str, &mut ServiceEndpoint); 4] = [
            (SEGMENTATION_KEY_VAR, &mut services.segmentation.endpoint),
            (EDIT_KEY_VAR, &mut services.edit.endpoint),
            (HARMONIZATION_KEY_VAR, &mut services.harmonization.endpoint),
            (UPSCALE_KEY_VAR, &mut services.upscale.endpoint),
        ];
        for (var, endpoint) in slots {
            if endpoint.api_key.as_deref().is_some_and(|key| !key.is_empty()) {
                continue;
            }
            if let Some(key) = lookup(var).filter(|key| !key.trim().is_empty()) {
                endpoint.api_key = Some(key.trim().to_string());
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.pipeline.validate()?;

        let services = &self.services;
        validate_endpoint("segmentation", &services.segmentation.endpoint)?;
        validate_endpoint("edit", &services.edit.endpoint)?;
        validate_endpoint("harmonization", &services.harmonization.endpoint)?;
        validate_endpoint("upscale", &services.upscale.endpoint)?;

        if services.harmonization.steps == 0 {
            return Err(ConfigLoadError::Validation(
                "harmonization.steps must be >= 1".into(),
            ));
        }
        if services.upscale.poll_interval.is_zero() {
            return Err(ConfigLoadError::Validation(
                "upscale.poll_interval must be > 0".into(),
            ));
        }
        if services.upscale.max_poll_attempts == 0 {
            return Err(ConfigLoadError::Validation(
                "upscale.max_poll_attempts must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RetouchConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            pipeline: PipelineSettings::default(),
            services: StagesConfig::default(),
        }
    }
}

/// Orchestrator defaults: per-stage budgets and the parameters used when a request
/// leaves them out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSettings {
    #[serde(with = "stages::serde_millis", default = "default_cutout_timeout")]
    pub cutout_timeout: Duration,
    #[serde(with = "stages::serde_millis", default = "default_edit_timeout")]
    pub edit_timeout: Duration,
    #[serde(with = "stages::serde_millis", default = "default_harmonize_timeout")]
    pub harmonize_timeout: Duration,
    /// Bounds the whole upscale stage, poll loop included.
    #[serde(with = "stages::serde_millis", default = "default_upscale_timeout")]
    pub upscale_timeout: Duration,
    #[serde(default)]
    pub default_profile: SegmentationProfile,
    #[serde(default)]
    pub default_harmonize_mode: HarmonizeMode,
    #[serde(default = "default_upscale_factor")]
    pub default_upscale_factor: u32,
}

impl PipelineSettings {
    pub fn timeout_for(&self, stage: StageKind) -> Duration {
        match stage {
            StageKind::Cutout => self.cutout_timeout,
            StageKind::Edit => self.edit_timeout,
            StageKind::Harmonize => self.harmonize_timeout,
            StageKind::Upscale => self.upscale_timeout,
        }
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        for stage in StageKind::ALL {
            if self.timeout_for(stage).is_zero() {
                return Err(ConfigLoadError::Validation(format!(
                    "pipeline.{stage}_timeout must be > 0"
                )));
            }
        }
        if !(1..=MAX_UPSCALE_FACTOR).contains(&self.default_upscale_factor) {
            return Err(ConfigLoadError::Validation(format!(
                "pipeline.default_upscale_factor must be within 1..={MAX_UPSCALE_FACTOR}"
            )));
        }
        Ok(())
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cutout_timeout: default_cutout_timeout(),
            edit_timeout: default_edit_timeout(),
            harmonize_timeout: default_harmonize_timeout(),
            upscale_timeout: default_upscale_timeout(),
            default_profile: SegmentationProfile::default(),
            default_harmonize_mode: HarmonizeMode::default(),
            default_upscale_factor: default_upscale_factor(),
        }
    }
}

fn validate_endpoint(name: &str, endpoint: &ServiceEndpoint) -> Result<(), ConfigLoadError> {
    let url = endpoint.url.trim();
    if url.is_empty() {
        return Err(ConfigLoadError::Validation(format!(
            "{name}.endpoint.url must not be empty"
        )));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigLoadError::Validation(format!(
            "{name}.endpoint.url must be an http(s) URL"
        )));
    }
    if endpoint.timeout.is_zero() {
        return Err(ConfigLoadError::Validation(format!(
            "{name}.endpoint.timeout must be > 0"
        )));
    }
    Ok(())
}

fn default_cutout_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_edit_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_harmonize_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_upscale_timeout() -> Duration {
    Duration::from_secs(90)
}
fn default_upscale_factor() -> u32 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_yaml() {
        let yaml = r#"
version: "1.0"
name: "test config"
pipeline:
  edit_timeout: 45000
  default_harmonize_mode: "shadow"
services:
  harmonization:
    endpoint:
      url: "http://localhost:9000/harmonize"
    steps: 12
"#;

        let config = RetouchConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.name, Some("test config".to_string()));
        assert_eq!(config.pipeline.edit_timeout, Duration::from_secs(45));
        assert_eq!(config.pipeline.cutout_timeout, Duration::from_secs(60));
        assert_eq!(config.pipeline.default_harmonize_mode, HarmonizeMode::Shadow);
        assert_eq!(config.services.harmonization.steps, 12);
        assert_eq!(
            config.services.harmonization.endpoint.timeout,
            Duration::from_secs(30)
        );
        assert_eq!(config.services.upscale.max_poll_attempts, 30);
    }

    #[test]
    fn test_fractional_millis() {
        let yaml = r#"
version: "1"
pipeline:
  upscale_timeout: 1500.5
services:
  upscale:
    endpoint:
      url: "https://api.replicate.com/v1/predictions"
    poll_interval: 250
"#;

        let config = RetouchConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.pipeline.upscale_timeout, Duration::from_micros(1_500_500));
        assert_eq!(config.services.upscale.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_load_from_file() {
        let yaml = r#"
version: "1"
services:
  upscale:
    endpoint:
      url: "https://api.replicate.com/v1/predictions"
      api_key: "from-file"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = RetouchConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.version, "1");
        assert_eq!(
            config.services.upscale.endpoint.api_key.as_deref(),
            Some("from-file")
        );
    }

    #[test]
    fn test_default_config() {
        let config = RetouchConfig::default();
        assert_eq!(config.version, "1.0");
        assert!(config.name.is_none());
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.default_upscale_factor, 2);
        assert_eq!(
            config.pipeline.timeout_for(StageKind::Upscale),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_unsupported_version() {
        let err = RetouchConfig::from_yaml("version: \"2\"\n").unwrap_err();
        assert!(matches!(err, ConfigLoadError::UnsupportedVersion(v) if v == "2"));
    }

    #[test]
    fn test_upscale_factor_validation() {
        let yaml = r#"
version: "1.0"
pipeline:
  default_upscale_factor: 16
"#;
        let err = RetouchConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("default_upscale_factor"));
    }

    #[test]
    fn test_poll_validation() {
        let yaml = r#"
version: "1.0"
services:
  upscale:
    endpoint:
      url: "https://api.replicate.com/v1/predictions"
    max_poll_attempts: 0
"#;
        let err = RetouchConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("max_poll_attempts"));
    }

    #[test]
    fn test_endpoint_url_validation() {
        let yaml = r#"
version: "1.0"
services:
  segmentation:
    endpoint:
      url: "ftp://example.com/cutout"
"#;
        let err = RetouchConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("segmentation.endpoint.url"));
    }

    #[test]
    fn test_env_keys_fill_only_missing_credentials() {
        let yaml = r#"
version: "1.0"
services:
  edit:
    endpoint:
      url: "https://edit.example.com"
      api_key: "file-key"
"#;
        let mut config = RetouchConfig::from_yaml(yaml).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (EDIT_KEY_VAR, "env-edit"),
            (SEGMENTATION_KEY_VAR, " env-seg "),
            (UPSCALE_KEY_VAR, ""),
        ]);
        config.apply_env_keys(|name| env.get(name).map(|v| v.to_string()));

        let services = &config.services;
        assert_eq!(services.edit.endpoint.api_key.as_deref(), Some("file-key"));
        assert_eq!(
            services.segmentation.endpoint.api_key.as_deref(),
            Some("env-seg")
        );
        assert_eq!(services.upscale.endpoint.api_key, None);
        assert_eq!(services.harmonization.endpoint.api_key, None);
        assert_eq!(services.secrets(), vec!["env-seg".to_string(), "file-key".to_string()]);
    }
}
