use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection details for one external service.
///
/// `api_key` is process-wide configuration and is never taken from a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceEndpoint {
    /// Full URL the stage posts to.
    pub url: String,
    /// Credential sent with every call. Masked out of any error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Network timeout for each individual HTTP request.
    #[serde(with = "crate::serde_millis", default = "default_request_timeout")]
    pub timeout: Duration,
}

impl ServiceEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout: default_request_timeout(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Foreground-extraction service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentationConfig {
    pub endpoint: ServiceEndpoint,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            endpoint: ServiceEndpoint::new("https://fal.run/fal-ai/birefnet/v2"),
        }
    }
}

/// Generative edit service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditConfig {
    pub endpoint: ServiceEndpoint,
    /// Model label, informational only; the endpoint URL already selects the model.
    #[serde(default = "default_edit_model")]
    pub model: String,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            endpoint: ServiceEndpoint::new(
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent",
            )
            .with_timeout(Duration::from_secs(90)),
            model: default_edit_model(),
        }
    }
}

/// Image-to-image harmonization service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarmonizationConfig {
    pub endpoint: ServiceEndpoint,
    #[serde(default = "default_steps")]
    pub steps: u32,
}

impl Default for HarmonizationConfig {
    fn default() -> Self {
        Self {
            endpoint: ServiceEndpoint::new("https://fal.run/fal-ai/flux/dev/image-to-image"),
            steps: default_steps(),
        }
    }
}

/// Asynchronous prediction service used for upscaling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpscaleConfig {
    /// Submission URL; poll URLs come back from the service.
    pub endpoint: ServiceEndpoint,
    /// Model version identifier sent with each submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(with = "crate::serde_millis", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default)]
    pub face_enhance: bool,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            endpoint: ServiceEndpoint::new("https://api.replicate.com/v1/predictions"),
            version: None,
            poll_interval: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            face_enhance: false,
        }
    }
}

/// Configuration for every stage client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StagesConfig {
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub edit: EditConfig,
    #[serde(default)]
    pub harmonization: HarmonizationConfig,
    #[serde(default)]
    pub upscale: UpscaleConfig,
}

impl StagesConfig {
    /// Every configured credential, used to scrub upstream error text.
    pub fn secrets(&self) -> Vec<String> {
        [
            &self.segmentation.endpoint,
            &self.edit.endpoint,
            &self.harmonization.endpoint,
            &self.upscale.endpoint,
        ]
        .into_iter()
        .filter_map(|endpoint| endpoint.api_key.clone())
        .filter(|key| !key.is_empty())
        .collect()
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_edit_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

fn default_steps() -> u32 {
    28
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_max_poll_attempts() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upscale_defaults_match_sixty_second_ceiling() {
        let cfg = UpscaleConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.max_poll_attempts, 30);
        assert_eq!(cfg.poll_interval * cfg.max_poll_attempts, Duration::from_secs(60));
    }

    #[test]
    fn endpoint_deserializes_millis_and_defaults() {
        let endpoint: ServiceEndpoint =
            serde_json::from_str(r#"{"url":"http://localhost/x","timeout":1500}"#).unwrap();
        assert_eq!(endpoint.timeout, Duration::from_millis(1500));
        assert!(endpoint.api_key.is_none());

        let endpoint: ServiceEndpoint =
            serde_json::from_str(r#"{"url":"http://localhost/x"}"#).unwrap();
        assert_eq!(endpoint.timeout, Duration::from_secs(30));
    }

    #[test]
    fn secrets_collects_configured_keys() {
        let mut cfg = StagesConfig::default();
        cfg.edit.endpoint = cfg.edit.endpoint.clone().with_api_key("edit-key");
        cfg.upscale.endpoint = cfg.upscale.endpoint.clone().with_api_key("");
        assert_eq!(cfg.secrets(), vec!["edit-key".to_string()]);
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = StagesConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: StagesConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
