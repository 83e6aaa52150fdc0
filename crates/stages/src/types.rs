use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{ImageRef, StageFailure};

/// The four stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Cutout,
    Edit,
    Harmonize,
    Upscale,
}

/// What a failure in a stage means for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failure aborts the pipeline.
    Fatal,
    /// Failure degrades to a passthrough of the stage input.
    BestEffort,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Cutout,
        StageKind::Edit,
        StageKind::Harmonize,
        StageKind::Upscale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Cutout => "cutout",
            StageKind::Edit => "edit",
            StageKind::Harmonize => "harmonize",
            StageKind::Upscale => "upscale",
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        match self {
            StageKind::Cutout | StageKind::Edit => FailurePolicy::Fatal,
            StageKind::Harmonize | StageKind::Upscale => FailurePolicy::BestEffort,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Segmentation model profile for the cutout service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationProfile {
    #[default]
    General,
    FineDetail,
}

impl SegmentationProfile {
    /// Model name understood by the segmentation service.
    pub fn model_name(&self) -> &'static str {
        match self {
            SegmentationProfile::General => "General Use (Light)",
            SegmentationProfile::FineDetail => "Matting",
        }
    }
}

/// Enhancement applied by the harmonization stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarmonizeMode {
    #[default]
    Relight,
    Shadow,
}

impl HarmonizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarmonizeMode::Relight => "relight",
            HarmonizeMode::Shadow => "shadow",
        }
    }
}

/// Stage-specific parameters. Each stage only accepts its own variant.
#[derive(Debug, Clone, PartialEq)]
pub enum StageParams {
    Cutout { profile: SegmentationProfile },
    Edit { instruction: String },
    Harmonize { mode: HarmonizeMode },
    Upscale { scale: u32 },
}

impl StageParams {
    pub fn kind(&self) -> StageKind {
        match self {
            StageParams::Cutout { .. } => StageKind::Cutout,
            StageParams::Edit { .. } => StageKind::Edit,
            StageParams::Harmonize { .. } => StageKind::Harmonize,
            StageParams::Upscale { .. } => StageKind::Upscale,
        }
    }
}

/// Input to a single stage invocation.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub image: ImageRef,
    pub params: StageParams,
    /// Wall-clock budget for the whole stage, including any internal polling.
    pub timeout: Duration,
}

impl StageRequest {
    pub fn new(image: ImageRef, params: StageParams, timeout: Duration) -> Self {
        Self {
            image,
            params,
            timeout,
        }
    }
}

/// Normalized outcome of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// The stage produced `image`. For best-effort stages `fallback` holds the swallowed
    /// failure when `image` is the unchanged input.
    Success {
        image: ImageRef,
        fallback: Option<StageFailure>,
    },
    Failure(StageFailure),
}

impl StageResult {
    pub fn success(image: ImageRef) -> Self {
        StageResult::Success {
            image,
            fallback: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }

    pub fn fallback_used(&self) -> bool {
        matches!(
            self,
            StageResult::Success {
                fallback: Some(_),
                ..
            }
        )
    }

    pub fn image(&self) -> Option<&ImageRef> {
        match self {
            StageResult::Success { image, .. } => Some(image),
            StageResult::Failure(_) => None,
        }
    }
}

/// Provider-issued handle for an asynchronous upscale job. Lives only for one stage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncJobHandle {
    pub id: String,
    pub poll_url: String,
}

/// Status reported by the prediction service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded { output: Option<String> },
    Failed { error: Option<String> },
    Pending(String),
}

impl JobStatus {
    pub fn parse(status: &str, output: Option<String>, error: Option<String>) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "succeeded" => JobStatus::Succeeded { output },
            "failed" | "canceled" | "cancelled" => JobStatus::Failed { error },
            other => JobStatus::Pending(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_and_best_effort_classification() {
        assert_eq!(StageKind::Cutout.policy(), FailurePolicy::Fatal);
        assert_eq!(StageKind::Edit.policy(), FailurePolicy::Fatal);
        assert_eq!(StageKind::Harmonize.policy(), FailurePolicy::BestEffort);
        assert_eq!(StageKind::Upscale.policy(), FailurePolicy::BestEffort);
    }

    #[test]
    fn params_report_their_stage() {
        let params = StageParams::Upscale { scale: 4 };
        assert_eq!(params.kind(), StageKind::Upscale);
    }

    #[test]
    fn job_status_parsing() {
        assert_eq!(
            JobStatus::parse("SUCCEEDED", Some("u".into()), None),
            JobStatus::Succeeded {
                output: Some("u".into())
            }
        );
        assert!(JobStatus::parse("canceled", None, None).is_terminal());
        assert_eq!(
            JobStatus::parse("processing", None, None),
            JobStatus::Pending("processing".into())
        );
        assert!(!JobStatus::parse("starting", None, None).is_terminal());
    }

    #[test]
    fn fallback_flag_reflects_recovered_failure() {
        let plain = StageResult::success(ImageRef::remote("https://x/a.png"));
        assert!(!plain.fallback_used());

        let recovered = StageResult::Success {
            image: ImageRef::remote("https://x/a.png"),
            fallback: Some(StageFailure::upstream("HTTP 500")),
        };
        assert!(recovered.fallback_used());
        assert!(recovered.is_success());
    }

    #[test]
    fn stage_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StageKind::Harmonize).unwrap(),
            "\"harmonize\""
        );
        assert_eq!(StageKind::Upscale.to_string(), "upscale");
    }
}
