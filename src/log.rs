//! Per-run execution log.

use serde::Serialize;
use std::time::Duration;

use stages::{StageFailure, StageKind};

/// Orchestrator state. `Failed` is only ever entered from `Cutting` or `Editing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Cutting,
    Editing,
    Harmonizing,
    Upscaling,
    Done,
    Failed,
    Cancelled,
}

impl PipelineState {
    /// State held while `stage` is in flight.
    pub fn running(stage: StageKind) -> Self {
        match stage {
            StageKind::Cutout => PipelineState::Cutting,
            StageKind::Edit => PipelineState::Editing,
            StageKind::Harmonize => PipelineState::Harmonizing,
            StageKind::Upscale => PipelineState::Upscaling,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Cutting => "cutting",
            PipelineState::Editing => "editing",
            PipelineState::Harmonizing => "harmonizing",
            PipelineState::Upscaling => "upscaling",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        }
    }
}

/// How one stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageDisposition {
    /// The stage produced an image, possibly its own input after a best-effort fallback.
    Success,
    Failed,
    Cancelled,
    /// Disabled by the request; never invoked.
    Skipped,
}

impl StageDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageDisposition::Success => "success",
            StageDisposition::Failed => "failed",
            StageDisposition::Cancelled => "cancelled",
            StageDisposition::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub disposition: StageDisposition,
    #[serde(rename = "duration_ms", with = "stages::serde_millis")]
    pub duration: Duration,
    pub fallback_used: bool,
    /// The failure that ended the stage, or the one swallowed by a fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

impl StageRecord {
    pub fn success(stage: StageKind, duration: Duration, fallback: Option<StageFailure>) -> Self {
        Self {
            stage,
            disposition: StageDisposition::Success,
            duration,
            fallback_used: fallback.is_some(),
            failure: fallback,
        }
    }

    pub fn failed(stage: StageKind, duration: Duration, failure: StageFailure) -> Self {
        Self {
            stage,
            disposition: StageDisposition::Failed,
            duration,
            fallback_used: false,
            failure: Some(failure),
        }
    }

    pub fn cancelled(stage: StageKind, duration: Duration) -> Self {
        Self {
            stage,
            disposition: StageDisposition::Cancelled,
            duration,
            fallback_used: false,
            failure: Some(StageFailure::cancelled(format!(
                "run cancelled during the {stage} stage"
            ))),
        }
    }

    pub fn skipped(stage: StageKind) -> Self {
        Self {
            stage,
            disposition: StageDisposition::Skipped,
            duration: Duration::ZERO,
            fallback_used: false,
            failure: None,
        }
    }

    /// Whether the backing service was actually called.
    pub fn invoked(&self) -> bool {
        !matches!(self.disposition, StageDisposition::Skipped)
    }
}

/// Stage records in execution order plus every state the run passed through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionLog {
    pub records: Vec<StageRecord>,
    pub transitions: Vec<PipelineState>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            transitions: vec![PipelineState::Idle],
        }
    }

    pub(crate) fn push(&mut self, record: StageRecord) {
        self.records.push(record);
    }

    pub(crate) fn enter(&mut self, state: PipelineState) {
        self.transitions.push(state);
    }

    /// Latest state reached.
    pub fn state(&self) -> PipelineState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(PipelineState::Idle)
    }

    pub fn record(&self, stage: StageKind) -> Option<&StageRecord> {
        self.records.iter().find(|record| record.stage == stage)
    }

    /// Stages whose failure was absorbed by a passthrough.
    pub fn fallbacks(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.records
            .iter()
            .filter(|record| record.fallback_used)
            .map(|record| record.stage)
    }

    pub fn total_duration(&self) -> Duration {
        self.records.iter().map(|record| record.duration).sum()
    }
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_log_starts_idle() {
        let log = ExecutionLog::new();
        assert_eq!(log.state(), PipelineState::Idle);
        assert!(!log.state().is_terminal());
        assert!(log.records.is_empty());
    }

    #[test]
    fn fallback_is_recorded_as_success() {
        let record = StageRecord::success(
            StageKind::Harmonize,
            Duration::from_millis(40),
            Some(StageFailure::upstream("HTTP 500")),
        );
        assert_eq!(record.disposition, StageDisposition::Success);
        assert!(record.fallback_used);
        assert!(record.invoked());
        assert!(!StageRecord::skipped(StageKind::Cutout).invoked());
    }

    #[test]
    fn serializes_for_diagnostics() {
        let mut log = ExecutionLog::new();
        log.enter(PipelineState::Editing);
        log.push(StageRecord::success(
            StageKind::Edit,
            Duration::from_millis(1250),
            None,
        ));
        log.enter(PipelineState::Done);

        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["transitions"], serde_json::json!(["idle", "editing", "done"]));
        assert_eq!(value["records"][0]["stage"], "edit");
        assert_eq!(value["records"][0]["duration_ms"], 1250);
        assert_eq!(value["records"][0]["disposition"], "success");
        assert!(value["records"][0].get("failure").is_none());
    }

    #[test]
    fn running_state_per_stage() {
        assert_eq!(PipelineState::running(StageKind::Cutout), PipelineState::Cutting);
        assert_eq!(PipelineState::running(StageKind::Upscale), PipelineState::Upscaling);
    }
}
