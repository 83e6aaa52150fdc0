//! Pipeline observer backed by the `metrics` facade.

use metrics::{counter, histogram};
use retouch::{PipelineMetrics, PipelineState, StageRecord};
use std::time::Duration;

/// Forwards stage and run events to whatever recorder is installed globally.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl PipelineMetrics for RecorderMetrics {
    fn record_stage(&self, record: &StageRecord) {
        let stage = record.stage.as_str();
        counter!(
            "retouch_stage_total",
            "stage" => stage,
            "disposition" => record.disposition.as_str()
        )
        .increment(1);

        if record.invoked() {
            histogram!("retouch_stage_seconds", "stage" => stage)
                .record(record.duration.as_secs_f64());
        }
        if record.fallback_used {
            counter!("retouch_fallback_total", "stage" => stage).increment(1);
        }
    }

    fn record_run(&self, latency: Duration, state: PipelineState) {
        counter!("retouch_runs_total", "state" => state.as_str()).increment(1);
        histogram!("retouch_run_seconds").record(latency.as_secs_f64());
    }
}
