//! Umbrella crate for the retouch pipeline.
//!
//! This crate sequences the stage clients from [`stages`] into one operation:
//! `Idle → Cutting → Editing → Harmonizing → Upscaling → Done`. Cutout and edit are
//! fatal (their failure ends the run in `Failed`); harmonization and upscale are
//! best-effort and pass their input through when they fail. Every run returns an
//! [`ExecutionLog`] from which each stage's disposition can be reconstructed, on the
//! success path and the failure path alike.
//!
//! ```no_run
//! use retouch::{CancelToken, Pipeline, PipelineRequest, RetouchConfig};
//! use stages::ImageRef;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RetouchConfig::from_file("retouch.yaml")?;
//!     let pipeline = Pipeline::from_config(&config);
//!
//!     let cancel = CancelToken::new();
//!     let _deadline = cancel.cancel_after(Duration::from_secs(300));
//!     let request = PipelineRequest::new(
//!         ImageRef::remote("https://cdn.example.com/jacket.jpg"),
//!         "place the jacket on a light oak table",
//!     );
//!
//!     match pipeline.run(request, &cancel).await {
//!         Ok(outcome) => println!("done: {:?}", outcome.image.url()),
//!         Err(failure) => eprintln!("{} after {:?}", failure.error, failure.log.transitions),
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;

mod cancel;
mod log;
mod pipeline;

pub use crate::cancel::CancelToken;
pub use crate::config::{ConfigLoadError, PipelineSettings, RetouchConfig, MAX_UPSCALE_FACTOR};
pub use crate::log::{ExecutionLog, PipelineState, StageDisposition, StageRecord};
pub use crate::pipeline::{
    Pipeline, PipelineOutcome, PipelineRequest, PipelineStages, StageSelection,
};

pub use stages::{FailureKind, ImageRef, StageFailure, StageKind};

use std::time::Duration;
use thiserror::Error;

/// Why a run did not reach `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {failure}")]
    StageFailed {
        stage: StageKind,
        failure: StageFailure,
    },
    #[error("pipeline cancelled during the {stage} stage")]
    Cancelled { stage: StageKind },
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::StageFailed { failure, .. } => failure.kind,
            PipelineError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            PipelineError::StageFailed { stage, .. } | PipelineError::Cancelled { stage } => *stage,
        }
    }
}

/// Error path of [`Pipeline::run`]: the error plus everything logged before it.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct PipelineFailure {
    #[source]
    pub error: PipelineError,
    pub log: ExecutionLog,
}

/// Metrics observer for pipeline runs.
///
/// Attached per [`Pipeline`] with [`Pipeline::with_metrics`]; called synchronously from
/// the run, so implementations should only bump counters.
pub trait PipelineMetrics: Send + Sync {
    /// Called once per stage, skipped stages included.
    fn record_stage(&self, record: &StageRecord);
    /// Called once per run with its terminal state.
    fn record_run(&self, latency: Duration, state: PipelineState);
}
