//! Retouch stage clients
//!
//! Each stage is a narrow adapter around one external inference service. It takes an
//! [`ImageRef`] plus stage-specific parameters, speaks that service's own request shape,
//! and hands back a normalized [`StageResult`]. Nothing here knows about the other
//! stages; sequencing lives in the `retouch` crate.
//!
//! | Stage | Service | On failure |
//! |-------|---------|------------|
//! | [`CutoutStage`] | foreground segmentation | fatal |
//! | [`EditStage`] | generative edit (multi-part response) | fatal |
//! | [`HarmonizeStage`] | image-to-image relight/shadow | input passes through |
//! | [`UpscaleStage`] | async prediction job, polled | input passes through |
//!
//! The edit stage checks the instruction (length, restricted terms) before any network
//! call and always appends [`policy::GUARDRAIL_SUFFIX`] to what it sends.
//!
//! ## Quick example
//!
//! ```no_run
//! use stages::config::StagesConfig;
//! use stages::http::HttpTransport;
//! use stages::{ImageRef, Stage, StageParams, StageRequest, UpscaleStage};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cfg = StagesConfig::default();
//!     let transport = HttpTransport::new(cfg.secrets());
//!     let upscale = UpscaleStage::new(transport, cfg.upscale.clone());
//!
//!     let request = StageRequest::new(
//!         ImageRef::remote("https://cdn.example.com/edited.png"),
//!         StageParams::Upscale { scale: 2 },
//!         Duration::from_secs(90),
//!     );
//!     let result = upscale.execute(request).await;
//!     println!("fallback used: {}", result.fallback_used());
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod parts;
pub mod policy;
pub mod serde_millis;
pub mod types;

mod cutout;
mod edit;
mod harmonize;
mod image;
mod stage;
mod upscale;

pub use crate::cutout::CutoutStage;
pub use crate::edit::EditStage;
pub use crate::error::{FailureKind, StageFailure};
pub use crate::harmonize::{harmonize_prompt, HarmonizeStage, HARMONIZE_STRENGTH};
pub use crate::image::{ImageRef, ImageRefError, DEFAULT_MIME_TYPE};
pub use crate::stage::{apply_policy, Stage};
pub use crate::types::{
    AsyncJobHandle, FailurePolicy, HarmonizeMode, JobStatus, SegmentationProfile, StageKind,
    StageParams, StageRequest, StageResult,
};
pub use crate::upscale::UpscaleStage;
