//! Retouch Server - HTTP adapter for the retouch image pipeline
//!
//! Accepts an image (data URL or http(s) URL) plus an edit instruction, runs the
//! cutout → edit → harmonize → upscale pipeline, and answers with the final image and
//! the execution log. Failed runs map onto HTTP statuses by failure kind:
//!
//! | Failure | Status |
//! |---------|--------|
//! | policy rejection | 422 |
//! | upstream error | 502 |
//! | timeout | 504 |
//! | cancelled (run deadline) | 503 |
//! | malformed request or invalid stage input | 400 |
//!
//! Authentication, billing, and persistence belong to the surrounding application
//! and are not handled here.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! - `GET /` - API information
//! - `GET /health` - Liveness probe
//! - `GET /ready` - Readiness probe (all service credentials present)
//! - `GET /metrics` - Prometheus metrics
//! - `GET /api/v1/metadata` - Server metadata
//! - `POST /api/v1/edit` - Run the pipeline

pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
