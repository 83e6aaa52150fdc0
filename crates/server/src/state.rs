use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::metrics::RecorderMetrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use retouch::{Pipeline, PipelineSettings, RetouchConfig};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Pipeline shared by all requests; it holds no per-run state
    pub pipeline: Arc<Pipeline>,

    /// Pipeline configuration the stages were built from
    pub pipeline_config: Arc<RetouchConfig>,

    /// Prometheus render handle, present when the recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    /// Create new server state: load the pipeline configuration and install the
    /// Prometheus recorder when metrics are enabled.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let pipeline_config = match config.pipeline_config.as_deref() {
            Some(path) => RetouchConfig::from_file(path)?,
            None => {
                let mut defaults = RetouchConfig::default();
                defaults.apply_env_keys(|name| std::env::var(name).ok());
                defaults
            }
        };

        let metrics = if config.metrics_enabled {
            match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => Some(handle),
                Err(err) => {
                    tracing::warn!(error = %err, "metrics recorder not installed");
                    None
                }
            }
        } else {
            None
        };

        let mut pipeline = Pipeline::from_config(&pipeline_config);
        if metrics.is_some() {
            pipeline = pipeline.with_metrics(Arc::new(RecorderMetrics));
        }

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            pipeline_config: Arc::new(pipeline_config),
            metrics,
        })
    }

    /// State around an already-built pipeline, without a metrics recorder.
    pub fn with_pipeline(
        config: ServerConfig,
        pipeline_config: RetouchConfig,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            pipeline_config: Arc::new(pipeline_config),
            metrics: None,
        }
    }

    /// Names of services that have no credential configured.
    pub fn services_missing_keys(&self) -> Vec<&'static str> {
        let services = &self.pipeline_config.services;
        [
            ("segmentation", &services.segmentation.endpoint),
            ("edit", &services.edit.endpoint),
            ("harmonization", &services.harmonization.endpoint),
            ("upscale", &services.upscale.endpoint),
        ]
        .into_iter()
        .filter(|(_, endpoint)| endpoint.api_key.as_deref().map_or(true, str::is_empty))
        .map(|(name, _)| name)
        .collect()
    }
}

/// Server metadata for health checks
#[derive(Debug, serde::Serialize)]
pub struct ServerMetadata {
    pub version: String,
    pub uptime_seconds: u64,
    pub run_deadline_secs: u64,
    pub pipeline: PipelineSettings,
}
