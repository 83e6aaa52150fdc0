use std::sync::Arc;
use std::time::{Duration, Instant};

use stages::http::HttpTransport;
use stages::policy;
use stages::{
    CutoutStage, EditStage, HarmonizeMode, HarmonizeStage, ImageRef, SegmentationProfile, Stage,
    StageKind, StageParams, StageRequest, StageResult, UpscaleStage,
};

use crate::config::{PipelineSettings, RetouchConfig};
use crate::log::{ExecutionLog, PipelineState, StageRecord};
use crate::{CancelToken, PipelineError, PipelineFailure, PipelineMetrics};

/// Which optional stages a request runs. Edit always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSelection {
    /// Off when the caller already supplies a cutout.
    pub cutout: bool,
    pub harmonize: bool,
    pub upscale: bool,
}

impl StageSelection {
    pub fn all() -> Self {
        Self {
            cutout: true,
            harmonize: true,
            upscale: true,
        }
    }

    pub fn is_enabled(&self, stage: StageKind) -> bool {
        match stage {
            StageKind::Cutout => self.cutout,
            StageKind::Edit => true,
            StageKind::Harmonize => self.harmonize,
            StageKind::Upscale => self.upscale,
        }
    }
}

impl Default for StageSelection {
    fn default() -> Self {
        Self::all()
    }
}

/// End-to-end input for one run. Unset parameters fall back to [`PipelineSettings`].
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub source: ImageRef,
    pub instruction: String,
    pub stages: StageSelection,
    pub profile: Option<SegmentationProfile>,
    pub harmonize_mode: Option<HarmonizeMode>,
    pub upscale_factor: Option<u32>,
}

impl PipelineRequest {
    pub fn new(source: ImageRef, instruction: impl Into<String>) -> Self {
        Self {
            source,
            instruction: instruction.into(),
            stages: StageSelection::all(),
            profile: None,
            harmonize_mode: None,
            upscale_factor: None,
        }
    }

    pub fn with_stages(mut self, stages: StageSelection) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_profile(mut self, profile: SegmentationProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_harmonize_mode(mut self, mode: HarmonizeMode) -> Self {
        self.harmonize_mode = Some(mode);
        self
    }

    pub fn with_upscale_factor(mut self, factor: u32) -> Self {
        self.upscale_factor = Some(factor);
        self
    }
}

/// Result of a run that reached `Done`.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub image: ImageRef,
    pub log: ExecutionLog,
}

/// The four stage implementations a [`Pipeline`] sequences.
#[derive(Clone)]
pub struct PipelineStages {
    pub cutout: Arc<dyn Stage>,
    pub edit: Arc<dyn Stage>,
    pub harmonize: Arc<dyn Stage>,
    pub upscale: Arc<dyn Stage>,
}

impl PipelineStages {
    /// HTTP-backed stages sharing one transport.
    pub fn from_config(config: &RetouchConfig) -> Self {
        let services = &config.services;
        let transport = HttpTransport::new(services.secrets());
        Self {
            cutout: Arc::new(CutoutStage::new(
                transport.clone(),
                services.segmentation.clone(),
            )),
            edit: Arc::new(EditStage::new(transport.clone(), services.edit.clone())),
            harmonize: Arc::new(HarmonizeStage::new(
                transport.clone(),
                services.harmonization.clone(),
            )),
            upscale: Arc::new(UpscaleStage::new(transport, services.upscale.clone())),
        }
    }

    fn get(&self, stage: StageKind) -> &Arc<dyn Stage> {
        match stage {
            StageKind::Cutout => &self.cutout,
            StageKind::Edit => &self.edit,
            StageKind::Harmonize => &self.harmonize,
            StageKind::Upscale => &self.upscale,
        }
    }
}

/// Sequential orchestrator over the four stages.
///
/// Holds no per-run state, so one instance can serve any number of concurrent runs.
#[derive(Clone)]
pub struct Pipeline {
    stages: PipelineStages,
    settings: PipelineSettings,
    metrics: Option<Arc<dyn PipelineMetrics>>,
}

impl Pipeline {
    pub fn new(stages: PipelineStages, settings: PipelineSettings) -> Self {
        Self {
            stages,
            settings,
            metrics: None,
        }
    }

    pub fn from_config(config: &RetouchConfig) -> Self {
        Self::new(
            PipelineStages::from_config(config),
            config.pipeline.clone(),
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run every enabled stage in order.
    ///
    /// A fatal-stage failure stops the run at once and later stages are never invoked.
    /// Best-effort stages always hand an image onward, their own input when they fail.
    /// Raising `cancel` aborts the stage in flight, including a pending upscale poll.
    pub async fn run(
        &self,
        request: PipelineRequest,
        cancel: &CancelToken,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let started = Instant::now();
        let mut log = ExecutionLog::new();
        let mut image = request.source.clone();

        // A rejected instruction must not cost any outbound call, the cutout included.
        if let Err(failure) = policy::check_instruction(&request.instruction) {
            tracing::warn!(stage = %StageKind::Edit, status = %failure.kind, "instruction rejected");
            log.enter(PipelineState::Editing);
            self.record(
                &mut log,
                StageRecord::failed(StageKind::Edit, Duration::ZERO, failure.clone()),
            );
            return Err(self.finish_failed(
                log,
                PipelineError::StageFailed {
                    stage: StageKind::Edit,
                    failure,
                },
                PipelineState::Failed,
                started,
            ));
        }

        for stage in StageKind::ALL {
            if !request.stages.is_enabled(stage) {
                tracing::debug!(stage = %stage, "stage disabled by request");
                self.record(&mut log, StageRecord::skipped(stage));
                continue;
            }

            if cancel.is_cancelled() {
                return Err(self.cancelled(log, stage, Duration::ZERO, started));
            }
            log.enter(PipelineState::running(stage));

            let stage_request = StageRequest::new(
                image.clone(),
                self.params_for(stage, &request),
                self.settings.timeout_for(stage),
            );
            tracing::info!(stage = %stage, "stage started");

            let stage_started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.stages.get(stage).execute(stage_request) => Some(result),
            };
            let elapsed = stage_started.elapsed();

            match result {
                None => return Err(self.cancelled(log, stage, elapsed, started)),
                Some(StageResult::Success {
                    image: output,
                    fallback,
                }) => {
                    tracing::info!(
                        stage = %stage,
                        duration_ms = elapsed.as_millis() as u64,
                        fallback = fallback.is_some(),
                        "stage finished"
                    );
                    self.record(&mut log, StageRecord::success(stage, elapsed, fallback));
                    image = output;
                }
                Some(StageResult::Failure(failure)) => {
                    tracing::warn!(
                        stage = %stage,
                        duration_ms = elapsed.as_millis() as u64,
                        status = %failure.kind,
                        "pipeline failed"
                    );
                    self.record(
                        &mut log,
                        StageRecord::failed(stage, elapsed, failure.clone()),
                    );
                    return Err(self.finish_failed(
                        log,
                        PipelineError::StageFailed { stage, failure },
                        PipelineState::Failed,
                        started,
                    ));
                }
            }
        }

        log.enter(PipelineState::Done);
        self.record_run(started.elapsed(), PipelineState::Done);
        tracing::info!(
            duration_ms = started.elapsed().as_millis() as u64,
            fallbacks = log.fallbacks().count(),
            "pipeline done"
        );
        Ok(PipelineOutcome { image, log })
    }

    fn params_for(&self, stage: StageKind, request: &PipelineRequest) -> StageParams {
        match stage {
            StageKind::Cutout => StageParams::Cutout {
                profile: request.profile.unwrap_or(self.settings.default_profile),
            },
            StageKind::Edit => StageParams::Edit {
                instruction: request.instruction.clone(),
            },
            StageKind::Harmonize => StageParams::Harmonize {
                mode: request
                    .harmonize_mode
                    .unwrap_or(self.settings.default_harmonize_mode),
            },
            StageKind::Upscale => StageParams::Upscale {
                scale: request
                    .upscale_factor
                    .unwrap_or(self.settings.default_upscale_factor),
            },
        }
    }

    fn cancelled(
        &self,
        mut log: ExecutionLog,
        stage: StageKind,
        elapsed: Duration,
        started: Instant,
    ) -> PipelineFailure {
        tracing::info!(stage = %stage, "pipeline cancelled");
        self.record(&mut log, StageRecord::cancelled(stage, elapsed));
        self.finish_failed(
            log,
            PipelineError::Cancelled { stage },
            PipelineState::Cancelled,
            started,
        )
    }

    fn finish_failed(
        &self,
        mut log: ExecutionLog,
        error: PipelineError,
        state: PipelineState,
        started: Instant,
    ) -> PipelineFailure {
        log.enter(state);
        self.record_run(started.elapsed(), state);
        PipelineFailure { error, log }
    }

    fn record(&self, log: &mut ExecutionLog, record: StageRecord) {
        if let Some(metrics) = &self.metrics {
            metrics.record_stage(&record);
        }
        log.push(record);
    }

    fn record_run(&self, latency: Duration, state: PipelineState) {
        if let Some(metrics) = &self.metrics {
            metrics.record_run(latency, state);
        }
    }
}
