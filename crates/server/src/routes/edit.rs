use crate::error::{ServerError, ServerResult};
use crate::middleware::RequestId;
use crate::state::ServerState;
use axum::extract::{Extension, State};
use axum::response::IntoResponse;
use axum::Json;
use retouch::{
    CancelToken, ExecutionLog, ImageRef, PipelineRequest, PipelineState, StageKind,
    StageSelection, MAX_UPSCALE_FACTOR,
};
use serde::{Deserialize, Serialize};
use stages::{HarmonizeMode, SegmentationProfile};
use std::sync::Arc;

/// Request to run the pipeline on one image
#[derive(Debug, Deserialize)]
pub struct EditRequest {
    /// `data:<mime>;base64,...` or an http(s) URL
    pub image: String,

    /// Free-text edit instruction
    pub instruction: String,

    /// Run the cutout stage; turn off when `image` already is a cutout
    #[serde(default = "default_true")]
    pub cutout: bool,

    #[serde(default = "default_true")]
    pub harmonize: bool,

    #[serde(default = "default_true")]
    pub upscale: bool,

    #[serde(default)]
    pub profile: Option<SegmentationProfile>,

    #[serde(default)]
    pub harmonize_mode: Option<HarmonizeMode>,

    #[serde(default)]
    pub upscale_factor: Option<u32>,
}

/// Response for a run that reached `done`
#[derive(Debug, Serialize)]
pub struct EditResponse {
    pub request_id: String,
    pub status: PipelineState,
    /// Final image as a URL or a data URL
    pub image: String,
    /// Best-effort stages whose input was passed through
    pub fallbacks: Vec<StageKind>,
    /// Time spent inside stages, summed over the log
    pub duration_ms: u64,
    pub log: ExecutionLog,
}

fn default_true() -> bool {
    true
}

impl EditRequest {
    fn into_pipeline_request(self) -> ServerResult<PipelineRequest> {
        let source = ImageRef::parse(&self.image)
            .map_err(|err| ServerError::BadRequest(format!("image: {err}")))?;

        if let Some(factor) = self.upscale_factor {
            if !(1..=MAX_UPSCALE_FACTOR).contains(&factor) {
                return Err(ServerError::BadRequest(format!(
                    "upscale_factor must be within 1..={MAX_UPSCALE_FACTOR}"
                )));
            }
        }

        Ok(PipelineRequest {
            source,
            instruction: self.instruction,
            stages: StageSelection {
                cutout: self.cutout,
                harmonize: self.harmonize,
                upscale: self.upscale,
            },
            profile: self.profile,
            harmonize_mode: self.harmonize_mode,
            upscale_factor: self.upscale_factor,
        })
    }
}

/// Run the retouch pipeline on one image.
///
/// Stages run in order: cutout, edit, harmonize, upscale. A failed cutout or edit ends
/// the request with an error carrying the execution log; harmonize and upscale never
/// fail the request and show up under `fallbacks` instead.
///
/// # Example
/// ```json
/// // Request
/// {
///   "image": "https://cdn.example.com/jacket.jpg",
///   "instruction": "place on a light oak table",
///   "harmonize_mode": "shadow",
///   "upscale_factor": 2
/// }
///
/// // Response
/// {
///   "request_id": "7f0c…",
///   "status": "done",
///   "image": "https://cdn.example.com/final.png",
///   "fallbacks": [],
///   "log": { "records": [...], "transitions": ["idle", "cutting", ...] }
/// }
/// ```
pub async fn edit_image(
    State(state): State<Arc<ServerState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(body): Json<EditRequest>,
) -> ServerResult<impl IntoResponse> {
    let request = body.into_pipeline_request()?;

    let cancel = CancelToken::new();
    let deadline = cancel.cancel_after(state.config.run_deadline());
    let result = state.pipeline.run(request, &cancel).await;
    deadline.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(failure) => {
            tracing::warn!(
                request_id = %request_id,
                stage = %failure.error.stage(),
                status = %failure.error.kind(),
                duration_ms = failure.log.total_duration().as_millis() as u64,
                "edit request failed"
            );
            return Err(failure.into());
        }
    };

    Ok(Json(EditResponse {
        request_id,
        status: outcome.log.state(),
        image: outcome.image.to_request_value(),
        fallbacks: outcome.log.fallbacks().collect(),
        duration_ms: outcome.log.total_duration().as_millis() as u64,
        log: outcome.log,
    }))
}
