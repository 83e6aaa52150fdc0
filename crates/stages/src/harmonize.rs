use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::HarmonizationConfig;
use crate::http::{AuthScheme, HttpTransport};
use crate::stage::wrong_params;
use crate::{HarmonizeMode, ImageRef, Stage, StageFailure, StageKind, StageParams, StageRequest};

/// Image-to-image strength. Kept low so the product itself is not redrawn.
pub const HARMONIZE_STRENGTH: f64 = 0.25;

/// Lighting/shadow enhancement. Best-effort: failures pass the input through.
pub struct HarmonizeStage {
    transport: HttpTransport,
    config: HarmonizationConfig,
}

impl HarmonizeStage {
    pub fn new(transport: HttpTransport, config: HarmonizationConfig) -> Self {
        Self { transport, config }
    }
}

pub fn harmonize_prompt(mode: HarmonizeMode) -> &'static str {
    match mode {
        HarmonizeMode::Relight => {
            "Relight the scene with soft, even studio lighting that matches the background. \
             Keep the product, its colors, and its shape exactly as they are."
        }
        HarmonizeMode::Shadow => {
            "Add a natural, soft contact shadow under the product consistent with the scene \
             lighting. Do not change the product itself."
        }
    }
}

#[async_trait]
impl Stage for HarmonizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Harmonize
    }

    async fn invoke(&self, request: &StageRequest) -> Result<ImageRef, StageFailure> {
        let StageParams::Harmonize { mode } = &request.params else {
            return Err(wrong_params(self.kind(), &request.params));
        };

        let payload = json!({
            "image_url": request.image.to_request_value(),
            "prompt": harmonize_prompt(*mode),
            "strength": HARMONIZE_STRENGTH,
            "num_inference_steps": self.config.steps,
            "num_images": 1,
        });
        let response = self
            .transport
            .post_json(&self.config.endpoint, AuthScheme::Key, &payload, "harmonization")
            .await?;

        first_candidate_url(&response)
            .map(ImageRef::remote)
            .ok_or_else(|| StageFailure::upstream("harmonization response carried no image URL"))
    }
}

/// First usable URL in `{"images": [{"url": ...}, ...]}`.
fn first_candidate_url(response: &Value) -> Option<String> {
    response
        .get("images")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|candidate| candidate.get("url").and_then(Value::as_str))
        .map(str::trim)
        .find(|url| !url.is_empty())
        .map(str::to_string)
}
