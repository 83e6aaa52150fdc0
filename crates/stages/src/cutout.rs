use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SegmentationConfig;
use crate::http::{AuthScheme, HttpTransport};
use crate::stage::wrong_params;
use crate::{ImageRef, Stage, StageFailure, StageKind, StageParams, StageRequest};

/// Foreground/background segmentation. Fatal on failure.
pub struct CutoutStage {
    transport: HttpTransport,
    config: SegmentationConfig,
}

impl CutoutStage {
    pub fn new(transport: HttpTransport, config: SegmentationConfig) -> Self {
        Self { transport, config }
    }
}

#[async_trait]
impl Stage for CutoutStage {
    fn kind(&self) -> StageKind {
        StageKind::Cutout
    }

    async fn invoke(&self, request: &StageRequest) -> Result<ImageRef, StageFailure> {
        let StageParams::Cutout { profile } = &request.params else {
            return Err(wrong_params(self.kind(), &request.params));
        };

        let payload = json!({
            "image_url": request.image.to_request_value(),
            "model": profile.model_name(),
            "output_format": "png",
        });
        let response = self
            .transport
            .post_json(&self.config.endpoint, AuthScheme::Key, &payload, "segmentation")
            .await?;

        cutout_url(&response)
            .map(ImageRef::remote)
            .ok_or_else(|| StageFailure::upstream("segmentation response carried no image URL"))
    }
}

/// The service answers `{"image": {"url": ...}}`.
fn cutout_url(response: &Value) -> Option<String> {
    response
        .pointer("/image/url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutout_url_requires_non_empty_field() {
        assert_eq!(
            cutout_url(&json!({"image": {"url": "https://cdn/cut.png"}})),
            Some("https://cdn/cut.png".into())
        );
        assert_eq!(cutout_url(&json!({"image": {"url": "  "}})), None);
        assert_eq!(cutout_url(&json!({"images": [{"url": "x"}]})), None);
    }
}
