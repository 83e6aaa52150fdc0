use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::config::EditConfig;
use crate::http::{AuthScheme, HttpTransport};
use crate::parts::{collect_parts, first_image};
use crate::policy::{check_instruction, guarded_prompt};
use crate::stage::wrong_params;
use crate::{ImageRef, Stage, StageFailure, StageKind, StageParams, StageRequest};

/// Text-guided edit. Runs the instruction policy before touching the network. Fatal on failure.
pub struct EditStage {
    transport: HttpTransport,
    config: EditConfig,
}

impl EditStage {
    pub fn new(transport: HttpTransport, config: EditConfig) -> Self {
        Self { transport, config }
    }
}

#[async_trait]
impl Stage for EditStage {
    fn kind(&self) -> StageKind {
        StageKind::Edit
    }

    async fn invoke(&self, request: &StageRequest) -> Result<ImageRef, StageFailure> {
        let StageParams::Edit { instruction } = &request.params else {
            return Err(wrong_params(self.kind(), &request.params));
        };
        let instruction = check_instruction(instruction)?;

        let ImageRef::Inline { bytes, mime_type } = self
            .transport
            .ensure_inline(&request.image, self.config.endpoint.timeout)
            .await?
        else {
            return Err(StageFailure::upstream("edit input could not be made inline"));
        };

        let payload = json!({
            "contents": [{
                "parts": [
                    { "text": guarded_prompt(instruction) },
                    { "inline_data": { "mime_type": mime_type, "data": BASE64.encode(&bytes) } },
                ]
            }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });

        tracing::debug!(model = %self.config.model, bytes = bytes.len(), "submitting edit");
        let response = self
            .transport
            .post_json(
                &self.config.endpoint,
                AuthScheme::Header("x-goog-api-key"),
                &payload,
                "edit",
            )
            .await?;

        let parts = collect_parts(&response);
        if parts.is_empty() {
            if let Some(reason) = response
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
            {
                return Err(StageFailure::upstream(format!(
                    "edit service blocked the request: {reason}"
                )));
            }
        }

        first_image(&parts)
            .map_err(|message| StageFailure::upstream(self.transport.sanitize(&message)))
    }
}
