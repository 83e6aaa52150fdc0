//! Resolution enhancement through an asynchronous prediction service.
//!
//! Submission returns a job handle; the result is then polled at a fixed interval up to a
//! fixed attempt count. The attempt ceiling is independent of the per-request network
//! timeout and of the stage budget enforced by [`Stage::execute`].

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::clock::{Sleeper, TokioSleeper};
use crate::config::UpscaleConfig;
use crate::http::{AuthScheme, HttpTransport};
use crate::stage::wrong_params;
use crate::{
    AsyncJobHandle, ImageRef, JobStatus, Stage, StageFailure, StageKind, StageParams, StageRequest,
};

/// Best-effort upscaler. Submission errors, poll errors, provider failures, and an
/// exhausted poll budget all end in a passthrough of the input.
pub struct UpscaleStage {
    transport: HttpTransport,
    config: UpscaleConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl UpscaleStage {
    pub fn new(transport: HttpTransport, config: UpscaleConfig) -> Self {
        Self {
            transport,
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the clock used between polls.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    async fn submit(&self, image: &ImageRef, scale: u32) -> Result<Value, StageFailure> {
        let mut payload = Map::new();
        if let Some(version) = self.config.version.as_deref() {
            payload.insert("version".into(), json!(version));
        }
        payload.insert(
            "input".into(),
            json!({
                "image": image.to_request_value(),
                "scale": scale,
                "face_enhance": self.config.face_enhance,
            }),
        );

        self.transport
            .post_json(
                &self.config.endpoint,
                AuthScheme::Bearer,
                &Value::Object(payload),
                "upscale submission",
            )
            .await
    }

    async fn poll(&self, handle: &AsyncJobHandle) -> Result<ImageRef, StageFailure> {
        let max_attempts = self.config.max_poll_attempts;
        for attempt in 1..=max_attempts {
            self.sleeper.sleep(self.config.poll_interval).await;

            let body = self
                .transport
                .get_json(
                    &handle.poll_url,
                    &self.config.endpoint,
                    AuthScheme::Bearer,
                    "upscale poll",
                )
                .await?;

            match job_status(&body) {
                JobStatus::Pending(status) => {
                    tracing::info!(job = %handle.id, attempt, status = %status, "upscale job pending");
                }
                terminal => return self.resolve(terminal),
            }
        }

        Err(StageFailure::timeout(format!(
            "upscale job {} not finished after {max_attempts} polls",
            handle.id
        )))
    }

    fn resolve(&self, status: JobStatus) -> Result<ImageRef, StageFailure> {
        match status {
            JobStatus::Succeeded { output: Some(url) } => Ok(ImageRef::remote(url)),
            JobStatus::Succeeded { output: None } => Err(StageFailure::upstream(
                "upscale job succeeded without an output",
            )),
            JobStatus::Failed { error } => {
                let detail = error.unwrap_or_else(|| "no error message".to_string());
                Err(StageFailure::upstream(format!(
                    "upscale job failed: {}",
                    self.transport.sanitize(&detail)
                )))
            }
            JobStatus::Pending(status) => Err(StageFailure::upstream(format!(
                "upscale job still {status}"
            ))),
        }
    }
}

#[async_trait]
impl Stage for UpscaleStage {
    fn kind(&self) -> StageKind {
        StageKind::Upscale
    }

    async fn invoke(&self, request: &StageRequest) -> Result<ImageRef, StageFailure> {
        let StageParams::Upscale { scale } = &request.params else {
            return Err(wrong_params(self.kind(), &request.params));
        };

        let submission = self.submit(&request.image, *scale).await?;
        let status = job_status(&submission);
        if status.is_terminal() {
            return self.resolve(status);
        }

        let handle = job_handle(&submission)
            .ok_or_else(|| StageFailure::upstream("upscale submission carried no job handle"))?;
        tracing::info!(job = %handle.id, "upscale job submitted");
        self.poll(&handle).await
    }
}

fn job_handle(body: &Value) -> Option<AsyncJobHandle> {
    let id = body.get("id").and_then(Value::as_str)?.trim();
    let poll_url = body.pointer("/urls/get").and_then(Value::as_str)?.trim();
    if id.is_empty() || poll_url.is_empty() {
        return None;
    }
    Some(AsyncJobHandle {
        id: id.to_string(),
        poll_url: poll_url.to_string(),
    })
}

fn job_status(body: &Value) -> JobStatus {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let output = body.get("output").and_then(first_output_url);
    let error = body
        .get("error")
        .and_then(Value::as_str)
        .filter(|e| !e.trim().is_empty())
        .map(str::to_string);
    JobStatus::parse(status, output, error)
}

/// `output` is either a URL string or a list of them.
fn first_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) if !url.trim().is_empty() => Some(url.trim().to_string()),
        Value::Array(items) => items.iter().find_map(first_output_url),
        _ => None,
    }
}
