//! Shared HTTP plumbing for the stage clients.
//!
//! Every stage talks JSON over HTTPS with its own request shape; what they share is
//! how a call is sent, how non-2xx answers become [`StageFailure`]s, and how upstream
//! error text is scrubbed before it can reach a caller.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServiceEndpoint;
use crate::image::DEFAULT_MIME_TYPE;
use crate::{ImageRef, StageFailure};

/// Upper bound on upstream text surfaced in a failure message.
const MAX_ERROR_CHARS: usize = 512;

static URL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:https?|wss?)://[^\s"'<>]+"#).ok());

/// How the credential of an endpoint is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `Authorization: Key <key>`
    Key,
    /// Raw key in a named header.
    Header(&'static str),
}

/// reqwest client plus the secrets it must never echo back.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    secrets: Arc<[String]>,
}

impl HttpTransport {
    pub fn new(secrets: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(16)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            secrets: secrets.into(),
        }
    }

    /// POST a JSON payload and decode a JSON answer.
    pub async fn post_json(
        &self,
        endpoint: &ServiceEndpoint,
        auth: AuthScheme,
        payload: &Value,
        context: &str,
    ) -> Result<Value, StageFailure> {
        tracing::debug!(service = context, "sending request");
        let request = self
            .client
            .post(&endpoint.url)
            .timeout(endpoint.timeout)
            .json(payload);
        let request = apply_auth(request, endpoint.api_key.as_deref(), auth);
        let response = request
            .send()
            .await
            .map_err(|e| StageFailure::from_transport(context, &e))?;
        self.decode_json(response, context).await
    }

    /// GET a JSON document, used by the upscale poll loop.
    pub async fn get_json(
        &self,
        url: &str,
        endpoint: &ServiceEndpoint,
        auth: AuthScheme,
        context: &str,
    ) -> Result<Value, StageFailure> {
        let request = self.client.get(url).timeout(endpoint.timeout);
        let request = apply_auth(request, endpoint.api_key.as_deref(), auth);
        let response = request
            .send()
            .await
            .map_err(|e| StageFailure::from_transport(context, &e))?;
        self.decode_json(response, context).await
    }

    /// Return the image as inline bytes, downloading it when it is a remote reference.
    pub async fn ensure_inline(
        &self,
        image: &ImageRef,
        timeout: Duration,
    ) -> Result<ImageRef, StageFailure> {
        let url = match image {
            ImageRef::Inline { .. } => return Ok(image.clone()),
            ImageRef::Remote { url } => url,
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| StageFailure::from_transport("image download", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageFailure::upstream(format!(
                "image download: HTTP {}",
                status.as_u16()
            )));
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| value.starts_with("image/"))
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StageFailure::from_transport("image download", &e))?;
        if bytes.is_empty() {
            return Err(StageFailure::upstream("image download: empty body"));
        }
        Ok(ImageRef::inline(bytes, mime_type))
    }

    /// Mask credentials and URLs, then cap the length.
    pub fn sanitize(&self, text: &str) -> String {
        sanitize_message(text, &self.secrets)
    }

    async fn decode_json(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<Value, StageFailure> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = self.sanitize(&extract_error_text(&body));
            let message = if status.as_u16() == 429 {
                format!("{context}: rate limited (HTTP 429): {detail}")
            } else {
                format!("{context}: HTTP {}: {detail}", status.as_u16())
            };
            return Err(StageFailure::upstream(message));
        }

        response
            .json::<Value>()
            .await
            .map_err(|_| StageFailure::upstream(format!("{context}: invalid JSON response")))
    }
}

fn apply_auth(
    request: reqwest::RequestBuilder,
    api_key: Option<&str>,
    auth: AuthScheme,
) -> reqwest::RequestBuilder {
    let Some(key) = api_key.filter(|key| !key.is_empty()) else {
        return request;
    };
    match auth {
        AuthScheme::Bearer => request.bearer_auth(key),
        AuthScheme::Key => request.header("Authorization", format!("Key {key}")),
        AuthScheme::Header(name) => request.header(name, key),
    }
}

/// Pull the human-readable part out of common error envelopes, falling back to the raw body.
pub(crate) fn extract_error_text(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let candidates = [
        value.pointer("/error/message"),
        value.get("error"),
        value.get("detail"),
        value.get("message"),
    ];
    let found = candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string));
    found.unwrap_or_else(|| body.trim().to_string())
}

pub(crate) fn sanitize_message(text: &str, secrets: &[String]) -> String {
    let mut cleaned = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        cleaned = cleaned.replace(secret.as_str(), "[redacted]");
    }
    if let Some(pattern) = URL_PATTERN.as_ref() {
        cleaned = pattern.replace_all(&cleaned, "<url>").into_owned();
    }
    if cleaned.chars().count() > MAX_ERROR_CHARS {
        cleaned = cleaned.chars().take(MAX_ERROR_CHARS).collect::<String>() + "...";
    }
    cleaned
}
