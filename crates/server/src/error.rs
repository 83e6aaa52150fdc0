use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use retouch::{FailureKind, PipelineFailure};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Pipeline(Box<PipelineFailure>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found")]
    NotFound,
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Pipeline(failure) => match failure.error.kind() {
                FailureKind::PolicyRejected => StatusCode::UNPROCESSABLE_ENTITY,
                FailureKind::UpstreamError => StatusCode::BAD_GATEWAY,
                FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                FailureKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                FailureKind::InvalidInput => StatusCode::BAD_REQUEST,
            },
            ServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::NotFound => "NOT_FOUND",
            ServerError::Pipeline(failure) => match failure.error.kind() {
                FailureKind::PolicyRejected => "POLICY_REJECTED",
                FailureKind::UpstreamError => "UPSTREAM_ERROR",
                FailureKind::Timeout => "UPSTREAM_TIMEOUT",
                FailureKind::Cancelled => "CANCELLED",
                FailureKind::InvalidInput => "INVALID_INPUT",
            },
            ServerError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code().to_string();
        let message = self.to_string();

        // Failed runs carry their log so callers can see which stage ended the run.
        let details = match &self {
            ServerError::Pipeline(failure) => Some(json!({
                "stage": failure.error.stage(),
                "retryable": match &failure.error {
                    retouch::PipelineError::StageFailed { failure, .. } => failure.retryable,
                    retouch::PipelineError::Cancelled { .. } => false,
                },
                "log": failure.log,
            })),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: error_code,
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<PipelineFailure> for ServerError {
    fn from(failure: PipelineFailure) -> Self {
        ServerError::Pipeline(Box::new(failure))
    }
}

impl From<retouch::ConfigLoadError> for ServerError {
    fn from(err: retouch::ConfigLoadError) -> Self {
        ServerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retouch::{ExecutionLog, PipelineError, StageFailure, StageKind};

    fn failure(kind: StageFailure) -> ServerError {
        PipelineFailure {
            error: PipelineError::StageFailed {
                stage: StageKind::Edit,
                failure: kind,
            },
            log: ExecutionLog::new(),
        }
        .into()
    }

    #[test]
    fn pipeline_failures_map_to_distinct_statuses() {
        assert_eq!(
            failure(StageFailure::policy("restricted")).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            failure(StageFailure::upstream("HTTP 500")).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            failure(StageFailure::timeout("budget")).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );

        let invalid = failure(StageFailure::invalid_input("edit stage received cutout parameters"));
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.error_code(), "INVALID_INPUT");

        let cancelled: ServerError = PipelineFailure {
            error: PipelineError::Cancelled {
                stage: StageKind::Upscale,
            },
            log: ExecutionLog::new(),
        }
        .into();
        assert_eq!(cancelled.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(cancelled.error_code(), "CANCELLED");
    }

    #[test]
    fn invalid_pipeline_config_is_500() {
        let err: ServerError =
            retouch::ConfigLoadError::Validation("poll_interval must be > 0".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("poll_interval"));
    }

    #[test]
    fn bad_request_is_400() {
        let err = ServerError::BadRequest("image is required".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }
}
