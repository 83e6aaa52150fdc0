use async_trait::async_trait;

use crate::{FailurePolicy, ImageRef, StageFailure, StageKind, StageParams, StageRequest, StageResult};

/// One atomic step of the pipeline, wrapping a single external inference call.
///
/// Implementors provide [`invoke`](Stage::invoke), a single attempt against their service.
/// [`execute`](Stage::execute) adds the shared contract on top: the request timeout bounds
/// the whole attempt, and the stage's [`FailurePolicy`] decides whether a failure is
/// reported or replaced by a passthrough of the input.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Run once against the backing service. Must not retry, except where the stage
    /// documents an internal poll loop.
    async fn invoke(&self, request: &StageRequest) -> Result<ImageRef, StageFailure>;

    async fn execute(&self, request: StageRequest) -> StageResult {
        let kind = self.kind();
        let outcome = if request.params.kind() != kind {
            Err(wrong_params(kind, &request.params))
        } else {
            match tokio::time::timeout(request.timeout, self.invoke(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StageFailure::timeout(format!(
                    "{kind} stage exceeded its {}ms budget",
                    request.timeout.as_millis()
                ))),
            }
        };
        apply_policy(kind, request.image, outcome)
    }
}

/// Turn a raw stage outcome into a [`StageResult`] according to the stage's failure policy.
pub fn apply_policy(
    kind: StageKind,
    input: ImageRef,
    outcome: Result<ImageRef, StageFailure>,
) -> StageResult {
    match outcome {
        Ok(image) => StageResult::success(image),
        Err(failure) => match kind.policy() {
            FailurePolicy::Fatal => {
                tracing::warn!(stage = %kind, kind = %failure.kind, error = %failure.message, "stage failed");
                StageResult::Failure(failure)
            }
            FailurePolicy::BestEffort => {
                tracing::warn!(
                    stage = %kind,
                    kind = %failure.kind,
                    error = %failure.message,
                    fallback = true,
                    "stage failed, passing input through"
                );
                StageResult::Success {
                    image: input,
                    fallback: Some(failure),
                }
            }
        },
    }
}

pub(crate) fn wrong_params(kind: StageKind, params: &StageParams) -> StageFailure {
    StageFailure::invalid_input(format!(
        "{kind} stage received parameters for the {} stage",
        params.kind()
    ))
}
