//! End-to-end runs against mocked inference services.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use std::time::Duration;

use retouch::{
    CancelToken, FailureKind, ImageRef, Pipeline, PipelineRequest, PipelineState, RetouchConfig,
    StageDisposition, StageKind,
};
use stages::config::ServiceEndpoint;
use stages::policy::GUARDRAIL_SUFFIX;

const EDITED_B64: &str = "iVBORw0KGgo="; // PNG signature

fn config_for(server: &ServerGuard) -> RetouchConfig {
    let mut config = RetouchConfig::default();
    let endpoint = |path: &str| {
        ServiceEndpoint::new(format!("{}{path}", server.url()))
            .with_api_key("sk-test-secret")
            .with_timeout(Duration::from_secs(5))
    };
    config.services.segmentation.endpoint = endpoint("/cutout");
    config.services.edit.endpoint = endpoint("/edit");
    config.services.harmonization.endpoint = endpoint("/harmonize");
    config.services.upscale.endpoint = endpoint("/predictions");
    config.services.upscale.poll_interval = Duration::from_millis(1);
    config.services.upscale.max_poll_attempts = 3;
    config.validate().unwrap();
    config
}

fn source() -> ImageRef {
    ImageRef::inline(vec![0xFFu8, 0xD8, 0xFF, 0xE0], "image/jpeg")
}

async fn mock_cutout(server: &mut ServerGuard) -> Mock {
    let url = format!("{}/files/cut.png", server.url());
    server
        .mock("POST", "/cutout")
        .with_status(200)
        .with_body(json!({"image": {"url": url}}).to_string())
        .expect(1)
        .create_async()
        .await
}

async fn mock_cut_download(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/files/cut.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body([1u8, 2, 3, 4])
        .create_async()
        .await
}

async fn mock_edit_ok(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/edit")
        .match_body(Matcher::Regex(regex::escape(GUARDRAIL_SUFFIX)))
        .with_status(200)
        .with_body(
            json!({"candidates": [{"content": {"parts": [
                {"text": "Here is the edited image."},
                {"inlineData": {"mimeType": "image/png", "data": EDITED_B64}}
            ]}}]})
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await
}

async fn mock_harmonize_ok(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/harmonize")
        .with_status(200)
        .with_body(r#"{"images":[{"url":"https://cdn.example.com/harmonized.png"}]}"#)
        .expect(1)
        .create_async()
        .await
}

async fn mock_upscale_ok(server: &mut ServerGuard) -> (Mock, Mock) {
    let poll_url = format!("{}/predictions/up-1", server.url());
    let submit = server
        .mock("POST", "/predictions")
        .with_status(201)
        .with_body(json!({"id": "up-1", "status": "starting", "urls": {"get": poll_url}}).to_string())
        .expect(1)
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/predictions/up-1")
        .with_status(200)
        .with_body(r#"{"id":"up-1","status":"succeeded","output":"https://cdn.example.com/final.png"}"#)
        .expect(1)
        .create_async()
        .await;
    (submit, poll)
}

fn edited_image() -> ImageRef {
    ImageRef::inline(vec![0x89u8, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], "image/png")
}

#[tokio::test]
async fn all_stages_succeed_end_to_end() {
    let mut server = Server::new_async().await;
    let cutout = mock_cutout(&mut server).await;
    let download = mock_cut_download(&mut server).await;
    let edit = mock_edit_ok(&mut server).await;
    let harmonize = mock_harmonize_ok(&mut server).await;
    let (submit, poll) = mock_upscale_ok(&mut server).await;

    let pipeline = Pipeline::from_config(&config_for(&server));
    let outcome = pipeline
        .run(
            PipelineRequest::new(source(), "remove background"),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.image, ImageRef::remote("https://cdn.example.com/final.png"));
    assert_eq!(outcome.log.state(), PipelineState::Done);
    assert_eq!(outcome.log.records.len(), 4);
    for record in &outcome.log.records {
        assert_eq!(record.disposition, StageDisposition::Success, "{:?}", record.stage);
        assert!(!record.fallback_used, "{:?}", record.stage);
    }

    for mock in [cutout, download, edit, harmonize, submit, poll] {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn harmonization_error_falls_back_to_edited_image() {
    let mut server = Server::new_async().await;
    let _cutout = mock_cutout(&mut server).await;
    let _download = mock_cut_download(&mut server).await;
    let _edit = mock_edit_ok(&mut server).await;
    let harmonize = server
        .mock("POST", "/harmonize")
        .with_status(500)
        .with_body(r#"{"detail":"worker crashed"}"#)
        .expect(1)
        .create_async()
        .await;

    let config = config_for(&server);
    let pipeline = Pipeline::from_config(&config);
    let request = PipelineRequest::new(source(), "remove background").with_stages(
        retouch::StageSelection {
            upscale: false,
            ..retouch::StageSelection::all()
        },
    );
    let outcome = pipeline.run(request, &CancelToken::new()).await.unwrap();

    assert_eq!(outcome.log.state(), PipelineState::Done);
    assert_eq!(outcome.image, edited_image());

    let record = outcome.log.record(StageKind::Harmonize).unwrap();
    assert_eq!(record.disposition, StageDisposition::Success);
    assert!(record.fallback_used);
    let failure = record.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::UpstreamError);
    assert!(failure.message.contains("worker crashed"));
    assert_eq!(
        outcome.log.record(StageKind::Upscale).unwrap().disposition,
        StageDisposition::Skipped
    );
    harmonize.assert_async().await;
}

#[tokio::test]
async fn upscale_receives_edited_image_after_harmonization_fallback() {
    let mut server = Server::new_async().await;
    let _cutout = mock_cutout(&mut server).await;
    let _download = mock_cut_download(&mut server).await;
    let _edit = mock_edit_ok(&mut server).await;
    let _harmonize = server
        .mock("POST", "/harmonize")
        .with_status(500)
        .create_async()
        .await;
    let poll_url = format!("{}/predictions/up-2", server.url());
    let submit = server
        .mock("POST", "/predictions")
        .match_body(Matcher::PartialJson(json!({
            "input": {"image": format!("data:image/png;base64,{EDITED_B64}")}
        })))
        .with_status(201)
        .with_body(json!({"id": "up-2", "status": "starting", "urls": {"get": poll_url}}).to_string())
        .expect(1)
        .create_async()
        .await;
    let _poll = server
        .mock("GET", "/predictions/up-2")
        .with_status(200)
        .with_body(r#"{"id":"up-2","status":"succeeded","output":"https://cdn.example.com/up-2.png"}"#)
        .create_async()
        .await;

    let pipeline = Pipeline::from_config(&config_for(&server));
    let outcome = pipeline
        .run(
            PipelineRequest::new(source(), "remove background"),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.log.state(), PipelineState::Done);
    assert_eq!(outcome.image, ImageRef::remote("https://cdn.example.com/up-2.png"));
    assert_eq!(outcome.log.fallbacks().collect::<Vec<_>>(), vec![StageKind::Harmonize]);
    submit.assert_async().await;
}

#[tokio::test]
async fn upscale_poll_budget_exhaustion_keeps_prior_image() {
    let mut server = Server::new_async().await;
    let _edit = mock_edit_ok(&mut server).await;
    let _harmonize = mock_harmonize_ok(&mut server).await;
    let poll_url = format!("{}/predictions/slow", server.url());
    let _submit = server
        .mock("POST", "/predictions")
        .with_status(201)
        .with_body(json!({"id": "slow", "status": "starting", "urls": {"get": poll_url}}).to_string())
        .create_async()
        .await;
    let pending = server
        .mock("GET", "/predictions/slow")
        .with_status(200)
        .with_body(r#"{"id":"slow","status":"processing"}"#)
        .expect(3)
        .create_async()
        .await;

    let pipeline = Pipeline::from_config(&config_for(&server));
    let request = PipelineRequest::new(source(), "soft studio backdrop").with_stages(
        retouch::StageSelection {
            cutout: false,
            ..retouch::StageSelection::all()
        },
    );
    let outcome = pipeline.run(request, &CancelToken::new()).await.unwrap();

    assert_eq!(outcome.log.state(), PipelineState::Done);
    assert_eq!(
        outcome.image,
        ImageRef::remote("https://cdn.example.com/harmonized.png")
    );
    let record = outcome.log.record(StageKind::Upscale).unwrap();
    assert!(record.fallback_used);
    assert_eq!(record.failure.as_ref().unwrap().kind, FailureKind::Timeout);
    pending.assert_async().await;
}

#[tokio::test]
async fn text_only_edit_response_fails_without_later_calls() {
    let mut server = Server::new_async().await;
    let _cutout = mock_cutout(&mut server).await;
    let _download = mock_cut_download(&mut server).await;
    let _edit = server
        .mock("POST", "/edit")
        .with_status(200)
        .with_body(
            json!({"candidates": [{"content": {"parts": [
                {"text": "I can't edit this image."}
            ]}}]})
            .to_string(),
        )
        .create_async()
        .await;
    let harmonize = server
        .mock("POST", "/harmonize")
        .expect(0)
        .create_async()
        .await;
    let upscale = server
        .mock("POST", "/predictions")
        .expect(0)
        .create_async()
        .await;

    let pipeline = Pipeline::from_config(&config_for(&server));
    let failure = pipeline
        .run(
            PipelineRequest::new(source(), "remove background"),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.error.stage(), StageKind::Edit);
    assert_eq!(failure.error.kind(), FailureKind::UpstreamError);
    assert!(failure.error.to_string().contains("I can't edit this image."));
    assert_eq!(failure.log.state(), PipelineState::Failed);
    assert!(failure.log.record(StageKind::Harmonize).is_none());
    assert!(failure.log.record(StageKind::Upscale).is_none());
    harmonize.assert_async().await;
    upscale.assert_async().await;
}

#[tokio::test]
async fn restricted_instruction_makes_no_outbound_calls() {
    let mut server = Server::new_async().await;
    let mut mocks = Vec::new();
    for (method, path) in [
        ("POST", "/cutout"),
        ("POST", "/edit"),
        ("POST", "/harmonize"),
        ("POST", "/predictions"),
    ] {
        mocks.push(server.mock(method, path).expect(0).create_async().await);
    }
    let anything = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let pipeline = Pipeline::from_config(&config_for(&server));
    let failure = pipeline
        .run(
            PipelineRequest::new(source(), "model this hoodie on teenagers at a park"),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.error.kind(), FailureKind::PolicyRejected);
    assert_eq!(failure.log.state(), PipelineState::Failed);
    for mock in mocks {
        mock.assert_async().await;
    }
    anything.assert_async().await;
}

#[tokio::test]
async fn upstream_errors_do_not_leak_credentials() {
    let mut server = Server::new_async().await;
    let _cutout = server
        .mock("POST", "/cutout")
        .with_status(401)
        .with_body(
            r#"{"error":{"message":"invalid key sk-test-secret, see https://internal.example.com/keys"}}"#,
        )
        .create_async()
        .await;

    let pipeline = Pipeline::from_config(&config_for(&server));
    let failure = pipeline
        .run(
            PipelineRequest::new(source(), "remove background"),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    let message = failure.error.to_string();
    assert_eq!(failure.error.stage(), StageKind::Cutout);
    assert!(message.contains("HTTP 401"), "{message}");
    assert!(!message.contains("sk-test-secret"), "{message}");
    assert!(!message.contains("internal.example.com"), "{message}");
}
