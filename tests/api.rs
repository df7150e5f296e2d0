//! Boundary server tests
//!
//! Exercises the routes that never reach an upstream provider, so no
//! credentials or network are needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::util::ServiceExt;

use habla::api::{ApiState, router};
use habla::config::ServeConfig;

fn test_router() -> axum::Router {
    let config = ServeConfig {
        api_key: "test-key".to_string().into(),
        stt_model: "whisper-1".to_string(),
        chat_model: "gpt-4o-mini".to_string(),
        tts_model: "tts-1".to_string(),
        tts_voice: "nova".to_string(),
    };
    router(Arc::new(ApiState::new(config)))
}

#[tokio::test]
async fn health_reports_ok() {
    let response = test_router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "ok");
}

#[tokio::test]
async fn synthesis_rejects_empty_text() {
    // The client never issues a request for empty text; the boundary
    // enforces it anyway
    let request = Request::post("/api/tts")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"text":"   "}"#))
        .unwrap();

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"]["code"], "bad_request");
}

#[tokio::test]
async fn reply_rejects_missing_audio() {
    let boundary = "X-TEST-BOUNDARY";
    let form = format!(
        "--{boundary}\r\ncontent-disposition: form-data; name=\"scenario\"\r\n\r\ncine\r\n--{boundary}--\r\n"
    );

    let request = Request::post("/api/reply")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(form))
        .unwrap();

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
