//! The synthesis boundary: text in, MP3 bytes out

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::ApiState;

/// Build the synthesis router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/tts", post(handle))
        .with_state(state)
}

/// Synthesis request
#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
}

/// Synthesize text to speech; returns MP3 audio
async fn handle(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SynthesizeRequest>,
) -> Result<Response, SynthError> {
    if request.text.trim().is_empty() {
        return Err(SynthError::BadRequest("empty text"));
    }

    let audio = state
        .tts
        .synthesize(&request.text)
        .await
        .map_err(|e| SynthError::Failed(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "audio/mpeg")],
        audio,
    )
        .into_response())
}

/// Synthesis boundary errors
#[derive(Debug)]
pub enum SynthError {
    BadRequest(&'static str),
    Failed(String),
}

impl IntoResponse for SynthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.to_string()),
            Self::Failed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "synthesis_failed", msg),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}
