//! The reply boundary: one user turn in, a record stream out
//!
//! Accepts multipart `{audio, scenario, turn}`, transcribes the clip, then
//! streams newline-delimited records while the reply generator produces
//! text: the transcription first, then one `chunk` record per delta, then
//! either a clean end of stream or a single terminal `error` record. When
//! the recognizer heard nothing the route short-circuits with a single
//! JSON canned-apology body and never touches the generator.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Multipart, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::post,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::ApiState;
use crate::scenario;

/// Build the reply router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/reply", post(handle))
        .with_state(state)
}

/// Wire records of the reply stream
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutRecord<'a> {
    Transcription { text: &'a str },
    Chunk { text: &'a str },
    Error { text: &'a str },
}

/// Serialize one record as a newline-terminated frame.
#[must_use]
pub fn record_line(record: &OutRecord<'_>) -> Bytes {
    let mut line = serde_json::to_string(record).unwrap_or_default();
    line.push('\n');
    Bytes::from(line)
}

/// Short-circuit body used when transcription was empty
#[derive(Debug, Serialize)]
struct CannedResponse {
    success: bool,
    transcription: String,
    reply: String,
}

/// One parsed multipart request
struct TurnUpload {
    audio: Vec<u8>,
    mime: String,
    scenario: String,
    turn: u64,
}

async fn read_upload(mut multipart: Multipart) -> Result<TurnUpload, ReplyError> {
    let mut audio = None;
    let mut mime = "audio/wav".to_string();
    let mut scenario_id = scenario::SCENARIO_ID.to_string();
    let mut turn = 0u64;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ReplyError::BadRequest(format!("invalid multipart: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                if let Some(ct) = field.content_type() {
                    mime = ct.to_string();
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ReplyError::BadRequest(format!("unreadable audio: {e}")))?;
                audio = Some(bytes.to_vec());
            }
            "scenario" => {
                scenario_id = field.text().await.unwrap_or_default();
            }
            "turn" => {
                turn = field
                    .text()
                    .await
                    .ok()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(0);
            }
            _ => {}
        }
    }

    let audio = audio.ok_or_else(|| ReplyError::BadRequest("no audio provided".to_string()))?;
    if audio.is_empty() {
        return Err(ReplyError::BadRequest("empty audio".to_string()));
    }

    Ok(TurnUpload {
        audio,
        mime,
        scenario: scenario_id,
        turn,
    })
}

/// Handle one user turn
async fn handle(
    State(state): State<Arc<ApiState>>,
    multipart: Multipart,
) -> Result<Response, ReplyError> {
    let upload = read_upload(multipart).await?;
    tracing::debug!(
        scenario = %upload.scenario,
        turn = upload.turn,
        bytes = upload.audio.len(),
        "turn received"
    );

    let transcription = state
        .stt
        .transcribe(upload.audio, &upload.mime)
        .await
        .map_err(|e| ReplyError::Transcription(e.to_string()))?;

    // Nothing recognized: canned apology, no generation
    if transcription.trim().is_empty() {
        tracing::debug!("empty transcription, short-circuiting");
        return Ok(Json(CannedResponse {
            success: true,
            transcription: String::new(),
            reply: scenario::EMPTY_TRANSCRIPTION_REPLY.to_string(),
        })
        .into_response());
    }

    let system_prompt = scenario::system_prompt(&upload.scenario, upload.turn);

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::convert::Infallible>>(32);
    tokio::spawn(async move {
        // Transcription goes out first, as early as possible
        let first = record_line(&OutRecord::Transcription {
            text: &transcription,
        });
        if tx.send(Ok(first)).await.is_err() {
            return;
        }

        let (delta_tx, mut delta_rx) = mpsc::channel::<String>(32);
        let producer = tokio::spawn(async move {
            state
                .chat
                .stream_reply(&system_prompt, &transcription, delta_tx)
                .await
        });

        while let Some(delta) = delta_rx.recv().await {
            let frame = record_line(&OutRecord::Chunk { text: &delta });
            if tx.send(Ok(frame)).await.is_err() {
                return;
            }
        }

        let outcome = match producer.await {
            Ok(result) => result,
            Err(e) => Err(crate::Error::Chat(format!("generator task failed: {e}"))),
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "reply generation failed");
            let frame = record_line(&OutRecord::Error {
                text: &e.to_string(),
            });
            let _ = tx.send(Ok(frame)).await;
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

/// Reply boundary errors
#[derive(Debug)]
pub enum ReplyError {
    BadRequest(String),
    Transcription(String),
}

impl IntoResponse for ReplyError {
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
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Transcription(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "transcription_failed", msg)
            }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_framing() {
        let line = record_line(&OutRecord::Transcription { text: "Hola" });
        assert_eq!(&line[..], b"{\"type\":\"transcription\",\"text\":\"Hola\"}\n");
    }

    #[test]
    fn test_records_end_with_newline() {
        for record in [
            OutRecord::Transcription { text: "a" },
            OutRecord::Chunk { text: "b" },
            OutRecord::Error { text: "c" },
        ] {
            let line = record_line(&record);
            assert_eq!(line.last(), Some(&b'\n'));
            // one record per line
            assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
        }
    }
}
