//! Client for the reply boundary
//!
//! Sends a finalized recording and consumes the newline-delimited record
//! stream that comes back. Records can be split anywhere by the transport,
//! including inside multi-byte characters, so reassembly buffers raw bytes
//! and only decodes complete lines. A malformed record is logged and
//! skipped; an `error` record or transport fault ends the stream.

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::voice::capture::AudioClip;

/// One normalized outcome of the reply stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// The recognized user text, emitted once, as early as possible
    Transcription(String),
    /// An incremental fragment of the generated reply
    Chunk(String),
    /// The boundary short-circuited with a canned reply (nothing was
    /// recognized); a single complete assistant utterance
    Canned { transcription: String, reply: String },
    /// Terminal fault: an `error` record or a transport failure
    Failed(String),
    /// The stream ended normally
    Closed,
}

/// Wire records of the reply boundary
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireRecord {
    Transcription { text: String },
    Chunk { text: String },
    Error { text: String },
}

/// Short-circuit body used when transcription was empty
#[derive(Debug, Deserialize)]
struct CannedBody {
    transcription: String,
    reply: String,
}

/// Reassembles newline-delimited records from arbitrary transport chunks
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append transport bytes and return every complete line they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Take the unterminated trailing line, if any, at stream end.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Parse one line into an event.
///
/// Blank lines and malformed records yield `None`; malformed records are
/// logged, never fatal to the stream.
#[must_use]
pub fn parse_line(line: &str) -> Option<ReplyEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(record) = serde_json::from_str::<WireRecord>(trimmed) {
        return Some(match record {
            WireRecord::Transcription { text } => ReplyEvent::Transcription(text),
            WireRecord::Chunk { text } => ReplyEvent::Chunk(text),
            WireRecord::Error { text } => ReplyEvent::Failed(text),
        });
    }

    if let Ok(canned) = serde_json::from_str::<CannedBody>(trimmed) {
        return Some(ReplyEvent::Canned {
            transcription: canned.transcription,
            reply: canned.reply,
        });
    }

    tracing::warn!(line = trimmed, "malformed stream record, skipping");
    None
}

/// Talks to the reply boundary
#[derive(Debug, Clone)]
pub struct ReplyClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReplyClient {
    /// Create a client for the given server base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Send one user turn and deliver every stream outcome to `tx`.
    ///
    /// The clip is consumed; ownership moves to the request. Always ends
    /// with exactly one terminal event: [`ReplyEvent::Failed`] or
    /// [`ReplyEvent::Closed`].
    pub async fn stream_turn(
        &self,
        clip: AudioClip,
        scenario: &str,
        turn: u64,
        tx: mpsc::Sender<ReplyEvent>,
    ) {
        let terminal = self.stream_turn_inner(clip, scenario, turn, &tx).await;
        let _ = tx.send(terminal).await;
    }

    async fn stream_turn_inner(
        &self,
        clip: AudioClip,
        scenario: &str,
        turn: u64,
        tx: &mpsc::Sender<ReplyEvent>,
    ) -> ReplyEvent {
        let part = match reqwest::multipart::Part::bytes(clip.bytes)
            .file_name("recording.wav")
            .mime_str(clip.mime)
        {
            Ok(part) => part,
            Err(e) => return ReplyEvent::Failed(format!("invalid audio part: {e}")),
        };

        let form = reqwest::multipart::Form::new()
            .part("audio", part)
            .text("scenario", scenario.to_string())
            .text("turn", turn.to_string());

        let response = match self
            .client
            .post(format!("{}/api/reply", self.base_url))
            .multipart(form)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ReplyEvent::Failed(format!("request failed: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return ReplyEvent::Failed(format!("reply boundary error {status}: {body}"));
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineAssembler::new();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => return ReplyEvent::Failed(format!("stream read failed: {e}")),
            };

            for line in lines.push(&bytes) {
                if let Some(event) = parse_line(&line) {
                    if matches!(event, ReplyEvent::Failed(_)) {
                        return event;
                    }
                    let _ = tx.send(event).await;
                }
            }
        }

        // An unterminated trailing line is still a record
        if let Some(last) = lines.finish() {
            if let Some(event) = parse_line(&last) {
                if matches!(event, ReplyEvent::Failed(_)) {
                    return event;
                }
                let _ = tx.send(event).await;
            }
        }

        ReplyEvent::Closed
    }
}
