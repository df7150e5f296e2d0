//! Client for the synthesis boundary
//!
//! One trait seam so the orchestrator can be driven without a network in
//! tests; the real implementation posts to the server's `/api/tts` route.

use async_trait::async_trait;

use crate::voice::capture::AudioClip;
use crate::{Error, Result};

/// Turns a sentence of text into a playable clip
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize speech for `text`. Callers never pass empty or
    /// whitespace-only text.
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}

/// HTTP implementation against the synthesis boundary
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSynthesizer {
    /// Create a client for the given server base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let response = self
            .client
            .post(format!("{}/api/tts", self.base_url))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("synthesis boundary error {status}: {body}")));
        }

        let bytes = response.bytes().await?;
        Ok(AudioClip {
            bytes: bytes.to_vec(),
            mime: "audio/mpeg",
        })
    }
}
