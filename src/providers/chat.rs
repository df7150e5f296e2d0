//! Streaming reply generation upstream
//!
//! Drives a chat-completions endpoint with `stream: true` and forwards
//! content deltas as they arrive. The SSE framing is reassembled with the
//! same line discipline as the reply boundary: bytes are buffered and only
//! complete lines are parsed.

use std::sync::Arc;

use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::client::reply::LineAssembler;
use crate::{Error, Result};

/// Cap on generated reply length; spoken turns are short
const MAX_REPLY_TOKENS: u32 = 500;

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Generates scripted-scenario replies
pub struct ChatClient {
    client: reqwest::Client,
    api_key: Arc<SecretString>,
    model: String,
}

impl ChatClient {
    /// Create a new chat client.
    #[must_use]
    pub fn new(api_key: Arc<SecretString>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    /// Stream a reply, sending each content delta to `tx` as it arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Chat`] on a rejected request or a mid-stream
    /// transport fault; deltas already sent stand.
    pub async fn stream_reply(
        &self,
        system_prompt: &str,
        user_text: &str,
        tx: mpsc::Sender<String>,
    ) -> Result<()> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_text },
            ],
            "stream": true,
            "temperature": 0.7,
            "max_tokens": MAX_REPLY_TOKENS,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Chat(format!("chat API error {status}: {text}")));
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineAssembler::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| Error::Chat(format!("stream read failed: {e}")))?;

            for line in lines.push(&bytes) {
                let Some(data) = line.trim().strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(());
                }

                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(parsed) => {
                        let delta = parsed
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.as_deref())
                            .unwrap_or_default();
                        if !delta.is_empty() && tx.send(delta.to_string()).await.is_err() {
                            // Receiver gone; stop generating
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "unparseable stream event, skipping");
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_parsing() {
        let data = r#"{"choices":[{"delta":{"content":"¡Hola"}}]}"#;
        let parsed: StreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(
            parsed.choices[0].delta.content.as_deref(),
            Some("¡Hola")
        );
    }

    #[test]
    fn test_delta_without_content() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        let parsed: StreamChunk = serde_json::from_str(data).unwrap();
        assert!(parsed.choices[0].delta.content.is_none());
    }
}
