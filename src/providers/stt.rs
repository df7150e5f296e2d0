//! Speech-to-text upstream
//!
//! Whisper transcription with a fixed Spanish language target.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Transcription language for the fixed scenario
const LANGUAGE: &str = "es";

/// Response from the Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: Arc<SecretString>,
    model: String,
}

impl SpeechToText {
    /// Create a new STT instance.
    #[must_use]
    pub fn new(api_key: Arc<SecretString>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    /// File extension for the audio mime types the boundary accepts
    fn extension_for_mime(mime_type: &str) -> &'static str {
        match mime_type {
            "audio/webm" => "webm",
            "audio/ogg" => "ogg",
            _ => "wav",
        }
    }

    /// Transcribe audio to Spanish text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stt`] if the API rejects the request.
    pub async fn transcribe(&self, audio: Vec<u8>, mime_type: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), mime_type, "starting transcription");

        let filename = format!("audio.{}", Self::extension_for_mime(mime_type));
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name(filename)
                    .mime_str(mime_type)
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", LANGUAGE);

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
