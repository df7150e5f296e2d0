//! Text-to-speech upstream

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: Arc<SecretString>,
    model: String,
    voice: String,
}

impl TextToSpeech {
    /// Create a new TTS instance.
    #[must_use]
    pub fn new(api_key: Arc<SecretString>, model: String, voice: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            voice,
        }
    }

    /// Synthesize text to MP3 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tts`] if synthesis fails.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}
