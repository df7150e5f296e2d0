//! Configuration for habla
//!
//! Everything comes from the environment; there are no config files. The
//! only required value is the `OpenAI` API key, and only for `serve`.

use secrecy::SecretString;

use crate::{Error, Result};

/// Default HTTP port for the boundary server
pub const DEFAULT_PORT: u16 = 8765;

/// Default base URL the practice client talks to
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8765";

/// Fixed delay before the Error phase auto-retries listening
pub const RETRY_DELAY_MS: u64 = 3000;

/// Server-side configuration: upstream service credentials and models
#[derive(Debug)]
pub struct ServeConfig {
    /// `OpenAI` API key, used for Whisper STT, chat completions and TTS
    pub api_key: SecretString,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// Chat model for reply generation (e.g. "gpt-4o-mini")
    pub chat_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,
}

impl ServeConfig {
    /// Load server configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `OPENAI_API_KEY` is missing or empty.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is required".to_string()))?;

        Ok(Self {
            api_key: api_key.into(),
            stt_model: env_or("HABLA_STT_MODEL", "whisper-1"),
            chat_model: env_or("HABLA_CHAT_MODEL", "gpt-4o-mini"),
            tts_model: env_or("HABLA_TTS_MODEL", "tts-1"),
            tts_voice: env_or("HABLA_TTS_VOICE", "nova"),
        })
    }
}

/// Voice-activity detection tuning
///
/// The defaults mirror the tuned values of the conversation loop: a 100 ms
/// polling cadence, a 2 s silence hangover, and a 500 ms minimum speech
/// duration below which a burst is treated as noise. The minimum can discard
/// a legitimate one-word reply; that is a known tuning trade-off.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS energy level above which a sample counts as speech (0.0 to 1.0)
    pub energy_threshold: f32,

    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,

    /// Silence duration after speech before the turn is finalized
    pub hangover_ms: u64,

    /// Minimum accumulated speech duration for a valid turn
    pub min_speech_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.015,
            poll_interval_ms: 100,
            hangover_ms: 2000,
            min_speech_ms: 500,
        }
    }
}

impl VadConfig {
    /// Load VAD tuning from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            energy_threshold: env_parse("HABLA_VAD_THRESHOLD", defaults.energy_threshold),
            poll_interval_ms: env_parse("HABLA_VAD_POLL_MS", defaults.poll_interval_ms),
            hangover_ms: env_parse("HABLA_VAD_HANGOVER_MS", defaults.hangover_ms),
            min_speech_ms: env_parse("HABLA_VAD_MIN_SPEECH_MS", defaults.min_speech_ms),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vad_defaults() {
        let vad = VadConfig::default();
        assert_eq!(vad.poll_interval_ms, 100);
        assert_eq!(vad.hangover_ms, 2000);
        assert_eq!(vad.min_speech_ms, 500);
    }
}
