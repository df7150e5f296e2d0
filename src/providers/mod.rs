//! Upstream service clients used by the boundary server

pub mod chat;
pub mod stt;
pub mod tts;

pub use chat::ChatClient;
pub use stt::SpeechToText;
pub use tts::TextToSpeech;
