//! Habla - voice-driven Spanish conversation practice
//!
//! The user speaks, speech is transcribed, a scripted persona replies, the
//! reply is synthesized and played back, and the cycle repeats until the
//! scenario signals completion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Practice client                      │
//! │  Capture │ Detector │ Segmenter │ Playback │ Runner │
//! │            (single-writer state machine)            │
//! └────────────────────┬────────────────────────────────┘
//!                      │ POST /api/reply (NDJSON stream)
//!                      │ POST /api/tts   (MP3 bytes)
//! ┌────────────────────▼────────────────────────────────┐
//! │               Boundary server (axum)                 │
//! │   Whisper STT  │  streaming chat  │  speech TTS     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The turn-taking core is the [`session::machine::Conversation`] state
//! machine: every external event (detector verdict, stream record,
//! synthesis completion, playback ending, timer) is normalized into a
//! message it consumes, and it alone owns conversation state, including
//! the one-way finished latch driven purely by the reply text.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod providers;
pub mod scenario;
pub mod session;
pub mod voice;

pub use config::{ServeConfig, VadConfig};
pub use error::{Error, Result};
pub use scenario::{FINISHED_MARKER, GREETING};
pub use session::{Conversation, SessionPhase, SessionRunner};
pub use voice::{AudioClip, CaptureController, Captured};
