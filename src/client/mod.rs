//! Clients for the two HTTP boundaries the practice loop consumes

pub mod reply;
pub mod tts;

pub use reply::{LineAssembler, ReplyClient, ReplyEvent, parse_line};
pub use tts::{HttpSynthesizer, Synthesizer};
