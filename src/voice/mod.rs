//! Voice processing module
//!
//! Microphone capture, end-of-turn detection, sentence segmentation and
//! ordered playback. Transcription and synthesis go over HTTP boundaries
//! (see `client` and `api`).

pub mod capture;
pub mod detector;
pub mod playback;
pub mod segment;

pub use capture::{AudioClip, CAPTURE_SAMPLE_RATE, CaptureController, Captured, samples_to_wav};
pub use detector::{Clock, EndOfTurn, PushToTalk, SilenceDetector, SystemClock, TurnSignal};
pub use playback::{ClipEnded, PlaybackQueue};
pub use segment::{SentenceSegmenter, SynthesisSequencer, speakable, strip_marker};
