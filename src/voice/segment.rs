//! Sentence segmentation and synthesis dispatch ordering
//!
//! Reply text arrives as arbitrary chunks; speech synthesis wants whole
//! sentences. [`SentenceSegmenter`] accumulates the residue and emits a unit
//! at every terminal `.` `!` `?` followed by whitespace or end-of-buffer;
//! whatever is left when the stream closes is flushed as a final unit.
//!
//! Synthesis requests may complete out of order, but playback must not:
//! [`SynthesisSequencer`] numbers units in dispatch order and releases
//! completed clips only once every earlier unit has been released.

use std::collections::BTreeMap;

use regex::Regex;

use crate::scenario::FINISHED_MARKER;
use crate::voice::capture::AudioClip;

/// Splits streamed reply text into speakable sentence units
pub struct SentenceSegmenter {
    buffer: String,
    boundary: Regex,
}

impl SentenceSegmenter {
    /// Create an empty segmenter.
    ///
    /// # Panics
    ///
    /// Never panics; the boundary pattern is a checked constant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            boundary: Regex::new(r"(?s)^.*?[.!?](\s|$)").expect("valid boundary pattern"),
        }
    }

    /// Append a chunk and return every sentence completed by it, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut units = Vec::new();
        while let Some(found) = self.boundary.find(&self.buffer) {
            let end = found.end();
            units.push(self.buffer[..end].to_string());
            self.buffer.drain(..end);
        }
        units
    }

    /// Flush the remainder at stream end, punctuated or not.
    ///
    /// Returns `None` when nothing speakable is left.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Text currently held back waiting for a sentence boundary
    #[must_use]
    pub fn residue(&self) -> &str {
        &self.buffer
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove every occurrence of the termination marker.
#[must_use]
pub fn strip_marker(text: &str) -> String {
    text.replace(FINISHED_MARKER, "")
}

/// Prepare a unit for the synthesis boundary: marker removed, trimmed.
///
/// Returns `None` for units with nothing left to speak; such units are never
/// dispatched and consume no sequence number.
#[must_use]
pub fn speakable(unit: &str) -> Option<String> {
    let clean = strip_marker(unit);
    let clean = clean.trim();
    if clean.is_empty() {
        None
    } else {
        Some(clean.to_string())
    }
}

/// Restores dispatch order over out-of-order synthesis completions.
///
/// Units are numbered when dispatched; a completed clip is released only when
/// every earlier number has completed. A failed unit releases its slot with
/// no clip so one bad synthesis never stalls the rest of the reply.
#[derive(Debug, Default)]
pub struct SynthesisSequencer {
    next_dispatch: usize,
    next_release: usize,
    buffered: BTreeMap<usize, Option<AudioClip>>,
}

impl SynthesisSequencer {
    /// Create an empty sequencer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next dispatch-order sequence number.
    pub fn dispatch(&mut self) -> usize {
        let seq = self.next_dispatch;
        self.next_dispatch += 1;
        seq
    }

    /// Record a completion (`None` for a failed unit) and return every clip
    /// now releasable to the playback queue, in dispatch order.
    pub fn complete(&mut self, seq: usize, clip: Option<AudioClip>) -> Vec<AudioClip> {
        self.buffered.insert(seq, clip);

        let mut released = Vec::new();
        while let Some(entry) = self.buffered.remove(&self.next_release) {
            self.next_release += 1;
            if let Some(clip) = entry {
                released.push(clip);
            }
        }
        released
    }

    /// Number of dispatched units whose completion has not yet arrived
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.next_dispatch - self.next_release - self.buffered.len()
    }

    /// Reset for a new turn.
    pub fn reset(&mut self) {
        self.next_dispatch = 0;
        self.next_release = 0;
        self.buffered.clear();
    }
}
