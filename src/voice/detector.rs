//! End-of-turn detection
//!
//! Two interchangeable strategies decide when the user has finished a turn:
//! an automatic silence-based detector fed with energy levels on a fixed
//! polling cadence, and a manual push-to-talk detector driven by explicit
//! user signals. The orchestrator only sees the common trait.
//!
//! Time is taken from an injectable [`Clock`] so the hangover and debounce
//! rules can be tested without waiting wall-clock time.

use std::time::{Duration, Instant};

use crate::config::VadConfig;

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// What the detector concluded from the latest observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    /// Nothing to report; keep listening
    Pending,
    /// The user turn is complete; finalize the capture
    Ended,
    /// A too-short burst was discarded as noise; keep listening
    Discarded,
}

/// A strategy that signals the end of a user turn.
///
/// Automatic variants consume energy levels and ignore user signals; manual
/// variants consume user signals and ignore levels.
pub trait EndOfTurn: Send {
    /// Feed one energy observation (called on the polling cadence while
    /// listening).
    fn on_level(&mut self, level: f32) -> TurnSignal;

    /// Feed one explicit user signal (turn start / turn end).
    fn on_user_signal(&mut self) -> TurnSignal;

    /// Reset for a new turn.
    fn arm(&mut self);

    /// Whether this variant waits for an explicit user start signal.
    fn is_manual(&self) -> bool;
}

/// Automatic silence-based end-of-turn detection.
///
/// Energy above the threshold sets a speaking latch, records the speech
/// start on the first crossing and the last-active time on every crossing.
/// Once silence has lasted past the hangover window the turn is finalized,
/// but only if the accumulated speech (last-active minus speech-start)
/// exceeds the minimum; shorter bursts clear the latch and are discarded.
pub struct SilenceDetector<C: Clock = SystemClock> {
    config: VadConfig,
    clock: C,
    speaking: bool,
    speech_start: Option<Instant>,
    last_active: Option<Instant>,
}

impl SilenceDetector {
    /// Create a detector on the system clock.
    #[must_use]
    pub fn new(config: VadConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> SilenceDetector<C> {
    /// Create a detector with a custom clock.
    pub fn with_clock(config: VadConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            speaking: false,
            speech_start: None,
            last_active: None,
        }
    }

    /// Whether the speaking latch is currently set
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    fn observe(&mut self, level: f32) -> TurnSignal {
        let now = self.clock.now();

        if level > self.config.energy_threshold {
            if !self.speaking {
                self.speaking = true;
                self.speech_start = Some(now);
                tracing::trace!(level, "speech detected");
            }
            self.last_active = Some(now);
            return TurnSignal::Pending;
        }

        if !self.speaking {
            return TurnSignal::Pending;
        }

        let (Some(last_active), Some(speech_start)) = (self.last_active, self.speech_start)
        else {
            return TurnSignal::Pending;
        };

        let silence = now.duration_since(last_active);
        if silence <= Duration::from_millis(self.config.hangover_ms) {
            return TurnSignal::Pending;
        }

        let speech = last_active.duration_since(speech_start);
        self.speaking = false;
        self.speech_start = None;
        self.last_active = None;

        if speech > Duration::from_millis(self.config.min_speech_ms) {
            tracing::debug!(speech_ms = speech.as_millis() as u64, "turn complete");
            TurnSignal::Ended
        } else {
            tracing::debug!(speech_ms = speech.as_millis() as u64, "too short, discarded");
            TurnSignal::Discarded
        }
    }
}

impl<C: Clock> EndOfTurn for SilenceDetector<C> {
    fn on_level(&mut self, level: f32) -> TurnSignal {
        self.observe(level)
    }

    fn on_user_signal(&mut self) -> TurnSignal {
        TurnSignal::Pending
    }

    fn arm(&mut self) {
        self.speaking = false;
        self.speech_start = None;
        self.last_active = None;
    }

    fn is_manual(&self) -> bool {
        false
    }
}

/// Manual push-to-talk end-of-turn detection.
///
/// The first user signal marks the start of the turn, the second finalizes
/// it. No signal analysis occurs; used where automatic cutoff cannot be
/// trusted.
#[derive(Debug, Default)]
pub struct PushToTalk {
    talking: bool,
}

impl PushToTalk {
    /// Create a push-to-talk detector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a turn is currently open
    #[must_use]
    pub const fn is_talking(&self) -> bool {
        self.talking
    }
}

impl EndOfTurn for PushToTalk {
    fn on_level(&mut self, _level: f32) -> TurnSignal {
        TurnSignal::Pending
    }

    fn on_user_signal(&mut self) -> TurnSignal {
        if self.talking {
            self.talking = false;
            TurnSignal::Ended
        } else {
            self.talking = true;
            TurnSignal::Pending
        }
    }

    fn arm(&mut self) {
        self.talking = false;
    }

    fn is_manual(&self) -> bool {
        true
    }
}
