//! The turn-taking state machine
//!
//! Everything that happens to a conversation (detector verdicts, stream
//! records, synthesis completions, playback endings, timers) arrives here
//! as a normalized [`Event`]; the machine is the single writer of all
//! conversation state and answers with [`Action`]s for the runner to
//! execute. No I/O happens in this module, which is what makes the
//! turn-taking rules testable without microphones or networks.
//!
//! In-flight work is tagged with an epoch. Starting a new reply cycle (or
//! abandoning one on error) bumps the epoch, so a synthesis request or
//! playback completion that outlived its cycle is recognized and dropped
//! instead of corrupting the next one.

use crate::client::reply::ReplyEvent;
use crate::scenario::{FINISHED_MARKER, GREETING};
use crate::voice::capture::{AudioClip, Captured};
use crate::voice::playback::{ClipEnded, PlaybackQueue};
use crate::voice::segment::{SentenceSegmenter, SynthesisSequencer, speakable, strip_marker};

/// Conversation phase; exactly one is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, nothing started yet
    Idle,
    /// Waiting for the user to open a turn (manual variant)
    AwaitingUser,
    /// Microphone armed, waiting for end of turn
    Listening,
    /// Turn finalized; transcription and reply under way
    Sending,
    /// Assistant audio is playing
    Speaking,
    /// Stream or backend fault; auto-retries after a fixed delay
    Error,
    /// Microphone unavailable; waits for an explicit user retry
    PermissionNeeded,
    /// Scripted scenario complete; terminal
    Finished,
}

/// One user-utterance/assistant-utterance pair
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub index: u64,
    pub user: String,
    pub assistant: String,
}

impl Exchange {
    /// Assistant text with the termination marker stripped, for display.
    #[must_use]
    pub fn assistant_display(&self) -> String {
        strip_marker(&self.assistant).trim().to_string()
    }
}

/// Normalized input to the machine
#[derive(Debug)]
pub enum Event {
    /// Session start; greet the user
    Start,
    /// The microphone could not be acquired or armed
    PermissionDenied,
    /// Explicit user signal (open a turn, or retry after permission denial)
    UserSignal,
    /// The activity detector declared the user turn complete
    TurnEnded,
    /// Capture finalization produced a clip, or nothing
    Captured(Captured),
    /// An outcome from the reply stream of the given epoch
    Reply { epoch: u64, event: ReplyEvent },
    /// A synthesis request completed (`None`: failed, logged by the runner)
    ClipSynthesized {
        epoch: u64,
        seq: usize,
        clip: Option<AudioClip>,
    },
    /// Playback of one clip finished (successfully or not)
    PlaybackDone { epoch: u64 },
    /// The error-phase retry delay elapsed
    RetryElapsed,
}

/// Work the runner must carry out, in order
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Arm the detector and start buffering microphone audio
    BeginCapture,
    /// Stop buffering and report [`Event::Captured`]
    FinalizeCapture,
    /// Send the clip to the reply boundary and forward its stream
    SendClip {
        epoch: u64,
        turn: u64,
        clip: AudioClip,
    },
    /// Request synthesis for one sentence unit
    Synthesize {
        epoch: u64,
        seq: usize,
        text: String,
    },
    /// Play one clip and report [`Event::PlaybackDone`]
    Play { epoch: u64, clip: AudioClip },
    /// Play the completion jingle; the session is over
    PlaySuccessCue,
    /// Start the fixed retry timer and report [`Event::RetryElapsed`]
    ArmRetry,
}

/// The conversation state machine
pub struct Conversation {
    phase: SessionPhase,
    manual: bool,
    exchange: Exchange,
    history: Vec<Exchange>,
    finished: bool,
    epoch: u64,
    turns_sent: u64,
    stream_open: bool,
    segmenter: SentenceSegmenter,
    sequencer: SynthesisSequencer,
    queue: PlaybackQueue,
}

impl Conversation {
    /// Create a conversation in the Idle phase.
    ///
    /// `manual` selects the push-to-talk variant: after the assistant stops
    /// speaking the machine waits for an explicit user signal instead of
    /// re-arming the microphone immediately.
    #[must_use]
    pub fn new(manual: bool) -> Self {
        Self {
            phase: SessionPhase::Idle,
            manual,
            exchange: Exchange::default(),
            history: Vec::new(),
            finished: false,
            epoch: 0,
            turns_sent: 0,
            stream_open: false,
            segmenter: SentenceSegmenter::new(),
            sequencer: SynthesisSequencer::new(),
            queue: PlaybackQueue::new(),
        }
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The live exchange
    #[must_use]
    pub const fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Superseded exchanges, oldest first (display history only)
    #[must_use]
    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    /// Whether the termination marker has been observed.
    ///
    /// One-way: once set it stays set for the rest of the session.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one event; returns the actions to execute, in order.
    pub fn on_event(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Start => self.on_start(),
            Event::PermissionDenied => {
                self.phase = SessionPhase::PermissionNeeded;
                Vec::new()
            }
            Event::UserSignal => self.on_user_signal(),
            Event::TurnEnded => self.on_turn_ended(),
            Event::Captured(captured) => self.on_captured(captured),
            Event::Reply { epoch, event } => self.on_reply(epoch, event),
            Event::ClipSynthesized { epoch, seq, clip } => self.on_synthesized(epoch, seq, clip),
            Event::PlaybackDone { epoch } => self.on_playback_done(epoch),
            Event::RetryElapsed => self.on_retry_elapsed(),
        }
    }

    fn on_start(&mut self) -> Vec<Action> {
        if self.phase != SessionPhase::Idle {
            return Vec::new();
        }
        self.phase = SessionPhase::Speaking;
        self.exchange = Exchange {
            index: 0,
            user: String::new(),
            assistant: GREETING.to_string(),
        };
        self.dispatch_unit(GREETING)
    }

    fn on_user_signal(&mut self) -> Vec<Action> {
        match self.phase {
            SessionPhase::AwaitingUser | SessionPhase::PermissionNeeded => {
                self.phase = SessionPhase::Listening;
                vec![Action::BeginCapture]
            }
            _ => Vec::new(),
        }
    }

    fn on_turn_ended(&mut self) -> Vec<Action> {
        if self.phase != SessionPhase::Listening {
            return Vec::new();
        }
        // Instant feedback: the phase flips before any finalization work
        self.phase = SessionPhase::Sending;
        vec![Action::FinalizeCapture]
    }

    fn on_captured(&mut self, captured: Captured) -> Vec<Action> {
        if self.phase != SessionPhase::Sending {
            return Vec::new();
        }
        match captured {
            Captured::Empty => {
                tracing::debug!("empty capture, re-arming");
                self.rearm()
            }
            Captured::Clip(clip) => {
                self.epoch += 1;
                let turn = self.turns_sent;
                self.turns_sent += 1;

                let index = self.history.len() as u64 + 1;
                let previous = std::mem::replace(
                    &mut self.exchange,
                    Exchange {
                        index,
                        user: String::new(),
                        assistant: String::new(),
                    },
                );
                self.history.push(previous);

                self.stream_open = true;
                self.segmenter = SentenceSegmenter::new();
                self.sequencer.reset();
                self.queue = PlaybackQueue::new();

                vec![Action::SendClip {
                    epoch: self.epoch,
                    turn,
                    clip,
                }]
            }
        }
    }

    fn on_reply(&mut self, epoch: u64, event: ReplyEvent) -> Vec<Action> {
        if epoch != self.epoch {
            tracing::debug!(epoch, current = self.epoch, "stale reply event dropped");
            return Vec::new();
        }

        match event {
            ReplyEvent::Transcription(text) => {
                self.exchange.user = text;
                Vec::new()
            }
            ReplyEvent::Chunk(text) => {
                self.exchange.assistant.push_str(&text);
                self.check_finished_latch();

                let units = self.segmenter.push(&text);
                let mut actions = Vec::new();
                for unit in units {
                    actions.extend(self.dispatch_unit(&unit));
                }
                actions
            }
            ReplyEvent::Canned {
                transcription,
                reply,
            } => {
                self.exchange.user = transcription;
                self.exchange.assistant = reply.clone();
                self.check_finished_latch();
                self.dispatch_unit(&reply)
            }
            ReplyEvent::Closed => {
                self.stream_open = false;
                let mut actions = Vec::new();
                if let Some(rest) = self.segmenter.finish() {
                    actions.extend(self.dispatch_unit(&rest));
                }
                // A reply that produced no audio at all drains immediately
                if !self.queue.is_playing() && self.sequencer.outstanding() == 0 {
                    actions.extend(self.on_drained());
                }
                actions
            }
            ReplyEvent::Failed(message) => {
                tracing::warn!(message = %message, "reply stream failed");
                self.abandon_cycle();
                self.phase = SessionPhase::Error;
                vec![Action::ArmRetry]
            }
        }
    }

    fn on_synthesized(
        &mut self,
        epoch: u64,
        seq: usize,
        clip: Option<AudioClip>,
    ) -> Vec<Action> {
        if epoch != self.epoch {
            tracing::debug!(epoch, seq, current = self.epoch, "stale clip dropped");
            return Vec::new();
        }

        let mut actions = Vec::new();
        for released in self.sequencer.complete(seq, clip) {
            if let Some(start) = self.queue.enqueue(released) {
                self.phase = SessionPhase::Speaking;
                actions.push(Action::Play {
                    epoch: self.epoch,
                    clip: start,
                });
            }
        }
        actions
    }

    fn on_playback_done(&mut self, epoch: u64) -> Vec<Action> {
        if epoch != self.epoch {
            return Vec::new();
        }

        match self.queue.clip_ended() {
            ClipEnded::Next(clip) => vec![Action::Play {
                epoch: self.epoch,
                clip,
            }],
            ClipEnded::Drained => {
                if self.stream_open || self.sequencer.outstanding() > 0 {
                    // More audio can still arrive; stay in Speaking and let
                    // the next completed clip restart the queue
                    Vec::new()
                } else {
                    self.on_drained()
                }
            }
            ClipEnded::Idle => Vec::new(),
        }
    }

    fn on_retry_elapsed(&mut self) -> Vec<Action> {
        if self.phase != SessionPhase::Error {
            return Vec::new();
        }
        self.rearm()
    }

    /// The queue drained and nothing else is coming: decide the next phase.
    ///
    /// The finished latch is checked here, at every drain.
    fn on_drained(&mut self) -> Vec<Action> {
        if self.finished {
            self.phase = SessionPhase::Finished;
            vec![Action::PlaySuccessCue]
        } else {
            self.rearm()
        }
    }

    /// Go back to waiting for user speech.
    fn rearm(&mut self) -> Vec<Action> {
        if self.manual {
            self.phase = SessionPhase::AwaitingUser;
            Vec::new()
        } else {
            self.phase = SessionPhase::Listening;
            vec![Action::BeginCapture]
        }
    }

    /// Number a speakable unit and request its synthesis.
    ///
    /// Units with nothing to speak are a no-op and consume no sequence
    /// number.
    fn dispatch_unit(&mut self, unit: &str) -> Vec<Action> {
        speakable(unit).map_or_else(Vec::new, |text| {
            let seq = self.sequencer.dispatch();
            vec![Action::Synthesize {
                epoch: self.epoch,
                seq,
                text,
            }]
        })
    }

    /// Latch `finished` as soon as the accumulated assistant text contains
    /// the marker, even one split across chunks. Never unlatches.
    fn check_finished_latch(&mut self) {
        if !self.finished && self.exchange.assistant.contains(FINISHED_MARKER) {
            tracing::info!("termination marker observed");
            self.finished = true;
        }
    }

    /// Drop every in-flight request of the current cycle.
    fn abandon_cycle(&mut self) {
        self.epoch += 1;
        self.stream_open = false;
        self.segmenter = SentenceSegmenter::new();
        self.sequencer.reset();
        self.queue = PlaybackQueue::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(tag: u8) -> AudioClip {
        AudioClip {
            bytes: vec![tag],
            mime: "audio/mpeg",
        }
    }

    fn chunk(machine: &mut Conversation, epoch: u64, text: &str) -> Vec<Action> {
        machine.on_event(Event::Reply {
            epoch,
            event: ReplyEvent::Chunk(text.to_string()),
        })
    }

    /// Drive a fresh machine through greeting playback into Listening.
    fn past_greeting(machine: &mut Conversation) {
        let actions = machine.on_event(Event::Start);
        assert_eq!(machine.phase(), SessionPhase::Speaking);
        let Some(Action::Synthesize { epoch, seq, .. }) = actions.first() else {
            panic!("greeting must be synthesized");
        };
        let (epoch, seq) = (*epoch, *seq);

        machine.on_event(Event::ClipSynthesized {
            epoch,
            seq,
            clip: Some(clip(0)),
        });
        machine.on_event(Event::PlaybackDone { epoch });
    }

    #[test]
    fn test_greeting_then_listening() {
        let mut machine = Conversation::new(false);
        past_greeting(&mut machine);
        assert_eq!(machine.phase(), SessionPhase::Listening);
    }

    #[test]
    fn test_manual_variant_awaits_user_after_greeting() {
        let mut machine = Conversation::new(true);
        past_greeting(&mut machine);
        assert_eq!(machine.phase(), SessionPhase::AwaitingUser);

        let actions = machine.on_event(Event::UserSignal);
        assert_eq!(machine.phase(), SessionPhase::Listening);
        assert_eq!(actions, vec![Action::BeginCapture]);
    }

    #[test]
    fn test_turn_ended_gives_instant_sending() {
        let mut machine = Conversation::new(false);
        past_greeting(&mut machine);

        let actions = machine.on_event(Event::TurnEnded);
        assert_eq!(machine.phase(), SessionPhase::Sending);
        assert_eq!(actions, vec![Action::FinalizeCapture]);
    }

    #[test]
    fn test_empty_capture_never_reaches_reply_boundary() {
        let mut machine = Conversation::new(false);
        past_greeting(&mut machine);
        machine.on_event(Event::TurnEnded);

        let actions = machine.on_event(Event::Captured(Captured::Empty));
        assert!(!actions.iter().any(|a| matches!(a, Action::SendClip { .. })));
        assert_eq!(machine.phase(), SessionPhase::Listening);
    }

    #[test]
    fn test_permission_denied_waits_for_user() {
        let mut machine = Conversation::new(false);
        past_greeting(&mut machine);

        machine.on_event(Event::PermissionDenied);
        assert_eq!(machine.phase(), SessionPhase::PermissionNeeded);

        // no auto-transition; a retry is an explicit user act
        machine.on_event(Event::RetryElapsed);
        assert_eq!(machine.phase(), SessionPhase::PermissionNeeded);

        let actions = machine.on_event(Event::UserSignal);
        assert_eq!(actions, vec![Action::BeginCapture]);
        assert_eq!(machine.phase(), SessionPhase::Listening);
    }

    #[test]
    fn test_stream_failure_retries_listening() {
        let mut machine = Conversation::new(false);
        past_greeting(&mut machine);
        machine.on_event(Event::TurnEnded);
        let actions = machine.on_event(Event::Captured(Captured::Clip(clip(9))));
        let Some(Action::SendClip { epoch, .. }) = actions.first() else {
            panic!("clip must be sent");
        };
        let epoch = *epoch;

        let actions = machine.on_event(Event::Reply {
            epoch,
            event: ReplyEvent::Failed("boom".to_string()),
        });
        assert_eq!(machine.phase(), SessionPhase::Error);
        assert_eq!(actions, vec![Action::ArmRetry]);

        let actions = machine.on_event(Event::RetryElapsed);
        assert_eq!(machine.phase(), SessionPhase::Listening);
        assert_eq!(actions, vec![Action::BeginCapture]);
    }

    #[test]
    fn test_finished_latch_is_monotonic() {
        let mut machine = Conversation::new(false);
        past_greeting(&mut machine);
        machine.on_event(Event::TurnEnded);
        let actions = machine.on_event(Event::Captured(Captured::Clip(clip(9))));
        let Some(Action::SendClip { epoch, .. }) = actions.first() else {
            panic!("clip must be sent");
        };
        let epoch = *epoch;

        // marker split across two chunks still latches
        chunk(&mut machine, epoch, "Adiós.[FIN");
        assert!(!machine.is_finished());
        chunk(&mut machine, epoch, "ISHED]");
        assert!(machine.is_finished());

        // nothing un-latches it
        chunk(&mut machine, epoch, " y algo más.");
        machine.on_event(Event::Reply {
            epoch,
            event: ReplyEvent::Closed,
        });
        assert!(machine.is_finished());
    }
}
