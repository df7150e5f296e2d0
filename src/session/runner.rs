//! Drives the conversation state machine against real devices and boundaries
//!
//! One task owns everything: the select loop waits on normalized events, the
//! VAD polling tick and Ctrl-C, feeds the machine, and executes the actions
//! it returns. Capture and playback streams are not `Send`, so capture lives
//! on this task and playback builds its streams inside `spawn_blocking`
//! (see `voice::playback`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use crate::client::reply::{ReplyClient, ReplyEvent};
use crate::client::tts::{HttpSynthesizer, Synthesizer};
use crate::config::{RETRY_DELAY_MS, VadConfig};
use crate::scenario::SCENARIO_ID;
use crate::session::machine::{Action, Conversation, Event, SessionPhase};
use crate::voice::capture::{CAPTURE_SAMPLE_RATE, CaptureController, Captured};
use crate::voice::detector::{EndOfTurn, PushToTalk, SilenceDetector, TurnSignal};
use crate::voice::playback;
use crate::Result;

/// Runs one practice conversation end to end
pub struct SessionRunner {
    machine: Conversation,
    capture: CaptureController,
    detector: Box<dyn EndOfTurn>,
    vad: VadConfig,
    reply: ReplyClient,
    synth: Arc<dyn Synthesizer>,
    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
}

impl SessionRunner {
    /// Acquire the microphone and wire up the boundary clients.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Permission`] when no usable input device
    /// exists.
    pub fn new(server_url: &str, manual: bool, vad: VadConfig) -> Result<Self> {
        let capture = CaptureController::prepare()?;

        let detector: Box<dyn EndOfTurn> = if manual {
            Box::new(PushToTalk::new())
        } else {
            Box::new(SilenceDetector::new(vad))
        };

        let (tx, rx) = mpsc::channel(64);

        Ok(Self {
            machine: Conversation::new(manual),
            capture,
            detector,
            vad,
            reply: ReplyClient::new(server_url),
            synth: Arc::new(HttpSynthesizer::new(server_url)),
            tx,
            rx,
        })
    }

    /// Run the conversation until the scenario finishes or Ctrl-C.
    ///
    /// # Errors
    ///
    /// Currently infallible after construction; kept fallible for parity
    /// with the rest of the session API.
    pub async fn run(mut self) -> Result<()> {
        // Any line on stdin is the user signal (open/close a manual turn,
        // retry after a permission denial)
        let signal_tx = self.tx.clone();
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                if signal_tx.send(Event::UserSignal).await.is_err() {
                    break;
                }
            }
        });

        self.feed(Event::Start).await;

        let mut tick =
            tokio::time::interval(Duration::from_millis(self.vad.poll_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            if self.machine.phase() == SessionPhase::Finished {
                break;
            }

            tokio::select! {
                Some(event) = self.rx.recv() => {
                    self.dispatch(event).await;
                }
                _ = tick.tick() => {
                    self.poll_detector().await;
                }
                _ = &mut ctrl_c => {
                    tracing::info!("interrupted");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Route raw user signals through the end-of-turn strategy before the
    /// machine sees anything.
    async fn dispatch(&mut self, event: Event) {
        if matches!(event, Event::UserSignal) {
            match self.detector.on_user_signal() {
                TurnSignal::Ended => self.feed(Event::TurnEnded).await,
                TurnSignal::Pending | TurnSignal::Discarded => {
                    self.feed(Event::UserSignal).await;
                }
            }
            return;
        }
        self.feed(event).await;
    }

    /// Sample the live capture level and ask the detector about it.
    async fn poll_detector(&mut self) {
        if self.machine.phase() != SessionPhase::Listening || self.detector.is_manual() {
            return;
        }

        #[allow(clippy::cast_possible_truncation)]
        let window =
            (u64::from(CAPTURE_SAMPLE_RATE) * self.vad.poll_interval_ms / 1000) as usize;
        let level = self.capture.level(window);

        match self.detector.on_level(level) {
            TurnSignal::Ended => self.feed(Event::TurnEnded).await,
            TurnSignal::Discarded => {
                tracing::debug!("speech burst too short, discarded as noise");
            }
            TurnSignal::Pending => {}
        }
    }

    /// Feed one event (and every synchronous follow-up) through the machine.
    async fn feed(&mut self, event: Event) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            let before = self.machine.phase();
            self.narrate(&event);

            for action in self.machine.on_event(event) {
                if let Some(follow_up) = self.execute(action).await {
                    pending.push_back(follow_up);
                }
            }

            let after = self.machine.phase();
            if before != after {
                print_status(after);
            }
        }
    }

    /// Execute one action; synchronous outcomes come back as events.
    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::BeginCapture => {
                // Push-to-talk manages its own state from the signal that
                // opened the turn; arming would erase it
                if !self.detector.is_manual() {
                    self.detector.arm();
                }
                match self.capture.begin() {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "could not arm capture");
                        Some(Event::PermissionDenied)
                    }
                }
            }

            Action::FinalizeCapture => match self.capture.finish() {
                Ok(captured) => Some(Event::Captured(captured)),
                Err(e) => {
                    tracing::warn!(error = %e, "capture finalization failed, discarding turn");
                    Some(Event::Captured(Captured::Empty))
                }
            },

            Action::SendClip { epoch, turn, clip } => {
                let reply = self.reply.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let (rtx, mut rrx) = mpsc::channel::<ReplyEvent>(32);
                    let streamer = tokio::spawn(async move {
                        reply.stream_turn(clip, SCENARIO_ID, turn, rtx).await;
                    });
                    while let Some(event) = rrx.recv().await {
                        if tx.send(Event::Reply { epoch, event }).await.is_err() {
                            break;
                        }
                    }
                    let _ = streamer.await;
                });
                None
            }

            Action::Synthesize { epoch, seq, text } => {
                let synth = Arc::clone(&self.synth);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let clip = match synth.synthesize(&text).await {
                        Ok(clip) => Some(clip),
                        Err(e) => {
                            tracing::warn!(error = %e, seq, "synthesis failed, unit skipped");
                            None
                        }
                    };
                    let _ = tx.send(Event::ClipSynthesized { epoch, seq, clip }).await;
                });
                None
            }

            Action::Play { epoch, clip } => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = playback::play_clip(clip).await {
                        tracing::warn!(error = %e, "playback failed, advancing");
                    }
                    let _ = tx.send(Event::PlaybackDone { epoch }).await;
                });
                None
            }

            Action::PlaySuccessCue => {
                if let Err(e) = playback::play_success_cue().await {
                    tracing::warn!(error = %e, "success cue failed");
                }
                None
            }

            Action::ArmRetry => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                    let _ = tx.send(Event::RetryElapsed).await;
                });
                None
            }
        }
    }

    /// Print transcript lines as they become known.
    fn narrate(&self, event: &Event) {
        match event {
            Event::Reply {
                event: ReplyEvent::Transcription(text),
                ..
            } if !text.trim().is_empty() => {
                println!("  You:   {text}");
            }
            Event::Reply {
                event: ReplyEvent::Closed,
                ..
            } => {
                // covers both streamed replies and the canned apology: the
                // exchange holds the full assistant text by stream end
                let said = self.machine.exchange().assistant_display();
                if !said.is_empty() {
                    println!("  Lucia: {said}");
                }
            }
            Event::Start => {
                println!("  Lucia: {}", crate::scenario::GREETING);
            }
            _ => {}
        }
    }
}

/// One status line per phase change
fn print_status(phase: SessionPhase) {
    let status = match phase {
        SessionPhase::Idle => return,
        SessionPhase::AwaitingUser => "[press Enter to talk]",
        SessionPhase::Listening => "[listening...]",
        SessionPhase::Sending => "[thinking...]",
        SessionPhase::Speaking => "[speaking...]",
        SessionPhase::Error => "[something went wrong, retrying shortly]",
        SessionPhase::PermissionNeeded => "[microphone needed - press Enter to retry]",
        SessionPhase::Finished => "[conversation complete!]",
    };
    println!("{status}");
}
