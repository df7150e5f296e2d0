//! Conversation state-machine tests
//!
//! Drives the pure machine with normalized events and checks phases and
//! actions; no microphone, speaker or network involved.

use habla::client::reply::ReplyEvent;
use habla::session::machine::{Action, Conversation, Event, SessionPhase};
use habla::voice::capture::{AudioClip, Captured};

fn clip(tag: u8) -> AudioClip {
    AudioClip {
        bytes: vec![tag],
        mime: "audio/mpeg",
    }
}

/// Play the greeting to completion; machine ends up Listening (automatic
/// variant). Returns nothing; panics on unexpected shape.
fn past_greeting(machine: &mut Conversation) {
    let actions = machine.on_event(Event::Start);
    let Some(Action::Synthesize { epoch, seq, text }) = actions.first() else {
        panic!("greeting must dispatch a synthesis request");
    };
    assert_eq!(*seq, 0);
    assert!(text.contains("Lucia"));

    let epoch = *epoch;
    let actions = machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 0,
        clip: Some(clip(0)),
    });
    assert!(matches!(actions.first(), Some(Action::Play { .. })));

    machine.on_event(Event::PlaybackDone { epoch });
    assert_eq!(machine.phase(), SessionPhase::Listening);
}

/// Open a user turn and return the epoch and wire turn of the sent clip.
fn send_user_clip(machine: &mut Conversation) -> (u64, u64) {
    machine.on_event(Event::TurnEnded);
    assert_eq!(machine.phase(), SessionPhase::Sending);

    let actions = machine.on_event(Event::Captured(Captured::Clip(clip(9))));
    let Some(Action::SendClip { epoch, turn, .. }) = actions.first() else {
        panic!("a non-empty capture must be sent");
    };
    (*epoch, *turn)
}

#[test]
fn first_turn_hola_flows_to_rearm() {
    let mut machine = Conversation::new(false);
    past_greeting(&mut machine);

    let (epoch, turn) = send_user_clip(&mut machine);
    assert_eq!(turn, 0);

    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Transcription("Hola".to_string()),
    });
    assert_eq!(machine.exchange().user, "Hola");

    // two chunks, one sentence each, dispatched in order
    let actions = machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Chunk("¡Hola! ".to_string()),
    });
    assert!(
        matches!(actions.first(), Some(Action::Synthesize { seq: 0, text, .. }) if text == "¡Hola!")
    );

    let actions = machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Chunk("¿Qué película quieres ver?".to_string()),
    });
    assert!(matches!(
        actions.first(),
        Some(Action::Synthesize { seq: 1, text, .. }) if text == "¿Qué película quieres ver?"
    ));

    // stream closes before any synthesis finished: not drained yet
    let actions = machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Closed,
    });
    assert!(actions.is_empty());
    assert_eq!(machine.phase(), SessionPhase::Sending);

    // clips complete in order and play in order
    let actions = machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 0,
        clip: Some(clip(1)),
    });
    assert!(matches!(
        actions.first(),
        Some(Action::Play { clip, .. }) if clip.bytes == vec![1]
    ));
    assert_eq!(machine.phase(), SessionPhase::Speaking);

    assert!(machine
        .on_event(Event::ClipSynthesized {
            epoch,
            seq: 1,
            clip: Some(clip(2)),
        })
        .is_empty());

    let actions = machine.on_event(Event::PlaybackDone { epoch });
    assert!(matches!(
        actions.first(),
        Some(Action::Play { clip, .. }) if clip.bytes == vec![2]
    ));

    // final drain: not finished, so the microphone re-arms
    let actions = machine.on_event(Event::PlaybackDone { epoch });
    assert_eq!(actions, vec![Action::BeginCapture]);
    assert_eq!(machine.phase(), SessionPhase::Listening);
    assert!(!machine.is_finished());

    assert_eq!(
        machine.exchange().assistant,
        "¡Hola! ¿Qué película quieres ver?"
    );
}

#[test]
fn playback_order_survives_reversed_completion() {
    let mut machine = Conversation::new(false);
    past_greeting(&mut machine);
    let (epoch, _) = send_user_clip(&mut machine);

    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Chunk("Uno. Dos. ".to_string()),
    });

    // unit 2 completes first: nothing may play yet
    let actions = machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 1,
        clip: Some(clip(2)),
    });
    assert!(actions.is_empty());

    // unit 1 arrives: playback starts with it, unit 2 queued behind
    let actions = machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 0,
        clip: Some(clip(1)),
    });
    assert!(matches!(
        actions.first(),
        Some(Action::Play { clip, .. }) if clip.bytes == vec![1]
    ));

    let actions = machine.on_event(Event::PlaybackDone { epoch });
    assert!(matches!(
        actions.first(),
        Some(Action::Play { clip, .. }) if clip.bytes == vec![2]
    ));
}

#[test]
fn goodbye_with_marker_finishes_after_drain() {
    let mut machine = Conversation::new(false);
    past_greeting(&mut machine);
    let (epoch, _) = send_user_clip(&mut machine);

    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Transcription("Adiós".to_string()),
    });
    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Chunk("Adiós, que disfrutes la película.[FINISHED]".to_string()),
    });

    // latched the moment the marker appeared, long before the drain
    assert!(machine.is_finished());
    // displayed text carries no marker
    assert_eq!(
        machine.exchange().assistant_display(),
        "Adiós, que disfrutes la película."
    );

    // the flushed remainder is synthesized without the marker
    let actions = machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Closed,
    });
    let Some(Action::Synthesize { seq, text, .. }) = actions.first() else {
        panic!("remainder must be dispatched at stream end");
    };
    assert_eq!(*seq, 0);
    assert_eq!(text, "Adiós, que disfrutes la película.");

    machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 0,
        clip: Some(clip(1)),
    });
    let actions = machine.on_event(Event::PlaybackDone { epoch });

    // the drain routes to Finished, not back to Listening
    assert_eq!(machine.phase(), SessionPhase::Finished);
    assert_eq!(actions, vec![Action::PlaySuccessCue]);
}

#[test]
fn canned_apology_is_one_assistant_utterance() {
    let mut machine = Conversation::new(false);
    past_greeting(&mut machine);
    let (epoch, _) = send_user_clip(&mut machine);

    let actions = machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Canned {
            transcription: String::new(),
            reply: "No te escuché bien, ¿puedes repetir?".to_string(),
        },
    });
    let Some(Action::Synthesize { text, .. }) = actions.first() else {
        panic!("the apology must be spoken");
    };
    assert_eq!(text, "No te escuché bien, ¿puedes repetir?");
    assert_eq!(
        machine.exchange().assistant,
        "No te escuché bien, ¿puedes repetir?"
    );

    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Closed,
    });
    machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 0,
        clip: Some(clip(1)),
    });
    machine.on_event(Event::PlaybackDone { epoch });

    // conversation continues
    assert_eq!(machine.phase(), SessionPhase::Listening);
    assert!(!machine.is_finished());
}

#[test]
fn stream_fault_retries_and_drops_stale_clips() {
    let mut machine = Conversation::new(false);
    past_greeting(&mut machine);
    let (epoch, _) = send_user_clip(&mut machine);

    // a unit is in flight when the stream dies
    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Chunk("Claro. ".to_string()),
    });
    let actions = machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Failed("backend gone".to_string()),
    });
    assert_eq!(machine.phase(), SessionPhase::Error);
    assert_eq!(actions, vec![Action::ArmRetry]);

    // the late completion of the abandoned unit is ignored
    let actions = machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 0,
        clip: Some(clip(1)),
    });
    assert!(actions.is_empty());
    assert_eq!(machine.phase(), SessionPhase::Error);

    let actions = machine.on_event(Event::RetryElapsed);
    assert_eq!(machine.phase(), SessionPhase::Listening);
    assert_eq!(actions, vec![Action::BeginCapture]);
}

#[test]
fn failed_synthesis_unit_does_not_stall_the_turn() {
    let mut machine = Conversation::new(false);
    past_greeting(&mut machine);
    let (epoch, _) = send_user_clip(&mut machine);

    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Chunk("Uno. Dos. ".to_string()),
    });
    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Closed,
    });

    // first unit fails; second must still play
    let actions = machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 0,
        clip: None,
    });
    assert!(actions.is_empty());

    let actions = machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 1,
        clip: Some(clip(2)),
    });
    assert!(matches!(
        actions.first(),
        Some(Action::Play { clip, .. }) if clip.bytes == vec![2]
    ));

    let actions = machine.on_event(Event::PlaybackDone { epoch });
    assert_eq!(actions, vec![Action::BeginCapture]);
    assert_eq!(machine.phase(), SessionPhase::Listening);
}

#[test]
fn turn_counter_increments_per_sent_clip() {
    let mut machine = Conversation::new(false);
    past_greeting(&mut machine);

    let (epoch, turn) = send_user_clip(&mut machine);
    assert_eq!(turn, 0);

    // finish the turn quickly with an empty-ish reply
    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Chunk("Vale. ".to_string()),
    });
    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Closed,
    });
    machine.on_event(Event::ClipSynthesized {
        epoch,
        seq: 0,
        clip: Some(clip(1)),
    });
    machine.on_event(Event::PlaybackDone { epoch });
    assert_eq!(machine.phase(), SessionPhase::Listening);

    let (_, turn) = send_user_clip(&mut machine);
    assert_eq!(turn, 1);

    // superseded exchanges are kept for display
    assert_eq!(machine.history().len(), 2);
    assert_eq!(machine.history()[1].assistant, "Vale. ");
}

#[test]
fn reply_with_no_speakable_text_drains_immediately() {
    let mut machine = Conversation::new(false);
    past_greeting(&mut machine);
    let (epoch, _) = send_user_clip(&mut machine);

    machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Chunk("   ".to_string()),
    });
    let actions = machine.on_event(Event::Reply {
        epoch,
        event: ReplyEvent::Closed,
    });

    // nothing to speak: straight back to listening
    assert_eq!(actions, vec![Action::BeginCapture]);
    assert_eq!(machine.phase(), SessionPhase::Listening);
}
