//! Stream reassembly and segmentation properties

use habla::client::reply::{LineAssembler, ReplyEvent, parse_line};
use habla::voice::segment::{SentenceSegmenter, SynthesisSequencer, speakable, strip_marker};
use habla::voice::{AudioClip, ClipEnded, PlaybackQueue};

#[test]
fn byte_by_byte_drip_feed_reassembles_every_record() {
    let wire = "{\"type\":\"transcription\",\"text\":\"Hola, ¿qué tal?\"}\n\
                {\"type\":\"chunk\",\"text\":\"¡Hola! \"}\n\
                {\"type\":\"chunk\",\"text\":\"¿Qué película quieres ver?\"}\n";

    let mut lines = LineAssembler::new();
    let mut events = Vec::new();

    for byte in wire.as_bytes() {
        for line in lines.push(std::slice::from_ref(byte)) {
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
    }
    assert!(lines.finish().is_none());

    assert_eq!(events, vec![
        ReplyEvent::Transcription("Hola, ¿qué tal?".to_string()),
        ReplyEvent::Chunk("¡Hola! ".to_string()),
        ReplyEvent::Chunk("¿Qué película quieres ver?".to_string()),
    ]);
}

#[test]
fn malformed_record_does_not_kill_the_stream() {
    let wire = b"{\"type\":\"chunk\",\"text\":\"Uno. \"}\n\
                 {garbage}\n\
                 {\"type\":\"chunk\",\"text\":\"Dos.\"}\n";

    let mut lines = LineAssembler::new();
    let events: Vec<ReplyEvent> = lines
        .push(wire)
        .iter()
        .filter_map(|line| parse_line(line))
        .collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[1], ReplyEvent::Chunk("Dos.".to_string()));
}

#[test]
fn one_sentence_per_chunk_yields_one_unit_per_chunk() {
    let sentences = [
        "Buenas tardes. ",
        "¿Qué quieres ver? ",
        "¡Claro que sí! ",
        "Son nueve euros. ",
        "Sala tres. ",
    ];

    let mut seg = SentenceSegmenter::new();
    for sentence in sentences {
        let units = seg.push(sentence);
        assert_eq!(units, vec![sentence.to_string()]);
    }
    assert!(seg.finish().is_none());
}

#[test]
fn concatenation_property_over_awkward_splits() {
    // The reply text carved into deliberately hostile chunk boundaries:
    // mid-word, mid-marker, punctuation separated from its whitespace.
    let chunks = [
        "Per",
        "fecto. Una entrada para City of God",
        ". Adiós, que disfrutes la película.",
        "[FIN",
        "ISHED]",
    ];

    let mut seg = SentenceSegmenter::new();
    let mut spoken = Vec::new();
    for chunk in chunks {
        for unit in seg.push(chunk) {
            spoken.extend(speakable(&unit));
        }
    }
    if let Some(rest) = seg.finish() {
        spoken.extend(speakable(&rest));
    }

    let full: String = chunks.concat();
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    assert_eq!(
        normalize(&spoken.join(" ")),
        normalize(&strip_marker(&full))
    );
    // and the marker never reaches a speakable unit
    assert!(spoken.iter().all(|u| !u.contains("[FINISHED]")));
}

#[test]
fn sequencer_and_queue_preserve_dispatch_order_end_to_end() {
    let clip = |tag: u8| AudioClip {
        bytes: vec![tag],
        mime: "audio/mpeg",
    };

    let mut sequencer = SynthesisSequencer::new();
    let mut queue = PlaybackQueue::new();
    let mut played = Vec::new();

    let seqs: Vec<usize> = (0..4).map(|_| sequencer.dispatch()).collect();

    // completions arrive fully reversed
    for (&seq, tag) in seqs.iter().zip(1u8..=4).rev() {
        for released in sequencer.complete(seq, Some(clip(tag))) {
            if let Some(start) = queue.enqueue(released) {
                played.push(start.bytes[0]);
            }
        }
    }
    while let ClipEnded::Next(next) = queue.clip_ended() {
        played.push(next.bytes[0]);
    }

    assert_eq!(played, vec![1, 2, 3, 4]);
}
