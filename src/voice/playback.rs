//! Ordered audio playback
//!
//! [`PlaybackQueue`] serializes synthesized clips: strict FIFO, at most one
//! clip playing, and a drain reported exactly once per empty period. The
//! actual output runs through cpal; streams are not `Send`, so each play
//! builds its stream inside `spawn_blocking` and reports completion back to
//! the orchestrator as an event.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::voice::capture::AudioClip;
use crate::{Error, Result};

/// Fallback playback rate when a clip does not declare one
const DEFAULT_PLAYBACK_RATE: u32 = 24_000;

/// What happens after the current clip finishes
#[derive(Debug, PartialEq, Eq)]
pub enum ClipEnded {
    /// Another clip was queued; play it next
    Next(AudioClip),
    /// The queue is empty; reported once per drain
    Drained,
    /// Nothing was playing; spurious completion, ignore
    Idle,
}

/// FIFO queue of synthesized clips awaiting playback
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    queue: VecDeque<AudioClip>,
    playing: bool,
}

impl PlaybackQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clip. Returns the clip to start playing when the queue was
    /// idle; otherwise the clip waits its turn.
    pub fn enqueue(&mut self, clip: AudioClip) -> Option<AudioClip> {
        self.queue.push_back(clip);
        if self.playing {
            None
        } else {
            self.playing = true;
            self.queue.pop_front()
        }
    }

    /// Advance past the clip that just ended.
    ///
    /// Two drains can never be reported without an intervening
    /// enqueue-and-play cycle: once drained, `playing` is false and further
    /// completions are [`ClipEnded::Idle`].
    pub fn clip_ended(&mut self) -> ClipEnded {
        if !self.playing {
            return ClipEnded::Idle;
        }
        match self.queue.pop_front() {
            Some(clip) => ClipEnded::Next(clip),
            None => {
                self.playing = false;
                ClipEnded::Drained
            }
        }
    }

    /// Whether a clip is currently playing
    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.playing
    }

    /// Number of clips waiting behind the current one
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Play a synthesized clip to the default output device.
///
/// Decoding or playback failure is returned to the caller, which logs and
/// advances the queue; one bad clip never stalls the session.
///
/// # Errors
///
/// Returns [`Error::Audio`] if the clip cannot be decoded or played.
pub async fn play_clip(clip: AudioClip) -> Result<()> {
    let (samples, rate) = decode_mp3(&clip.bytes)?;
    play_samples(samples, rate).await
}

/// Play raw f32 samples on a blocking worker thread.
///
/// # Errors
///
/// Returns [`Error::Audio`] if no output device accepts the stream.
pub async fn play_samples(samples: Vec<f32>, sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }
    tokio::task::spawn_blocking(move || play_samples_blocking(&samples, sample_rate))
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
}

/// Play the end-of-conversation success cue.
///
/// # Errors
///
/// Returns [`Error::Audio`] if playback fails.
pub async fn play_success_cue() -> Result<()> {
    let samples = success_cue_samples(DEFAULT_PLAYBACK_RATE);
    play_samples(samples, DEFAULT_PLAYBACK_RATE).await
}

/// Blocking playback: build an output stream, feed the samples, poll until
/// the tail has been written.
fn play_samples_blocking(samples: &[f32], sample_rate: u32) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            (c.channels() == 1 || c.channels() == 2)
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = config.channels as usize;

    let source = Arc::new(Mutex::new((samples.to_vec(), 0usize, false)));
    let source_cb = Arc::clone(&source);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut state) = source_cb.lock() else {
                    return;
                };
                let (ref samples, ref mut pos, ref mut finished) = *state;

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples.len() {
                        let s = samples[*pos];
                        *pos += 1;
                        s
                    } else {
                        *finished = true;
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "playback stream error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let sample_count = samples.len();
    let duration_ms = (sample_count as u64 * 1000) / u64::from(sample_rate);
    let timeout = std::time::Duration::from_millis(duration_ms + 500);
    let start = std::time::Instant::now();

    loop {
        let finished = source.lock().map(|state| state.2).unwrap_or(true);
        if finished || start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    // Let the device ring out before tearing the stream down
    std::thread::sleep(std::time::Duration::from_millis(100));
    drop(stream);

    tracing::debug!(samples = sample_count, "playback complete");
    Ok(())
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut rate = DEFAULT_PLAYBACK_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                {
                    rate = frame.sample_rate.max(8000) as u32;
                }
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };
                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("MP3 contained no audio".to_string()));
    }

    Ok((samples, rate))
}

/// Waveform shapes for the success cue
#[derive(Clone, Copy)]
enum Wave {
    Triangle,
    Square,
}

/// Synthesize the success arpeggio: a bright major chord run with two
/// percussive pops, mirroring the scripted scenario's completion jingle.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn success_cue_samples(sample_rate: u32) -> Vec<f32> {
    let total_secs = 1.1f32;
    let len = (sample_rate as f32 * total_secs) as usize;
    let mut mix = vec![0.0f32; len];

    let tones: [(f32, f32, f32, Wave); 6] = [
        (523.25, 0.0, 0.2, Wave::Triangle),  // C5
        (659.25, 0.1, 0.2, Wave::Triangle),  // E5
        (783.99, 0.2, 0.2, Wave::Triangle),  // G5
        (1046.50, 0.3, 0.6, Wave::Triangle), // C6
        (200.0, 0.3, 0.1, Wave::Square),
        (300.0, 0.4, 0.1, Wave::Square),
    ];

    for (freq, start, duration, wave) in tones {
        let first = (start * sample_rate as f32) as usize;
        let count = (duration * sample_rate as f32) as usize;

        for i in 0..count {
            let idx = first + i;
            if idx >= len {
                break;
            }
            let t = i as f32 / sample_rate as f32;
            let phase = (t * freq).fract();
            let value = match wave {
                Wave::Triangle => 4.0 * (phase - 0.5).abs() - 1.0,
                Wave::Square => {
                    if phase < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
            };
            // 0.1 gain decaying exponentially to near silence
            let envelope = 0.1 * 0.01f32.powf(t / duration);
            mix[idx] += value * envelope;
        }
    }

    mix
}
