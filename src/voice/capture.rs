//! Microphone capture for user turns
//!
//! One input device is acquired per session and reused across turns; only
//! the buffering is armed and disarmed per turn. Each `begin` bumps a
//! generation counter that the cpal callback validates before appending, so
//! a stale stream callback can never write into a newer capture session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for capture (matches the transcription boundary contract)
pub const CAPTURE_SAMPLE_RATE: u32 = 48_000;

/// A finite, finalized audio recording with its mime descriptor.
///
/// Handing a clip off is a move; the producer keeps nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

/// Outcome of finalizing a capture
#[derive(Debug)]
pub enum Captured {
    /// A non-empty recording
    Clip(AudioClip),
    /// Zero samples were buffered; not an error, the turn is simply discarded
    Empty,
}

/// Captures turn-delimited audio from the default input device
pub struct CaptureController {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    generation: Arc<AtomicU64>,
    stream: Option<Stream>,
}

impl CaptureController {
    /// Acquire the default input device at 48 kHz mono.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] when no device is available or the
    /// device refuses a usable configuration.
    pub fn prepare() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Permission("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Permission(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Permission("no suitable input config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = CAPTURE_SAMPLE_RATE,
            channels = config.channels,
            "capture device acquired"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            generation: Arc::new(AtomicU64::new(0)),
            stream: None,
        })
    }

    /// Start buffering a new turn.
    ///
    /// Safe to call while a previous capture is still armed: the old buffer
    /// is discarded and its callbacks invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] if the input stream cannot be built.
    pub fn begin(&mut self) -> Result<()> {
        self.stream = None;

        let armed_gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }

        let buffer = Arc::clone(&self.buffer);
        let generation = Arc::clone(&self.generation);

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Permission("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // A callback from a superseded capture must not touch
                    // the new session's buffer.
                    if generation.load(Ordering::SeqCst) != armed_gen {
                        return;
                    }
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "capture stream error");
                },
                None,
            )
            .map_err(|e| Error::Permission(e.to_string()))?;

        stream.play().map_err(|e| Error::Permission(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!(generation = armed_gen, "capture armed");
        Ok(())
    }

    /// Stop buffering and return the finalized clip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if WAV encoding fails.
    pub fn finish(&mut self) -> Result<Captured> {
        self.stream = None;
        self.generation.fetch_add(1, Ordering::SeqCst);

        let samples = self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        if samples.is_empty() {
            tracing::debug!("capture finalized empty");
            return Ok(Captured::Empty);
        }

        let bytes = samples_to_wav(&samples, CAPTURE_SAMPLE_RATE)?;
        tracing::debug!(samples = samples.len(), bytes = bytes.len(), "capture finalized");

        Ok(Captured::Clip(AudioClip {
            bytes,
            mime: "audio/wav",
        }))
    }

    /// RMS energy over the most recent `window` samples of the live buffer.
    #[must_use]
    pub fn level(&self, window: usize) -> f32 {
        self.buffer.lock().map_or(0.0, |buf| {
            let start = buf.len().saturating_sub(window);
            rms(&buf[start..])
        })
    }

    /// Whether a capture is currently armed
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.stream.is_some()
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes for the transcription boundary
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
