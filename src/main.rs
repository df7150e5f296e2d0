use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use habla::config::{DEFAULT_PORT, DEFAULT_SERVER_URL, ServeConfig, VadConfig};
use habla::session::SessionRunner;
use habla::voice::{CaptureController, playback};

/// Habla - voice-driven Spanish conversation practice
#[derive(Parser)]
#[command(name = "habla", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a practice conversation (default)
    Practice {
        /// Boundary server base URL
        #[arg(long, env = "HABLA_SERVER", default_value = DEFAULT_SERVER_URL)]
        server: String,

        /// Push-to-talk instead of automatic silence detection
        /// (press Enter to start and stop a turn)
        #[arg(long)]
        manual: bool,
    },
    /// Run the reply and synthesis boundary server
    Serve {
        /// Port to listen on
        #[arg(long, env = "HABLA_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Synthesize and play a phrase through the boundary server
    Say {
        /// Boundary server base URL
        #[arg(long, env = "HABLA_SERVER", default_value = DEFAULT_SERVER_URL)]
        server: String,

        /// Text to speak
        #[arg(default_value = "Hola, ¿qué tal? Esto es una prueba.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,habla=info",
        1 => "info,habla=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Practice {
        server: DEFAULT_SERVER_URL.to_string(),
        manual: false,
    }) {
        Command::Practice { server, manual } => practice(&server, manual).await,
        Command::Serve { port } => serve(port).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Say { server, text } => say(&server, &text).await,
    }
}

/// Run one practice conversation
async fn practice(server: &str, manual: bool) -> anyhow::Result<()> {
    let vad = VadConfig::from_env();

    tracing::info!(server, manual, "starting practice session");
    if manual {
        println!("Push-to-talk: press Enter to start a turn, Enter again to finish it.");
    }

    let runner = SessionRunner::new(server, manual, vad)?;
    runner.run().await?;

    println!("Hasta la próxima!");
    Ok(())
}

/// Run the boundary server
async fn serve(port: u16) -> anyhow::Result<()> {
    let config = ServeConfig::from_env()?;
    tracing::info!(
        port,
        stt_model = %config.stt_model,
        chat_model = %config.chat_model,
        tts_model = %config.tts_model,
        "starting boundary server"
    );
    habla::api::serve(config, port).await?;
    Ok(())
}

/// Test microphone input with a live level meter
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CaptureController::prepare()?;
    capture.begin()?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let level = capture.level(48_000);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (level * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {:.4} | [{}]", i + 1, level, meter);
    }

    capture.finish()?;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24_000u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (sample_rate as f32 * 2.0) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback::play_samples(samples, sample_rate).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Synthesize a phrase via the boundary server and play it
async fn say(server: &str, text: &str) -> anyhow::Result<()> {
    use habla::client::tts::{HttpSynthesizer, Synthesizer};

    println!("Synthesizing: \"{text}\"\n");

    let synth = HttpSynthesizer::new(server);
    let clip = synth.synthesize(text).await?;
    println!("Got {} bytes of audio data", clip.bytes.len());

    println!("Playing audio...");
    playback::play_clip(clip).await?;

    println!("\n---");
    println!("If you heard the speech, the synthesis boundary is working!");

    Ok(())
}
