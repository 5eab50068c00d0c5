//! Speech Synth CLI
//!
//! Command-line interface for trying the synthesis adapter against a live
//! backend.

#![allow(clippy::print_stdout)]

mod settings;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use speech_synth::{
    AudioFrame, InstructTts, SegmentEnd, SegmentEvent, SynthesisConfig, TextToSpeech, encode_wav,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::settings::Overrides;

/// Speech Synth CLI
#[derive(Parser)]
#[command(name = "speech-synth-cli")]
#[command(author, version, about = "Text-to-speech adapter CLI", long_about = None)]
struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (default: ./speech_synth.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize text into a wave file
    ///
    /// Example: speech-synth-cli synthesize "你好" --output hello.wav
    Synthesize {
        /// Text to speak
        text: String,

        /// Output wave file
        #[arg(short, long, default_value = "output.wav")]
        output: PathBuf,
    },

    /// Synthesize text and print every frame as it arrives
    Frames {
        /// Text to speak
        text: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Determine log filter level from verbosity count
const fn log_filter_from_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Milliseconds of audio in `samples` at `sample_rate`
fn audio_millis(samples: u32, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    u64::from(samples) * 1000 / u64::from(sample_rate)
}

fn load_config(cli: &Cli) -> anyhow::Result<SynthesisConfig> {
    let mut config = settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.overrides.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    Ok(config)
}

async fn synthesize_to_file(
    config: SynthesisConfig,
    text: &str,
    output: &Path,
) -> anyhow::Result<()> {
    let tts = InstructTts::from_config(config)?;
    let started = Instant::now();

    let Some(frame) = tts.synthesize(text)?.collect().await? else {
        println!("⚠️  Backend returned no audio");
        return Ok(());
    };

    let samples: Vec<i16> = frame.samples().collect();
    let wav = encode_wav(&samples, frame.sample_rate())?;
    std::fs::write(output, wav).with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "✅ Wrote {} ({} ms of audio at {} Hz) in {} ms",
        output.display(),
        audio_millis(frame.samples_per_channel(), frame.sample_rate()),
        frame.sample_rate(),
        started.elapsed().as_millis()
    );
    Ok(())
}

fn describe_frame(index: usize, frame: &AudioFrame, elapsed_ms: u128) -> String {
    format!(
        "#{index:<4} {:>6} samples  {:>5} ms  {} Hz  +{elapsed_ms} ms",
        frame.samples_per_channel(),
        audio_millis(frame.samples_per_channel(), frame.sample_rate()),
        frame.sample_rate()
    )
}

/// Summary line for a finished segment; failures become errors
fn describe_end(frames: usize, end: SegmentEnd) -> anyhow::Result<String> {
    match end {
        SegmentEnd::Completed => Ok(format!("✅ Completed: {frames} frame(s)")),
        SegmentEnd::Cancelled => Ok(format!("⏹️  Cancelled after {frames} frame(s)")),
        SegmentEnd::Failed(e) => {
            Err(anyhow::Error::new(e).context(format!("Synthesis failed after {frames} frame(s)")))
        },
    }
}

async fn print_frames(config: SynthesisConfig, text: &str) -> anyhow::Result<()> {
    let tts = InstructTts::from_config(config)?;
    let started = Instant::now();
    let mut stream = tts.synthesize(text)?;

    println!("🔊 Segment {}", stream.segment_id());

    let mut index = 0;
    while let Some(event) = stream.next_event().await {
        match event {
            SegmentEvent::Audio(audio) => {
                index += 1;
                println!("{}", describe_frame(index, &audio.frame, started.elapsed().as_millis()));
            },
            SegmentEvent::End(end) => println!("{}", describe_end(index, end)?),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| log_filter_from_verbosity(cli.verbose).to_string());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Synthesize { text, output } => {
            synthesize_to_file(config, &text, &output).await?;
        },

        Commands::Frames { text } => {
            print_frames(config, &text).await?;
        },

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        },
    }

    Ok(())
}
