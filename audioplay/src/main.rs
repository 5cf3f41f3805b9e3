//! audioplay - Main entry point
//!
//! Plays a five-second sine sweep (or an MP3 file) through a render sink,
//! pacing submissions against the sink's queued latency.

use std::path::PathBuf;

use anyhow::{Context, Result};
use audioplay::audio::output;
use audioplay::audio::{Destination, SinkKind};
use audioplay::config::{ConfigOverrides, ConfigSource, Settings, TomlConfig};
use audioplay::playback::events::{self, EventCounts};
use audioplay::playback::runner::{self, RunReport};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for audioplay
#[derive(Parser, Debug)]
#[command(name = "audioplay")]
#[command(about = "PCM render pipeline demo: sine sweep or MP3 through a paced buffer pool")]
#[command(version)]
struct Args {
    /// Output route: 0 = local/analogue, 1 = hdmi
    #[arg(value_name = "DEST", env = "AUDIOPLAY_DEST")]
    dest: Option<u32>,

    /// Render sink
    #[arg(long, value_enum, env = "AUDIOPLAY_SINK")]
    sink: Option<SinkKind>,

    /// Length of the sweep in seconds
    #[arg(long, env = "AUDIOPLAY_DURATION")]
    duration: Option<u64>,

    #[arg(long, env = "AUDIOPLAY_SAMPLE_RATE")]
    sample_rate: Option<u32>,

    #[arg(long, env = "AUDIOPLAY_CHANNELS")]
    channels: Option<u16>,

    /// Bits per sample (16 or 32)
    #[arg(long, env = "AUDIOPLAY_BIT_DEPTH")]
    bit_depth: Option<u16>,

    /// Output buffer count
    #[arg(long, env = "AUDIOPLAY_BUFFERS")]
    buffers: Option<u32>,

    /// Decode and play this MP3 file instead of the sweep
    #[arg(long, value_name = "FILE", env = "AUDIOPLAY_MP3")]
    mp3: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE", env = "AUDIOPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Output device name (cpal sink)
    #[arg(long, env = "AUDIOPLAY_DEVICE")]
    device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Write run statistics to a JSON file
    #[arg(long, value_name = "FILE", env = "AUDIOPLAY_REPORT")]
    report: Option<PathBuf>,
}

/// JSON written by `--report`
#[derive(Serialize)]
struct Report<'a> {
    version: &'static str,
    git_hash: &'static str,
    finished_at: DateTime<Utc>,
    run: &'a RunReport,
    events: EventCounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (toml_config, source) = TomlConfig::load_or_default(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("audioplay={}", toml_config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "audioplay v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match &source {
        ConfigSource::File(path) => info!("Loaded configuration from {}", path.display()),
        ConfigSource::Defaults { missing: Some(path) } => {
            warn!("Config file {} not found, using defaults", path.display())
        }
        ConfigSource::Defaults { missing: None } => {
            warn!("No config directory on this platform, using defaults")
        }
    }

    if args.list_devices {
        for name in output::list_devices().context("Failed to list audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let destination = args
        .dest
        .map(Destination::from_index)
        .transpose()
        .context("Invalid destination")?;

    let settings = Settings::resolve(
        &toml_config,
        ConfigOverrides {
            sample_rate: args.sample_rate,
            channels: args.channels,
            bit_depth: args.bit_depth,
            num_buffers: args.buffers,
            duration_secs: args.duration,
            destination,
            sink: args.sink,
            device: args.device,
        },
    );

    info!("Outputting audio to {}", settings.destination.description());

    let (tx, rx) = events::channel();
    let event_task = tokio::spawn(events::log_events(rx));

    let mp3 = args.mp3.clone();
    let report = tokio::task::spawn_blocking(move || runner::run(&settings, mp3.as_deref(), tx))
        .await
        .context("Playback thread panicked")?
        .context("Playback failed")?;

    // Every sender is gone once the run returns, so this finishes
    let event_counts = event_task.await.context("Event task failed")?;

    info!(
        "Done: {} buffers ({} bytes) on '{}', {} returned by the sink",
        report.stats.submitted,
        report.stats.bytes_submitted,
        report.sink,
        event_counts.buffers_returned
    );

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&Report {
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("GIT_HASH"),
            finished_at: Utc::now(),
            run: &report,
            events: event_counts,
        })
        .context("Failed to serialize report")?;

        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}
