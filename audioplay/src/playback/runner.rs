//! One complete run: open the sink, build the session, drive it, tear down.
//!
//! Blocking; call from `tokio::task::spawn_blocking`.

use crate::audio::decoder::{DecoderPorts, StreamDecoder};
use crate::audio::types::{Destination, PcmFormat, SessionConfig};
use crate::audio::wavetable::{SweepOscillator, Wavetable};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::playback::driver::{iteration_count, DecoderRequest, PlaybackDriver, RunStats};
use crate::playback::events::EventSender;
use crate::playback::session::AudioSession;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub format: PcmFormat,
    pub sink: String,
    pub destination: Destination,
    /// "sweep", or the decoded file's path
    pub source: String,
    pub decoder_ports: Option<DecoderPorts>,
    pub stats: RunStats,
}

/// Play the sine sweep, or `mp3` when given.
///
/// In decode mode the PCM format comes from the file; the configured
/// rate, channel count and bit depth are ignored.
pub fn run(settings: &Settings, mp3: Option<&Path>, events: EventSender) -> Result<RunReport> {
    let format = match mp3 {
        Some(path) => {
            let format = StreamDecoder::probe(path)?;
            info!("Stream format from {}: {}", path.display(), format);
            format
        }
        None => settings.pcm_format()?,
    };

    let config = settings.session_config(format)?;
    let sink = settings
        .sink
        .open(&config, settings.device.as_deref(), settings.destination, events)?;
    let session = AudioSession::create(config, sink)?;
    let sink_name = session.sink_name().to_string();

    let mut driver = PlaybackDriver::new(session);
    let result = drive(&mut driver, settings, mp3, &config);
    let shutdown = driver.shutdown();

    let (stats, decoder_ports) = result?;
    shutdown?;

    Ok(RunReport {
        format,
        sink: sink_name,
        destination: settings.destination,
        source: mp3.map_or_else(|| "sweep".to_string(), |p| p.display().to_string()),
        decoder_ports,
        stats,
    })
}

fn drive(
    driver: &mut PlaybackDriver,
    settings: &Settings,
    mp3: Option<&Path>,
    config: &SessionConfig,
) -> Result<(RunStats, Option<DecoderPorts>)> {
    let destination = settings.destination.name();

    match mp3 {
        Some(path) => {
            let request = DecoderRequest::symmetric(config.num_buffers, config.buffer_capacity());
            let ports = driver
                .configure(destination, Some(request))?
                .ok_or_else(|| Error::Internal("decoder ports missing after configure".to_string()))?;

            let mut decoder = StreamDecoder::open(path, ports)?;
            let stats = driver.run(&mut decoder, None)?;
            info!("Decoded {} frames", decoder.frames_decoded());
            Ok((stats, Some(ports)))
        }
        None => {
            let iterations = iteration_count(config.format.sample_rate, settings.duration_secs)?;
            driver.configure(destination, None)?;

            let mut oscillator = SweepOscillator::new(Arc::new(Wavetable::sine()));
            let stats = driver.run(&mut oscillator, Some(iterations))?;
            Ok((stats, None))
        }
    }
}
