//! Playback driver
//!
//! Runs the fixed test run on a single thread:
//! 1. Poll the session for a free buffer, sleeping while none is free
//! 2. Fill it from a PCM source (sweep oscillator or decoder)
//! 3. Wait until the sink's queued latency is at or below the ceiling
//! 4. Submit; a rejected submission aborts the run
//!
//! **State machine:** Created → Configured → Running → Draining → Destroyed.
//! Any other transition returns `Error::InvalidState`.

use crate::audio::decoder::DecoderPorts;
use crate::audio::types::{PcmSource, BUFFER_SIZE_SAMPLES};
use crate::error::{Error, Result};
use crate::playback::session::AudioSession;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Sleep between acquisition and latency polls
pub const POLL_INTERVAL_MS: u64 = 10;

/// Latency the sink may hold before the driver backs off
pub const MIN_LATENCY_MS: u64 = 20;

/// Upper bound on waiting for queued audio to play out
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    Created,
    Configured,
    Running,
    Draining,
    Destroyed,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Created => "created",
            DriverState::Configured => "configured",
            DriverState::Running => "running",
            DriverState::Draining => "draining",
            DriverState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Poll interval and latency floor for the pacing loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    pub poll_interval: Duration,
    pub min_latency: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            min_latency: Duration::from_millis(MIN_LATENCY_MS),
        }
    }
}

impl PacingConfig {
    /// Queued frames above which submission waits:
    /// `sample_rate × (min_latency + poll_interval) / 1000 ms`
    pub fn latency_ceiling(&self, sample_rate: u32) -> u32 {
        let window_ms = (self.min_latency + self.poll_interval).as_millis() as u64;
        u32::try_from(sample_rate as u64 * window_ms / 1000).unwrap_or(u32::MAX)
    }
}

/// Buffers in a run of `duration_secs` at `sample_rate`
///
/// # Errors
/// `Error::InvalidArgument` when the run is too long to count in frames.
pub fn iteration_count(sample_rate: u32, duration_secs: u64) -> Result<u64> {
    let frames = (sample_rate as u64).checked_mul(duration_secs).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "duration of {} s at {} Hz is out of range",
            duration_secs, sample_rate
        ))
    })?;
    Ok(frames / BUFFER_SIZE_SAMPLES as u64)
}

/// Buffer counts and sizes requested for the decode path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderRequest {
    pub in_count: u32,
    pub in_size: usize,
    pub out_count: u32,
    pub out_size: usize,
}

impl DecoderRequest {
    /// Same count and size on both ports
    pub fn symmetric(count: u32, size: usize) -> Self {
        Self {
            in_count: count,
            in_size: size,
            out_count: count,
            out_size: size,
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Buffers the run was asked for (None = until the source ran dry)
    pub iterations_planned: Option<u64>,
    pub submitted: u64,
    pub bytes_submitted: u64,
    /// Polls that found no free buffer
    pub acquire_waits: u64,
    /// Polls that found latency above the ceiling
    pub latency_waits: u64,
    pub latency_ceiling: u32,
    /// Highest latency seen at the moment of a submission
    pub max_latency_frames: u32,
    pub end_of_stream: bool,
    pub elapsed_ms: u64,
}

pub struct PlaybackDriver {
    session: Option<AudioSession>,
    state: DriverState,
    pacing: PacingConfig,
}

impl PlaybackDriver {
    pub fn new(session: AudioSession) -> Self {
        Self {
            session: Some(session),
            state: DriverState::Created,
            pacing: PacingConfig::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn pacing(&self) -> PacingConfig {
        self.pacing
    }

    /// The session, until `shutdown`
    pub fn session(&self) -> Option<&AudioSession> {
        self.session.as_ref()
    }

    fn expect_state(&self, expected: DriverState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState(format!(
                "cannot {} while {} (expected {})",
                operation, self.state, expected
            )));
        }
        Ok(())
    }

    fn session_ref(&self) -> Result<&AudioSession> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::InvalidState("session already deleted".to_string()))
    }

    /// Select the destination and, for decode runs, size the decoder ports.
    ///
    /// On error the driver stays in `Created`.
    pub fn configure(
        &mut self,
        destination: &str,
        decoder: Option<DecoderRequest>,
    ) -> Result<Option<DecoderPorts>> {
        self.expect_state(DriverState::Created, "configure")?;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::InvalidState("session already deleted".to_string()))?;

        session.set_destination(destination)?;
        let ports = match decoder {
            Some(req) => Some(session.configure_decoder(
                req.in_count,
                req.in_size,
                req.out_count,
                req.out_size,
            )?),
            None => None,
        };

        self.state = DriverState::Configured;
        debug!("Driver configured (destination '{}')", destination);
        Ok(ports)
    }

    /// Pump buffers from `source` into the sink.
    ///
    /// Runs `iterations` buffers, or until the source is exhausted when
    /// `None`. Afterwards waits (bounded) for queued audio to play out and
    /// leaves the driver in `Draining`, whether or not the run succeeded.
    pub fn run(&mut self, source: &mut dyn PcmSource, iterations: Option<u64>) -> Result<RunStats> {
        self.expect_state(DriverState::Configured, "run")?;
        self.state = DriverState::Running;

        let result = self
            .session_ref()
            .and_then(|session| pump(session, &self.pacing, source, iterations));

        self.state = DriverState::Draining;
        if let Ok(session) = self.session_ref() {
            drain(session, &self.pacing);
        }

        result
    }

    /// Delete the session. Allowed from any state but `Destroyed`.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == DriverState::Destroyed {
            return Err(Error::InvalidState("driver already destroyed".to_string()));
        }

        self.state = DriverState::Destroyed;
        match self.session.take() {
            Some(session) => session.delete(),
            None => Ok(()),
        }
    }
}

fn pump(
    session: &AudioSession,
    pacing: &PacingConfig,
    source: &mut dyn PcmSource,
    iterations: Option<u64>,
) -> Result<RunStats> {
    let format = session.format();
    let fill_len = session.config().fill_length();
    let ceiling = pacing.latency_ceiling(format.sample_rate);
    let limit = iterations.unwrap_or(u64::MAX);

    let mut stats = RunStats {
        iterations_planned: iterations,
        latency_ceiling: ceiling,
        ..RunStats::default()
    };

    info!(
        "Starting run: {} buffers, {} bytes each, latency ceiling {} frames",
        iterations.map_or_else(|| "until end of stream".to_string(), |n| n.to_string()),
        fill_len,
        ceiling
    );

    let started = Instant::now();

    while stats.submitted < limit {
        let mut buffer = loop {
            match session.get_buffer() {
                Some(buffer) => break buffer,
                None => {
                    stats.acquire_waits += 1;
                    trace!("No free buffer, waiting");
                    std::thread::sleep(pacing.poll_interval);
                }
            }
        };

        let len = fill_len.min(buffer.capacity());
        let filled = source.fill(&mut buffer.as_mut_slice()[..len], &format);
        let written = match filled {
            Ok(written) => written,
            Err(e) => {
                if let Err(recycle_err) = session.recycle(buffer) {
                    warn!("Could not return buffer after fill error: {}", recycle_err);
                }
                return Err(e);
            }
        };

        if written == 0 {
            session.recycle(buffer)?;
            stats.end_of_stream = true;
            debug!("Source exhausted after {} buffers", stats.submitted);
            break;
        }

        let mut latency = session.latency()?;
        while latency > ceiling {
            stats.latency_waits += 1;
            trace!("Latency {} > {} frames, waiting", latency, ceiling);
            std::thread::sleep(pacing.poll_interval);
            latency = session.latency()?;
        }
        stats.max_latency_frames = stats.max_latency_frames.max(latency);

        session.play_buffer(buffer, written)?;
        stats.submitted += 1;
        stats.bytes_submitted += written as u64;

        if stats.submitted % 100 == 0 {
            debug!("Submitted {} buffers (latency {} frames)", stats.submitted, latency);
        }
    }

    stats.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        "Run finished: {} buffers submitted in {} ms ({} acquire waits, {} latency waits)",
        stats.submitted, stats.elapsed_ms, stats.acquire_waits, stats.latency_waits
    );

    Ok(stats)
}

fn drain(session: &AudioSession, pacing: &PacingConfig) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;

    loop {
        match session.latency() {
            Ok(0) => break,
            Ok(frames) if Instant::now() >= deadline => {
                warn!("Drain timed out with {} frames still queued", frames);
                break;
            }
            Ok(_) => std::thread::sleep(pacing.poll_interval),
            Err(e) => {
                warn!("Could not read latency while draining: {}", e);
                break;
            }
        }
    }
}
