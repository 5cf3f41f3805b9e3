//! Render sink interface
//!
//! A render sink is the component that owns the output buffer pool and
//! plays submitted buffers. The caller probes it for a free buffer, fills
//! the buffer, and hands it back with `submit`; the sink returns it to its
//! free pool once played.

use crate::audio::buffer::OutputBuffer;
use crate::audio::output::CpalSink;
use crate::audio::simulated::{Pacing, SimulatedSink};
use crate::audio::types::{Destination, PcmFormat, SessionConfig};
use crate::error::Result;
use crate::playback::events::EventSender;
use serde::Deserialize;

/// Port index of the render component's PCM input
pub const RENDER_INPUT_PORT: u32 = 100;

/// Final audio output stage.
///
/// Implementations are shared between the driver thread and their own
/// playback thread, so every method takes `&self`.
pub trait RenderSink: Send + Sync {
    /// Human-readable sink name for logs
    fn name(&self) -> &str;

    /// PCM format the sink was opened with
    fn format(&self) -> PcmFormat;

    /// Non-blocking probe for a free buffer. `None` when every buffer is
    /// queued for playback; the caller polls again later.
    fn try_get_buffer(&self) -> Option<OutputBuffer>;

    /// Queue a filled buffer for playback. Returns as soon as it is queued.
    fn submit(&self, buffer: OutputBuffer) -> Result<()>;

    /// Frames queued but not yet played
    fn latency_frames(&self) -> Result<u32>;

    /// Select the output route by name
    fn set_destination(&self, name: &str) -> Result<()>;

    /// Stop playback and release the buffer pool
    fn shutdown(&self) -> Result<()>;
}

/// Which render sink to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Audio device output through cpal
    #[default]
    Cpal,
    /// No device; plays against a real-time virtual clock
    Simulated,
    /// No device; every submission is consumed immediately
    Instant,
}

impl SinkKind {
    /// Open a sink of this kind with the session's buffer pool.
    ///
    /// `device` is only used by the cpal sink; `destination` picks a
    /// matching device when no name is given.
    pub fn open(
        self,
        config: &SessionConfig,
        device: Option<&str>,
        destination: Destination,
        events: EventSender,
    ) -> Result<Box<dyn RenderSink>> {
        let sink: Box<dyn RenderSink> = match self {
            SinkKind::Cpal => Box::new(CpalSink::open(config, device, destination, events)?),
            SinkKind::Simulated => Box::new(SimulatedSink::new(config, Pacing::RealTime, events)),
            SinkKind::Instant => Box::new(SimulatedSink::new(config, Pacing::Instant, events)),
        };
        Ok(sink)
    }
}
