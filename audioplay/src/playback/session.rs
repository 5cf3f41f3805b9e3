//! Audio session
//!
//! Binds one render sink, its buffer tracker, the optional decode path
//! configuration and the output route. The PCM format and buffer sizing
//! are fixed when the session is created.

use crate::audio::buffer::OutputBuffer;
use crate::audio::decoder::DecoderPorts;
use crate::audio::sink::RenderSink;
use crate::audio::types::{PcmFormat, SessionConfig, MAX_DESTINATION_NAME};
use crate::error::{Error, Result};
use crate::playback::tracker::{BufferTracker, Rejected};
use tracing::{debug, info, warn};

pub struct AudioSession {
    config: SessionConfig,
    sink: Box<dyn RenderSink>,
    tracker: BufferTracker,
    decoder_ports: Option<DecoderPorts>,
    destination: Option<String>,
}

impl AudioSession {
    /// Create a session over an opened sink.
    ///
    /// # Errors
    /// `Error::InvalidArgument` if the sink was opened with a different
    /// PCM format than `config`.
    pub fn create(config: SessionConfig, sink: Box<dyn RenderSink>) -> Result<Self> {
        if sink.format() != config.format {
            return Err(Error::InvalidArgument(format!(
                "sink '{}' opened as {} but session wants {}",
                sink.name(),
                sink.format(),
                config.format
            )));
        }

        info!(
            "Session created: {}, {} buffers x {} bytes, sink '{}'",
            config.format,
            config.num_buffers,
            config.buffer_capacity(),
            sink.name()
        );

        Ok(Self {
            tracker: BufferTracker::new(config.format.frame_size()),
            config,
            sink,
            decoder_ports: None,
            destination: None,
        })
    }

    /// Fix buffer counts and sizes for the decode path.
    pub fn configure_decoder(
        &mut self,
        in_count: u32,
        in_size: usize,
        out_count: u32,
        out_size: usize,
    ) -> Result<DecoderPorts> {
        let ports = DecoderPorts::new(in_count, in_size, out_count, out_size)?;
        debug!(
            "Decoder ports: in {}x{}, out {}x{}",
            ports.input.buffer_count,
            ports.input.buffer_size,
            ports.output.buffer_count,
            ports.output.buffer_size
        );
        self.decoder_ports = Some(ports);
        Ok(ports)
    }

    /// Route output by name.
    ///
    /// # Errors
    /// `Error::InvalidArgument` for an empty name or one of 128 bytes or
    /// more; otherwise whatever the sink reports.
    pub fn set_destination(&mut self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() >= MAX_DESTINATION_NAME {
            return Err(Error::InvalidArgument(format!(
                "destination name must be 1..{} bytes, got {}",
                MAX_DESTINATION_NAME,
                name.len()
            )));
        }

        self.sink.set_destination(name)?;
        info!("Destination set to '{}'", name);
        self.destination = Some(name.to_string());
        Ok(())
    }

    /// Non-blocking: a free buffer, or `None` while all are queued.
    pub fn get_buffer(&self) -> Option<OutputBuffer> {
        self.tracker.acquire(self.sink.as_ref())
    }

    /// Hand a filled buffer to the sink.
    ///
    /// A buffer of this session rejected for its length goes back to the
    /// sink unplayed, so the pool keeps its size. A foreign buffer is dropped.
    pub fn play_buffer(&self, buffer: OutputBuffer, length: usize) -> Result<()> {
        match self.tracker.release(buffer, length) {
            Ok(buffer) => self.sink.submit(buffer),
            Err(Rejected { buffer, reason }) => {
                if self.tracker.is_checked_out(buffer.id()) {
                    debug!("Returning rejected buffer {} unplayed ({})", buffer.id(), reason);
                    self.recycle(buffer)?;
                }
                Err(Error::BufferRejected(reason))
            }
        }
    }

    /// Return a checked-out buffer to the sink without playing it.
    pub fn recycle(&self, buffer: OutputBuffer) -> Result<()> {
        let buffer = self.tracker.release(buffer, 0)?;
        self.sink.submit(buffer)
    }

    /// Frames queued in the sink and not yet played
    pub fn latency(&self) -> Result<u32> {
        self.sink.latency_frames()
    }

    /// Stop the sink and release every buffer.
    pub fn delete(self) -> Result<()> {
        self.sink.shutdown()?;
        let abandoned = self.tracker.clear();
        if abandoned > 0 {
            warn!("{} buffers were still checked out at delete", abandoned);
        }
        info!("Session deleted");
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn format(&self) -> PcmFormat {
        self.config.format
    }

    pub fn tracker(&self) -> &BufferTracker {
        &self.tracker
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn decoder_ports(&self) -> Option<DecoderPorts> {
        self.decoder_ports
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::simulated::{Pacing, SimulatedSink};
    use crate::error::RejectReason;
    use crate::playback::events;

    fn session(pacing: Pacing) -> AudioSession {
        let config = SessionConfig::new(48000, 2, 16, 4, 4096).unwrap();
        let (tx, _rx) = events::channel();
        let sink = SimulatedSink::new(&config, pacing, tx);
        AudioSession::create(config, Box::new(sink)).unwrap()
    }

    #[test]
    fn test_format_mismatch_rejected() {
        let config = SessionConfig::new(48000, 2, 16, 4, 4096).unwrap();
        let other = SessionConfig::new(44100, 2, 16, 4, 4096).unwrap();
        let (tx, _rx) = events::channel();
        let sink = SimulatedSink::new(&other, Pacing::Manual, tx);
        assert!(matches!(
            AudioSession::create(config, Box::new(sink)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_play_buffer_moves_buffer_to_sink() {
        let session = session(Pacing::Manual);
        let buffer = session.get_buffer().unwrap();
        assert_eq!(session.tracker().outstanding(), 1);

        session.play_buffer(buffer, 4096).unwrap();
        assert_eq!(session.tracker().outstanding(), 0);
        assert_eq!(session.latency().unwrap(), 1024);
    }

    #[test]
    fn test_play_buffer_misaligned() {
        let session = session(Pacing::Manual);
        let buffer = session.get_buffer().unwrap();
        let id = buffer.id();

        let err = session.play_buffer(buffer, 6).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferRejected(RejectReason::Misaligned { length: 6, .. })
        ));
        // Back in the sink's queue as an empty buffer
        assert!(!session.tracker().is_checked_out(id));
        assert_eq!(session.latency().unwrap(), 0);
    }

    #[test]
    fn test_recycle_skips_playback() {
        let session = session(Pacing::Instant);
        let buffer = session.get_buffer().unwrap();
        session.recycle(buffer).unwrap();
        assert_eq!(session.tracker().outstanding(), 0);
        assert_eq!(session.latency().unwrap(), 0);

        let foreign = OutputBuffer::with_capacity(4096);
        assert!(matches!(
            session.recycle(foreign),
            Err(Error::BufferRejected(RejectReason::UnknownBuffer(_)))
        ));
    }

    #[test]
    fn test_destination_limits() {
        let mut session = session(Pacing::Manual);
        assert!(session.set_destination("").is_err());
        assert!(session.set_destination(&"x".repeat(128)).is_err());
        session.set_destination(&"x".repeat(127)).unwrap();
        session.set_destination("hdmi").unwrap();
        assert_eq!(session.destination(), Some("hdmi"));
    }

    #[test]
    fn test_delete_with_outstanding_buffer() {
        let session = session(Pacing::Manual);
        let _held = session.get_buffer().unwrap();
        session.delete().unwrap();
    }
}
