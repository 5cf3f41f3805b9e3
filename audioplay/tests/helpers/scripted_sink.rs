//! Render sinks for driving the session from tests

use audioplay::audio::buffer::OutputBuffer;
use audioplay::audio::simulated::SimulatedSink;
use audioplay::audio::sink::RenderSink;
use audioplay::audio::types::{PcmFormat, SessionConfig};
use audioplay::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct ScriptState {
    free: Vec<OutputBuffer>,
    latencies: VecDeque<u32>,
    last_latency: u32,
    submitted_lengths: Vec<usize>,
    latency_at_submit: Vec<u32>,
    destination: Option<String>,
}

/// Sink whose `latency_frames` replays a fixed script, then reports 0.
///
/// Submitted buffers go straight back to the free pool. Each submission
/// records the latency most recently reported to the caller.
pub struct ScriptedSink {
    format: PcmFormat,
    state: Arc<Mutex<ScriptState>>,
}

/// Read-side handle onto a `ScriptedSink` after it has been boxed
#[derive(Clone)]
pub struct ScriptProbe {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSink {
    pub fn new(config: &SessionConfig, latencies: &[u32]) -> (Self, ScriptProbe) {
        let state = Arc::new(Mutex::new(ScriptState {
            free: (0..config.num_buffers)
                .map(|_| OutputBuffer::with_capacity(config.buffer_capacity()))
                .collect(),
            latencies: latencies.iter().copied().collect(),
            ..ScriptState::default()
        }));

        (
            Self {
                format: config.format,
                state: Arc::clone(&state),
            },
            ScriptProbe { state },
        )
    }
}

impl ScriptProbe {
    pub fn submitted_lengths(&self) -> Vec<usize> {
        self.state.lock().unwrap().submitted_lengths.clone()
    }

    pub fn latency_at_submit(&self) -> Vec<u32> {
        self.state.lock().unwrap().latency_at_submit.clone()
    }

    pub fn destination(&self) -> Option<String> {
        self.state.lock().unwrap().destination.clone()
    }
}

impl RenderSink for ScriptedSink {
    fn name(&self) -> &str {
        "scripted"
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn try_get_buffer(&self) -> Option<OutputBuffer> {
        self.state.lock().unwrap().free.pop()
    }

    fn submit(&self, buffer: OutputBuffer) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let latency = state.last_latency;
        state.submitted_lengths.push(buffer.filled_len());
        state.latency_at_submit.push(latency);
        state.free.push(buffer);
        Ok(())
    }

    fn latency_frames(&self) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        let latency = state.latencies.pop_front().unwrap_or(0);
        state.last_latency = latency;
        Ok(latency)
    }

    fn set_destination(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().destination = Some(name.to_string());
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.state.lock().unwrap().free.clear();
        Ok(())
    }
}

/// Delegates to a simulated sink the test still holds
pub struct SharedSink(pub Arc<SimulatedSink>);

impl RenderSink for SharedSink {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn format(&self) -> PcmFormat {
        self.0.format()
    }

    fn try_get_buffer(&self) -> Option<OutputBuffer> {
        self.0.try_get_buffer()
    }

    fn submit(&self, buffer: OutputBuffer) -> Result<()> {
        self.0.submit(buffer)
    }

    fn latency_frames(&self) -> Result<u32> {
        self.0.latency_frames()
    }

    fn set_destination(&self, name: &str) -> Result<()> {
        self.0.set_destination(name)
    }

    fn shutdown(&self) -> Result<()> {
        self.0.shutdown()
    }
}
