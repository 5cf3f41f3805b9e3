//! Device-free render sinks
//!
//! `SimulatedSink` owns a buffer pool and "plays" queued buffers against a
//! clock instead of a sound card:
//! - `Pacing::RealTime` consumes frames at the sample rate of the session
//! - `Pacing::Manual` consumes only when `advance` is called (tests)
//! - `Pacing::Instant` consumes every submission immediately (dry runs)

use crate::audio::buffer::OutputBuffer;
use crate::audio::sink::RenderSink;
use crate::audio::types::{PcmFormat, SessionConfig};
use crate::error::{Error, Result};
use crate::playback::events::{emit, EventSender, RenderEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

/// How a simulated sink advances playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    RealTime,
    Manual,
    Instant,
}

/// Counters kept by a simulated sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub submitted: u64,
    pub returned: u64,
    pub frames_played: u64,
    pub bytes_submitted: u64,
    /// Highest queued latency observed at the moment of a submission
    pub peak_latency_at_submit: u32,
}

struct SimState {
    free: Vec<OutputBuffer>,
    queued: VecDeque<OutputBuffer>,
    /// Frames already played from the head of `queued`
    head_played: usize,
    last_tick: Instant,
    /// Fractional frames carried between real-time ticks
    credit: f64,
    stats: SimStats,
    shut_down: bool,
}

pub struct SimulatedSink {
    format: PcmFormat,
    pacing: Pacing,
    state: Mutex<SimState>,
    events: EventSender,
}

impl SimulatedSink {
    /// Allocate `config.num_buffers` buffers of `config.buffer_capacity()` bytes.
    pub fn new(config: &SessionConfig, pacing: Pacing, events: EventSender) -> Self {
        let free = (0..config.num_buffers)
            .map(|_| OutputBuffer::with_capacity(config.buffer_capacity()))
            .collect();

        debug!(
            "Simulated sink: {:?} pacing, {} buffers x {} bytes, {}",
            pacing,
            config.num_buffers,
            config.buffer_capacity(),
            config.format
        );

        Self {
            format: config.format,
            pacing,
            state: Mutex::new(SimState {
                free,
                queued: VecDeque::new(),
                head_played: 0,
                last_tick: Instant::now(),
                credit: 0.0,
                stats: SimStats::default(),
                shut_down: false,
            }),
            events,
        }
    }

    /// Play `frames` frames. Only meaningful with `Pacing::Manual`; other
    /// pacings advance on their own.
    pub fn advance(&self, frames: u64) {
        let mut state = self.lock_state();
        self.consume(&mut state, frames);
    }

    pub fn stats(&self) -> SimStats {
        self.lock_state().stats
    }

    /// Buffers currently in the free pool
    pub fn free_buffers(&self) -> usize {
        self.lock_state().free.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the real-time clock. Time spent with an empty queue is lost,
    /// as it would be on a device that underruns.
    fn tick(&self, state: &mut SimState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_tick);
        state.last_tick = now;

        if self.pacing != Pacing::RealTime {
            return;
        }

        state.credit += elapsed.as_secs_f64() * self.format.sample_rate as f64;
        let whole = state.credit.floor();
        state.credit -= whole;
        self.consume(state, whole as u64);

        if state.queued.is_empty() {
            state.credit = 0.0;
        }
    }

    fn consume(&self, state: &mut SimState, frames: u64) {
        let mut budget = frames;

        loop {
            let head_frames = match state.queued.front() {
                Some(head) => self.format.frames_in(head.filled_len()),
                None => break,
            };
            let remaining = (head_frames - state.head_played) as u64;

            if remaining > budget {
                state.head_played += budget as usize;
                state.stats.frames_played += budget;
                break;
            }

            budget -= remaining;
            state.stats.frames_played += remaining;
            state.head_played = 0;

            if let Some(mut done) = state.queued.pop_front() {
                done.reset();
                emit(&self.events, RenderEvent::BufferReturned { id: done.id() });
                state.stats.returned += 1;
                state.free.push(done);
            }
        }
    }

    fn queued_frames(&self, state: &SimState) -> u64 {
        let total: usize = state
            .queued
            .iter()
            .map(|buffer| self.format.frames_in(buffer.filled_len()))
            .sum();
        (total - state.head_played) as u64
    }
}

impl RenderSink for SimulatedSink {
    fn name(&self) -> &str {
        match self.pacing {
            Pacing::RealTime => "simulated",
            Pacing::Manual => "simulated-manual",
            Pacing::Instant => "instant",
        }
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn try_get_buffer(&self) -> Option<OutputBuffer> {
        let mut state = self.lock_state();
        if state.shut_down {
            return None;
        }
        self.tick(&mut state);
        state.free.pop()
    }

    fn submit(&self, buffer: OutputBuffer) -> Result<()> {
        let mut state = self.lock_state();
        if state.shut_down {
            return Err(Error::InvalidState(
                "simulated sink has been shut down".to_string(),
            ));
        }
        self.tick(&mut state);

        let latency = u32::try_from(self.queued_frames(&state)).unwrap_or(u32::MAX);
        state.stats.peak_latency_at_submit = state.stats.peak_latency_at_submit.max(latency);
        state.stats.submitted += 1;
        state.stats.bytes_submitted += buffer.filled_len() as u64;
        state.queued.push_back(buffer);

        if self.pacing == Pacing::Instant {
            self.consume(&mut state, u64::MAX);
        }

        Ok(())
    }

    fn latency_frames(&self) -> Result<u32> {
        let mut state = self.lock_state();
        self.tick(&mut state);
        Ok(u32::try_from(self.queued_frames(&state)).unwrap_or(u32::MAX))
    }

    fn set_destination(&self, name: &str) -> Result<()> {
        debug!("Simulated sink routed to '{}'", name);
        emit(
            &self.events,
            RenderEvent::ConfigChanged {
                what: format!("destination={}", name),
            },
        );
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.lock_state();
        let queued = state.queued.len();
        state.queued.clear();
        state.free.clear();
        state.head_played = 0;
        state.shut_down = true;

        info!(
            "{} sink shut down ({} buffers still queued, {} frames played)",
            self.name(),
            queued,
            state.stats.frames_played
        );
        Ok(())
    }
}
