//! Sine wavetable and sweep oscillator
//!
//! The oscillator is a 16.16 fixed-point phase accumulator over a 1024-entry
//! sine table. Its increment is itself driven by a second accumulator that
//! pulls it towards a pivot step, so the pitch sweeps up and back down
//! instead of holding a fixed tone.

use crate::audio::types::{PcmFormat, PcmSource};
use crate::error::Result;
use std::sync::Arc;

/// Entries in one sine period
pub const WAVE_SIZE: usize = 1024;

/// Phase units per table entry (one period = 65536 phase units)
const PHASE_SHIFT: u32 = 6;

/// Starting increment, 16.16 fixed point
const INITIAL_INCREMENT: i32 = 256 << 16;

/// Integer step the sweep oscillates around
const PIVOT_STEP: i32 = 512;

/// One full period of a full-scale sine, precomputed once.
pub struct Wavetable {
    samples: [i16; WAVE_SIZE],
}

impl Wavetable {
    pub fn sine() -> Self {
        let mut samples = [0i16; WAVE_SIZE];
        for (i, sample) in samples.iter_mut().enumerate() {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / WAVE_SIZE as f64;
            *sample = (angle.sin() * i16::MAX as f64).round() as i16;
        }
        Self { samples }
    }

    /// Sample at a 16-bit phase position (wraps)
    pub fn lookup(&self, phase: i32) -> i16 {
        self.samples[((phase >> PHASE_SHIFT) as usize) & (WAVE_SIZE - 1)]
    }

    pub fn samples(&self) -> &[i16; WAVE_SIZE] {
        &self.samples
    }
}

/// Sweeping sine generator.
pub struct SweepOscillator {
    table: Arc<Wavetable>,
    phase: i32,
    increment: i32,
    increment_delta: i32,
}

impl SweepOscillator {
    pub fn new(table: Arc<Wavetable>) -> Self {
        Self {
            table,
            phase: 0,
            increment: INITIAL_INCREMENT,
            increment_delta: 0,
        }
    }

    /// Current integer phase step per sample
    pub fn step(&self) -> i32 {
        self.increment >> 16
    }

    pub fn next_sample(&mut self) -> i16 {
        let value = self.table.lookup(self.phase);

        self.phase = self.phase.wrapping_add(self.increment >> 16);
        self.increment = self.increment.wrapping_add(self.increment_delta);
        if self.increment >> 16 < PIVOT_STEP {
            self.increment_delta += 1;
        } else {
            self.increment_delta -= 1;
        }

        value
    }

    /// Write as many whole frames as fit in `out`.
    ///
    /// Every channel of a frame carries the same sample. At 32 bits the
    /// 16-bit sample occupies the high half and the low half is zero.
    ///
    /// Returns the number of bytes written.
    pub fn fill_frames(&mut self, out: &mut [u8], format: &PcmFormat) -> usize {
        let frame_size = format.frame_size();
        let bytes_per_sample = format.bytes_per_sample();
        let frames = format.frames_in(out.len());

        for frame in out.chunks_exact_mut(frame_size).take(frames) {
            let value = self.next_sample().to_le_bytes();
            for slot in frame.chunks_exact_mut(bytes_per_sample) {
                if bytes_per_sample == 4 {
                    slot[..2].fill(0);
                    slot[2..].copy_from_slice(&value);
                } else {
                    slot.copy_from_slice(&value);
                }
            }
        }

        frames * frame_size
    }
}

impl PcmSource for SweepOscillator {
    fn fill(&mut self, out: &mut [u8], format: &PcmFormat) -> Result<usize> {
        Ok(self.fill_frames(out, format))
    }
}
