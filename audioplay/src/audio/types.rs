//! Core PCM format types
//!
//! Session parameters are validated once at construction and never change
//! for the lifetime of a session.
//!
//! **Format:**
//! - Signed little-endian linear PCM, interleaved
//! - 16 or 32 bits per sample
//! - 1, 2, 4 or 8 channels, 8 kHz to 96 kHz

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frames per output buffer in the synthetic test run
pub const BUFFER_SIZE_SAMPLES: usize = 1024;

/// Output buffer lengths are rounded up to this many bytes
pub const BUFFER_ALIGNMENT: usize = 16;

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 96_000;
pub const SUPPORTED_CHANNELS: [u16; 4] = [1, 2, 4, 8];
pub const SUPPORTED_BIT_DEPTHS: [u16; 2] = [16, 32];

/// Longest routing name the render component accepts (exclusive bound)
pub const MAX_DESTINATION_NAME: usize = 128;

/// Round a byte length up to the render component's buffer alignment.
pub fn align_buffer_size(size: usize) -> usize {
    (size + BUFFER_ALIGNMENT - 1) & !(BUFFER_ALIGNMENT - 1)
}

/// Validated PCM stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl PcmFormat {
    /// Validate and build a PCM format.
    ///
    /// # Errors
    /// `Error::InvalidArgument` if the rate is outside 8000..=96000 Hz, the
    /// channel count is not 1, 2, 4 or 8, or the bit depth is not 16 or 32.
    pub fn new(sample_rate: u32, channels: u16, bit_depth: u16) -> Result<Self> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(Error::InvalidArgument(format!(
                "sample rate {} Hz outside {}..={} Hz",
                sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        if !SUPPORTED_CHANNELS.contains(&channels) {
            return Err(Error::InvalidArgument(format!(
                "unsupported channel count {} (expected one of {:?})",
                channels, SUPPORTED_CHANNELS
            )));
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&bit_depth) {
            return Err(Error::InvalidArgument(format!(
                "unsupported bit depth {} (expected 16 or 32)",
                bit_depth
            )));
        }

        Ok(Self {
            sample_rate,
            channels,
            bit_depth,
        })
    }

    /// Bytes in one sample of one channel
    pub fn bytes_per_sample(&self) -> usize {
        self.bit_depth as usize / 8
    }

    /// Bytes in one frame (one sample period across all channels)
    pub fn frame_size(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Byte length of `frames` whole frames
    pub fn bytes_for_frames(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }

    /// Whole frames contained in `bytes`
    pub fn frames_in(&self, bytes: usize) -> usize {
        bytes / self.frame_size()
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit",
            self.sample_rate, self.channels, self.bit_depth
        )
    }
}

/// Format plus buffer pool sizing, fixed when a session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    pub format: PcmFormat,
    pub num_buffers: u32,
    /// Requested buffer length in bytes (before alignment)
    pub buffer_size: usize,
}

impl SessionConfig {
    /// Validate construction arguments.
    ///
    /// Nothing is allocated here; a rejected configuration leaves no state behind.
    pub fn new(
        sample_rate: u32,
        channels: u16,
        bit_depth: u16,
        num_buffers: u32,
        buffer_size: usize,
    ) -> Result<Self> {
        let format = PcmFormat::new(sample_rate, channels, bit_depth)?;

        if num_buffers == 0 {
            return Err(Error::InvalidArgument(
                "buffer count must be at least 1".to_string(),
            ));
        }
        if buffer_size < format.frame_size() {
            return Err(Error::InvalidArgument(format!(
                "buffer size {} smaller than one {}-byte frame",
                buffer_size,
                format.frame_size()
            )));
        }

        Ok(Self {
            format,
            num_buffers,
            buffer_size,
        })
    }

    /// Config with buffers of `frames` frames each
    pub fn with_frames(format: PcmFormat, num_buffers: u32, frames: usize) -> Result<Self> {
        Self::new(
            format.sample_rate,
            format.channels,
            format.bit_depth,
            num_buffers,
            format.bytes_for_frames(frames),
        )
    }

    /// Allocated length of each output buffer
    pub fn buffer_capacity(&self) -> usize {
        align_buffer_size(self.buffer_size)
    }

    /// Largest frame-aligned fill that fits the requested buffer size
    pub fn fill_length(&self) -> usize {
        self.buffer_size - self.buffer_size % self.format.frame_size()
    }
}

/// Producer of PCM for output buffers.
pub trait PcmSource {
    /// Fill `out` with whole frames in `format`.
    ///
    /// Returns the number of bytes written; 0 means the source is exhausted.
    fn fill(&mut self, out: &mut [u8], format: &PcmFormat) -> Result<usize>;
}

/// Output route for the render sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Headphone / analogue output
    #[default]
    Local,
    /// Digital output over HDMI
    Hdmi,
}

impl Destination {
    /// Map the command-line route index (0 = local, 1 = hdmi).
    pub fn from_index(index: u32) -> Result<Self> {
        match index {
            0 => Ok(Destination::Local),
            1 => Ok(Destination::Hdmi),
            other => Err(Error::InvalidArgument(format!(
                "destination {} out of range (0 = local, 1 = hdmi)",
                other
            ))),
        }
    }

    /// Routing name understood by the render component
    pub fn name(&self) -> &'static str {
        match self {
            Destination::Local => "local",
            Destination::Hdmi => "hdmi",
        }
    }

    /// Human-facing label
    pub fn description(&self) -> &'static str {
        match self {
            Destination::Local => "analogue",
            Destination::Hdmi => "hdmi",
        }
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "analogue" | "0" => Ok(Destination::Local),
            "hdmi" | "1" => Ok(Destination::Hdmi),
            other => Err(Error::InvalidArgument(format!(
                "unknown destination '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
