//! # audioplay
//!
//! PCM render pipeline demo: synthesises a sine sweep (or decodes an MP3
//! file) into fixed-size output buffers and pushes them through a render
//! sink with latency-gated pacing.
//!
//! **Architecture:** the render sink owns the buffer pool; a tracker records
//! which buffers are lent to the caller; a single driver thread acquires,
//! fills, paces and submits. Sinks: cpal device output, a simulated
//! real-time sink and an instant sink for dry runs.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use error::{Error, RejectReason, Result};
