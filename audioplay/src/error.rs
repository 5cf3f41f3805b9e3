//! Error types for audioplay
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use crate::audio::buffer::BufferId;
use thiserror::Error;

/// Why a buffer handed back for playback was refused.
///
/// A refusal never changes which buffers are checked out.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Length is not a whole number of frames
    #[error("length {length} is not a multiple of the {frame_size}-byte frame")]
    Misaligned { length: usize, frame_size: usize },

    /// Buffer was never handed out by this session (or was already submitted)
    #[error("buffer {0} is not checked out")]
    UnknownBuffer(BufferId),

    /// Length does not fit in the buffer's allocation
    #[error("length {length} exceeds buffer capacity {capacity}")]
    ExceedsCapacity { length: usize, capacity: usize },
}

/// Main error type for audioplay
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected construction, decoder or routing arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Buffer protocol violation on submission
    #[error("Buffer rejected: {0}")]
    BufferRejected(#[from] RejectReason),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using audioplay Error
pub type Result<T> = std::result::Result<T, Error>;
