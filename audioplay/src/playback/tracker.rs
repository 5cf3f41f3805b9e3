//! Buffer pool tracker
//!
//! Records which output buffers are currently lent to the caller. A buffer
//! is either owned by the render sink or checked out here, never both.
//! The lock is held only for the set insert/remove, never across a call
//! into the sink.

use crate::audio::buffer::{BufferId, OutputBuffer};
use crate::audio::sink::RenderSink;
use crate::error::{Error, RejectReason};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

/// A refused release. The buffer comes back to the caller untouched.
#[derive(thiserror::Error, Debug)]
#[error("buffer {} rejected: {reason}", .buffer.id())]
pub struct Rejected {
    pub buffer: OutputBuffer,
    pub reason: RejectReason,
}

impl From<Rejected> for Error {
    fn from(rejected: Rejected) -> Self {
        Error::BufferRejected(rejected.reason)
    }
}

pub struct BufferTracker {
    frame_size: usize,
    checked_out: Mutex<HashSet<BufferId>>,
}

impl BufferTracker {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            checked_out: Mutex::new(HashSet::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<BufferId>> {
        self.checked_out.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probe the sink for a free buffer and check it out.
    ///
    /// Returns `None` when the sink has nothing free; callers poll.
    pub fn acquire(&self, sink: &dyn RenderSink) -> Option<OutputBuffer> {
        let buffer = sink.try_get_buffer()?;
        self.lock().insert(buffer.id());
        trace!("Checked out buffer {}", buffer.id());
        Some(buffer)
    }

    /// Check a buffer back in for submission with `length` valid bytes.
    ///
    /// Rejects, leaving the checked-out set untouched, when:
    /// - `length` is not a whole number of frames
    /// - the buffer is not checked out
    /// - `length` exceeds the buffer's capacity
    pub fn release(&self, mut buffer: OutputBuffer, length: usize) -> Result<OutputBuffer, Rejected> {
        if length % self.frame_size != 0 {
            return Err(Rejected {
                buffer,
                reason: RejectReason::Misaligned {
                    length,
                    frame_size: self.frame_size,
                },
            });
        }

        {
            let mut checked_out = self.lock();
            let reason = if !checked_out.contains(&buffer.id()) {
                Some(RejectReason::UnknownBuffer(buffer.id()))
            } else if length > buffer.capacity() {
                Some(RejectReason::ExceedsCapacity {
                    length,
                    capacity: buffer.capacity(),
                })
            } else {
                checked_out.remove(&buffer.id());
                None
            };

            if let Some(reason) = reason {
                warn!("Rejected buffer {}: {}", buffer.id(), reason);
                return Err(Rejected { buffer, reason });
            }
        }

        buffer.set_filled_len(length);
        Ok(buffer)
    }

    pub fn is_checked_out(&self, id: BufferId) -> bool {
        self.lock().contains(&id)
    }

    /// Number of buffers lent out
    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Forget every checked-out buffer (teardown). Returns how many were
    /// still lent out.
    pub fn clear(&self) -> usize {
        let mut checked_out = self.lock();
        let abandoned = checked_out.len();
        checked_out.clear();
        abandoned
    }
}
