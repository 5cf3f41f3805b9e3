//! Output buffers lent between the render sink and the caller
//!
//! A buffer's identity is its `BufferId`, assigned from a process-wide
//! counter when the buffer is allocated. Buffers are not `Clone`, so an id
//! always names exactly one live allocation.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fixed-capacity PCM byte region.
///
/// Allocated once by a render sink; `filled_len` is set when the buffer is
/// submitted for playback.
pub struct OutputBuffer {
    id: BufferId,
    data: Box<[u8]>,
    filled_len: usize,
}

impl OutputBuffer {
    /// Allocate a zeroed buffer with a fresh identity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            id: BufferId::next(),
            data: vec![0u8; capacity].into_boxed_slice(),
            filled_len: 0,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled_len(&self) -> usize {
        self.filled_len
    }

    /// Writable view of the whole allocation
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The submitted bytes
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled_len]
    }

    /// Mark `len` bytes as valid. Caller guarantees `len <= capacity()`.
    pub(crate) fn set_filled_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.filled_len = len;
    }

    /// Forget any previous fill before handing the buffer out again.
    pub(crate) fn reset(&mut self) {
        self.filled_len = 0;
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("id", &self.id)
            .field("capacity", &self.data.len())
            .field("filled_len", &self.filled_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = OutputBuffer::with_capacity(16);
        let b = OutputBuffer::with_capacity(16);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_new_buffer_is_zeroed_and_empty() {
        let mut buffer = OutputBuffer::with_capacity(64);
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.filled_len(), 0);
        assert!(buffer.filled().is_empty());
        assert!(buffer.as_mut_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_filled_view_tracks_length() {
        let mut buffer = OutputBuffer::with_capacity(8);
        buffer.as_mut_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);
        buffer.set_filled_len(4);
        assert_eq!(buffer.filled(), &[1, 2, 3, 4]);

        buffer.reset();
        assert_eq!(buffer.filled_len(), 0);
    }
}
