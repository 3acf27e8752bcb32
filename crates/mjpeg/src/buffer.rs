//! Bounded append-only byte buffer.
//!
//! When an append would push the buffered length past the capacity, the whole
//! buffer (including the incoming chunk) is discarded and accumulation starts
//! again from empty. A stream whose boundary never shows up therefore cannot
//! stall the reader or grow memory without bound; the price is losing whatever
//! partial frame was in flight.

use bytes::BytesMut;
use tracing::warn;

use crate::error::MjpegError;

/// Result of appending a chunk to a [`ByteAccumulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The chunk was appended.
    Buffered,
    /// The capacity was exceeded; `discarded` bytes (old data plus the chunk)
    /// were dropped and the buffer is now empty.
    Overflowed { discarded: usize },
}

impl AppendOutcome {
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflowed { .. })
    }
}

#[derive(Debug)]
pub struct ByteAccumulator {
    buf: BytesMut,
    capacity: usize,
    overflows: u64,
}

impl ByteAccumulator {
    /// Create an accumulator that holds at most `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self, MjpegError> {
        if capacity == 0 {
            return Err(MjpegError::ZeroCapacity);
        }
        Ok(Self {
            // Cameras send frames in the tens of KiB; don't reserve the full bound up front.
            buf: BytesMut::with_capacity(capacity.min(256 * 1024)),
            capacity,
            overflows: 0,
        })
    }

    /// Append a chunk, resetting the buffer if the capacity would be exceeded.
    pub fn append(&mut self, chunk: &[u8]) -> AppendOutcome {
        let total = self.buf.len() + chunk.len();
        if total > self.capacity {
            self.buf.clear();
            self.overflows += 1;
            warn!(
                discarded = total,
                capacity = self.capacity,
                "Buffer exceeded maximum size, clearing buffer"
            );
            return AppendOutcome::Overflowed { discarded: total };
        }

        self.buf.extend_from_slice(chunk);
        AppendOutcome::Buffered
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of overflow resets since creation.
    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    /// Remove and return the first `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` is greater than [`len`](Self::len).
    pub(crate) fn split_to(&mut self, len: usize) -> BytesMut {
        self.buf.split_to(len)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
