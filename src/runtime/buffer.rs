//! Scratch buffer shared by every read on the event loop thread.
//!
//! The loop owns exactly one fixed-size buffer. Each read lands in it, the
//! filled prefix is copied out as an owned chunk, and the buffer is cleared
//! before the next read. It is never handed to more than one connection at a
//! time and is empty whenever control returns to the poll call.

#![allow(dead_code)] // Length accessor is only read by tests

use bytes::Bytes;

/// Capacity of the scratch buffer in bytes.
pub const SCRATCH_CAPACITY: usize = 100;

/// Fixed-capacity staging area for non-blocking reads.
#[derive(Debug)]
pub struct ScratchBuffer {
    buf: Box<[u8]>,
    /// Bytes written by the last read and not yet copied out.
    filled: usize,
}

impl ScratchBuffer {
    /// Create an empty buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Space a read may write into.
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Record that a read wrote `n` bytes into [`unfilled_mut`](Self::unfilled_mut).
    ///
    /// # Panics
    /// Panics if `n` exceeds the unfilled space.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.buf.len() - self.filled, "advance past capacity");
        self.filled += n;
    }

    /// The bytes written so far.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Copy the filled bytes into an independent chunk and clear the buffer.
    pub fn take_chunk(&mut self) -> Bytes {
        let chunk = Bytes::copy_from_slice(self.filled());
        self.clear();
        chunk
    }

    pub fn clear(&mut self) {
        self.filled = 0;
    }
}

impl Default for ScratchBuffer {
    fn default() -> Self {
        Self::new(SCRATCH_CAPACITY)
    }
}
