// src/streaming/ring.rs

use super::StreamingError;

/// Write and read positions over a ring of `len` buffers.
///
/// The read position trails the write position by one; both advance
/// together, so they never alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursor {
    len: usize,
    write: usize,
    read: usize,
}

impl RingCursor {
    pub fn new(len: usize) -> Result<Self, StreamingError> {
        if len < 2 {
            return Err(StreamingError::TooFewBuffers(len));
        }
        Ok(RingCursor {
            len,
            write: 0,
            read: len - 1,
        })
    }

    /// Buffer the CPU fills this frame.
    pub fn write(&self) -> usize {
        self.write
    }

    /// Buffer the GPU samples this frame.
    pub fn read(&self) -> usize {
        self.read
    }

    pub fn advance(&mut self) {
        self.write = (self.write + 1) % self.len;
        self.read = (self.read + 1) % self.len;
    }
}
