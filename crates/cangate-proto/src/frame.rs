//! Wire frame assembly
//!
//! Bytes outside `<` ... `>` are discarded. A frame that outgrows the buffer
//! bound is dropped as a whole and the assembler waits for the next `<`.

use tracing::{trace, warn};

/// Default buffer bound, delimiters included
pub const DEFAULT_MAX_FRAME_LEN: usize = 4000;

const FRAME_START: u8 = b'<';
const FRAME_END: u8 = b'>';

/// Accumulates client bytes into complete wire frames
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    max_len: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameAssembler {
    /// Create an assembler holding at most `max_len` bytes per frame
    pub fn new(max_len: usize) -> Self {
        // A frame needs room for both delimiters
        let max_len = max_len.max(2);
        Self {
            buffer: Vec::with_capacity(max_len.min(256)),
            max_len,
        }
    }

    /// Feed one byte. Returns the frame it completes, delimiters included.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            if byte == FRAME_START {
                self.buffer.push(byte);
            }
            return None;
        }

        self.buffer.push(byte);

        if byte == FRAME_END {
            let frame = std::mem::take(&mut self.buffer);
            trace!(len = frame.len(), "Frame complete");
            return Some(frame);
        }

        if self.buffer.len() >= self.max_len {
            warn!(
                max_len = self.max_len,
                "Frame exceeds buffer without end marker, resynchronizing"
            );
            self.buffer.clear();
        }

        None
    }

    /// Feed a chunk of bytes and collect every completed frame in order
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// True when no partial frame is buffered
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of bytes of the partial frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
