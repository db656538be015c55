//! # Line Buffer
//!
//! Reassembles newline-delimited records from byte chunks of arbitrary size.
//! A line may be split anywhere, including between `\r` and `\n`; the
//! trailing partial line stays buffered until the rest arrives. Consumed
//! bytes are dropped from the front so steady consumption keeps the buffer
//! bounded by the longest pending line.

use bytes::{Buf, BytesMut};

#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: BytesMut,
    /// Bytes already searched without finding a `\n`.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pending bytes, including any partial line.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Pops the next complete line without its terminator (`\n` or `\r\n`).
    /// Returns `None` while only a partial line is buffered.
    pub fn read_line(&mut self) -> Option<String> {
        let offset = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == b'\n');

        let Some(offset) = offset else {
            self.scanned = self.buffer.len();
            return None;
        };

        let newline = self.scanned + offset;
        let mut line = self.buffer.split_to(newline);
        self.buffer.advance(1);
        self.scanned = 0;

        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }

        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Takes the unterminated tail once the input has ended. Returns `None`
    /// when nothing is buffered.
    pub fn take_remaining(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut tail = self.buffer.split();
        self.scanned = 0;
        if tail.last() == Some(&b'\r') {
            tail.truncate(tail.len() - 1);
        }
        Some(String::from_utf8_lossy(&tail).into_owned())
    }
}
