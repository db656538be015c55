//! # Event Source Reader
//!
//! Reads a streamed response body through a [`LineBuffer`] and yields the
//! `id:` and `data:` records of the server-sent-events format. This is not a
//! full event-source implementation: `event:`, `retry:` and comment lines are
//! ignored, and a record is exactly one line.

use std::fmt;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};

use crate::core::line_buffer::LineBuffer;
use crate::http::HttpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseRecordKind {
    Id,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord {
    pub kind: SseRecordKind,
    pub value: String,
}

impl SseRecord {
    /// Classifies one decoded line. Anything other than `id:` or `data:`
    /// yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        if let Some(value) = line.strip_prefix("data:") {
            return Some(Self {
                kind: SseRecordKind::Data,
                value: value.trim().to_string(),
            });
        }
        if let Some(value) = line.strip_prefix("id:") {
            return Some(Self {
                kind: SseRecordKind::Id,
                value: value.trim().to_string(),
            });
        }
        None
    }
}

impl fmt::Display for SseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SseRecordKind::Id => write!(f, "id: {}", self.value),
            SseRecordKind::Data => write!(f, "data: {}", self.value),
        }
    }
}

pub struct EventSourceReader {
    body: BoxStream<'static, Result<Bytes, HttpError>>,
    buffer: LineBuffer,
    /// The body reached a clean end; only the buffered tail is left.
    ended: bool,
}

impl EventSourceReader {
    pub fn new(body: BoxStream<'static, Result<Bytes, HttpError>>) -> Self {
        Self {
            body,
            buffer: LineBuffer::new(),
            ended: false,
        }
    }

    /// The next record, `Ok(None)` at a clean end of stream, or the fault
    /// that closed it. A last line without a terminator still counts once the
    /// stream ends. Cancel-safe: a dropped call loses no buffered bytes.
    pub async fn next_record(&mut self) -> Result<Option<SseRecord>, HttpError> {
        loop {
            while let Some(line) = self.buffer.read_line() {
                if let Some(record) = SseRecord::parse(&line) {
                    log::trace!("SSE READ: {}", record);
                    return Ok(Some(record));
                }
            }

            if self.ended {
                let tail = self.buffer.take_remaining();
                return Ok(tail.as_deref().and_then(SseRecord::parse));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.append(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.ended = true,
            }
        }
    }
}
