//! Splits a TCP byte stream into terminator-delimited messages
//!
//! TCP gives no message boundaries: one read may carry half a message, or
//! several messages and the start of the next one. Each connection owns one
//! [`FrameDecoder`] holding the bytes seen since the last terminator.

use crate::{FRAME_TERMINATOR, MAX_PARTIAL_FRAME};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("partial message grew to {len} bytes without a terminator (limit {limit})")]
    Overflow { len: usize, limit: usize },
}

/// Per-connection reassembly buffer
#[derive(Debug)]
pub struct FrameDecoder {
    residual: Vec<u8>,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder with the protocol's partial message ceiling
    pub fn new() -> Self {
        Self::with_limit(MAX_PARTIAL_FRAME)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            residual: Vec::new(),
            limit,
        }
    }

    /// Bytes received after the last terminator
    pub fn pending(&self) -> &[u8] {
        &self.residual
    }

    /// Feeds one received chunk and returns every message it completes
    ///
    /// Messages come back in arrival order with the terminator stripped.
    /// Empty messages (two terminators in a row) are dropped. The bytes after
    /// the final terminator stay buffered until a later chunk completes them.
    /// The ceiling only applies to chunks carrying no terminator at all: such
    /// a chunk fails once the buffered partial message exceeds it, and the
    /// decoder should not be used after that. A chunk that completes at least
    /// one message always returns its messages and buffers its tail.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        let Some(last) = chunk.iter().rposition(|&b| b == FRAME_TERMINATOR) else {
            self.residual.extend_from_slice(chunk);
            self.check_limit()?;
            return Ok(Vec::new());
        };

        let (complete, tail) = chunk.split_at(last + 1);
        let body = &complete[..complete.len() - 1];

        let mut frames = Vec::new();
        for (index, piece) in body.split(|&b| b == FRAME_TERMINATOR).enumerate() {
            let frame = if index == 0 {
                let mut first = std::mem::take(&mut self.residual);
                first.extend_from_slice(piece);
                first
            } else {
                piece.to_vec()
            };

            if !frame.is_empty() {
                frames.push(frame);
            }
        }

        self.residual.extend_from_slice(tail);

        Ok(frames)
    }

    fn check_limit(&self) -> Result<(), FrameError> {
        if self.residual.len() > self.limit {
            return Err(FrameError::Overflow {
                len: self.residual.len(),
                limit: self.limit,
            });
        }
        Ok(())
    }
}

/// Appends the terminator to a message body
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.extend_from_slice(body);
    frame.push(FRAME_TERMINATOR);
    frame
}
