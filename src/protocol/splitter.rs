//! Frame splitter for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: need at least 9 bytes
//! - `WaitingForBody`: header peeked, need the full `9 + length` bytes
//!
//! Unlike a message reader, the splitter yields the *whole* frame
//! (header included) as one `Bytes` slice, since the forwarding path ships
//! raw buffers and only peeks at header fields.

use bytes::{Bytes, BytesMut};

use super::wire_format::{FrameHeader, DEFAULT_MAX_FRAME_LENGTH, HEADER_SIZE};
use crate::error::Result;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete header (need 9 bytes).
    WaitingForHeader,
    /// Header peeked; waiting for the full frame.
    WaitingForBody { frame_len: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// All data is stored in a single `BytesMut`; emitted frames are
/// zero-copy slices of it.
pub struct FrameSplitter {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame body length.
    max_frame_length: u32,
}

impl FrameSplitter {
    /// Create a new splitter with the default 256 MiB body cap.
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Create a new splitter with a custom body cap.
    pub fn with_max_frame_length(max_frame_length: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_frame_length,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns whole-frame buffers (header + body). If data is
    /// fragmented, partial data is buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error if a header announces a body larger than the
    /// configured maximum; the connection must be dropped.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    if self.buffer.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    // Peek the header; it stays in the buffer so the
                    // emitted slice covers the whole frame.
                    let header = FrameHeader::decode(&self.buffer[..HEADER_SIZE])
                        .expect("buffer has enough bytes");
                    header.validate(self.max_frame_length)?;

                    self.state = State::WaitingForBody {
                        frame_len: HEADER_SIZE + header.length as usize,
                    };
                }

                State::WaitingForBody { frame_len } => {
                    if self.buffer.len() < frame_len {
                        return Ok(None);
                    }

                    let frame = self.buffer.split_to(frame_len).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}
