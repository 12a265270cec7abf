//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the byte-level layer of the native protocol:
//! - 9-byte header encoding/decoding
//! - Frame splitter for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod splitter;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use splitter::FrameSplitter;
pub use wire_format::{
    flags, opcode, opcode_of, protocol_version_of, stream_id, FrameHeader,
    DEFAULT_MAX_FRAME_LENGTH, DIRECTION_RESPONSE, HEADER_SIZE, VERSION_MASK,
};
