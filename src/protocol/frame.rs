//! Frame struct with typed accessors.
//!
//! Represents a complete native-protocol frame with header and body.
//! Uses `bytes::Bytes` for zero-copy body sharing; a frame is immutable
//! once built.

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{FrameHeader, HEADER_SIZE};
use crate::error::{ProxyError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: FrameHeader,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from header and body.
    ///
    /// The header's length field is updated to match the body.
    pub fn new(mut header: FrameHeader, body: Bytes) -> Self {
        header.length = body.len() as u32;
        Self { header, body }
    }

    /// Create a request frame.
    pub fn request(protocol_version: u8, stream: i16, opcode: u8, body: Bytes) -> Self {
        Self::new(
            FrameHeader::request(protocol_version, stream, opcode, 0),
            body,
        )
    }

    /// Create a response frame.
    pub fn response(protocol_version: u8, stream: i16, opcode: u8, body: Bytes) -> Self {
        Self::new(
            FrameHeader::response(protocol_version, stream, opcode, 0),
            body,
        )
    }

    /// Parse a whole-frame buffer (as produced by the splitter).
    pub fn parse(mut buf: Bytes) -> Result<Self> {
        let header = FrameHeader::decode(&buf)
            .ok_or_else(|| ProxyError::Protocol("Frame shorter than header".to_string()))?;
        if buf.len() < HEADER_SIZE + header.length as usize {
            return Err(ProxyError::Protocol(format!(
                "Frame body truncated: have {}, header says {}",
                buf.len() - HEADER_SIZE,
                header.length
            )));
        }
        let _ = buf.split_to(HEADER_SIZE);
        let body = buf.split_to(header.length as usize);
        Ok(Self { header, body })
    }

    /// Encode into a contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Get the stream id.
    #[inline]
    pub fn stream(&self) -> i16 {
        self.header.stream
    }

    /// Get the raw opcode byte.
    #[inline]
    pub fn opcode(&self) -> u8 {
        self.header.opcode
    }

    /// Get the protocol version (direction bit stripped).
    #[inline]
    pub fn protocol_version(&self) -> u8 {
        self.header.protocol_version()
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    /// Get the body length.
    #[inline]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends body into a contiguous buffer. Test
/// helpers and synthesized frames use this; the forwarding path never
/// re-assembles frames.
pub fn build_frame(header: &FrameHeader, body: &[u8]) -> Vec<u8> {
    let mut header = *header;
    header.length = body.len() as u32;
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::opcode;

    #[test]
    fn test_frame_creation_fixes_length() {
        let header = FrameHeader::request(4, 42, opcode::QUERY, 0);
        let frame = Frame::new(header, Bytes::from_static(b"hello"));

        assert_eq!(frame.header.length, 5);
        assert_eq!(frame.stream(), 42);
        assert_eq!(frame.opcode(), opcode::QUERY);
        assert_eq!(frame.body_len(), 5);
    }

    #[test]
    fn test_frame_encode_parse_roundtrip() {
        let frame = Frame::request(4, 7, opcode::QUERY, Bytes::from_static(b"select"));
        let encoded = frame.encode();
        let parsed = Frame::parse(encoded).unwrap();

        assert_eq!(parsed.header, frame.header);
        assert_eq!(parsed.body, frame.body);
    }

    #[test]
    fn test_parse_truncated_body() {
        let mut bytes = FrameHeader::request(4, 1, opcode::QUERY, 10).encode().to_vec();
        bytes.extend_from_slice(b"short");
        let result = Frame::parse(Bytes::from(bytes));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_short_header() {
        let result = Frame::parse(Bytes::from_static(&[0x04, 0x00, 0x00]));
        assert!(result.is_err());
    }

    #[test]
    fn test_response_frame_direction() {
        let frame = Frame::response(4, 3, opcode::RESULT, Bytes::new());
        assert!(frame.is_response());
        assert_eq!(frame.protocol_version(), 4);
    }

    #[test]
    fn test_build_frame() {
        let header = FrameHeader::request(4, 42, opcode::QUERY, 0);
        let bytes = build_frame(&header, b"hello");

        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        let parsed = FrameHeader::decode(&bytes).unwrap();
        assert_eq!(parsed.length, 5);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_body_bytes_zero_copy() {
        let original = Bytes::from_static(b"test data");
        let frame = Frame::request(4, 1, opcode::QUERY, original.clone());

        assert_eq!(frame.body.as_ptr(), original.as_ptr());
    }
}
