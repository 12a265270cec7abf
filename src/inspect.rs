//! Cheap frame classification.
//!
//! Classifies a raw frame buffer from nothing but byte 0's direction bit
//! and byte 4's opcode. O(1), no allocation, no body decode: the fast
//! path never pays for a full codec pass.

use crate::protocol::{opcode, DIRECTION_RESPONSE};

/// What a frame is, as far as the proxy cares.
///
/// Request kinds come from the client, response kinds from the servers.
/// Anything unrecognized (including auth challenge/success, which the
/// proxy forwards untouched) is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Startup,
    Options,
    Query,
    Prepare,
    Execute,
    Batch,
    Register,
    AuthResponse,
    Ready,
    Authenticate,
    Supported,
    Result,
    Event,
    Error,
    Unknown,
}

impl FrameKind {
    /// Stable lowercase name, used as the `state` metric tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Startup => "startup",
            FrameKind::Options => "options",
            FrameKind::Query => "query",
            FrameKind::Prepare => "prepare",
            FrameKind::Execute => "execute",
            FrameKind::Batch => "batch",
            FrameKind::Register => "register",
            FrameKind::AuthResponse => "auth_response",
            FrameKind::Ready => "ready",
            FrameKind::Authenticate => "authenticate",
            FrameKind::Supported => "supported",
            FrameKind::Result => "result",
            FrameKind::Event => "event",
            FrameKind::Error => "error",
            FrameKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a raw frame buffer.
///
/// Buffers shorter than a header classify as `Unknown`; the splitter
/// never emits those, but classification must not panic on garbage.
pub fn classify(frame: &[u8]) -> FrameKind {
    if frame.len() < 5 {
        return FrameKind::Unknown;
    }

    let response = frame[0] & DIRECTION_RESPONSE != 0;
    let op = frame[4];

    if response {
        match op {
            opcode::ERROR => FrameKind::Error,
            opcode::READY => FrameKind::Ready,
            opcode::AUTHENTICATE => FrameKind::Authenticate,
            opcode::SUPPORTED => FrameKind::Supported,
            opcode::RESULT => FrameKind::Result,
            opcode::EVENT => FrameKind::Event,
            _ => FrameKind::Unknown,
        }
    } else {
        match op {
            opcode::STARTUP => FrameKind::Startup,
            opcode::OPTIONS => FrameKind::Options,
            opcode::QUERY => FrameKind::Query,
            opcode::PREPARE => FrameKind::Prepare,
            opcode::EXECUTE => FrameKind::Execute,
            opcode::REGISTER => FrameKind::Register,
            opcode::BATCH => FrameKind::Batch,
            opcode::AUTH_RESPONSE => FrameKind::AuthResponse,
            _ => FrameKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, FrameHeader};

    fn request(op: u8) -> Vec<u8> {
        build_frame(&FrameHeader::request(4, 1, op, 0), b"")
    }

    fn response(op: u8) -> Vec<u8> {
        build_frame(&FrameHeader::response(4, 1, op, 0), b"")
    }

    #[test]
    fn test_request_kinds() {
        assert_eq!(classify(&request(opcode::STARTUP)), FrameKind::Startup);
        assert_eq!(classify(&request(opcode::OPTIONS)), FrameKind::Options);
        assert_eq!(classify(&request(opcode::QUERY)), FrameKind::Query);
        assert_eq!(classify(&request(opcode::PREPARE)), FrameKind::Prepare);
        assert_eq!(classify(&request(opcode::EXECUTE)), FrameKind::Execute);
        assert_eq!(classify(&request(opcode::BATCH)), FrameKind::Batch);
        assert_eq!(classify(&request(opcode::REGISTER)), FrameKind::Register);
        assert_eq!(
            classify(&request(opcode::AUTH_RESPONSE)),
            FrameKind::AuthResponse
        );
    }

    #[test]
    fn test_response_kinds() {
        assert_eq!(classify(&response(opcode::ERROR)), FrameKind::Error);
        assert_eq!(classify(&response(opcode::READY)), FrameKind::Ready);
        assert_eq!(
            classify(&response(opcode::AUTHENTICATE)),
            FrameKind::Authenticate
        );
        assert_eq!(classify(&response(opcode::SUPPORTED)), FrameKind::Supported);
        assert_eq!(classify(&response(opcode::RESULT)), FrameKind::Result);
        assert_eq!(classify(&response(opcode::EVENT)), FrameKind::Event);
    }

    #[test]
    fn test_direction_matters() {
        // QUERY opcode with the response bit set is not a query.
        assert_eq!(classify(&response(opcode::QUERY)), FrameKind::Unknown);
        // ERROR opcode on a request is not an error response.
        assert_eq!(classify(&request(opcode::ERROR)), FrameKind::Unknown);
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(classify(&request(0x42)), FrameKind::Unknown);
        assert_eq!(classify(&response(opcode::AUTH_SUCCESS)), FrameKind::Unknown);
    }

    #[test]
    fn test_short_buffer_is_unknown() {
        assert_eq!(classify(&[0x04, 0x00]), FrameKind::Unknown);
        assert_eq!(classify(&[]), FrameKind::Unknown);
    }

    #[test]
    fn test_as_str_labels() {
        assert_eq!(FrameKind::Query.as_str(), "query");
        assert_eq!(FrameKind::AuthResponse.as_str(), "auth_response");
        assert_eq!(FrameKind::Query.to_string(), "query");
    }
}
