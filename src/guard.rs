//! Protocol version gate.
//!
//! When an allow-list of protocol versions is configured, every client
//! frame is checked before fan-out. A frame carrying a version outside
//! the list is answered directly with a synthesized protocol-error
//! frame; no upstream traffic is generated for it. This is how drivers
//! are pushed to downgrade: they retry STARTUP with an older version
//! after receiving the error.

use bytes::Bytes;

use crate::codec::ErrorBody;
use crate::protocol::{opcode, protocol_version_of, stream_id, Frame};

/// CQL error code for a protocol error.
pub const PROTOCOL_ERROR_CODE: i32 = 0x000A;

/// Enforces a configured allow-list of protocol versions.
#[derive(Debug, Clone)]
pub struct ProtocolGuard {
    /// Allowed versions, ascending and deduplicated. Empty = accept all.
    versions: Vec<u8>,
}

impl ProtocolGuard {
    /// Create a guard from the configured version set.
    pub fn new(mut versions: Vec<u8>) -> Self {
        versions.sort_unstable();
        versions.dedup();
        Self { versions }
    }

    /// Whether any versions are configured.
    pub fn is_enabled(&self) -> bool {
        !self.versions.is_empty()
    }

    /// The configured versions as `N/vN` labels, the form advertised in
    /// SUPPORTED responses and error messages.
    pub fn version_labels(&self) -> Vec<String> {
        self.versions.iter().map(|v| format!("{v}/v{v}")).collect()
    }

    /// Check a raw client frame.
    ///
    /// Returns `None` when the frame may proceed to fan-out, or the
    /// synthesized ERROR frame to send straight back to the client.
    pub fn check(&self, frame: &[u8]) -> Option<Bytes> {
        if self.versions.is_empty() {
            return None;
        }

        let version = protocol_version_of(frame);
        if self.versions.contains(&version) {
            return None;
        }

        Some(self.rejection(version, stream_id(frame)))
    }

    /// Build the protocol-error frame for an unsupported version.
    fn rejection(&self, version: u8, stream: i16) -> Bytes {
        let mut message = format!("Invalid or unsupported protocol version ({version}); supported versions are (");
        for (i, label) in self.version_labels().iter().enumerate() {
            if i > 0 {
                message.push(',');
            }
            message.push_str(label);
        }
        message.push(')');

        let body = ErrorBody {
            code: PROTOCOL_ERROR_CODE,
            message,
        }
        .encode();

        // The response itself is framed with the lowest supported
        // version so any client can parse it.
        let lowest = self.versions[0];
        Frame::response(lowest, stream, opcode::ERROR, body).encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_string;
    use crate::protocol::{build_frame, opcode_of, FrameHeader, HEADER_SIZE};
    use bytes::Buf;

    fn startup_frame(version: u8, stream: i16) -> Vec<u8> {
        build_frame(
            &FrameHeader::request(version, stream, opcode::STARTUP, 0),
            b"",
        )
    }

    #[test]
    fn test_disabled_guard_accepts_everything() {
        let guard = ProtocolGuard::new(vec![]);
        assert!(!guard.is_enabled());
        assert!(guard.check(&startup_frame(5, 1)).is_none());
        assert!(guard.check(&startup_frame(3, 1)).is_none());
    }

    #[test]
    fn test_allowed_version_passes() {
        let guard = ProtocolGuard::new(vec![4]);
        assert!(guard.check(&startup_frame(4, 1)).is_none());
    }

    #[test]
    fn test_rejection_frame_shape() {
        let guard = ProtocolGuard::new(vec![4]);
        let rejection = guard.check(&startup_frame(5, 0x0001)).unwrap();

        let header = FrameHeader::decode(&rejection).unwrap();
        assert!(header.is_response());
        assert_eq!(header.protocol_version(), 4);
        assert_eq!(header.stream, 0x0001);
        assert_eq!(opcode_of(&rejection), opcode::ERROR);

        let mut body = Bytes::copy_from_slice(&rejection[HEADER_SIZE..]);
        assert_eq!(body.get_i32(), PROTOCOL_ERROR_CODE);
        let message = read_string(&mut body).unwrap();
        assert!(message.starts_with(
            "Invalid or unsupported protocol version (5); supported versions are (4/v4)"
        ));
    }

    #[test]
    fn test_rejection_lists_all_versions() {
        let guard = ProtocolGuard::new(vec![5, 3, 4]);
        let rejection = guard.check(&startup_frame(2, 9)).unwrap();

        let mut body = Bytes::copy_from_slice(&rejection[HEADER_SIZE..]);
        let _ = body.get_i32();
        let message = read_string(&mut body).unwrap();
        assert!(message.contains("(3/v3,4/v4,5/v5)"));

        // Framed with the lowest configured version.
        let header = FrameHeader::decode(&rejection).unwrap();
        assert_eq!(header.protocol_version(), 3);
    }

    #[test]
    fn test_version_labels() {
        let guard = ProtocolGuard::new(vec![4, 3, 4]);
        assert_eq!(guard.version_labels(), ["3/v3", "4/v4"]);
    }
}
