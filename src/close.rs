//! Close status codes and close frame payloads

use bytes::{BufMut, BytesMut};

/// Normal closure
pub const NORMAL: u16 = 1000;
/// Endpoint going away
pub const GOING_AWAY: u16 = 1001;
/// Protocol error
pub const PROTOCOL_ERROR: u16 = 1002;
/// Data type not acceptable
pub const UNSUPPORTED_DATA: u16 = 1003;
/// No status code present on the wire (never sent as a code)
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame (never sent as a code)
pub const ABNORMAL: u16 = 1006;
/// Payload inconsistent with the message type (e.g. bad UTF-8)
pub const INVALID_PAYLOAD: u16 = 1007;
/// Policy violation
pub const POLICY_VIOLATION: u16 = 1008;
/// Message too big to process
pub const MESSAGE_TOO_BIG: u16 = 1009;
/// Client required an extension the server did not negotiate
pub const EXTENSION_REQUIRED: u16 = 1010;
/// Unexpected internal error
pub const INTERNAL_ERROR: u16 = 1011;
/// TLS handshake failure (never sent as a code)
pub const TLS_HANDSHAKE: u16 = 1015;

/// Codes that may never appear in a close frame on the wire
#[inline]
pub fn is_reserved(code: u16) -> bool {
    matches!(code, 1004 | NO_STATUS | ABNORMAL | TLS_HANDSHAKE)
}

/// Codes an endpoint is allowed to send
#[inline]
pub fn is_valid(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

/// A close code and reason parsed from a close frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Build a close frame payload: big-endian code followed by the reason
///
/// [`NO_STATUS`] produces an empty payload; the sentinel never reaches
/// the wire.
pub fn build_payload(code: u16, reason: &str) -> BytesMut {
    if code == NO_STATUS {
        return BytesMut::new();
    }
    let mut payload = BytesMut::with_capacity(2 + reason.len());
    payload.put_u16(code);
    payload.put_slice(reason.as_bytes());
    payload
}

/// Parse a close frame payload; `None` when no code is present
pub fn parse_payload(payload: &[u8]) -> Option<CloseReason> {
    if payload.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    Some(CloseReason::new(code, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(is_valid(NORMAL));
        assert!(is_valid(PROTOCOL_ERROR));
        assert!(is_valid(3000));
        assert!(is_valid(4999));
        assert!(!is_valid(999));
        assert!(!is_valid(1004));
        assert!(!is_valid(2999));
        assert!(!is_valid(5000));

        assert!(is_reserved(1004));
        assert!(is_reserved(NO_STATUS));
        assert!(is_reserved(ABNORMAL));
        assert!(is_reserved(TLS_HANDSHAKE));
        assert!(!is_reserved(NORMAL));
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = build_payload(NORMAL, "bye");
        assert_eq!(&payload[..], &[0x03, 0xE8, b'b', b'y', b'e']);

        let parsed = parse_payload(&payload).unwrap();
        assert_eq!(parsed, CloseReason::new(NORMAL, "bye"));
    }

    #[test]
    fn test_no_status_is_empty() {
        assert!(build_payload(NO_STATUS, "").is_empty());
        assert!(parse_payload(&[]).is_none());
        assert!(parse_payload(&[0x03]).is_none());
    }
}
