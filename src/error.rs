//! Error types for the protocol engine

use std::fmt;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error kinds
///
/// Every fallible operation in the engine reports one of these. Frame
/// validation errors additionally drive the inbound processor into its
/// sticky fatal state; handshake and prepare errors leave all state
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Extension support is disabled for this connection
    ExtensionsDisabled,
    /// The `Sec-WebSocket-Extensions` header could not be parsed
    ExtensionParse,
    /// Handshake request method was not GET
    InvalidHttpMethod,
    /// Handshake request was not HTTP/1.1
    InvalidHttpVersion,
    /// A required handshake header was missing or empty
    MissingRequiredHeader,
    /// The SHA-1 backend failed to produce a digest
    Sha1Library,
    /// Arguments invalid for the requested operation
    InvalidArguments,
    /// Reserved or out-of-range opcode
    InvalidOpcode,
    /// Payload failed validation (e.g. outbound text that is not UTF-8)
    InvalidPayload,
    /// RSV bit set without a negotiated extension, or on a control frame
    InvalidRsvBit,
    /// Continuation frame without a message in progress, or a new data
    /// frame while one is in progress
    InvalidContinuation,
    /// Control frame with the FIN bit clear
    FragmentedControl,
    /// Control frame payload longer than 125 bytes
    ControlTooBig,
    /// Server received an unmasked frame
    MaskingRequired,
    /// Client received a masked frame
    MaskingForbidden,
    /// Extended payload length was not minimally encoded
    NonMinimalEncoding,
    /// Payload length has bit 63 set or exceeds the host address space
    Requires64Bit,
    /// Invalid UTF-8 in a text message
    InvalidUtf8,
    /// Close code is reserved and may not be sent
    ReservedCloseCode,
    /// Close code is outside the sendable ranges
    InvalidCloseCode(u16),
    /// Close reason supplied without a close code
    ReasonRequiresCode,
    /// Invalid HTTP in the handshake request or response
    InvalidHttp(&'static str),
    /// Compression/decompression error
    Compression(String),
    /// Internal state error
    Generic,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ExtensionsDisabled => write!(f, "extensions are disabled"),
            Error::ExtensionParse => write!(f, "invalid Sec-WebSocket-Extensions header"),
            Error::InvalidHttpMethod => write!(f, "handshake method must be GET"),
            Error::InvalidHttpVersion => write!(f, "handshake requires HTTP/1.1"),
            Error::MissingRequiredHeader => write!(f, "missing required handshake header"),
            Error::Sha1Library => write!(f, "SHA-1 library error"),
            Error::InvalidArguments => write!(f, "invalid arguments"),
            Error::InvalidOpcode => write!(f, "invalid opcode"),
            Error::InvalidPayload => write!(f, "invalid payload"),
            Error::InvalidRsvBit => write!(f, "invalid RSV bit"),
            Error::InvalidContinuation => write!(f, "invalid continuation frame"),
            Error::FragmentedControl => write!(f, "fragmented control frame"),
            Error::ControlTooBig => write!(f, "control frame payload too large"),
            Error::MaskingRequired => write!(f, "client frames must be masked"),
            Error::MaskingForbidden => write!(f, "server frames must not be masked"),
            Error::NonMinimalEncoding => write!(f, "payload length not minimally encoded"),
            Error::Requires64Bit => write!(f, "payload length requires 64-bit support"),
            Error::InvalidUtf8 => write!(f, "invalid UTF-8 in text message"),
            Error::ReservedCloseCode => write!(f, "reserved close code"),
            Error::InvalidCloseCode(code) => write!(f, "invalid close code: {}", code),
            Error::ReasonRequiresCode => write!(f, "close reason requires a close code"),
            Error::InvalidHttp(msg) => write!(f, "invalid HTTP: {}", msg),
            Error::Compression(msg) => write!(f, "compression error: {}", msg),
            Error::Generic => write!(f, "internal protocol error"),
        }
    }
}

impl std::error::Error for Error {}
