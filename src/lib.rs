//! # wsproto: sans-I/O WebSocket protocol engine
//!
//! The RFC 6455 (hybi-13) framing layer with no I/O attached: an inbound
//! byte-stream processor that turns transport bytes into messages, an
//! outbound builder that turns messages into frames, the opening
//! handshake computation, and permessage-deflate negotiation.
//!
//! The engine owns no sockets and runs no loops. Feed it whatever bytes
//! the transport produced and write out whatever it prepared:
//!
//! ```
//! use wsproto::{OpCode, Processor};
//!
//! let mut server = Processor::server();
//!
//! // The RFC 6455 masked "Hello" frame.
//! let mut input = [0x81, 0x85, 0x37, 0xFA, 0x21, 0x3D, 0x7F, 0x9F, 0x4D, 0x51, 0x58];
//! server.consume(&mut input).unwrap();
//!
//! let message = server.get_message().unwrap();
//! assert_eq!(message.opcode(), OpCode::Text);
//! assert_eq!(message.payload(), b"Hello");
//! ```
//!
//! ## Collaborators
//!
//! The processor is generic over three capabilities wired at connection
//! creation: a [`MessageManager`] that allocates message buffers, a
//! [`PermessageCompress`] extension (or [`NullCompress`]), and a
//! [`MaskKeySource`] for client-side masking keys. HTTP stays outside;
//! the handshake helpers work against the small
//! [`handshake::UpgradeRequest`]/[`handshake::UpgradeResponse`] traits.

mod builder;
pub mod close;
pub mod error;
pub mod extension;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod message;
pub mod processor;
pub mod utf8;

#[cfg(feature = "permessage-deflate")]
pub mod deflate;

pub use error::{Error, Result};
pub use extension::{NullCompress, PermessageCompress};
pub use frame::{BasicHeader, ExtendedHeader, OpCode};
pub use mask::{MaskKeySource, OsMaskSource};
pub use message::{HeapManager, MessageBuffer, MessageManager};
pub use processor::{Config, Processor, Role};

#[cfg(feature = "permessage-deflate")]
pub use deflate::{DeflateConfig, DeflateExtension};

/// GUID appended to the client key for the accept computation
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Maximum frame header size (2 + 8 + 4 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Largest payload encodable in the 7-bit length field, and the control
/// frame payload limit
pub const PAYLOAD_LEN_BASIC: usize = 125;

/// Largest payload encodable in the 16-bit extended length field
pub const PAYLOAD_LEN_EXTENDED: usize = 65535;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::extension::{NullCompress, PermessageCompress};
    pub use crate::frame::OpCode;
    pub use crate::mask::{MaskKeySource, OsMaskSource};
    pub use crate::message::{HeapManager, MessageBuffer, MessageManager};
    pub use crate::processor::{Config, Processor, Role};
}
