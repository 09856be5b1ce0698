//! Message buffers and their allocation

use bytes::BytesMut;

use crate::frame::OpCode;

/// An owned message buffer
///
/// On the inbound side this accumulates the reassembled, unmasked,
/// decompressed payload of one message; ownership transfers to the
/// caller when the message completes. On the outbound side the builder
/// fills the payload and serialized header and marks the buffer
/// prepared.
#[derive(Debug)]
pub struct MessageBuffer {
    opcode: OpCode,
    fin: bool,
    compressed: bool,
    header: BytesMut,
    payload: BytesMut,
    prepared: bool,
}

impl MessageBuffer {
    pub fn new(opcode: OpCode, capacity: usize) -> Self {
        Self {
            opcode,
            fin: true,
            compressed: false,
            header: BytesMut::new(),
            payload: BytesMut::with_capacity(capacity),
            prepared: false,
        }
    }

    /// Convenience constructor for an unprepared outbound message
    pub fn from_payload(opcode: OpCode, payload: &[u8]) -> Self {
        let mut buf = Self::new(opcode, payload.len());
        buf.payload.extend_from_slice(payload);
        buf
    }

    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn set_opcode(&mut self, opcode: OpCode) {
        self.opcode = opcode;
    }

    #[inline]
    pub fn fin(&self) -> bool {
        self.fin
    }

    pub fn set_fin(&mut self, fin: bool) {
        self.fin = fin;
    }

    /// Whether compression is requested (outbound) or was applied
    /// on the wire (inbound)
    #[inline]
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    pub fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut BytesMut {
        &mut self.payload
    }

    pub fn into_payload(self) -> BytesMut {
        self.payload
    }

    /// The serialized frame header of a prepared outbound message
    #[inline]
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn set_header(&mut self, header: BytesMut) {
        self.header = header;
    }

    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn set_prepared(&mut self, prepared: bool) {
        self.prepared = prepared;
    }
}

/// Allocates message buffers for the inbound processor
pub trait MessageManager {
    /// Get a buffer for a new message
    ///
    /// `size_hint` is the first frame's payload length; implementations
    /// decide how much of it to trust.
    fn get_message(&mut self, opcode: OpCode, size_hint: usize) -> MessageBuffer;
}

/// Plain heap-allocating manager
///
/// The capacity hint is capped so a hostile declared length cannot force
/// a large allocation before any payload bytes arrive.
#[derive(Debug, Clone)]
pub struct HeapManager {
    pub max_initial_capacity: usize,
}

impl Default for HeapManager {
    fn default() -> Self {
        Self {
            max_initial_capacity: 64 * 1024,
        }
    }
}

impl MessageManager for HeapManager {
    fn get_message(&mut self, opcode: OpCode, size_hint: usize) -> MessageBuffer {
        MessageBuffer::new(opcode, size_hint.min(self.max_initial_capacity))
    }
}
