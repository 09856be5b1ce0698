//! Inbound frame processing
//!
//! The processor is a state machine fed raw transport bytes. It fills
//! the basic and extended header buffers incrementally, validates them,
//! then runs payload bytes through unmask → decompress → UTF-8
//! validation into an owned message buffer. One data-message reassembly
//! and one control-message reassembly can be in flight at a time, so a
//! control frame may interleave between fragments of a data message and
//! is delivered as its own message.
//!
//! No operation blocks: `consume` returns when input is exhausted or a
//! message is ready, and the caller resumes it later with more bytes.

use tracing::debug;

use crate::error::{Error, Result};
use crate::extension::{self, NullCompress, PermessageCompress};
use crate::frame::{self, BasicHeader, ExtendedHeader, OpCode};
use crate::handshake::UpgradeRequest;
use crate::mask::{self, MaskKeySource, OsMaskSource};
use crate::message::{HeapManager, MessageBuffer, MessageManager};
use crate::utf8::Utf8Validator;
use crate::{PAYLOAD_LEN_BASIC, PAYLOAD_LEN_EXTENDED};

/// Endpoint role
///
/// Servers require inbound frames to be masked and send unmasked;
/// clients are the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Per-connection engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether `Sec-WebSocket-Extensions` offers are honored at all
    pub enable_extensions: bool,
    /// Upper bound on a single capacity reservation while reassembling
    /// a fragmented message
    pub reserve_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_extensions: true,
            reserve_cap: 16 * 1024 * 1024,
        }
    }
}

/// Processor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Reading the two fixed header bytes
    HeaderBasic,
    /// Reading extended length and/or masking key bytes
    HeaderExtended,
    /// Reserved for extension data; currently a pass-through
    Extension,
    /// Reading payload bytes
    Application,
    /// A complete message is waiting for `get_message`
    Ready,
    /// Terminal; no further bytes are consumed
    FatalError,
}

/// Which in-flight message the current frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CurrentFrame {
    Data,
    Control,
}

/// State tied to one in-flight message
#[derive(Debug)]
struct MsgMetadata {
    /// Accumulates the decoded payload; ownership leaves via `get_message`
    buf: MessageBuffer,
    /// Masking key in word form, rotated to the payload cursor.
    /// Re-derived at every frame start; everything else spans the message.
    prepared_key: u32,
    validator: Utf8Validator,
    opcode: OpCode,
    /// Latched from the first frame's RSV1
    compressed: bool,
}

/// The hybi-13 protocol engine for one connection
///
/// Generic over its collaborators: the message buffer manager, the
/// per-message compression extension, and the masking key source, all
/// wired at construction. Not internally synchronized; one connection's
/// engine is driven sequentially by whatever owns the transport.
pub struct Processor<M, C, R> {
    pub(crate) role: Role,
    config: Config,
    manager: M,
    pub(crate) compressor: C,
    pub(crate) rng: R,

    state: State,
    /// Bytes still required to complete the current substate
    bytes_needed: usize,
    /// Write offset into the extended header buffer
    cursor: usize,
    basic: BasicHeader,
    extended: ExtendedHeader,

    data_msg: Option<MsgMetadata>,
    control_msg: Option<MsgMetadata>,
    current: CurrentFrame,
}

impl Processor<HeapManager, NullCompress, OsMaskSource> {
    /// Server-side engine with default collaborators and no compression
    pub fn server() -> Self {
        Self::new(
            Role::Server,
            Config::default(),
            HeapManager::default(),
            NullCompress,
            OsMaskSource,
        )
    }

    /// Client-side engine with default collaborators and no compression
    pub fn client() -> Self {
        Self::new(
            Role::Client,
            Config::default(),
            HeapManager::default(),
            NullCompress,
            OsMaskSource,
        )
    }
}

impl<M, C, R> Processor<M, C, R>
where
    M: MessageManager,
    C: PermessageCompress,
    R: MaskKeySource,
{
    pub fn new(role: Role, config: Config, manager: M, compressor: C, rng: R) -> Self {
        Self {
            role,
            config,
            manager,
            compressor,
            rng,
            state: State::HeaderBasic,
            bytes_needed: frame::BASIC_HEADER_LEN,
            cursor: 0,
            basic: BasicHeader::default(),
            extended: ExtendedHeader::default(),
            data_msg: None,
            control_msg: None,
            current: CurrentFrame::Data,
        }
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether a complete message is waiting for `get_message`
    #[inline]
    pub fn ready(&self) -> bool {
        self.state == State::Ready
    }

    /// Whether the processor hit a fatal protocol error
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.state == State::FatalError
    }

    /// Bytes still required to complete the current substate
    #[inline]
    pub fn bytes_needed(&self) -> usize {
        self.bytes_needed
    }

    pub fn compressor(&self) -> &C {
        &self.compressor
    }

    pub fn compressor_mut(&mut self) -> &mut C {
        &mut self.compressor
    }

    /// Negotiate the request's extension offers against the owned
    /// compression extension
    pub fn negotiate_extensions(&mut self, request: &impl UpgradeRequest) -> Result<String> {
        extension::negotiate(
            self.config.enable_extensions,
            request.header("Sec-WebSocket-Extensions"),
            &mut self.compressor,
        )
    }

    /// Consume transport bytes, returning how many were used
    ///
    /// The input buffer is scratch space: masked payload bytes are
    /// unmasked in place. Stops early when a message becomes ready; call
    /// `get_message` and then resume with the remaining bytes. A
    /// validation error leaves the processor in its sticky fatal state.
    pub fn consume(&mut self, input: &mut [u8]) -> Result<usize> {
        let mut p = 0;

        while self.state != State::Ready
            && self.state != State::FatalError
            && (p < input.len() || self.bytes_needed == 0)
        {
            if let Err(err) = self.step(input, &mut p) {
                debug!(%err, "inbound frame validation failed");
                self.state = State::FatalError;
                return Err(err);
            }
        }

        Ok(p)
    }

    /// Take the completed message, returning the processor to the
    /// header state
    pub fn get_message(&mut self) -> Option<MessageBuffer> {
        if self.state != State::Ready {
            return None;
        }
        let meta = match self.current {
            CurrentFrame::Data => self.data_msg.take(),
            CurrentFrame::Control => self.control_msg.take(),
        }?;
        self.reset_headers();
        Some(meta.buf)
    }

    fn step(&mut self, input: &mut [u8], p: &mut usize) -> Result<()> {
        match self.state {
            State::HeaderBasic => {
                *p += self.copy_basic_header_bytes(&input[*p..]);
                if self.bytes_needed > 0 {
                    return Ok(());
                }

                self.validate_basic_header()?;
                self.state = State::HeaderExtended;
                self.cursor = 0;
                self.bytes_needed = frame::header_len(&self.basic) - frame::BASIC_HEADER_LEN;
            }
            State::HeaderExtended => {
                *p += self.copy_extended_header_bytes(&input[*p..]);
                if self.bytes_needed > 0 {
                    return Ok(());
                }

                let payload_len = self.validate_extended_header()?;
                self.begin_frame(payload_len)?;
                self.state = State::Application;
                self.bytes_needed = payload_len;
            }
            State::Extension => {
                self.state = State::Application;
            }
            State::Application => {
                let n = self.bytes_needed.min(input.len() - *p);
                if n > 0 {
                    self.process_payload_bytes(&mut input[*p..*p + n])?;
                    *p += n;
                    self.bytes_needed -= n;
                }
                if self.bytes_needed > 0 {
                    return Ok(());
                }

                self.finish_frame()?;
            }
            // The loop condition keeps these out of reach.
            State::Ready | State::FatalError => return Err(Error::Generic),
        }
        Ok(())
    }

    /// Fill the two-byte basic header
    fn copy_basic_header_bytes(&mut self, input: &[u8]) -> usize {
        let mut n = 0;
        while n < input.len() && self.bytes_needed > 0 {
            if self.bytes_needed == frame::BASIC_HEADER_LEN {
                self.basic.b0 = input[n];
            } else {
                self.basic.b1 = input[n];
            }
            self.bytes_needed -= 1;
            n += 1;
        }
        n
    }

    /// Fill the extended header at the cursor
    fn copy_extended_header_bytes(&mut self, input: &[u8]) -> usize {
        let n = self.bytes_needed.min(input.len());
        self.extended.bytes[self.cursor..self.cursor + n].copy_from_slice(&input[..n]);
        self.cursor += n;
        self.bytes_needed -= n;
        n
    }

    /// Validate the basic header of an incoming frame
    fn validate_basic_header(&self) -> Result<()> {
        let h = &self.basic;
        let raw_op = h.raw_opcode();
        let is_control = raw_op >= 0x8;

        // Control frame size is bounded by the 7-bit length code, so an
        // oversize control frame is rejected before its extended length
        // is even read.
        if is_control && h.len_code() > PAYLOAD_LEN_BASIC as u8 {
            return Err(Error::ControlTooBig);
        }

        // RSV1 belongs to the compression extension and only on data
        // frames; RSV2/RSV3 have no negotiated meaning at all.
        if h.rsv1() && (!self.compressor.is_enabled() || is_control) {
            return Err(Error::InvalidRsvBit);
        }
        if h.rsv2() || h.rsv3() {
            return Err(Error::InvalidRsvBit);
        }

        let opcode = h.opcode().ok_or(Error::InvalidOpcode)?;

        if is_control && !h.fin() {
            return Err(Error::FragmentedControl);
        }

        let new_msg = self.data_msg.is_none();
        if new_msg && opcode == OpCode::Continuation {
            return Err(Error::InvalidContinuation);
        }
        if !new_msg && !is_control && opcode != OpCode::Continuation {
            return Err(Error::InvalidContinuation);
        }

        match self.role {
            Role::Server if !h.masked() => Err(Error::MaskingRequired),
            Role::Client if h.masked() => Err(Error::MaskingForbidden),
            _ => Ok(()),
        }
    }

    /// Validate the extended header and return the payload length
    fn validate_extended_header(&self) -> Result<usize> {
        let size = frame::payload_size(&self.basic, &self.extended);

        match self.basic.len_code() {
            frame::LEN_CODE_16BIT if size <= PAYLOAD_LEN_BASIC as u64 => {
                return Err(Error::NonMinimalEncoding);
            }
            frame::LEN_CODE_64BIT if size <= PAYLOAD_LEN_EXTENDED as u64 => {
                return Err(Error::NonMinimalEncoding);
            }
            _ => {}
        }

        if size >> 63 != 0 {
            return Err(Error::Requires64Bit);
        }
        usize::try_from(size).map_err(|_| Error::Requires64Bit)
    }

    /// Set up message metadata for the frame whose header just completed
    fn begin_frame(&mut self, payload_len: usize) -> Result<()> {
        // Reserved values were rejected during basic header validation.
        let opcode = self.basic.opcode().ok_or(Error::Generic)?;
        let key = mask::prepare_masking_key(frame::masking_key(&self.basic, &self.extended));

        if opcode.is_control() {
            self.control_msg = Some(MsgMetadata {
                buf: self.manager.get_message(opcode, payload_len),
                prepared_key: key,
                validator: Utf8Validator::new(),
                opcode,
                compressed: false,
            });
            self.current = CurrentFrame::Control;
        } else {
            match &mut self.data_msg {
                None => {
                    self.data_msg = Some(MsgMetadata {
                        buf: self.manager.get_message(opcode, payload_len),
                        prepared_key: key,
                        validator: Utf8Validator::new(),
                        opcode,
                        compressed: self.basic.rsv1(),
                    });
                }
                Some(meta) => {
                    // Each frame starts a fresh masking key; all other
                    // message state carries over.
                    meta.prepared_key = key;
                    let payload = meta.buf.payload_mut();
                    let additional = payload.len().max(payload_len).min(self.config.reserve_cap);
                    payload.reserve(additional);
                }
            }
            self.current = CurrentFrame::Data;
        }
        Ok(())
    }

    /// Run one chunk of payload through unmask → decompress → validate
    ///
    /// The chunk is scratch space; masked bytes are unmasked in place
    /// before being appended (directly or through the decompressor) to
    /// the message buffer.
    fn process_payload_bytes(&mut self, chunk: &mut [u8]) -> Result<()> {
        let masked = self.basic.masked();
        let compressor_enabled = self.compressor.is_enabled();
        let meta = match self.current {
            CurrentFrame::Data => self.data_msg.as_mut(),
            CurrentFrame::Control => self.control_msg.as_mut(),
        }
        .ok_or(Error::Generic)?;

        if masked {
            meta.prepared_key = mask::mask_stream(chunk, meta.prepared_key);
        }

        let out = meta.buf.payload_mut();
        let offset = out.len();

        if meta.compressed && compressor_enabled {
            self.compressor.decompress(chunk, out)?;
        } else {
            out.extend_from_slice(chunk);
        }

        // Validate the decoded bytes that just landed in the buffer.
        if meta.opcode == OpCode::Text {
            let payload = meta.buf.payload();
            if !meta.validator.decode(&payload[offset..]) {
                return Err(Error::InvalidUtf8);
            }
        }

        Ok(())
    }

    /// Handle the end of a frame's payload
    fn finish_frame(&mut self) -> Result<()> {
        if !self.basic.fin() {
            // More frames of the same message follow.
            self.reset_headers();
            return Ok(());
        }

        let compressor_enabled = self.compressor.is_enabled();
        let meta = match self.current {
            CurrentFrame::Data => self.data_msg.as_mut(),
            CurrentFrame::Control => self.control_msg.as_mut(),
        }
        .ok_or(Error::Generic)?;

        if meta.compressed && compressor_enabled {
            let offset = meta.buf.payload().len();
            self.compressor.finish_decompress(meta.buf.payload_mut())?;
            if meta.opcode == OpCode::Text {
                let payload = meta.buf.payload();
                if !meta.validator.decode(&payload[offset..]) {
                    return Err(Error::InvalidUtf8);
                }
            }
        }

        // A text message must end on a code point boundary.
        if meta.opcode == OpCode::Text && !meta.validator.complete() {
            return Err(Error::InvalidUtf8);
        }

        self.state = State::Ready;
        Ok(())
    }

    fn reset_headers(&mut self) {
        self.state = State::HeaderBasic;
        self.bytes_needed = frame::BASIC_HEADER_LEN;
        self.cursor = 0;
        self.basic = BasicHeader::default();
        self.extended = ExtendedHeader::default();
    }
}
