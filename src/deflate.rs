//! Per-message deflate extension (RFC 7692)
//!
//! Implements [`PermessageCompress`] over raw DEFLATE streams with the
//! negotiated LZ77 window sizes. Outbound messages are compressed whole
//! with a sync flush and the trailing `00 00 FF FF` stripped; inbound
//! chunks are inflated as they arrive, and the stripped trailer is
//! restored when the message completes.

use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::extension::{ExtensionParam, PermessageCompress};
use crate::processor::Role;

/// Bytes removed after compression and restored before the final inflate
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Default LZ77 window size (32KB = 2^15)
pub const DEFAULT_WINDOW_BITS: u8 = 15;

/// Minimum negotiable LZ77 window size (256 bytes = 2^8)
pub const MIN_WINDOW_BITS: u8 = 8;

/// Maximum negotiable LZ77 window size (32KB = 2^15)
pub const MAX_WINDOW_BITS: u8 = 15;

/// Scratch size for the flate2 streaming loops
const FLATE_CHUNK: usize = 4096;

/// Iteration guard for the streaming loops
const MAX_ITERATIONS: u32 = 100_000;

/// Configuration for the permessage-deflate extension
#[derive(Debug, Clone)]
pub struct DeflateConfig {
    /// Server's maximum LZ77 window bits (server compresses with these)
    pub server_max_window_bits: u8,
    /// Client's maximum LZ77 window bits (server inflates with these)
    pub client_max_window_bits: u8,
    /// If true, the server resets its compression context per message
    pub server_no_context_takeover: bool,
    /// If true, the client resets its compression context per message
    pub client_no_context_takeover: bool,
    /// Compression level (0-9)
    pub compression_level: u32,
    /// Upper bound on a single message's inflated size
    pub max_inflate_size: usize,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_max_window_bits: DEFAULT_WINDOW_BITS,
            client_max_window_bits: DEFAULT_WINDOW_BITS,
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            compression_level: 6,
            max_inflate_size: 64 * 1024 * 1024,
        }
    }
}

impl DeflateConfig {
    /// Fold the peer's offered parameters into this configuration
    fn apply_params(&mut self, params: &[ExtensionParam]) -> Result<()> {
        for (name, value) in params {
            match name.as_str() {
                "server_no_context_takeover" => {
                    if value.is_some() {
                        return Err(Error::ExtensionParse);
                    }
                    self.server_no_context_takeover = true;
                }
                "client_no_context_takeover" => {
                    if value.is_some() {
                        return Err(Error::ExtensionParse);
                    }
                    self.client_no_context_takeover = true;
                }
                "server_max_window_bits" => {
                    // A bare token here is a client error; the parameter
                    // is only meaningful with a value.
                    let value = value.as_deref().ok_or(Error::ExtensionParse)?;
                    self.server_max_window_bits = parse_window_bits(value)?;
                }
                "client_max_window_bits" => {
                    // Bare token just signals the client can accept a
                    // value in the response.
                    if let Some(value) = value.as_deref() {
                        self.client_max_window_bits = parse_window_bits(value)?;
                    }
                }
                _ => return Err(Error::ExtensionParse),
            }
        }
        Ok(())
    }

    /// The `Sec-WebSocket-Extensions` response fragment for this config
    fn response_fragment(&self) -> String {
        let mut parts = vec!["permessage-deflate".to_string()];

        if self.server_no_context_takeover {
            parts.push("server_no_context_takeover".to_string());
        }
        if self.client_no_context_takeover {
            parts.push("client_no_context_takeover".to_string());
        }
        if self.server_max_window_bits < MAX_WINDOW_BITS {
            parts.push(format!(
                "server_max_window_bits={}",
                self.server_max_window_bits
            ));
        }
        if self.client_max_window_bits < MAX_WINDOW_BITS {
            parts.push(format!(
                "client_max_window_bits={}",
                self.client_max_window_bits
            ));
        }

        parts.join("; ")
    }
}

fn parse_window_bits(value: &str) -> Result<u8> {
    let bits: u8 = value.parse().map_err(|_| Error::ExtensionParse)?;
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        return Err(Error::ExtensionParse);
    }
    Ok(bits)
}

/// Per-connection permessage-deflate state
pub struct DeflateExtension {
    config: DeflateConfig,
    role: Role,
    enabled: bool,
    encoder: Option<Compress>,
    decoder: Option<Decompress>,
}

impl DeflateExtension {
    /// Create the server-side extension; inert until negotiated
    pub fn server(config: DeflateConfig) -> Self {
        Self {
            config,
            role: Role::Server,
            enabled: false,
            encoder: None,
            decoder: None,
        }
    }

    /// Create the client-side extension; inert until activated with the
    /// parameters accepted by the server
    pub fn client(config: DeflateConfig) -> Self {
        Self {
            config,
            role: Role::Client,
            enabled: false,
            encoder: None,
            decoder: None,
        }
    }

    pub fn config(&self) -> &DeflateConfig {
        &self.config
    }

    /// Compression window bits for frames this endpoint sends
    fn own_window_bits(&self) -> u8 {
        match self.role {
            Role::Server => self.config.server_max_window_bits,
            Role::Client => self.config.client_max_window_bits,
        }
    }

    /// Decompression window bits for frames the peer sends
    fn peer_window_bits(&self) -> u8 {
        match self.role {
            Role::Server => self.config.client_max_window_bits,
            Role::Client => self.config.server_max_window_bits,
        }
    }

    fn own_no_context_takeover(&self) -> bool {
        match self.role {
            Role::Server => self.config.server_no_context_takeover,
            Role::Client => self.config.client_no_context_takeover,
        }
    }

    fn peer_no_context_takeover(&self) -> bool {
        match self.role {
            Role::Server => self.config.client_no_context_takeover,
            Role::Client => self.config.server_no_context_takeover,
        }
    }

    /// Build the deflate streams from the current config and go live
    pub fn activate(&mut self) {
        let level = Compression::new(self.config.compression_level);
        self.encoder = Some(Compress::new_with_window_bits(
            level,
            false,
            self.own_window_bits(),
        ));
        self.decoder = Some(Decompress::new_with_window_bits(
            false,
            self.peer_window_bits(),
        ));
        self.enabled = true;
    }
}

impl PermessageCompress for DeflateExtension {
    fn name(&self) -> &'static str {
        "permessage-deflate"
    }

    fn is_implemented(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn negotiate(&mut self, params: &[ExtensionParam]) -> Result<String> {
        let mut config = self.config.clone();
        config.apply_params(params)?;

        self.config = config;
        self.activate();

        Ok(self.config.response_fragment())
    }

    fn compress(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        let reset_context = self.own_no_context_takeover();
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| Error::Compression("compressor not active".into()))?;

        if reset_context {
            encoder.reset();
        }

        let appended_at = out.len();
        let mut buf = [0u8; FLATE_CHUNK];
        let mut offset = 0;
        let mut iterations = 0u32;

        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(Error::Compression("deflate made no progress".into()));
            }

            let before_in = encoder.total_in();
            let before_out = encoder.total_out();

            let status = encoder
                .compress(&input[offset..], &mut buf, FlushCompress::Sync)
                .map_err(|e| Error::Compression(format!("deflate: {}", e)))?;

            offset += (encoder.total_in() - before_in) as usize;
            let produced = (encoder.total_out() - before_out) as usize;
            out.extend_from_slice(&buf[..produced]);

            match status {
                Status::StreamEnd => break,
                // Drained: all input consumed and the sync flush fit.
                _ if offset >= input.len() && produced < buf.len() => break,
                _ => {}
            }
        }

        // The sync flush always ends with the empty stored block; the
        // wire format omits it.
        if out.len() >= appended_at + 4 && out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - 4);
        }

        Ok(())
    }

    fn decompress(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        let max_inflate_size = self.config.max_inflate_size;
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::Compression("decompressor not active".into()))?;

        let mut buf = [0u8; FLATE_CHUNK];
        let mut offset = 0;
        let mut iterations = 0u32;

        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(Error::Compression("inflate made no progress".into()));
            }

            let before_in = decoder.total_in();
            let before_out = decoder.total_out();

            let status = decoder
                .decompress(&input[offset..], &mut buf, FlushDecompress::Sync)
                .map_err(|e| Error::Compression(format!("inflate: {}", e)))?;

            offset += (decoder.total_in() - before_in) as usize;
            let produced = (decoder.total_out() - before_out) as usize;
            out.extend_from_slice(&buf[..produced]);

            if out.len() > max_inflate_size {
                return Err(Error::Compression("inflated message exceeds cap".into()));
            }

            match status {
                Status::StreamEnd => break,
                _ if offset >= input.len() && produced < buf.len() => break,
                _ => {}
            }
        }

        Ok(())
    }

    fn finish_decompress(&mut self, out: &mut BytesMut) -> Result<()> {
        // Restore the trailer the sender stripped so the inflater settles
        // on a block boundary.
        self.decompress(&DEFLATE_TRAILER, out)?;

        if self.peer_no_context_takeover() {
            if let Some(decoder) = self.decoder.as_mut() {
                decoder.reset(false);
            }
        }
        Ok(())
    }
}
