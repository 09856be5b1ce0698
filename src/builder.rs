//! Outbound frame preparation
//!
//! The prepare methods validate, compress, mask, and serialize a frame
//! into a caller-owned message buffer. They retain no state between
//! calls: each prepared buffer is self-contained, and the only side
//! effects are a masking key draw for client frames and the shared
//! compression context when the extension is active.

use crate::close;
use crate::error::{Error, Result};
use crate::extension::PermessageCompress;
use crate::frame::{self, BasicHeader, ExtendedHeader, OpCode};
use crate::mask::{self, MaskKeySource};
use crate::message::{MessageBuffer, MessageManager};
use crate::processor::{Processor, Role};
use crate::utf8::validate_utf8;
use crate::PAYLOAD_LEN_BASIC;

impl<M, C, R> Processor<M, C, R>
where
    M: MessageManager,
    C: PermessageCompress,
    R: MaskKeySource,
{
    /// Prepare a data frame for writing
    ///
    /// Validates the input, compresses when the extension is active and
    /// the input asks for it, masks client frames with a fresh key, and
    /// attaches the serialized header. `out` is only marked prepared on
    /// success.
    pub fn prepare_data_frame(
        &mut self,
        input: &MessageBuffer,
        out: &mut MessageBuffer,
    ) -> Result<()> {
        if out.is_prepared() {
            return Err(Error::InvalidArguments);
        }

        let opcode = input.opcode();
        if opcode.is_control() {
            return Err(Error::InvalidOpcode);
        }
        if opcode == OpCode::Text && !validate_utf8(input.payload()) {
            return Err(Error::InvalidPayload);
        }

        let masked = self.role == Role::Client;
        let compressed = self.compressor.is_enabled() && input.compressed();

        out.payload_mut().clear();

        let prepared_key = if masked {
            Some(mask::prepare_masking_key(
                self.rng.next_mask_key().to_ne_bytes(),
            ))
        } else {
            None
        };

        if compressed {
            self.compressor.compress(input.payload(), out.payload_mut())?;
            if let Some(key) = prepared_key {
                mask::mask_stream(out.payload_mut(), key);
            }
        } else if let Some(key) = prepared_key {
            mask::mask_exact(input.payload(), out.payload_mut(), key);
        } else {
            out.payload_mut().extend_from_slice(input.payload());
        }

        // The header describes the bytes actually going on the wire, so
        // its length field comes from the (possibly compressed) payload.
        let size = out.payload().len() as u64;
        let header = BasicHeader::new(opcode, size, input.fin(), masked, compressed);
        let extended = ExtendedHeader::new(size, prepared_key.map(u32::to_ne_bytes));

        out.set_header(frame::prepare_header(&header, &extended));
        out.set_opcode(opcode);
        out.set_fin(input.fin());
        out.set_compressed(compressed);
        out.set_prepared(true);
        Ok(())
    }

    /// Prepare a ping frame
    pub fn prepare_ping(&mut self, payload: &[u8], out: &mut MessageBuffer) -> Result<()> {
        self.prepare_control(OpCode::Ping, payload, out)
    }

    /// Prepare a pong frame
    pub fn prepare_pong(&mut self, payload: &[u8], out: &mut MessageBuffer) -> Result<()> {
        self.prepare_control(OpCode::Pong, payload, out)
    }

    /// Prepare a close frame
    ///
    /// [`close::NO_STATUS`] sends an empty close payload; any other code
    /// must be sendable and is serialized big-endian ahead of the
    /// reason.
    pub fn prepare_close(
        &mut self,
        code: u16,
        reason: &str,
        out: &mut MessageBuffer,
    ) -> Result<()> {
        if code != close::NO_STATUS {
            if close::is_reserved(code) {
                return Err(Error::ReservedCloseCode);
            }
            if !close::is_valid(code) {
                return Err(Error::InvalidCloseCode(code));
            }
        } else if !reason.is_empty() {
            return Err(Error::ReasonRequiresCode);
        }
        if reason.len() > PAYLOAD_LEN_BASIC - 2 {
            return Err(Error::ControlTooBig);
        }

        let payload = close::build_payload(code, reason);
        self.prepare_control(OpCode::Close, &payload, out)
    }

    /// Shared control-frame helper: always FIN, never compressed
    fn prepare_control(
        &mut self,
        opcode: OpCode,
        payload: &[u8],
        out: &mut MessageBuffer,
    ) -> Result<()> {
        if out.is_prepared() {
            return Err(Error::InvalidArguments);
        }
        if !opcode.is_control() {
            return Err(Error::InvalidOpcode);
        }
        if payload.len() > PAYLOAD_LEN_BASIC {
            return Err(Error::ControlTooBig);
        }

        let masked = self.role == Role::Client;
        out.payload_mut().clear();

        let size = payload.len() as u64;
        let header = BasicHeader::new(opcode, size, true, masked, false);
        let extended = if masked {
            let raw = self.rng.next_mask_key().to_ne_bytes();
            mask::mask_exact(payload, out.payload_mut(), mask::prepare_masking_key(raw));
            ExtendedHeader::new(size, Some(raw))
        } else {
            out.payload_mut().extend_from_slice(payload);
            ExtendedHeader::new(size, None)
        };

        out.set_header(frame::prepare_header(&header, &extended));
        out.set_opcode(opcode);
        out.set_fin(true);
        out.set_compressed(false);
        out.set_prepared(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Processor;

    fn wire(out: &MessageBuffer) -> Vec<u8> {
        let mut bytes = out.header().to_vec();
        bytes.extend_from_slice(out.payload());
        bytes
    }

    #[test]
    fn test_server_text_frame_unmasked() {
        let mut server = Processor::server();
        let input = MessageBuffer::from_payload(OpCode::Text, b"test");
        let mut out = MessageBuffer::new(OpCode::Text, 0);

        server.prepare_data_frame(&input, &mut out).unwrap();
        assert!(out.is_prepared());
        assert_eq!(wire(&out), [0x81, 0x04, b't', b'e', b's', b't']);
    }

    #[test]
    fn test_client_frame_masked_and_recoverable() {
        let mut client = Processor::client();
        let input = MessageBuffer::from_payload(OpCode::Binary, b"payload");
        let mut out = MessageBuffer::new(OpCode::Binary, 0);

        client.prepare_data_frame(&input, &mut out).unwrap();
        let bytes = wire(&out);
        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[1], 0x80 | 7);

        // Unmasking with the key from the header recovers the payload.
        let mut key = [0u8; 4];
        key.copy_from_slice(&bytes[2..6]);
        let mut payload = bytes[6..].to_vec();
        mask::mask_stream(&mut payload, mask::prepare_masking_key(key));
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_client_keys_are_fresh_per_frame() {
        let mut client = Processor::client();
        let input = MessageBuffer::from_payload(OpCode::Binary, b"x");

        let mut keys = Vec::new();
        for _ in 0..8 {
            let mut out = MessageBuffer::new(OpCode::Binary, 0);
            client.prepare_data_frame(&input, &mut out).unwrap();
            keys.push(out.header()[2..6].to_vec());
        }
        assert!(keys.iter().any(|k| k != &keys[0]));
    }

    #[test]
    fn test_extended_length_headers() {
        let mut server = Processor::server();

        let input = MessageBuffer::from_payload(OpCode::Binary, &vec![0u8; 300]);
        let mut out = MessageBuffer::new(OpCode::Binary, 0);
        server.prepare_data_frame(&input, &mut out).unwrap();
        assert_eq!(out.header(), [0x82, 126, 0x01, 0x2C]);

        let input = MessageBuffer::from_payload(OpCode::Binary, &vec![0u8; 70_000]);
        let mut out = MessageBuffer::new(OpCode::Binary, 0);
        server.prepare_data_frame(&input, &mut out).unwrap();
        let mut expected = vec![0x82, 127];
        expected.extend_from_slice(&70_000u64.to_be_bytes());
        assert_eq!(out.header(), &expected[..]);
    }

    #[test]
    fn test_data_frame_rejects_control_opcode() {
        let mut server = Processor::server();
        let input = MessageBuffer::from_payload(OpCode::Ping, b"x");
        let mut out = MessageBuffer::new(OpCode::Ping, 0);
        assert_eq!(
            server.prepare_data_frame(&input, &mut out),
            Err(Error::InvalidOpcode)
        );
        assert!(!out.is_prepared());
    }

    #[test]
    fn test_text_frame_rejects_invalid_utf8() {
        let mut server = Processor::server();
        let input = MessageBuffer::from_payload(OpCode::Text, &[0xFF, 0xFE]);
        let mut out = MessageBuffer::new(OpCode::Text, 0);
        assert_eq!(
            server.prepare_data_frame(&input, &mut out),
            Err(Error::InvalidPayload)
        );
        assert!(!out.is_prepared());
    }

    #[test]
    fn test_prepared_buffer_is_not_reused() {
        let mut server = Processor::server();
        let input = MessageBuffer::from_payload(OpCode::Text, b"x");
        let mut out = MessageBuffer::new(OpCode::Text, 0);
        server.prepare_data_frame(&input, &mut out).unwrap();
        assert_eq!(
            server.prepare_data_frame(&input, &mut out),
            Err(Error::InvalidArguments)
        );
    }

    #[test]
    fn test_ping_pong() {
        let mut server = Processor::server();
        let mut out = MessageBuffer::new(OpCode::Ping, 0);
        server.prepare_ping(&[0xAA, 0xBB], &mut out).unwrap();
        assert_eq!(wire(&out), [0x89, 0x02, 0xAA, 0xBB]);

        let mut out = MessageBuffer::new(OpCode::Pong, 0);
        server.prepare_pong(&[0xAA, 0xBB], &mut out).unwrap();
        assert_eq!(wire(&out), [0x8A, 0x02, 0xAA, 0xBB]);
    }

    #[test]
    fn test_control_payload_limit() {
        let mut server = Processor::server();
        let mut out = MessageBuffer::new(OpCode::Ping, 0);
        assert!(server.prepare_ping(&[0u8; 125], &mut out).is_ok());

        let mut out = MessageBuffer::new(OpCode::Ping, 0);
        assert_eq!(
            server.prepare_ping(&[0u8; 126], &mut out),
            Err(Error::ControlTooBig)
        );
    }

    #[test]
    fn test_close_with_reason() {
        let mut server = Processor::server();
        let mut out = MessageBuffer::new(OpCode::Close, 0);
        server.prepare_close(1000, "bye", &mut out).unwrap();
        assert_eq!(wire(&out), [0x88, 0x05, 0x03, 0xE8, 0x62, 0x79, 0x65]);
    }

    #[test]
    fn test_close_no_status() {
        let mut server = Processor::server();
        let mut out = MessageBuffer::new(OpCode::Close, 0);
        server.prepare_close(close::NO_STATUS, "", &mut out).unwrap();
        assert_eq!(wire(&out), [0x88, 0x00]);
    }

    #[test]
    fn test_close_code_validation() {
        let mut server = Processor::server();

        for reserved in [1004, 1006, 1015] {
            let mut out = MessageBuffer::new(OpCode::Close, 0);
            assert_eq!(
                server.prepare_close(reserved, "", &mut out),
                Err(Error::ReservedCloseCode),
                "code {} not rejected as reserved",
                reserved
            );
        }

        for invalid in [0u16, 999, 1100, 2999, 5000] {
            let mut out = MessageBuffer::new(OpCode::Close, 0);
            assert_eq!(
                server.prepare_close(invalid, "", &mut out),
                Err(Error::InvalidCloseCode(invalid))
            );
        }

        let mut out = MessageBuffer::new(OpCode::Close, 0);
        assert_eq!(
            server.prepare_close(close::NO_STATUS, "why", &mut out),
            Err(Error::ReasonRequiresCode)
        );

        let long_reason = "r".repeat(124);
        let mut out = MessageBuffer::new(OpCode::Close, 0);
        assert_eq!(
            server.prepare_close(1000, &long_reason, &mut out),
            Err(Error::ControlTooBig)
        );
    }

    #[cfg(feature = "permessage-deflate")]
    mod compressed {
        use super::*;
        use crate::deflate::{DeflateConfig, DeflateExtension};
        use crate::mask::OsMaskSource;
        use crate::message::HeapManager;
        use crate::processor::{Config, Role};
        use bytes::BytesMut;

        #[test]
        fn test_compressed_data_frame_round_trips() {
            let mut server = Processor::new(
                Role::Server,
                Config::default(),
                HeapManager::default(),
                DeflateExtension::server(DeflateConfig::default()),
                OsMaskSource,
            );
            server.compressor_mut().negotiate(&[]).unwrap();

            let text = "squeeze me squeeze me squeeze me squeeze me squeeze me";
            let mut input = MessageBuffer::from_payload(OpCode::Text, text.as_bytes());
            input.set_compressed(true);
            let mut out = MessageBuffer::new(OpCode::Text, 0);
            server.prepare_data_frame(&input, &mut out).unwrap();

            // RSV1 set, shorter than the input, and the header length
            // matches the compressed bytes.
            assert_eq!(out.header()[0], 0x81 | 0x40);
            assert!(out.payload().len() < text.len());
            assert_eq!(out.header()[1] as usize, out.payload().len());

            // A client-side inflater recovers the original.
            let mut client = DeflateExtension::client(DeflateConfig::default());
            client.activate();
            let mut inflated = BytesMut::new();
            client.decompress(out.payload(), &mut inflated).unwrap();
            client.finish_decompress(&mut inflated).unwrap();
            assert_eq!(&inflated[..], text.as_bytes());
        }

        #[test]
        fn test_control_frames_never_compressed() {
            let mut server = Processor::new(
                Role::Server,
                Config::default(),
                HeapManager::default(),
                DeflateExtension::server(DeflateConfig::default()),
                OsMaskSource,
            );
            server.compressor_mut().negotiate(&[]).unwrap();

            let mut out = MessageBuffer::new(OpCode::Ping, 0);
            server.prepare_ping(b"ping", &mut out).unwrap();
            // No RSV1; payload verbatim.
            assert_eq!(out.header()[0], 0x89);
            assert_eq!(out.payload(), b"ping");
        }
    }
}
