//! Extension negotiation
//!
//! Parses the client's `Sec-WebSocket-Extensions` offer list and
//! delegates the one recognized extension (per-message compression) to a
//! pluggable implementation. A failed per-extension negotiation is soft:
//! the offer is dropped and the handshake continues without it.

use bytes::BytesMut;
use tracing::debug;

use crate::error::{Error, Result};

/// One `name[=value]` extension parameter
pub type ExtensionParam = (String, Option<String>);

/// A single offered extension with its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    pub name: String,
    pub params: Vec<ExtensionParam>,
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_.!#$%&'*+^`|~".contains(&b))
}

/// Parse a `Sec-WebSocket-Extensions` header value
///
/// Grammar: comma-separated offers, each a token followed by
/// `;`-separated parameters that are tokens or `token=value` pairs
/// (values may be quoted).
pub fn parse_extension_list(value: &str) -> Result<Vec<ExtensionOffer>> {
    let mut offers = Vec::new();

    for item in value.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let mut parts = item.split(';');
        let name = parts.next().unwrap_or("").trim();
        if !is_token(name) {
            return Err(Error::ExtensionParse);
        }

        let mut params = Vec::new();
        for part in parts {
            let part = part.trim();
            match part.split_once('=') {
                Some((key, val)) => {
                    let key = key.trim();
                    let val = val.trim().trim_matches('"');
                    if !is_token(key) || val.is_empty() {
                        return Err(Error::ExtensionParse);
                    }
                    params.push((key.to_string(), Some(val.to_string())));
                }
                None => {
                    if !is_token(part) {
                        return Err(Error::ExtensionParse);
                    }
                    params.push((part.to_string(), None));
                }
            }
        }

        offers.push(ExtensionOffer {
            name: name.to_string(),
            params,
        });
    }

    Ok(offers)
}

/// Per-message compression extension contract
///
/// `compress` and `decompress` append their output to the caller's
/// buffer so the processor can validate decompressed bytes in place.
/// `decompress` is fed each frame's chunks as they arrive;
/// `finish_decompress` is called once when a compressed message
/// completes, letting the implementation settle end-of-message wire
/// details (trailer, context reset) without the processor knowing them.
pub trait PermessageCompress {
    /// The extension token this implementation answers to in the offer
    fn name(&self) -> &'static str;

    /// Whether this connection has an implementation at all
    fn is_implemented(&self) -> bool;

    /// Whether negotiation succeeded and the extension is active
    fn is_enabled(&self) -> bool;

    /// Negotiate against the offered parameters; returns the response
    /// fragment for the `Sec-WebSocket-Extensions` header
    fn negotiate(&mut self, params: &[ExtensionParam]) -> Result<String>;

    /// Compress a whole message payload, appending to `out`
    fn compress(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()>;

    /// Decompress a chunk of a message, appending to `out`
    fn decompress(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()>;

    /// Finish decompressing a message, appending any trailing output
    fn finish_decompress(&mut self, out: &mut BytesMut) -> Result<()>;
}

/// Placeholder for connections without compression support
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCompress;

impl PermessageCompress for NullCompress {
    fn name(&self) -> &'static str {
        "permessage-deflate"
    }

    fn is_implemented(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn negotiate(&mut self, _params: &[ExtensionParam]) -> Result<String> {
        Err(Error::ExtensionsDisabled)
    }

    fn compress(&mut self, _input: &[u8], _out: &mut BytesMut) -> Result<()> {
        Err(Error::Compression("compression not negotiated".into()))
    }

    fn decompress(&mut self, _input: &[u8], _out: &mut BytesMut) -> Result<()> {
        Err(Error::Compression("compression not negotiated".into()))
    }

    fn finish_decompress(&mut self, _out: &mut BytesMut) -> Result<()> {
        Err(Error::Compression("compression not negotiated".into()))
    }
}

/// Negotiate the extensions offered by a handshake request
///
/// Returns the aggregated `Sec-WebSocket-Extensions` response value; an
/// empty string means the header should be omitted. With extension
/// support disabled the offer is not even parsed.
pub fn negotiate<C: PermessageCompress>(
    enabled: bool,
    header: Option<&str>,
    compressor: &mut C,
) -> Result<String> {
    if !enabled {
        return Err(Error::ExtensionsDisabled);
    }

    let Some(raw) = header else {
        return Ok(String::new());
    };
    let offers = parse_extension_list(raw)?;

    let mut response = String::new();

    if compressor.is_implemented() {
        if let Some(offer) = offers.iter().find(|o| o.name == compressor.name()) {
            match compressor.negotiate(&offer.params) {
                // Fragments would need comma separators if more than one
                // extension were ever recognized.
                Ok(fragment) => response.push_str(&fragment),
                Err(err) => {
                    debug!(%err, extension = compressor.name(), "dropping extension offer after failed negotiation");
                }
            }
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_offer() {
        let offers = parse_extension_list("permessage-deflate").unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].name, "permessage-deflate");
        assert!(offers[0].params.is_empty());
    }

    #[test]
    fn test_parse_params() {
        let offers = parse_extension_list(
            "permessage-deflate; client_max_window_bits; server_max_window_bits=10",
        )
        .unwrap();
        assert_eq!(offers[0].params.len(), 2);
        assert_eq!(offers[0].params[0], ("client_max_window_bits".into(), None));
        assert_eq!(
            offers[0].params[1],
            ("server_max_window_bits".into(), Some("10".into()))
        );
    }

    #[test]
    fn test_parse_multiple_offers_and_quoting() {
        let offers =
            parse_extension_list("permessage-deflate; server_max_window_bits=\"12\", x-webkit-deflate-frame")
                .unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(
            offers[0].params[0],
            ("server_max_window_bits".into(), Some("12".into()))
        );
        assert_eq!(offers[1].name, "x-webkit-deflate-frame");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            parse_extension_list("permessage-deflate; =10"),
            Err(Error::ExtensionParse)
        );
        assert_eq!(
            parse_extension_list("bad token here"),
            Err(Error::ExtensionParse)
        );
    }

    #[test]
    fn test_disabled_short_circuits() {
        let mut null = NullCompress;
        assert_eq!(
            negotiate(false, Some("permessage-deflate"), &mut null),
            Err(Error::ExtensionsDisabled)
        );
    }

    #[test]
    fn test_no_offer_yields_empty_response() {
        let mut null = NullCompress;
        assert_eq!(negotiate(true, None, &mut null).unwrap(), "");
        assert_eq!(
            negotiate(true, Some("x-unknown"), &mut null).unwrap(),
            ""
        );
    }

    #[test]
    fn test_unimplemented_extension_ignored() {
        // The offer names our extension but nothing is implemented.
        let mut null = NullCompress;
        assert_eq!(
            negotiate(true, Some("permessage-deflate"), &mut null).unwrap(),
            ""
        );
    }
}
