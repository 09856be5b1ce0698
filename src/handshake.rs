//! Opening handshake
//!
//! The engine does not parse HTTP itself; it consumes a request through
//! the small accessor contracts below and writes the upgrade headers
//! through the response contract. A concrete `httparse`-backed pair is
//! provided for callers that do not bring their own HTTP stack.

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::WS_GUID;
use crate::error::{Error, Result};
use crate::extension::{self, ExtensionOffer};

/// Maximum HTTP header size accepted by the bundled parser
const MAX_HEADER_SIZE: usize = 8192;

/// Value of the `Upgrade` response header
pub const UPGRADE_TOKEN: &str = "websocket";

/// Value of the `Connection` response header
pub const CONNECTION_TOKEN: &str = "Upgrade";

/// Read access to a parsed upgrade request
pub trait UpgradeRequest {
    fn method(&self) -> &str;
    fn http_version(&self) -> &str;
    /// Case-insensitive header lookup
    fn header(&self, name: &str) -> Option<&str>;
    fn uri(&self) -> &str;

    /// A header parsed as an extension offer list; empty when absent
    fn parameter_list(&self, name: &str) -> Result<Vec<ExtensionOffer>> {
        match self.header(name) {
            Some(value) => extension::parse_extension_list(value),
            None => Ok(Vec::new()),
        }
    }
}

/// Write access to the upgrade response under construction
pub trait UpgradeResponse {
    /// Set a header, removing any previous value
    fn replace_header(&mut self, name: &str, value: &str);
    /// Add a header, keeping previous values
    fn append_header(&mut self, name: &str, value: &str);
    /// Serialize the response for the transport
    fn raw(&self) -> String;
}

/// Compute the `Sec-WebSocket-Accept` value for a client key
///
/// Base64 of the SHA-1 digest (network byte order) of the key
/// concatenated with the handshake GUID. Pure: identical input yields a
/// byte-identical result.
#[inline]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Check that a request is a well-formed websocket upgrade
pub fn validate_handshake(request: &impl UpgradeRequest) -> Result<()> {
    if request.method() != "GET" {
        return Err(Error::InvalidHttpMethod);
    }
    if request.http_version() != "HTTP/1.1" {
        return Err(Error::InvalidHttpVersion);
    }
    match request.header("Sec-WebSocket-Key") {
        Some(key) if !key.is_empty() => Ok(()),
        _ => Err(Error::MissingRequiredHeader),
    }
}

/// Fill in the upgrade response headers for a validated request
pub fn process_handshake(
    request: &impl UpgradeRequest,
    response: &mut impl UpgradeResponse,
) -> Result<()> {
    let key = request
        .header("Sec-WebSocket-Key")
        .filter(|k| !k.is_empty())
        .ok_or(Error::MissingRequiredHeader)?;

    response.replace_header("Sec-WebSocket-Accept", &accept_key(key));
    response.append_header("Upgrade", UPGRADE_TOKEN);
    response.append_header("Connection", CONNECTION_TOKEN);
    Ok(())
}

/// Split a `Host` header value into host and optional port
///
/// The last `:` separates host and port unless it precedes a `]`, in
/// which case the value is an IPv6 literal without a port.
pub fn split_host_port(host: &str) -> (&str, Option<&str>) {
    let Some(colon) = host.rfind(':') else {
        return (host, None);
    };
    match host.rfind(']') {
        Some(bracket) if bracket > colon => (host, None),
        _ => (&host[..colon], Some(&host[colon + 1..])),
    }
}

/// An upgrade request parsed from raw bytes with `httparse`
#[derive(Debug)]
pub struct HttpRequest {
    method: String,
    version: String,
    uri: String,
    headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Parse a request head from a buffer
    ///
    /// Returns the request and the number of bytes consumed, or `None`
    /// when the head is not complete yet.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() > MAX_HEADER_SIZE {
            return Err(Error::InvalidHttp("request too large"));
        }

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(buf) {
            Ok(httparse::Status::Complete(len)) => {
                let method = req
                    .method
                    .ok_or(Error::InvalidHttp("missing method"))?
                    .to_string();
                let uri = req.path.unwrap_or("/").to_string();
                let version = match req.version {
                    Some(0) => "HTTP/1.0".to_string(),
                    Some(1) => "HTTP/1.1".to_string(),
                    _ => return Err(Error::InvalidHttp("unsupported HTTP version")),
                };

                let mut parsed = Vec::with_capacity(req.headers.len());
                for header in req.headers.iter() {
                    let value = std::str::from_utf8(header.value)
                        .map_err(|_| Error::InvalidHttp("invalid header value"))?;
                    parsed.push((header.name.to_string(), value.to_string()));
                }

                Ok(Some((
                    Self {
                        method,
                        version,
                        uri,
                        headers: parsed,
                    },
                    len,
                )))
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(_) => Err(Error::InvalidHttp("failed to parse HTTP request")),
        }
    }
}

impl UpgradeRequest for HttpRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn http_version(&self) -> &str {
        &self.version
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}

/// A `101 Switching Protocols` response under construction
#[derive(Debug, Default)]
pub struct HttpResponse {
    headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a header set on this response (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl UpgradeResponse for HttpResponse {
    fn replace_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn append_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn raw(&self) -> String {
        let mut out = String::from("HTTP/1.1 101 Switching Protocols\r\n");
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[test]
    fn test_accept_key_rfc_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accept_key_is_pure() {
        let key = "x3JJHMbDL1EzLkh9GBhXDw==";
        assert_eq!(accept_key(key), accept_key(key));
    }

    #[test]
    fn test_parse_and_validate() {
        let (req, consumed) = HttpRequest::parse(SAMPLE_REQUEST).unwrap().unwrap();
        assert_eq!(consumed, SAMPLE_REQUEST.len());
        assert_eq!(req.method(), "GET");
        assert_eq!(req.http_version(), "HTTP/1.1");
        assert_eq!(req.uri(), "/chat");
        assert_eq!(req.header("sec-websocket-key"), Some("dGhlIHNhbXBsZSBub25jZQ=="));
        validate_handshake(&req).unwrap();
    }

    #[test]
    fn test_parse_partial() {
        assert!(HttpRequest::parse(&SAMPLE_REQUEST[..20]).unwrap().is_none());
    }

    #[test]
    fn test_validate_rejections() {
        let post = b"POST /chat HTTP/1.1\r\nSec-WebSocket-Key: abc\r\n\r\n";
        let (req, _) = HttpRequest::parse(post).unwrap().unwrap();
        assert_eq!(validate_handshake(&req), Err(Error::InvalidHttpMethod));

        let old = b"GET /chat HTTP/1.0\r\nSec-WebSocket-Key: abc\r\n\r\n";
        let (req, _) = HttpRequest::parse(old).unwrap().unwrap();
        assert_eq!(validate_handshake(&req), Err(Error::InvalidHttpVersion));

        let keyless = b"GET /chat HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = HttpRequest::parse(keyless).unwrap().unwrap();
        assert_eq!(validate_handshake(&req), Err(Error::MissingRequiredHeader));
    }

    #[test]
    fn test_process_handshake_headers() {
        let (req, _) = HttpRequest::parse(SAMPLE_REQUEST).unwrap().unwrap();
        let mut resp = HttpResponse::new();
        process_handshake(&req, &mut resp).unwrap();

        assert_eq!(
            resp.header("Sec-WebSocket-Accept"),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
        assert_eq!(resp.header("Upgrade"), Some("websocket"));
        assert_eq!(resp.header("Connection"), Some("Upgrade"));

        let raw = resp.raw();
        assert!(raw.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(raw.ends_with("\r\n\r\n"));
        assert!(raw.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[test]
    fn test_replace_header_overwrites() {
        let mut resp = HttpResponse::new();
        resp.replace_header("Sec-WebSocket-Accept", "old");
        resp.replace_header("sec-websocket-accept", "new");
        assert_eq!(resp.header("Sec-WebSocket-Accept"), Some("new"));
        assert_eq!(resp.raw().matches("new").count(), 1);
    }

    #[test]
    fn test_parameter_list() {
        let request = b"GET / HTTP/1.1\r\n\
            Sec-WebSocket-Key: abc\r\n\
            Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n\
            \r\n";
        let (req, _) = HttpRequest::parse(request).unwrap().unwrap();

        let offers = req.parameter_list("Sec-WebSocket-Extensions").unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].name, "permessage-deflate");

        assert!(req.parameter_list("Sec-WebSocket-Protocol").unwrap().is_empty());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com"), ("example.com", None));
        assert_eq!(
            split_host_port("example.com:9001"),
            ("example.com", Some("9001"))
        );
        assert_eq!(split_host_port("[::1]"), ("[::1]", None));
        assert_eq!(split_host_port("[::1]:9001"), ("[::1]", Some("9001")));
        assert_eq!(split_host_port("[2001:db8::1]"), ("[2001:db8::1]", None));
    }
}
