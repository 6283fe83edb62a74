//! HTTP request parsing for the JSON-RPC and upgrade paths.
//!
//! The parser is deliberately narrow: one request per buffer, no chunked transfer, no
//! continuation lines. Classification happens here as well — a request is an upgrade when the
//! `connection` header mentions `upgrade` and a `sec-websocket-key` is present, and it is
//! JSON-RPC when a POST body parses as JSON.

use bgate_common::error::{GateError, GateResult};
use indexmap::IndexMap;

/// Largest accepted header block; anything longer is a protocol violation.
pub const MAX_HEADER_BLOCK_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const LINE_TERMINATOR: &str = "\r\n";
const WEBSOCKET_KEY_HEADER: &str = "sec-websocket-key";

/// One parsed client request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    /// Lowercased request method.
    pub method: String,
    /// Request target with any query suffix stripped.
    pub uri: String,
    /// Lowercased protocol token, e.g. `http/1.1`.
    pub protocol: String,
    /// Version number following the `/` in the protocol token.
    pub protocol_version: f64,
    /// Header map in arrival order; keys case-folded, values lowercased except the
    /// `sec-websocket-key` value, which stays case-sensitive.
    pub headers: IndexMap<String, String>,
    /// Query parameters from the request target, keys and values lowercased.
    pub parameters: IndexMap<String, String>,
    /// Decoded JSON body when the request classified as JSON-RPC.
    pub json_body: Option<serde_json::Value>,
    /// Total request length in bytes.
    pub message_length: usize,
    /// Parsed `content-length` header, zero when absent.
    pub content_length: usize,
    /// True when this request asks for a WebSocket upgrade.
    pub upgrade_request: bool,
    /// True when the POST body parsed as JSON.
    pub json_rpc: bool,
}

impl HttpRequest {
    /// Returns a header value by case-folded name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Completeness of a request accumulating in a connection read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestProgress {
    /// A whole request of this many bytes is buffered.
    Complete(usize),
    /// The header block or body is still in flight.
    Partial,
    /// The header block exceeded [`MAX_HEADER_BLOCK_BYTES`] without terminating.
    Oversized,
}

/// Probes whether `buffer` holds one complete request (header block plus declared body).
#[must_use]
pub fn probe(buffer: &[u8]) -> RequestProgress {
    let Some(terminator) = find_header_terminator(buffer) else {
        if buffer.len() > MAX_HEADER_BLOCK_BYTES {
            return RequestProgress::Oversized;
        }
        return RequestProgress::Partial;
    };
    if terminator > MAX_HEADER_BLOCK_BYTES {
        return RequestProgress::Oversized;
    }

    let header_block = String::from_utf8_lossy(&buffer[..terminator]);
    let content_length = header_block
        .split(LINE_TERMINATOR)
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| parse_auto_radix(value))
        .unwrap_or(0);

    let total = terminator + HEADER_TERMINATOR.len() + content_length;
    if buffer.len() >= total {
        RequestProgress::Complete(total)
    } else {
        RequestProgress::Partial
    }
}

/// Parses one complete request.
///
/// # Errors
///
/// Returns `GateError::Protocol` when the request line does not carry exactly three tokens,
/// when the bytes are not valid UTF-8, or when the declared body length exceeds the buffer.
pub fn parse(raw: &[u8]) -> GateResult<HttpRequest> {
    let text = std::str::from_utf8(raw)
        .map_err(|error| GateError::Protocol(format!("request is not valid utf-8: {error}")))?;

    let Some((request_line, remainder)) = text.split_once(LINE_TERMINATOR) else {
        return Err(GateError::Protocol(
            "request line is not terminated".to_owned(),
        ));
    };

    let mut out = HttpRequest {
        message_length: raw.len(),
        ..HttpRequest::default()
    };

    let elements: Vec<&str> = request_line.split_whitespace().collect();
    let [method, target, protocol] = elements.as_slice() else {
        return Err(GateError::Protocol(format!(
            "request line must carry three tokens, got {}",
            elements.len()
        )));
    };

    out.method = method.to_ascii_lowercase();
    out.protocol = protocol.to_ascii_lowercase();
    let (uri, query) = match target.split_once('?') {
        Some((uri, query)) => (uri, Some(query)),
        None => (*target, None),
    };
    out.uri = uri.to_owned();
    if let Some((_, version)) = out.protocol.split_once('/') {
        out.protocol_version = version.parse().unwrap_or(0.0);
    }

    let header_block = match remainder.split_once("\r\n\r\n") {
        Some((headers, _)) => headers,
        None => remainder,
    };
    for line in header_block.split(LINE_TERMINATOR) {
        if line.is_empty() {
            continue;
        }
        let Some((key, tail)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        // Values containing further colons are rejoined segment-wise, each segment trimmed.
        let value = tail
            .split(':')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(":");
        let value = if key == WEBSOCKET_KEY_HEADER {
            value
        } else {
            value.to_ascii_lowercase()
        };
        out.headers.insert(key, value);
    }

    if let Some(query) = query {
        for term in query.split('&') {
            if let Some((key, value)) = term.split_once('=') {
                out.parameters.insert(
                    key.trim().to_ascii_lowercase(),
                    value.trim().to_ascii_lowercase(),
                );
            }
        }
    }

    out.content_length = out
        .header("content-length")
        .and_then(parse_auto_radix)
        .unwrap_or(0);

    out.upgrade_request = out
        .header("connection")
        .is_some_and(|value| value.contains("upgrade"))
        && out.headers.contains_key(WEBSOCKET_KEY_HEADER);

    if out.method == "post" && out.content_length > 0 {
        if out.content_length > raw.len() {
            return Err(GateError::Protocol(format!(
                "declared content length {} exceeds request of {} bytes",
                out.content_length,
                raw.len()
            )));
        }
        let body = &raw[raw.len() - out.content_length..];
        if let Ok(tree) = serde_json::from_slice::<serde_json::Value>(body) {
            out.json_rpc = true;
            out.json_body = Some(tree);
        }
    }

    Ok(out)
}

fn find_header_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Unsigned parse with `strtoul`-style base auto-detection (`0x` hex, leading-zero octal).
fn parse_auto_radix(text: &str) -> Option<usize> {
    let trimmed = text.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        usize::from_str_radix(hex, 16).ok()
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        usize::from_str_radix(&trimmed[1..], 8).ok()
    } else {
        trimmed.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpRequest, RequestProgress, parse, probe};
    use googletest::prelude::*;
    use rstest::rstest;

    const UPGRADE_REQUEST: &str = "GET /query HTTP/1.1\r\n\
        Host: node.example:9071\r\n\
        Upgrade: WebSocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[rstest]
    fn upgrade_request_parses_and_classifies() {
        let request = parse(UPGRADE_REQUEST.as_bytes()).expect("upgrade request should parse");
        assert_that!(request.method, eq("get"));
        assert_that!(request.uri, eq("/query"));
        assert_that!(request.protocol, eq("http/1.1"));
        assert_that!(request.protocol_version, eq(1.1));
        assert_that!(request.upgrade_request, eq(true));
        assert_that!(request.json_rpc, eq(false));
        // Key value stays case-sensitive while other values fold.
        assert_that!(
            request.header("sec-websocket-key"),
            eq(Some("dGhlIHNhbXBsZSBub25jZQ=="))
        );
        assert_that!(request.header("upgrade"), eq(Some("websocket")));
    }

    #[rstest]
    fn header_value_with_colons_is_rejoined() {
        let request = parse(UPGRADE_REQUEST.as_bytes()).expect("upgrade request should parse");
        assert_that!(request.header("host"), eq(Some("node.example:9071")));
    }

    #[rstest]
    fn json_rpc_post_parses_body() {
        let body = r#"{"id":7,"method":"ping","params":["x"]}"#;
        let raw = format!(
            "POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let request = parse(raw.as_bytes()).expect("post should parse");
        assert_that!(request.json_rpc, eq(true));
        assert_that!(request.upgrade_request, eq(false));
        assert_that!(request.content_length, eq(body.len()));
        let tree = request.json_body.expect("body tree should be present");
        assert_that!(tree["id"].as_u64(), eq(Some(7)));
        assert_that!(tree["method"].as_str(), eq(Some("ping")));
    }

    #[rstest]
    fn post_without_content_is_not_json_rpc() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
        let request = parse(raw).expect("empty post should parse");
        assert_that!(request.json_rpc, eq(false));
        assert_that!(request.json_body.is_none(), eq(true));
    }

    #[rstest]
    fn query_parameters_split_and_fold() {
        let raw = b"GET /page?Height=10&FORMAT=Json HTTP/1.1\r\n\r\n";
        let request = parse(raw).expect("request should parse");
        assert_that!(request.uri, eq("/page"));
        assert_that!(request.parameters.get("height"), eq(Some(&"10".to_owned())));
        assert_that!(request.parameters.get("format"), eq(Some(&"json".to_owned())));
    }

    #[rstest]
    fn hex_content_length_is_accepted() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 0x10\r\n\r\n0123456789abcdef";
        let request = parse(raw).expect("request should parse");
        assert_that!(request.content_length, eq(16));
    }

    #[rstest]
    #[case(b"GET".as_slice())]
    #[case(b"GET /\r\n\r\n".as_slice())]
    #[case(b"GET / HTTP/1.1 EXTRA\r\n\r\n".as_slice())]
    fn malformed_request_line_fails(#[case] raw: &[u8]) {
        assert_that!(parse(raw).is_err(), eq(true));
    }

    #[rstest]
    fn probe_tracks_header_and_body_completion() {
        let body = r#"{"id":1}"#;
        let raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}", body.len());
        let bytes = raw.as_bytes();

        assert_that!(probe(&bytes[..10]), eq(RequestProgress::Partial));
        assert_that!(
            probe(&bytes[..bytes.len() - 2]),
            eq(RequestProgress::Partial)
        );
        assert_that!(probe(bytes), eq(RequestProgress::Complete(bytes.len())));
    }

    #[rstest]
    fn probe_rejects_unterminated_header_block() {
        let endless = vec![b'a'; super::MAX_HEADER_BLOCK_BYTES + 1];
        assert_that!(probe(&endless), eq(RequestProgress::Oversized));
    }

    #[rstest]
    fn reconstructed_request_preserves_structure() {
        let original = parse(UPGRADE_REQUEST.as_bytes()).expect("request should parse");
        let mut rebuilt = format!(
            "{} {} {}\r\n",
            original.method.to_ascii_uppercase(),
            original.uri,
            original.protocol.to_ascii_uppercase()
        );
        for (key, value) in &original.headers {
            rebuilt.push_str(&format!("{key}: {value}\r\n"));
        }
        rebuilt.push_str("\r\n");

        let reparsed = parse(rebuilt.as_bytes()).expect("rebuilt request should parse");
        assert_that!(reparsed.method, eq(&original.method));
        assert_that!(reparsed.uri, eq(&original.uri));
        assert_that!(reparsed.protocol, eq(&original.protocol));
        assert_that!(reparsed.headers, eq(&original.headers));
        assert_that!(reparsed.upgrade_request, eq(true));
    }

    #[rstest]
    fn default_request_is_inert() {
        let request = HttpRequest::default();
        assert_that!(request.upgrade_request, eq(false));
        assert_that!(request.json_rpc, eq(false));
        assert_that!(request.content_length, eq(0));
    }
}
