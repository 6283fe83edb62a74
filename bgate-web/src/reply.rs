//! HTTP reply builder: status lines, minimal response headers, upgrade response.

/// Response statuses used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    SwitchingProtocols,
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalServerError,
    ServiceUnavailable,
}

impl ProtocolStatus {
    /// Numeric status code.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::SwitchingProtocols => 101,
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::InternalServerError => 500,
            Self::ServiceUnavailable => 503,
        }
    }

    /// Canonical reason phrase.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::SwitchingProtocols => "Switching Protocols",
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::InternalServerError => "Internal Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// Builds a status line plus minimal headers for a reply body of `content_length` bytes.
///
/// An empty `mime_type` defaults to `application/json`.
#[must_use]
pub fn generate(
    status: ProtocolStatus,
    mime_type: &str,
    content_length: usize,
    keep_alive: bool,
) -> String {
    let mime = if mime_type.is_empty() {
        "application/json"
    } else {
        mime_type
    };
    let connection = if keep_alive { "keep-alive" } else { "close" };
    format!(
        "HTTP/1.1 {} {}\r\nConnection: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        status.code(),
        status.reason(),
        connection,
        mime,
        content_length
    )
}

/// Builds the 101 upgrade response carrying the handshake key digest.
#[must_use]
pub fn generate_upgrade(key_response: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {key_response}\r\n\r\n"
    )
}
