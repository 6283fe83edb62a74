//! Query error codes and the client-facing JSON envelopes.

use bgate_common::ids::ClientId;
use serde::Deserialize;
use serde_json::json;

/// Per-request error conditions reported back to the requesting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    InvalidRequest,
    MethodNotFound,
    InternalError,
    NotImplemented,
}

impl QueryError {
    /// Numeric code carried inside the error envelope.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InternalError => -32603,
            Self::NotImplemented => -32000,
        }
    }

    /// Stable error name carried as the envelope message.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::InvalidRequest => "http_invalid_request",
            Self::MethodNotFound => "http_method_not_found",
            Self::InternalError => "http_internal_error",
            Self::NotImplemented => "not_implemented",
        }
    }
}

/// Raw error envelope written to WebSocket clients.
#[must_use]
pub fn to_json(error: QueryError, id: ClientId) -> String {
    json!({
        "id": id,
        "error": { "code": error.code(), "message": error.name() },
    })
    .to_string()
}

/// JSON-RPC error envelope written to HTTP clients.
#[must_use]
pub fn rpc_to_json(error: QueryError, id: ClientId) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": error.code(), "message": error.name() },
    })
    .to_string()
}

/// Envelope for a non-zero error code reported by the backend itself.
#[must_use]
pub fn backend_error_json(code: u32, id: ClientId, rpc: bool) -> String {
    if rpc {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": "backend_error" },
        })
        .to_string()
    } else {
        json!({
            "id": id,
            "error": { "code": code, "message": "backend_error" },
        })
        .to_string()
    }
}

/// One decoded client query, identical in shape on both transports.
///
/// `id` and `method` fall back to defaults when absent; a missing `params` array is kept
/// observable because the caller must answer it with an invalid-request error.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub id: ClientId,
    #[serde(default)]
    pub method: String,
    pub params: Option<Vec<serde_json::Value>>,
}

impl QueryRequest {
    /// Decodes a query from a parsed JSON tree.
    #[must_use]
    pub fn from_value(tree: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(tree.clone()).ok()
    }

    /// First element of `params` as a string; only one parameter is consumed.
    #[must_use]
    pub fn first_parameter(&self) -> String {
        self.params
            .as_ref()
            .and_then(|params| params.first())
            .map(|value| match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    }
}
