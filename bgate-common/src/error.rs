//! Shared error model for cross-crate APIs.

use thiserror::Error;

/// Unified result type used by all public interfaces in `busgate-rs`.
pub type GateResult<T> = Result<T, GateError>;

/// High-level error categories shared by the web engine and the bridge.
///
/// The variants stay intentionally broad: per-request failures are reported to the requesting
/// client as protocol replies, so this enum only carries the conditions that cross an API
/// boundary (startup validation, socket faults, TLS faults, malformed wire input).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Configuration is invalid for the requested operation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Runtime state does not allow this operation.
    #[error("invalid runtime state: {0}")]
    InvalidState(&'static str),

    /// Client wire payload is malformed or semantically invalid.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// TLS material failed to load or the TLS engine rejected a session.
    #[error("tls error: {0}")]
    Tls(String),

    /// Socket or filesystem I/O failed.
    #[error("io error: {0}")]
    Io(String),
}
