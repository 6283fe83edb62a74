//! Canonical identifier types used across the web engine and the bridge.

use std::fmt;

/// Request identifier supplied by the client, unique only within one connection.
pub type ClientId = u32;

/// Process-wide monotonic identifier assigned per outbound backend request.
///
/// Clients never see this value; it only travels on the backend bus.
pub type CorrelationId = u32;

/// Strongly typed connection identifier to avoid passing raw poll tokens around public APIs.
///
/// Tasks queued from other threads carry a `ConnectionId` rather than any reference to the
/// connection itself; the I/O thread resolves the id against its live table and drops tasks
/// whose connection is already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection identifier from its raw poll-token value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionId;
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn connection_id_round_trips_raw_value() {
        let id = ConnectionId::new(7);
        assert_that!(id.get(), eq(7));
        assert_that!(format!("{id}"), eq("#7"));
    }
}
