//! Backend bus contract and the loopback transport used by the binary and the tests.
//!
//! The real bus is an external collaborator; this module only fixes the seam: a send-side
//! trait, the reply record, and a cloneable reply queue that bus threads push into without
//! ever touching bridge or connection state.

use std::sync::mpsc;
use std::thread;

use bgate_common::error::{GateError, GateResult};
use bgate_common::ids::CorrelationId;
use bgate_web::TaskQueue;
use tracing::debug;

/// One encoded request travelling to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub command: String,
    pub correlation: CorrelationId,
    pub payload: Vec<u8>,
}

/// Send side of the backend bus.
pub trait BusTransport: Send {
    /// Hands one encoded request to the bus.
    ///
    /// # Errors
    ///
    /// Returns `GateError` when the transport cannot take the message; the caller reports an
    /// internal error to the requesting client and rolls its bookkeeping back.
    fn send(&self, message: BusMessage) -> GateResult<()>;
}

/// One reply arriving from the backend, still carrying the leading error-code word.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub sequence: CorrelationId,
    pub payload: Vec<u8>,
    pub command: String,
}

/// Cloneable reply-side handle.
///
/// The bus thread only ever touches this queue; the bridge drains it on the I/O thread every
/// poll cycle.
#[derive(Clone, Default)]
pub struct ResponseQueue {
    queue: TaskQueue<QueryResponse>,
}

impl ResponseQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one backend reply for delivery on the I/O thread.
    pub fn queue_response(&self, sequence: CorrelationId, payload: Vec<u8>, command: String) {
        self.queue.push(QueryResponse {
            sequence,
            payload,
            command,
        });
    }

    pub(crate) fn drain(&self) -> Vec<QueryResponse> {
        self.queue.drain()
    }
}

/// Echo transport: replies with the query payload and a zero error code from its own thread.
pub struct LoopbackBus {
    sender: mpsc::Sender<BusMessage>,
}

impl LoopbackBus {
    /// Starts the echo thread.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Io` when the thread cannot be spawned.
    pub fn start(responses: ResponseQueue) -> GateResult<Self> {
        let (sender, receiver) = mpsc::channel::<BusMessage>();
        thread::Builder::new()
            .name("bgate-bus".to_owned())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    debug!(
                        command = %message.command,
                        correlation = message.correlation,
                        "loopback bus echoing query"
                    );
                    let mut payload = Vec::with_capacity(4 + message.payload.len());
                    payload.extend_from_slice(&0_u32.to_le_bytes());
                    payload.extend_from_slice(&message.payload);
                    responses.queue_response(message.correlation, payload, message.command);
                }
            })
            .map_err(|error| GateError::Io(format!("spawn bus thread failed: {error}")))?;
        Ok(Self { sender })
    }
}

impl BusTransport for LoopbackBus {
    fn send(&self, message: BusMessage) -> GateResult<()> {
        self.sender
            .send(message)
            .map_err(|_| GateError::InvalidState("bus thread is unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::{BusMessage, BusTransport, LoopbackBus, ResponseQueue};
    use googletest::prelude::*;
    use rstest::rstest;
    use std::time::{Duration, Instant};

    #[rstest]
    fn loopback_bus_prepends_zero_error_code() {
        let responses = ResponseQueue::new();
        let bus = LoopbackBus::start(responses.clone()).expect("bus should start");
        bus.send(BusMessage {
            command: "ping".to_owned(),
            correlation: 3,
            payload: b"abc".to_vec(),
        })
        .expect("send should succeed");

        let deadline = Instant::now() + Duration::from_millis(500);
        let mut replies = Vec::new();
        while Instant::now() < deadline && replies.is_empty() {
            replies = responses.drain();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_that!(replies.len(), eq(1));
        assert_that!(replies[0].sequence, eq(3));
        assert_that!(replies[0].command, eq("ping"));
        assert_that!(replies[0].payload, eq(&b"\x00\x00\x00\x00abc".to_vec()));
    }
}
