//! Dual-protocol web front-end for a backend request/response query bus.
//!
//! The bridge correlates client requests (JSON-RPC over HTTP POST, or JSON frames over
//! WebSocket) with bus exchanges, the service wrapper owns the I/O thread, and the bus module
//! fixes the backend seam. Embedders register their own `(encode, decode)` handler pairs and
//! plug in a real transport; the loopback bus exists for the demo binary and the tests.

pub mod bridge;
pub mod bus;
pub mod envelope;
pub mod service;
