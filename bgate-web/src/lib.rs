//! Dual-protocol connection engine for `busgate-rs`.
//!
//! One I/O thread multiplexes every client socket with `mio::Poll`: plain HTTP requests carry
//! JSON-RPC posts, upgrade requests switch the connection into WebSocket framing, and replies
//! produced on other threads reach the sockets through a cross-thread task queue drained by the
//! same poll loop. TLS termination is optional and fully non-blocking.

pub mod buffer;
pub mod connection;
pub mod frame;
pub mod manager;
pub mod reply;
pub mod request;
pub mod task;
pub mod tls;

pub use connection::{Connection, ConnectionState};
pub use manager::{Connections, ManagerHandle, WebEvent, WebHandler, WebManager};
pub use task::{IoTask, TaskQueue};
