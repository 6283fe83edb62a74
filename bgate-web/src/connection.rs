//! Per-socket connection state and buffered non-blocking I/O.
//!
//! A connection owns its socket, the bytes accumulated from it, and the bytes queued towards
//! it. All reads and writes run on the I/O thread; TLS sessions are driven through the same
//! non-blocking paths, with engine would-block treated exactly like an OS `EAGAIN`.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};

use bgate_common::error::{GateError, GateResult};
use bgate_common::ids::ConnectionId;
use mio::Interest;
use mio::net::TcpStream;
use tracing::{debug, trace};

use crate::buffer::WriteBuffer;
use crate::frame::{self, WebsocketOp};
use crate::reply::{self, ProtocolStatus};

/// Upper bound of one non-blocking receive.
pub const MAXIMUM_READ_LENGTH: usize = 1024;

/// Cap on buffered outbound bytes per connection; messages that would cross it are dropped.
pub const HIGH_WATER_MARK: usize = 2 * 1024 * 1024;

// Bounded backoff for the handshake-only unbuffered write path.
const SEND_RETRY_LIMIT: u32 = 8;
const SEND_RETRY_DELAY: Duration = Duration::from_micros(500);

/// Lifecycle states of a socket owned by the event manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed but not yet classified.
    Unknown,
    /// Accept socket; never enters the connection table.
    Listening,
    /// Plain HTTP exchange in progress.
    Connected,
    /// TLS handshake still completing.
    SslHandshake,
    /// Upgraded; payloads are framed.
    Websocket,
    /// Torn down; no further reads or writes occur.
    Closed,
}

/// Outcome of one non-blocking receive.
#[derive(Debug)]
pub(crate) enum SocketRead {
    Bytes(usize),
    WouldBlock,
    Closed,
    Failed(String),
}

/// Outcome of draining the write buffer.
#[derive(Debug)]
pub(crate) enum SocketWrite {
    Drained,
    WouldBlock,
    Closed,
    Failed(String),
}

/// Progress of a TLS handshake driven by readiness events.
#[derive(Debug)]
pub(crate) enum HandshakeProgress {
    InProgress,
    Complete,
    Failed(String),
}

/// One accepted client socket with its buffers and protocol flags.
pub struct Connection {
    id: ConnectionId,
    socket: TcpStream,
    peer: SocketAddr,
    state: ConnectionState,
    last_active: Instant,
    tls: Option<rustls::ServerConnection>,
    write_buffer: WriteBuffer,
    json_rpc: bool,
    uri: String,
    dropped_messages: u64,
    pub(crate) read_accumulator: Vec<u8>,
    pub(crate) interest: Interest,
    /// Set once a close frame is queued; the poll loop closes after the buffer drains.
    pub(crate) closing_after_flush: bool,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        socket: TcpStream,
        peer: SocketAddr,
        tls: Option<rustls::ServerConnection>,
    ) -> Self {
        let state = if tls.is_some() {
            ConnectionState::SslHandshake
        } else {
            ConnectionState::Connected
        };
        let mut tls = tls;
        if let Some(session) = tls.as_mut() {
            // Cap the engine's plaintext buffering alongside the connection's own high water.
            session.set_buffer_limit(Some(HIGH_WATER_MARK));
        }
        Self {
            id,
            socket,
            peer,
            state,
            last_active: Instant::now(),
            tls,
            write_buffer: WriteBuffer::new(),
            json_rpc: false,
            uri: String::new(),
            dropped_messages: 0,
            read_accumulator: Vec::new(),
            interest: Interest::READABLE,
            closing_after_flush: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// True once the connection has completed a WebSocket upgrade.
    #[must_use]
    pub fn websocket(&self) -> bool {
        self.state == ConnectionState::Websocket
    }

    #[must_use]
    pub fn json_rpc(&self) -> bool {
        self.json_rpc
    }

    pub(crate) fn set_json_rpc(&mut self, json_rpc: bool) {
        self.json_rpc = json_rpc;
    }

    /// URI requested during the upgrade handshake.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn set_uri(&mut self, uri: &str) {
        self.uri = uri.to_owned();
    }

    /// Messages dropped because the write buffer was at its high-water mark.
    #[must_use]
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages
    }

    #[must_use]
    pub fn buffered_write_bytes(&self) -> usize {
        self.write_buffer.len()
    }

    pub(crate) fn last_active(&self) -> Instant {
        self.last_active
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Performs one non-blocking receive of up to [`MAXIMUM_READ_LENGTH`] bytes into the
    /// connection's read accumulator.
    pub(crate) fn read(&mut self) -> SocketRead {
        if self.closed() {
            return SocketRead::Closed;
        }
        let mut chunk = [0_u8; MAXIMUM_READ_LENGTH];
        let outcome = if self.tls.is_some() {
            self.read_tls_bytes(&mut chunk)
        } else {
            match self.socket.read(&mut chunk) {
                Ok(0) => SocketRead::Closed,
                Ok(read_length) => {
                    self.read_accumulator.extend_from_slice(&chunk[..read_length]);
                    SocketRead::Bytes(read_length)
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => SocketRead::WouldBlock,
                Err(error) => SocketRead::Failed(error.to_string()),
            }
        };
        if matches!(outcome, SocketRead::Bytes(_)) {
            self.touch();
        }
        outcome
    }

    fn read_tls_bytes(&mut self, chunk: &mut [u8]) -> SocketRead {
        let Some(tls) = self.tls.as_mut() else {
            return SocketRead::Failed("tls session is absent".to_owned());
        };
        match tls.read_tls(&mut self.socket) {
            Ok(0) => return SocketRead::Closed,
            Ok(_) => {}
            // The engine may still hold decrypted bytes from an earlier record.
            Err(error) if error.kind() == ErrorKind::WouldBlock => {}
            Err(error) => return SocketRead::Failed(error.to_string()),
        }
        if let Err(error) = tls.process_new_packets() {
            // Flush any alert the engine queued before reporting failure.
            while tls.wants_write() {
                if tls.write_tls(&mut self.socket).is_err() {
                    break;
                }
            }
            return SocketRead::Failed(error.to_string());
        }
        match tls.reader().read(chunk) {
            Ok(0) => SocketRead::Closed,
            Ok(read_length) => {
                self.read_accumulator.extend_from_slice(&chunk[..read_length]);
                SocketRead::Bytes(read_length)
            }
            Err(error) if error.kind() == ErrorKind::WouldBlock => SocketRead::WouldBlock,
            Err(error) => SocketRead::Failed(error.to_string()),
        }
    }

    /// Appends `data` to the write buffer, framing it as a text message on WebSocket
    /// connections.
    ///
    /// When buffering `data` would push the connection past [`HIGH_WATER_MARK`] the message is
    /// silently dropped and counted; the nominal length is still returned. This trades
    /// at-most-once delivery on the slow path for a bounded memory footprint.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.websocket() {
            self.write_frame(WebsocketOp::Text, data)
        } else {
            self.write_raw(&[], data)
        }
    }

    /// Appends one framed message with the given opcode.
    pub(crate) fn write_frame(&mut self, code: WebsocketOp, data: &[u8]) -> usize {
        let header = frame::to_header(data.len(), code);
        self.write_raw(&header, data)
    }

    fn write_raw(&mut self, header: &[u8], data: &[u8]) -> usize {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Websocket
        ) {
            return 0;
        }
        let buffer_size = self.write_buffer.len() + header.len() + data.len();
        if buffer_size > HIGH_WATER_MARK {
            self.dropped_messages += 1;
            debug!(
                connection = %self.id,
                length = data.len(),
                dropped = self.dropped_messages,
                "high water exceeded, message dropped"
            );
            return data.len();
        }
        self.write_buffer.extend(header);
        self.write_buffer.extend(data);
        data.len()
    }

    /// Writes a reply the way the connection's protocol expects it: framed text for WebSocket,
    /// a full HTTP 200 with `Content-Length` for JSON-RPC, nothing for anything else.
    pub fn write_response(&mut self, json: &str) -> usize {
        if self.websocket() {
            self.write(json.as_bytes())
        } else if self.json_rpc {
            let mut response = reply::generate(ProtocolStatus::Ok, "", json.len(), false);
            response.push_str(json);
            self.write(response.as_bytes());
            json.len()
        } else {
            0
        }
    }

    /// Sends `data` immediately, bypassing the write buffer.
    ///
    /// Reserved for the upgrade handshake, which must land before the connection re-enters the
    /// poll set. Would-block is retried a bounded number of times with a short backoff; any
    /// remainder is handed to the write buffer for the poll loop to drain.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Io` on a hard socket error and `GateError::Protocol` when the peer
    /// closes mid-write.
    pub fn unbuffered_write(&mut self, data: &[u8]) -> GateResult<usize> {
        let mut position = 0;
        let mut retries = 0;
        while position < data.len() {
            match self.raw_send(&data[position..]) {
                Ok(0) => {
                    return Err(GateError::Protocol(
                        "peer closed during unbuffered write".to_owned(),
                    ));
                }
                Ok(sent) => {
                    position += sent;
                    retries = 0;
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    if retries >= SEND_RETRY_LIMIT {
                        self.write_buffer.extend(&data[position..]);
                        break;
                    }
                    retries += 1;
                    thread::sleep(SEND_RETRY_DELAY * retries);
                }
                Err(error) => {
                    return Err(GateError::Io(format!(
                        "unbuffered write of {} bytes failed: {error}",
                        data.len()
                    )));
                }
            }
        }
        self.touch();
        Ok(data.len())
    }

    fn raw_send(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self.tls.as_mut() {
            None => self.socket.write(data),
            Some(tls) => {
                let accepted = tls.writer().write(data)?;
                while tls.wants_write() {
                    match tls.write_tls(&mut self.socket) {
                        Ok(_) => {}
                        Err(error) if error.kind() == ErrorKind::WouldBlock => break,
                        Err(error) => return Err(error),
                    }
                }
                Ok(accepted)
            }
        }
    }

    /// True while there is anything left to push towards the socket.
    pub(crate) fn wants_flush(&self) -> bool {
        !self.write_buffer.is_empty() || self.tls.as_ref().is_some_and(|tls| tls.wants_write())
    }

    /// Drains the write buffer best-effort; short writes keep the remainder for the next
    /// readiness cycle.
    pub(crate) fn flush(&mut self) -> SocketWrite {
        loop {
            // Push any pending TLS records regardless of the plaintext queue.
            if let Some(tls) = self.tls.as_mut() {
                while tls.wants_write() {
                    match tls.write_tls(&mut self.socket) {
                        Ok(0) => return SocketWrite::Closed,
                        Ok(_) => {}
                        Err(error) if error.kind() == ErrorKind::WouldBlock => {
                            return SocketWrite::WouldBlock;
                        }
                        Err(error) => return SocketWrite::Failed(error.to_string()),
                    }
                }
            }
            if self.write_buffer.is_empty() {
                return SocketWrite::Drained;
            }

            match self.tls.as_mut() {
                None => match self.socket.write(self.write_buffer.first_chunk()) {
                    Ok(0) => return SocketWrite::Closed,
                    Ok(written) => {
                        self.write_buffer.consume(written);
                        self.touch();
                    }
                    Err(error) if error.kind() == ErrorKind::WouldBlock => {
                        return SocketWrite::WouldBlock;
                    }
                    Err(error) => return SocketWrite::Failed(error.to_string()),
                },
                Some(tls) => match tls.writer().write(self.write_buffer.first_chunk()) {
                    Ok(0) => return SocketWrite::WouldBlock,
                    Ok(accepted) => {
                        self.write_buffer.consume(accepted);
                        self.touch();
                    }
                    Err(error) if error.kind() == ErrorKind::WouldBlock => {
                        return SocketWrite::WouldBlock;
                    }
                    Err(error) => return SocketWrite::Failed(error.to_string()),
                },
            }
        }
    }

    /// Drives the TLS handshake forward from a readiness event.
    pub(crate) fn progress_handshake(&mut self) -> HandshakeProgress {
        let Some(tls) = self.tls.as_mut() else {
            return HandshakeProgress::Complete;
        };
        while tls.is_handshaking() {
            if tls.wants_write() {
                match tls.write_tls(&mut self.socket) {
                    Ok(_) => continue,
                    Err(error) if error.kind() == ErrorKind::WouldBlock => {
                        return HandshakeProgress::InProgress;
                    }
                    Err(error) => return HandshakeProgress::Failed(error.to_string()),
                }
            }
            match tls.read_tls(&mut self.socket) {
                Ok(0) => {
                    return HandshakeProgress::Failed("peer closed during handshake".to_owned());
                }
                Ok(_) => {
                    if let Err(error) = tls.process_new_packets() {
                        while tls.wants_write() {
                            if tls.write_tls(&mut self.socket).is_err() {
                                break;
                            }
                        }
                        return HandshakeProgress::Failed(error.to_string());
                    }
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    return HandshakeProgress::InProgress;
                }
                Err(error) => return HandshakeProgress::Failed(error.to_string()),
            }
        }
        self.state = ConnectionState::Connected;
        trace!(connection = %self.id, "tls handshake complete");
        HandshakeProgress::Complete
    }

    /// Closes the socket and frees the TLS session; idempotent.
    pub(crate) fn close(&mut self) {
        if self.closed() {
            return;
        }
        if let Some(tls) = self.tls.as_mut() {
            tls.send_close_notify();
            let _ = tls.write_tls(&mut self.socket);
        }
        self.tls = None;
        let _ = self.socket.shutdown(Shutdown::Both);
        self.write_buffer.clear();
        self.state = ConnectionState::Closed;
        debug!(connection = %self.id, peer = %self.peer, "closed socket");
    }

    pub(crate) fn socket_mut(&mut self) -> &mut TcpStream {
        &mut self.socket
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("json_rpc", &self.json_rpc)
            .field("buffered", &self.write_buffer.len())
            .field("dropped", &self.dropped_messages)
            .finish()
    }
}
