//! Reactor-style event manager for the dual-protocol front end.
//!
//! One poll loop owns the listener and every accepted socket: readiness events advance the
//! per-connection protocol state machine (HTTP classify → JSON-RPC / upgrade → WebSocket
//! framing), application callbacks fire through [`WebHandler`], and tasks queued from other
//! threads are pumped at the end of every cycle so that all socket writes stay on this thread.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bgate_common::config::WebSettings;
use bgate_common::error::{GateError, GateResult};
use bgate_common::ids::ConnectionId;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, ConnectionState, HandshakeProgress, SocketRead, SocketWrite};
use crate::frame::{self, FrameDecode, WebsocketFrame, WebsocketOp};
use crate::reply::{self, ProtocolStatus};
use crate::request::{self, HttpRequest, RequestProgress};
use crate::task::{IoTask, TaskQueue};
use crate::tls;

const LISTENER_TOKEN: Token = Token(0);
const CONNECTION_TOKEN_START: usize = 1;
const MAX_POLL_EVENTS: usize = 256;
const POLL_TIMEOUT: Duration = Duration::from_millis(10);
const MAXIMUM_INBOUND_FRAME_BYTES: usize = 1024 * 1024;
const MAXIMUM_CLOSE_STATUS_BYTES: usize = 125;

/// Events delivered to the application handler.
///
/// Returning `false` closes the connection, except for `Accepted` where `false` stops the
/// service from accepting further connections.
#[derive(Debug)]
pub enum WebEvent<'a> {
    /// A connection finished accept (and, when secure, its TLS handshake).
    Accepted,
    /// A complete JSON-RPC POST arrived; single-shot per request.
    JsonRpc(&'a HttpRequest),
    /// A complete, unmasked WebSocket text payload arrived.
    WebsocketFrame(&'a [u8]),
    /// A control frame arrived; close/ping handling already happened internally.
    WebsocketControlFrame(WebsocketOp),
    /// Raw bytes were read; mostly useful for accounting.
    Read(usize),
    /// The connection is going away after this callback.
    Closing,
    /// A protocol violation occurred on this connection.
    Error,
}

/// Application side of the event manager.
pub trait WebHandler {
    /// Handles one event for one connection on the I/O thread.
    fn handle_event(&mut self, connection: &mut Connection, event: WebEvent<'_>) -> bool;

    /// Runs once per poll cycle on the I/O thread; the hook used to pump completed backend
    /// responses into connections.
    fn after_poll(&mut self, connections: &mut Connections) {
        let _ = connections;
    }
}

/// Live connection table owned by the I/O thread.
#[derive(Debug, Default)]
pub struct Connections {
    inner: HashMap<Token, Connection>,
}

impl Connections {
    /// Resolves a connection id to its live connection, if still open.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.inner
            .get_mut(&Token(id.get() as usize))
            .filter(|connection| !connection.closed())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.inner.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn insert(&mut self, token: Token, connection: Connection) {
        let _ = self.inner.insert(token, connection);
    }

    fn take(&mut self, token: Token) -> Option<Connection> {
        self.inner.remove(&token)
    }

    fn tokens(&self) -> Vec<Token> {
        self.inner.keys().copied().collect()
    }
}

/// Cloneable cross-thread handle used to push work onto the I/O thread.
#[derive(Clone)]
pub struct ManagerHandle {
    tasks: TaskQueue<IoTask>,
    stop: Arc<AtomicBool>,
}

impl ManagerHandle {
    /// Queues one task for the next poll cycle.
    pub fn execute(&self, task: IoTask) {
        self.tasks.push(task);
    }

    /// Asynchronously sends `json` to one connection, framed per its protocol.
    pub fn send(&self, connection: ConnectionId, json: String) {
        self.execute(IoTask::Connection(
            connection,
            Box::new(move |connection| {
                let _ = connection.write_response(&json);
            }),
        ));
    }

    /// Asynchronously sends `json` to every connected client.
    pub fn broadcast(&self, json: String) {
        self.execute(IoTask::Broadcast(Box::new(move |connection| {
            let _ = connection.write_response(&json);
        })));
    }

    /// Signals the poll loop to drain and exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// The poll-loop engine owning the listener and every accepted connection.
pub struct WebManager {
    poll: Poll,
    events: Events,
    ready: Vec<(Token, bool, bool, bool)>,
    listener: TcpListener,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    connections: Connections,
    tasks: TaskQueue<IoTask>,
    stop: Arc<AtomicBool>,
    settings: WebSettings,
    next_token: usize,
    accepting: bool,
    default_page_data: String,
    dropped_total: u64,
}

impl WebManager {
    /// Binds the listen socket and loads TLS material when configured.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` when a configured `web_root` does not exist or the
    /// TLS pair is half-configured, `GateError::Tls` when the material fails to load, and
    /// `GateError::Io` when binding or poll registration fails.
    pub fn bind(settings: WebSettings) -> GateResult<Self> {
        if let Some(web_root) = settings.web_root.as_deref() {
            if !web_root.exists() {
                return Err(GateError::InvalidConfig(
                    "configured web_root path does not exist",
                ));
            }
        }
        let tls_config = tls::load_server_config(&settings)?;

        let poll =
            Poll::new().map_err(|error| GateError::Io(format!("create poll failed: {error}")))?;
        let mut listener = TcpListener::bind(settings.listen)
            .map_err(|error| GateError::Io(format!("bind web listener failed: {error}")))?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(|error| {
                GateError::Io(format!("register web listener in poll failed: {error}"))
            })?;

        info!(
            listen = %settings.listen,
            secure = tls_config.is_some(),
            "web service listening"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_POLL_EVENTS),
            ready: Vec::with_capacity(MAX_POLL_EVENTS),
            listener,
            tls_config,
            connections: Connections::default(),
            tasks: TaskQueue::new(),
            stop: Arc::new(AtomicBool::new(false)),
            settings,
            next_token: CONNECTION_TOKEN_START,
            accepting: true,
            default_page_data: String::new(),
            dropped_total: 0,
        })
    }

    /// Returns the bound listen address.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Io` when the local address cannot be queried.
    pub fn local_addr(&self) -> GateResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|error| GateError::Io(format!("query local address failed: {error}")))
    }

    /// Returns a cloneable handle for cross-thread sends and shutdown.
    #[must_use]
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            tasks: self.tasks.clone(),
            stop: Arc::clone(&self.stop),
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Settings this manager was bound with.
    #[must_use]
    pub fn settings(&self) -> &WebSettings {
        &self.settings
    }

    /// Messages dropped at the high-water mark across the lifetime of the service.
    #[must_use]
    pub fn dropped_messages_total(&self) -> u64 {
        self.dropped_total
            + self
                .connections
                .inner
                .values()
                .map(Connection::dropped_messages)
                .sum::<u64>()
    }

    /// Installs the in-memory page served for `GET /`.
    pub fn set_default_page_data(&mut self, data: &str) {
        self.default_page_data = data.to_owned();
    }

    /// Runs the poll loop until the stop handle fires, then drains every connection.
    ///
    /// # Errors
    ///
    /// Returns the first poll or registration error; per-connection faults never abort the
    /// running service.
    pub fn run<H: WebHandler>(&mut self, handler: &mut H) -> GateResult<()> {
        while !self.stop.load(Ordering::Acquire) {
            let _ = self.poll_once(handler, Some(POLL_TIMEOUT))?;
        }
        // Shutdown: pending writes are discarded, every connection closes.
        for token in self.connections.tokens() {
            if let Some(connection) = self.connections.take(token) {
                self.teardown(handler, connection);
            }
        }
        info!("web service stopped");
        Ok(())
    }

    /// Processes one readiness cycle: socket events, queued tasks, the after-poll hook, and
    /// the idle sweep.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Io` when polling or poll registration fails.
    pub fn poll_once<H: WebHandler>(
        &mut self,
        handler: &mut H,
        timeout: Option<Duration>,
    ) -> GateResult<usize> {
        self.poll
            .poll(&mut self.events, timeout)
            .map_err(|error| GateError::Io(format!("poll wait failed: {error}")))?;
        self.ready.clear();
        for event in self.events.iter() {
            self.ready.push((
                event.token(),
                event.is_readable(),
                event.is_writable(),
                event.is_read_closed() || event.is_write_closed() || event.is_error(),
            ));
        }

        let ready_count = self.ready.len();
        for index in 0..ready_count {
            let (token, readable, writable, closed_or_error) = self.ready[index];
            if token == LISTENER_TOKEN {
                self.accept_new_connections(handler)?;
                continue;
            }
            self.handle_connection_event(handler, token, readable, writable, closed_or_error)?;
        }

        self.run_tasks();
        handler.after_poll(&mut self.connections);
        self.flush_queued_writes(handler)?;
        self.enforce_idle_timeout(handler);

        Ok(ready_count)
    }

    fn accept_new_connections<H: WebHandler>(&mut self, handler: &mut H) -> GateResult<()> {
        loop {
            match self.listener.accept() {
                Ok((mut socket, peer)) => {
                    if !self.accepting {
                        continue;
                    }
                    let tls_session = match self.tls_config.as_ref() {
                        Some(config) => match rustls::ServerConnection::new(Arc::clone(config)) {
                            Ok(session) => Some(session),
                            Err(error) => {
                                warn!(%peer, %error, "tls session setup failed, dropping accept");
                                continue;
                            }
                        },
                        None => None,
                    };
                    let token = self.allocate_connection_token();
                    let _ = socket.set_nodelay(true);
                    self.poll
                        .registry()
                        .register(&mut socket, token, Interest::READABLE)
                        .map_err(|error| {
                            GateError::Io(format!(
                                "register accepted connection in poll failed: {error}"
                            ))
                        })?;
                    let mut connection = Connection::new(
                        ConnectionId::new(token.0 as u64),
                        socket,
                        peer,
                        tls_session,
                    );
                    debug!(
                        connection = %connection.id(),
                        %peer,
                        total = self.connections.len() + 1,
                        "client connection established"
                    );
                    // Secure connections announce themselves once the handshake completes.
                    if connection.state() == ConnectionState::Connected {
                        self.emit_accepted(handler, &mut connection);
                    }
                    self.connections.insert(token, connection);
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) => {
                    return Err(GateError::Io(format!("accept connection failed: {error}")));
                }
            }
        }
    }

    fn emit_accepted<H: WebHandler>(&mut self, handler: &mut H, connection: &mut Connection) {
        if !handler.handle_event(connection, WebEvent::Accepted) {
            self.stop_accepting();
        }
    }

    fn stop_accepting(&mut self) {
        if !self.accepting {
            return;
        }
        self.accepting = false;
        if let Err(error) = self.poll.registry().deregister(&mut self.listener) {
            warn!(%error, "deregister listener failed");
        }
        warn!("service no longer accepts connections");
    }

    fn handle_connection_event<H: WebHandler>(
        &mut self,
        handler: &mut H,
        token: Token,
        readable: bool,
        writable: bool,
        closed_or_error: bool,
    ) -> GateResult<()> {
        let Some(mut connection) = self.connections.take(token) else {
            return Ok(());
        };
        let mut keep = true;

        if connection.state() == ConnectionState::SslHandshake && (readable || writable) {
            match connection.progress_handshake() {
                HandshakeProgress::Complete => self.emit_accepted(handler, &mut connection),
                HandshakeProgress::InProgress => {}
                HandshakeProgress::Failed(reason) => {
                    debug!(connection = %connection.id(), %reason, "tls handshake failed");
                    keep = false;
                }
            }
        }

        if keep
            && readable
            && !connection.closing_after_flush
            && matches!(
                connection.state(),
                ConnectionState::Connected | ConnectionState::Websocket
            )
        {
            keep = self.service_readable(handler, &mut connection);
        }

        if keep && (writable || connection.wants_flush()) {
            match connection.flush() {
                SocketWrite::Drained | SocketWrite::WouldBlock => {}
                SocketWrite::Closed => keep = false,
                SocketWrite::Failed(reason) => {
                    debug!(connection = %connection.id(), %reason, "write failed");
                    keep = false;
                }
            }
            if connection.closing_after_flush && !connection.wants_flush() {
                keep = false;
            }
        }

        if keep && closed_or_error && !readable {
            keep = false;
        }

        if !keep {
            self.teardown(handler, connection);
            return Ok(());
        }
        self.refresh_connection_interest(token, &mut connection)?;
        self.connections.insert(token, connection);
        Ok(())
    }

    /// Reads until would-block, advancing the protocol state machine after every chunk.
    fn service_readable<H: WebHandler>(
        &mut self,
        handler: &mut H,
        connection: &mut Connection,
    ) -> bool {
        loop {
            match connection.read() {
                SocketRead::Bytes(read_length) => {
                    if !handler.handle_event(connection, WebEvent::Read(read_length)) {
                        return false;
                    }
                    let keep = match connection.state() {
                        ConnectionState::Connected => self.advance_http(handler, connection),
                        ConnectionState::Websocket => self.advance_websocket(handler, connection),
                        _ => true,
                    };
                    if !keep {
                        return false;
                    }
                    if connection.closing_after_flush {
                        return true;
                    }
                }
                SocketRead::WouldBlock => return true,
                SocketRead::Closed => return false,
                SocketRead::Failed(reason) => {
                    debug!(connection = %connection.id(), %reason, "read failed");
                    let _ = handler.handle_event(connection, WebEvent::Error);
                    return false;
                }
            }
        }
    }

    /// Advances a plain HTTP connection: classify complete requests into upgrade, JSON-RPC or
    /// static handling.
    fn advance_http<H: WebHandler>(
        &mut self,
        handler: &mut H,
        connection: &mut Connection,
    ) -> bool {
        loop {
            match request::probe(&connection.read_accumulator) {
                RequestProgress::Partial => return true,
                RequestProgress::Oversized => {
                    let _ = handler.handle_event(connection, WebEvent::Error);
                    return self.respond_and_close(connection, ProtocolStatus::BadRequest);
                }
                RequestProgress::Complete(total) => {
                    let raw: Vec<u8> = connection.read_accumulator.drain(..total).collect();
                    let parsed = match request::parse(&raw) {
                        Ok(parsed) => parsed,
                        Err(error) => {
                            debug!(connection = %connection.id(), %error, "bad http request");
                            let _ = handler.handle_event(connection, WebEvent::Error);
                            return self.respond_and_close(connection, ProtocolStatus::BadRequest);
                        }
                    };
                    if !self.dispatch_http_request(handler, connection, &parsed) {
                        return false;
                    }
                    if connection.closing_after_flush {
                        return true;
                    }
                    // An upgrade may leave an already-sent first frame in the accumulator.
                    if connection.state() == ConnectionState::Websocket {
                        return self.advance_websocket(handler, connection);
                    }
                }
            }
        }
    }

    fn dispatch_http_request<H: WebHandler>(
        &mut self,
        handler: &mut H,
        connection: &mut Connection,
        parsed: &HttpRequest,
    ) -> bool {
        // An upgrade request carrying a body still upgrades.
        if parsed.upgrade_request {
            return self.upgrade_connection(connection, parsed);
        }
        if parsed.json_rpc {
            connection.set_json_rpc(true);
            return handler.handle_event(connection, WebEvent::JsonRpc(parsed));
        }
        self.serve_static(connection, parsed);
        true
    }

    fn upgrade_connection(&mut self, connection: &mut Connection, parsed: &HttpRequest) -> bool {
        if let Some(origin) = parsed.header("origin") {
            let allowed = origin.is_empty()
                || self.settings.web_origins.is_empty()
                || self
                    .settings
                    .web_origins
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(origin));
            if !allowed {
                debug!(connection = %connection.id(), origin, "upgrade origin rejected");
                return self.respond_and_close(connection, ProtocolStatus::Forbidden);
            }
        }
        let Some(key) = parsed.header("sec-websocket-key") else {
            return self.respond_and_close(connection, ProtocolStatus::BadRequest);
        };

        let response = reply::generate_upgrade(&frame::key_response(key));
        // The handshake must land before the connection re-enters the poll set.
        match connection.unbuffered_write(response.as_bytes()) {
            Ok(_) => {
                connection.set_uri(&parsed.uri);
                connection.set_state(ConnectionState::Websocket);
                debug!(
                    connection = %connection.id(),
                    uri = connection.uri(),
                    "connection upgraded to websocket"
                );
                true
            }
            Err(error) => {
                debug!(connection = %connection.id(), %error, "upgrade response write failed");
                false
            }
        }
    }

    fn serve_static(&mut self, connection: &mut Connection, parsed: &HttpRequest) {
        if parsed.method == "get" {
            if parsed.uri == "/" && !self.default_page_data.is_empty() {
                let mut response = reply::generate(
                    ProtocolStatus::Ok,
                    "text/html",
                    self.default_page_data.len(),
                    false,
                );
                response.push_str(&self.default_page_data);
                let _ = connection.write(response.as_bytes());
            } else {
                let _ =
                    connection.write(reply::generate(ProtocolStatus::NotFound, "", 0, false).as_bytes());
            }
        } else {
            let _ =
                connection.write(reply::generate(ProtocolStatus::BadRequest, "", 0, false).as_bytes());
        }
    }

    /// Advances an upgraded connection: decode, unmask and dispatch buffered frames.
    fn advance_websocket<H: WebHandler>(
        &mut self,
        handler: &mut H,
        connection: &mut Connection,
    ) -> bool {
        loop {
            match frame::decode(&connection.read_accumulator) {
                FrameDecode::Incomplete => {
                    if connection.read_accumulator.len() > MAXIMUM_INBOUND_FRAME_BYTES {
                        let _ = handler.handle_event(connection, WebEvent::Error);
                        return false;
                    }
                    return true;
                }
                FrameDecode::Invalid => {
                    debug!(connection = %connection.id(), "invalid websocket frame");
                    let _ = handler.handle_event(connection, WebEvent::Error);
                    return false;
                }
                FrameDecode::Frame(decoded) => {
                    if decoded.data_length() > MAXIMUM_INBOUND_FRAME_BYTES {
                        let _ = handler.handle_event(connection, WebEvent::Error);
                        return false;
                    }
                    if connection.read_accumulator.len() < decoded.total_length() {
                        return true;
                    }
                    let payload = decoded.unmask(&connection.read_accumulator);
                    drop(connection.read_accumulator.drain(..decoded.total_length()));
                    if !self.dispatch_frame(handler, connection, decoded, &payload) {
                        return false;
                    }
                    if connection.closing_after_flush {
                        return true;
                    }
                }
            }
        }
    }

    fn dispatch_frame<H: WebHandler>(
        &mut self,
        handler: &mut H,
        connection: &mut Connection,
        decoded: WebsocketFrame,
        payload: &[u8],
    ) -> bool {
        match decoded.op_code() {
            Some(WebsocketOp::Text) if !decoded.fragment() => {
                handler.handle_event(connection, WebEvent::WebsocketFrame(payload))
            }
            Some(WebsocketOp::Close) => {
                // Echo the close status and shut down once it drains.
                let status = &payload[..payload.len().min(MAXIMUM_CLOSE_STATUS_BYTES)];
                let _ = connection.write_frame(WebsocketOp::Close, status);
                connection.closing_after_flush = true;
                let _ = handler.handle_event(
                    connection,
                    WebEvent::WebsocketControlFrame(WebsocketOp::Close),
                );
                true
            }
            Some(WebsocketOp::Ping) => {
                let _ = connection.write_frame(WebsocketOp::Pong, payload);
                handler.handle_event(
                    connection,
                    WebEvent::WebsocketControlFrame(WebsocketOp::Ping),
                )
            }
            Some(WebsocketOp::Pong) => handler.handle_event(
                connection,
                WebEvent::WebsocketControlFrame(WebsocketOp::Pong),
            ),
            // Binary payloads, fragmented data frames and reserved opcodes are not supported.
            other => {
                debug!(
                    connection = %connection.id(),
                    opcode = other.map_or("reserved", WebsocketOp::label),
                    "unsupported websocket frame"
                );
                let _ = handler.handle_event(connection, WebEvent::Error);
                false
            }
        }
    }

    /// Queues an error status and closes once it has drained to the peer.
    fn respond_and_close(&mut self, connection: &mut Connection, status: ProtocolStatus) -> bool {
        if !connection.websocket() {
            let _ = connection.write(reply::generate(status, "", 0, false).as_bytes());
        }
        connection.closing_after_flush = true;
        true
    }

    fn run_tasks(&mut self) {
        for task in self.tasks.drain() {
            match task {
                IoTask::Connection(id, action) => {
                    if let Some(connection) = self.connections.get_mut(id) {
                        action(connection);
                    } else {
                        trace!(connection = %id, "task dropped, connection is gone");
                    }
                }
                IoTask::Broadcast(action) => {
                    for connection in self.connections.iter_mut() {
                        if !connection.closed() {
                            action(connection);
                        }
                    }
                }
            }
        }
    }

    /// Flushes connections whose buffers were filled outside a writable event (tasks,
    /// after-poll responses) and re-registers interest for whatever remains.
    fn flush_queued_writes<H: WebHandler>(&mut self, handler: &mut H) -> GateResult<()> {
        for token in self.connections.tokens() {
            let Some(mut connection) = self.connections.take(token) else {
                continue;
            };
            let mut keep = true;
            if connection.wants_flush() {
                match connection.flush() {
                    SocketWrite::Drained | SocketWrite::WouldBlock => {}
                    SocketWrite::Closed => keep = false,
                    SocketWrite::Failed(reason) => {
                        debug!(connection = %connection.id(), %reason, "write failed");
                        keep = false;
                    }
                }
            }
            if connection.closing_after_flush && !connection.wants_flush() {
                keep = false;
            }
            if !keep {
                self.teardown(handler, connection);
                continue;
            }
            self.refresh_connection_interest(token, &mut connection)?;
            self.connections.insert(token, connection);
        }
        Ok(())
    }

    fn enforce_idle_timeout<H: WebHandler>(&mut self, handler: &mut H) {
        if self.settings.idle_timeout.is_zero() {
            return;
        }
        let now = Instant::now();
        for token in self.connections.tokens() {
            let idle = self
                .connections
                .inner
                .get(&token)
                .is_some_and(|connection| {
                    now.duration_since(connection.last_active()) > self.settings.idle_timeout
                });
            if idle {
                if let Some(connection) = self.connections.take(token) {
                    debug!(connection = %connection.id(), "idle timeout");
                    self.teardown(handler, connection);
                }
            }
        }
    }

    fn teardown<H: WebHandler>(&mut self, handler: &mut H, mut connection: Connection) {
        // One best-effort flush so a final error reply can still reach the peer.
        if connection.wants_flush() {
            let _ = connection.flush();
        }
        let _ = handler.handle_event(&mut connection, WebEvent::Closing);
        if let Err(error) = self.poll.registry().deregister(connection.socket_mut()) {
            trace!(connection = %connection.id(), %error, "deregister failed");
        }
        self.dropped_total += connection.dropped_messages();
        connection.close();
        debug!(
            connection = %connection.id(),
            remaining = self.connections.len(),
            "client disconnected"
        );
    }

    fn refresh_connection_interest(
        &self,
        token: Token,
        connection: &mut Connection,
    ) -> GateResult<()> {
        let mut next_interest = Interest::READABLE;
        if connection.wants_flush() {
            next_interest |= Interest::WRITABLE;
        }
        if next_interest == connection.interest {
            return Ok(());
        }
        self.poll
            .registry()
            .reregister(connection.socket_mut(), token, next_interest)
            .map_err(|error| {
                GateError::Io(format!("refresh connection poll interest failed: {error}"))
            })?;
        connection.interest = next_interest;
        Ok(())
    }

    fn allocate_connection_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.saturating_add(1);
        token
    }
}
