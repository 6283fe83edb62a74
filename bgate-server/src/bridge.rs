//! Two-level correlation bridge between web clients and the backend query bus.
//!
//! Each connection has its own client-id space, so ids passed from web clients are only unique
//! per connection. The bridge keeps an internal mapping that correlates every bus
//! request/response pair with the connection and original id that originated it; clients never
//! see the internal sequence number.

use std::collections::HashMap;

use bgate_common::error::GateResult;
use bgate_common::ids::{ClientId, ConnectionId, CorrelationId};
use bgate_web::reply::{self, ProtocolStatus};
use bgate_web::{Connection, Connections, ManagerHandle, WebEvent, WebHandler};
use tracing::{debug, error, trace, warn};

use crate::bus::{BusMessage, BusTransport, QueryResponse, ResponseQueue};
use crate::envelope::{self, QueryError, QueryRequest};

/// Encodes a command plus parameters into one bus message carrying the correlation id.
pub type EncodeFn = fn(&str, &str, CorrelationId) -> GateResult<BusMessage>;

/// Decodes a bus reply payload and writes the client response directly; the connection's
/// framing picks WebSocket text frame versus full HTTP response.
pub type DecodeFn = fn(&[u8], ClientId, &mut Connection);

/// The `(encode, decode)` pair registered for one method name.
#[derive(Clone, Copy)]
pub struct QueryHandler {
    pub command: &'static str,
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

/// Bookkeeping for one in-flight request on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryWork {
    id: ClientId,
    correlation_id: CorrelationId,
    connection: ConnectionId,
    command: String,
    parameters: String,
}

/// The bridge: handler registries, per-connection work maps, and the correlation map.
pub struct QueryBridge {
    handlers: HashMap<String, QueryHandler>,
    rpc_handlers: HashMap<String, QueryHandler>,
    work: HashMap<ConnectionId, HashMap<ClientId, QueryWork>>,
    correlations: HashMap<CorrelationId, (ConnectionId, ClientId)>,
    sequence: CorrelationId,
    responses: ResponseQueue,
    bus: Box<dyn BusTransport>,
    io: ManagerHandle,
}

impl QueryBridge {
    #[must_use]
    pub fn new(bus: Box<dyn BusTransport>, io: ManagerHandle, responses: ResponseQueue) -> Self {
        Self {
            handlers: HashMap::new(),
            rpc_handlers: HashMap::new(),
            work: HashMap::new(),
            correlations: HashMap::new(),
            sequence: 0,
            responses,
            bus,
            io,
        }
    }

    /// Populates both registries; called once before the service starts.
    pub fn register_handlers(
        &mut self,
        handlers: Vec<(&str, QueryHandler)>,
        rpc_handlers: Vec<(&str, QueryHandler)>,
    ) {
        for (method, handler) in handlers {
            let _ = self.handlers.insert(method.to_owned(), handler);
        }
        for (method, handler) in rpc_handlers {
            let _ = self.rpc_handlers.insert(method.to_owned(), handler);
        }
    }

    /// Reply-side handle for the backend thread.
    #[must_use]
    pub fn response_queue(&self) -> ResponseQueue {
        self.responses.clone()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.work.len()
    }

    /// Asynchronously pushes `json` to one client through the I/O thread.
    pub fn send(&self, connection: ConnectionId, json: String) {
        self.io.send(connection, json);
    }

    /// Asynchronously pushes `json` to every connected client through the I/O thread.
    pub fn broadcast(&self, json: String) {
        self.io.broadcast(json);
    }

    fn add_connection(&mut self, connection: ConnectionId) {
        debug_assert!(!self.work.contains_key(&connection));
        let _ = self.work.insert(connection, HashMap::new());
        debug!(
            %connection,
            total = self.work.len(),
            "client connection registered"
        );
    }

    /// Purges every correlation owned by this connection, then the connection itself.
    ///
    /// O(n) in the connection's outstanding queries; no global scan.
    fn remove_connection(&mut self, connection: ConnectionId) {
        let Some(work_map) = self.work.remove(&connection) else {
            return;
        };
        for work in work_map.values() {
            let _ = self.correlations.remove(&work.correlation_id);
        }
        debug!(
            %connection,
            remaining = self.work.len(),
            "client connection removed"
        );
    }

    /// Routes one inbound user request towards the backend bus.
    ///
    /// Every failure is reported to the requesting client directly; this method never fails
    /// upward.
    pub fn notify_query_work(
        &mut self,
        connection: &mut Connection,
        method: &str,
        id: ClientId,
        parameters: &str,
    ) {
        let rpc = connection.json_rpc();
        let registry = if rpc { &self.rpc_handlers } else { &self.handlers };

        // A request pointed at an endpoint whose registry was never loaded.
        if registry.is_empty() {
            debug!(method, "no handlers loaded, likely incorrect endpoint addressed");
            Self::request_error_reply(
                connection,
                ProtocolStatus::ServiceUnavailable,
                QueryError::InvalidRequest,
                id,
            );
            return;
        }

        let Some(handler) = registry.get(method).copied() else {
            debug!(method, rpc, "method not found");
            Self::request_error_reply(
                connection,
                ProtocolStatus::NotFound,
                QueryError::MethodNotFound,
                id,
            );
            return;
        };

        let connection_id = connection.id();
        let Some(work_map) = self.work.get_mut(&connection_id) else {
            error!(%connection_id, "query work provided for unknown connection");
            return;
        };
        if work_map.contains_key(&id) {
            Self::request_error_reply(
                connection,
                ProtocolStatus::InternalServerError,
                QueryError::InternalError,
                id,
            );
            return;
        }

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let _ = work_map.insert(
            id,
            QueryWork {
                id,
                correlation_id: sequence,
                connection: connection_id,
                command: method.to_owned(),
                parameters: parameters.to_owned(),
            },
        );
        let _ = self.correlations.insert(sequence, (connection_id, id));

        let message = match (handler.encode)(handler.command, parameters, sequence) {
            Ok(message) => message,
            Err(encode_error) => {
                warn!(
                    command = handler.command,
                    parameters,
                    %encode_error,
                    "encoding command failed"
                );
                self.rollback(connection_id, id, sequence);
                Self::request_error_reply(
                    connection,
                    ProtocolStatus::BadRequest,
                    QueryError::InvalidRequest,
                    id,
                );
                return;
            }
        };

        if let Err(send_error) = self.bus.send(message) {
            warn!(command = handler.command, %send_error, "bus send failed");
            self.rollback(connection_id, id, sequence);
            Self::request_error_reply(
                connection,
                ProtocolStatus::InternalServerError,
                QueryError::InternalError,
                id,
            );
        }
    }

    fn rollback(&mut self, connection: ConnectionId, id: ClientId, sequence: CorrelationId) {
        if let Some(work_map) = self.work.get_mut(&connection) {
            let _ = work_map.remove(&id);
        }
        let _ = self.correlations.remove(&sequence);
    }

    /// Delivers every queued backend reply; runs on the I/O thread once per poll cycle.
    pub fn send_query_responses(&mut self, connections: &mut Connections) {
        for response in self.responses.drain() {
            self.deliver_response(connections, response);
        }
    }

    fn deliver_response(&mut self, connections: &mut Connections, response: QueryResponse) {
        let Some(&(connection_id, client_id)) = self.correlations.get(&response.sequence) else {
            // Expected whenever the client disconnects before its reply arrives.
            debug!(
                sequence = response.sequence,
                "unmatched query response sequence"
            );
            return;
        };
        let _ = self.correlations.remove(&response.sequence);

        let Some(work_map) = self.work.get_mut(&connection_id) else {
            debug!(%connection_id, "query response for unknown connection");
            return;
        };
        let Some(work) = work_map.remove(&client_id) else {
            debug!(client_id, "unmatched query work id");
            return;
        };

        debug_assert_eq!(work.correlation_id, response.sequence);
        if work.correlation_id != response.sequence {
            error!(
                expected = work.correlation_id,
                received = response.sequence,
                "crossed correlation wires"
            );
        }

        let Some(connection) = connections.get_mut(connection_id) else {
            debug!(%connection_id, "connection gone before reply delivery");
            return;
        };
        let rpc = connection.json_rpc();

        let Some(code_bytes) = response.payload.get(..4) else {
            let body = if rpc {
                envelope::rpc_to_json(QueryError::InternalError, client_id)
            } else {
                envelope::to_json(QueryError::InternalError, client_id)
            };
            let _ = connection.write_response(&body);
            return;
        };
        let code = u32::from_le_bytes([code_bytes[0], code_bytes[1], code_bytes[2], code_bytes[3]]);
        if code != 0 {
            let _ = connection.write_response(&envelope::backend_error_json(code, client_id, rpc));
            return;
        }

        let registry = if rpc { &self.rpc_handlers } else { &self.handlers };
        let Some(handler) = registry.get(&work.command) else {
            let body = if rpc {
                envelope::rpc_to_json(QueryError::NotImplemented, client_id)
            } else {
                envelope::to_json(QueryError::NotImplemented, client_id)
            };
            let _ = connection.write_response(&body);
            return;
        };

        // The handler writes the framed response itself, on this thread.
        (handler.decode)(&response.payload[4..], client_id, connection);
    }

    fn request_error_reply(
        connection: &mut Connection,
        status: ProtocolStatus,
        query_error: QueryError,
        id: ClientId,
    ) {
        if connection.json_rpc() {
            let body = envelope::rpc_to_json(query_error, id);
            let mut response = reply::generate(status, "", body.len(), false);
            response.push_str(&body);
            let _ = connection.write(response.as_bytes());
        } else {
            let _ = connection.write(envelope::to_json(query_error, id).as_bytes());
        }
    }

    #[cfg(test)]
    fn outstanding_work(&self) -> usize {
        self.work.values().map(HashMap::len).sum()
    }

    #[cfg(test)]
    fn correlation_count(&self) -> usize {
        self.correlations.len()
    }
}

impl WebHandler for QueryBridge {
    fn handle_event(&mut self, connection: &mut Connection, event: WebEvent<'_>) -> bool {
        match event {
            WebEvent::Accepted => {
                self.add_connection(connection.id());
                true
            }
            WebEvent::JsonRpc(request) => {
                let Some(tree) = request.json_body.as_ref() else {
                    return false;
                };
                let Some(query) = QueryRequest::from_value(tree) else {
                    let _ = connection
                        .write(reply::generate(ProtocolStatus::BadRequest, "", 0, false).as_bytes());
                    return false;
                };
                if query.params.is_none() {
                    let _ = connection
                        .write(reply::generate(ProtocolStatus::BadRequest, "", 0, false).as_bytes());
                    return false;
                }
                let parameters = query.first_parameter();
                trace!(
                    method = %query.method,
                    parameters = %parameters,
                    id = query.id,
                    "json-rpc query"
                );
                self.notify_query_work(connection, &query.method, query.id, &parameters);
                true
            }
            WebEvent::WebsocketFrame(payload) => {
                let Ok(tree) = serde_json::from_slice::<serde_json::Value>(payload) else {
                    let _ = connection
                        .write(envelope::to_json(QueryError::InvalidRequest, 0).as_bytes());
                    return false;
                };
                let Some(query) = QueryRequest::from_value(&tree) else {
                    let _ = connection
                        .write(envelope::to_json(QueryError::InvalidRequest, 0).as_bytes());
                    return false;
                };
                if query.params.is_none() {
                    let _ = connection
                        .write(envelope::to_json(QueryError::InvalidRequest, query.id).as_bytes());
                    return false;
                }
                let parameters = query.first_parameter();
                trace!(
                    method = %query.method,
                    parameters = %parameters,
                    id = query.id,
                    "websocket query"
                );
                self.notify_query_work(connection, &query.method, query.id, &parameters);
                true
            }
            WebEvent::WebsocketControlFrame(op) => {
                trace!(connection = %connection.id(), opcode = op.label(), "control frame");
                true
            }
            WebEvent::Read(_) => true,
            WebEvent::Closing => {
                self.remove_connection(connection.id());
                true
            }
            WebEvent::Error => {
                debug!(connection = %connection.id(), "protocol error reported");
                true
            }
        }
    }

    fn after_poll(&mut self, connections: &mut Connections) {
        self.send_query_responses(connections);
    }
}
