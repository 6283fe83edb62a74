//! Binary entrypoint for `bgate-server`.
//!
//! Runs the gateway against a loopback echo bus with a `ping` handler registered on both
//! transports; embedders replace the bus and registries with their own.

use bgate_common::config::WebSettings;
use bgate_common::error::{GateError, GateResult};
use bgate_common::ids::{ClientId, CorrelationId};
use bgate_server::bridge::{QueryBridge, QueryHandler};
use bgate_server::bus::{BusMessage, LoopbackBus, ResponseQueue};
use bgate_web::{Connection, WebManager};
use tracing_subscriber::EnvFilter;

const DEFAULT_PAGE: &str =
    "<!DOCTYPE html><html><head><title>busgate</title></head><body>busgate query gateway</body></html>";

const PING_HANDLER: QueryHandler = QueryHandler {
    command: "ping",
    encode: encode_ping,
    decode: decode_ping,
};

fn encode_ping(
    command: &str,
    parameters: &str,
    correlation: CorrelationId,
) -> GateResult<BusMessage> {
    Ok(BusMessage {
        command: command.to_owned(),
        correlation,
        payload: parameters.as_bytes().to_vec(),
    })
}

fn decode_ping(payload: &[u8], id: ClientId, connection: &mut Connection) {
    let body = serde_json::json!({
        "id": id,
        "result": String::from_utf8_lossy(payload),
    })
    .to_string();
    let _ = connection.write_response(&body);
}

fn run() -> GateResult<()> {
    let mut settings = WebSettings::default();
    if let Some(listen) = std::env::args().nth(1) {
        settings.listen = listen
            .parse()
            .map_err(|_| GateError::InvalidConfig("listen address must be <host>:<port>"))?;
    }

    let mut manager = WebManager::bind(settings)?;
    manager.set_default_page_data(DEFAULT_PAGE);

    let responses = ResponseQueue::new();
    let bus = LoopbackBus::start(responses.clone())?;
    let mut bridge = QueryBridge::new(Box::new(bus), manager.handle(), responses);
    bridge.register_handlers(
        vec![("ping", PING_HANDLER)],
        vec![("ping", PING_HANDLER)],
    );

    manager.run(&mut bridge)
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(error) = run() {
        eprintln!("failed to start bgate-server: {error}");
        std::process::exit(1);
    }
}
