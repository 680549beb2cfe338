//! Serve loops: one broker connection per transport.
//!
//! stdio serves exactly one connection (EOF on stdin ends the process's
//! protocol life); the WebSocket listener accepts any number of
//! connections, each with its own adapter and session registry.

use crate::agent::adapter::AgentAdapter;
use crate::peer::PeerClient;
use crate::rpc::connection::Connection;
use crate::rpc::transport::{FrameSink, FrameSource, stdio_pair, ws_pair};
use broker_application::config::BrokerConfig;
use broker_application::ports::llm_gateway::LlmGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tracing::{info, warn};

/// Serve a single connection over stdio. Returns when the peer closes
/// stdin or asks for shutdown.
pub async fn serve_stdio(config: BrokerConfig, gateway: Arc<dyn LlmGateway>) {
    let (source, sink) = stdio_pair();
    run_connection(Box::new(source), Box::new(sink), config, gateway).await;
}

/// Serve WebSocket connections on `addr`, endpoint path `/ws`.
pub async fn serve_ws(
    addr: &str,
    config: BrokerConfig,
    gateway: Arc<dyn LlmGateway>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "listening for WebSocket connections on /ws");

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        let config = config.clone();
        let gateway = gateway.clone();

        tokio::spawn(async move {
            let check_path = |request: &Request, response: Response| {
                if request.uri().path() == "/ws" {
                    Ok(response)
                } else {
                    let mut not_found = ErrorResponse::new(Some("not found".to_string()));
                    *not_found.status_mut() =
                        tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
                    Err(not_found)
                }
            };

            match accept_hdr_async(socket, check_path).await {
                Ok(ws) => {
                    info!(peer = %peer_addr, "WebSocket connection established");
                    let (source, sink) = ws_pair(ws);
                    run_connection(Box::new(source), Box::new(sink), config, gateway).await;
                    info!(peer = %peer_addr, "WebSocket connection closed");
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
                }
            }
        });
    }
}

/// Wire one connection: transport, peer proxy, adapter, inbound loop.
async fn run_connection(
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    config: BrokerConfig,
    gateway: Arc<dyn LlmGateway>,
) {
    let conn = Connection::new(sink);
    let peer = Arc::new(PeerClient::new(conn.clone(), config.timeouts));
    let adapter = AgentAdapter::new(config, peer, gateway);
    conn.set_handler(adapter.clone());
    let shutdown = adapter.shutdown_token();

    tokio::select! {
        _ = conn.run(source) => {}
        _ = shutdown.cancelled() => {
            // The shutdown response is written by its dispatch task; give
            // it time to reach the wire before the transport drops.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}
