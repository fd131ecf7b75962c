// HTTP and WebSocket handlers
use crate::application::relay_service::RelayService;
use crate::application::session_registry::{ConnectionMetadata, ConnectionRole};
use crate::infrastructure::ws_transport::{decode_frame, pump_outbound, InboundFrame};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap},
    response::IntoResponse,
};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Upgrade to a WebSocket; the role is decided here, once, from the headers.
pub async fn relay_socket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let metadata = connection_metadata(&headers);
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, addr, metadata, relay))
}

fn connection_metadata(headers: &HeaderMap) -> ConnectionMetadata {
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    ConnectionMetadata {
        client_type: text(header::HeaderName::from_static("x-client-type")),
        user_agent: text(header::USER_AGENT),
    }
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, metadata: ConnectionMetadata, relay: RelayService) {
    let (sink, mut stream) = socket.split();
    let (session, outbound) = relay.open_session(&metadata).await;
    let role = match session.role() {
        ConnectionRole::Device => "device",
        ConnectionRole::Viewer => "viewer",
    };
    tracing::info!("Session {} from {} classified as {}", session.id(), addr, role);

    let writer = tokio::spawn(pump_outbound(outbound, sink));

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Session {} socket error: {}", session.id(), e);
                break;
            }
        };
        match decode_frame(message) {
            Ok(InboundFrame::Text(text)) => {
                if let Err(e) = relay.handle_text(&session, &text).await {
                    tracing::warn!("{}", e);
                }
            }
            Ok(InboundFrame::Control) => {}
            Ok(InboundFrame::Close) => break,
            Err(e) => tracing::warn!("Session {}: {}", session.id(), e),
        }
    }

    relay.close_session(session.id()).await;
    // Dropping the last sender ends the writer once its queue is flushed.
    drop(session);
    let _ = writer.await;
}
