// WebSocket transport utilities - Outbound pumping and inbound frame decoding
use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;

use crate::application::error::RelayError;

/// What the session loop should do with one inbound frame.
#[derive(Debug, PartialEq)]
pub enum InboundFrame {
    Text(String),
    /// Ping/pong; axum answers pings itself.
    Control,
    Close,
}

/// Classify a frame. Binary frames are accepted when they hold UTF-8 JSON.
pub fn decode_frame(message: Message) -> Result<InboundFrame, RelayError> {
    match message {
        Message::Text(text) => Ok(InboundFrame::Text(text)),
        Message::Binary(bytes) => String::from_utf8(bytes)
            .map(InboundFrame::Text)
            .map_err(|_| RelayError::UnsupportedFrame("binary frame is not UTF-8")),
        Message::Ping(_) | Message::Pong(_) => Ok(InboundFrame::Control),
        Message::Close(_) => Ok(InboundFrame::Close),
    }
}

/// Drain a session's outbound queue into the socket until either side goes away.
pub async fn pump_outbound<S>(mut rx: mpsc::Receiver<String>, mut sink: S)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(payload) = rx.recv().await {
        if let Err(e) = sink.send(Message::Text(payload)).await {
            tracing::debug!("Outbound socket closed: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}
