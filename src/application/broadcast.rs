// Broadcast coordinator - Serialize once, deliver to every viewer
use crate::domain::protocol::ServerMessage;
use crate::domain::snapshot::Snapshot;

use super::error::RelayError;
use super::session_registry::{SessionHandle, SessionRegistry};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Viewers whose connection was already closed; left for the close path to remove.
    pub skipped: usize,
    pub failed: usize,
}

pub struct BroadcastCoordinator;

impl BroadcastCoordinator {
    pub fn broadcast_data(registry: &SessionRegistry, snapshot: Snapshot) -> Delivery {
        Self::broadcast(registry, &ServerMessage::Data { data: snapshot })
    }

    pub fn broadcast_status(registry: &SessionRegistry) -> Delivery {
        Self::broadcast(registry, &Self::status(registry))
    }

    pub fn status(registry: &SessionRegistry) -> ServerMessage {
        ServerMessage::Status {
            device_connected: registry.device_connected(),
            device_last_seen: registry.device_last_seen(),
        }
    }

    /// Deliver `message` to every open viewer. A failure on one viewer is
    /// logged and does not affect the rest.
    pub fn broadcast(registry: &SessionRegistry, message: &ServerMessage) -> Delivery {
        let mut delivery = Delivery::default();
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Dropping broadcast, encode failed: {}", e);
                return delivery;
            }
        };

        for viewer in registry.viewers() {
            if !viewer.is_open() {
                delivery.skipped += 1;
                continue;
            }
            match viewer.send(payload.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    tracing::warn!("{}", e);
                    delivery.failed += 1;
                }
            }
        }

        tracing::trace!(
            "Broadcast delivered={} skipped={} failed={}",
            delivery.delivered,
            delivery.skipped,
            delivery.failed
        );
        delivery
    }

    /// Send to one session only.
    pub fn send_to(session: &SessionHandle, message: &ServerMessage) -> Result<(), RelayError> {
        let payload = serde_json::to_string(message)?;
        session.send(payload)
    }
}
