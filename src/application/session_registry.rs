// Session registry - Who is connected, in which role
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Decided once when the connection is accepted and never re-derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Device,
    Viewer,
}

/// Connection-level facts available at upgrade time.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetadata {
    pub client_type: Option<String>,
    pub user_agent: Option<String>,
}

/// Marker a device declares to be told apart from dashboards.
#[derive(Debug, Clone)]
pub struct DeviceMarker {
    pub client_type: String,
    pub user_agent_token: String,
}

impl DeviceMarker {
    pub fn classify(&self, metadata: &ConnectionMetadata) -> ConnectionRole {
        let by_header = metadata
            .client_type
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(&self.client_type))
            .unwrap_or(false);
        let by_agent = !self.user_agent_token.is_empty()
            && metadata
                .user_agent
                .as_deref()
                .map(|ua| ua.contains(&self.user_agent_token))
                .unwrap_or(false);

        if by_header || by_agent {
            ConnectionRole::Device
        } else {
            ConnectionRole::Viewer
        }
    }
}

/// Sending half of a connection. Sends never wait: a full or closed queue is
/// reported and the message is dropped for that session only.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    role: ConnectionRole,
    outbound: mpsc::Sender<String>,
}

impl SessionHandle {
    pub fn new(id: SessionId, role: ConnectionRole, outbound: mpsc::Sender<String>) -> Self {
        Self { id, role, outbound }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn send(&self, payload: String) -> Result<(), RelayError> {
        self.outbound.try_send(payload).map_err(|e| RelayError::TransportFailure {
            session: self.id,
            reason: match e {
                TrySendError::Full(_) => "outbound queue full",
                TrySendError::Closed(_) => "connection closed",
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub handle: SessionHandle,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    device: Option<DeviceSession>,
    viewers: HashMap<SessionId, SessionHandle>,
    device_last_seen: Option<DateTime<Utc>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the device, returning whatever it displaced. The
    /// displaced connection is not closed here.
    pub fn register_device(&mut self, handle: SessionHandle, now: DateTime<Utc>) -> Option<DeviceSession> {
        self.device_last_seen = Some(now);
        self.device.replace(DeviceSession {
            handle,
            last_seen_at: now,
        })
    }

    pub fn register_viewer(&mut self, handle: SessionHandle) {
        self.viewers.insert(handle.id(), handle);
    }

    /// Remove `id` from whichever role it holds. A device that was already
    /// replaced no longer holds the role, so its late close is a no-op.
    pub fn unregister(&mut self, id: SessionId) -> Option<ConnectionRole> {
        if self.is_current_device(id) {
            self.device = None;
            return Some(ConnectionRole::Device);
        }
        self.viewers.remove(&id).map(|_| ConnectionRole::Viewer)
    }

    pub fn is_current_device(&self, id: SessionId) -> bool {
        self.device.as_ref().is_some_and(|d| d.handle.id() == id)
    }

    /// Record traffic from the device. Ignored for stale device sessions.
    pub fn touch_device(&mut self, id: SessionId, now: DateTime<Utc>) -> bool {
        match self.device.as_mut() {
            Some(device) if device.handle.id() == id => {
                device.last_seen_at = now;
                self.device_last_seen = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Drop the device if it has been silent for longer than `timeout`.
    pub fn expire_device(&mut self, now: DateTime<Utc>, timeout: TimeDelta) -> Option<DeviceSession> {
        let expired = self
            .device
            .as_ref()
            .is_some_and(|d| now - d.last_seen_at > timeout);
        if expired { self.device.take() } else { None }
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn device_connected(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.handle.is_open())
    }

    /// Last device traffic; survives the device going away.
    pub fn device_last_seen(&self) -> Option<DateTime<Utc>> {
        self.device_last_seen
    }

    pub fn viewers(&self) -> impl Iterator<Item = &SessionHandle> {
        self.viewers.values()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }
}
