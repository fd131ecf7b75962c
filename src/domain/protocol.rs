// Wire protocol - JSON envelopes exchanged with viewers and the device
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::energy::EnergyProfile;
use super::history::HistorySeries;
use super::reading::{Mode, Reading};
use super::snapshot::Snapshot;

/// Viewer-bound messages, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Data {
        data: Snapshot,
    },
    Status {
        device_connected: bool,
        device_last_seen: Option<DateTime<Utc>>,
    },
    ModeChange {
        mode: Mode,
    },
    History {
        data: HistorySeries,
    },
}

/// Messages a dashboard may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ViewerRequest {
    #[serde(rename = "mode")]
    Mode { mode: Mode },
    #[serde(rename = "getHistory")]
    GetHistory,
}

/// Flat object sent by the sensor device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayload {
    pub voltage: f64,
    #[serde(alias = "passCount")]
    pub event_count: u64,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub estimated_runtime: Option<f64>,
}

impl DevicePayload {
    /// Fill in whatever the device left out from its voltage.
    pub fn into_reading(self, profile: &EnergyProfile) -> Reading {
        let energy = self
            .energy
            .unwrap_or_else(|| profile.stored_energy(self.voltage));
        let estimated_runtime = self
            .estimated_runtime
            .unwrap_or_else(|| profile.estimated_runtime(energy));
        Reading::new(self.voltage, self.event_count, energy, estimated_runtime, Mode::Live)
    }
}
