// System state - The single owner of every piece of mutable relay state
use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::energy::EnergyProfile;
use crate::domain::history::{HistoryBuffer, HistoryPoint};
use crate::domain::metrics::{AggregateStats, MetricsEngine};
use crate::domain::mode::{ModeController, ModeEffect};
use crate::domain::protocol::{DevicePayload, ServerMessage, ViewerRequest};
use crate::domain::reading::{Mode, Reading};
use crate::domain::snapshot::Snapshot;
use crate::infrastructure::config::RelayConfig;

use super::broadcast::BroadcastCoordinator;
use super::demo_generator::DemoGenerator;
use super::error::RelayError;
use super::session_registry::{ConnectionRole, SessionHandle, SessionId, SessionRegistry};

/// Statistics, both history buffers, the mode and the session registry. Every
/// method runs to completion before the next event is handled; callers
/// serialize access (see `RelayService`).
#[derive(Debug)]
pub struct SystemState {
    engine: MetricsEngine,
    profile: EnergyProfile,
    liveness_timeout: TimeDelta,
    stats: AggregateStats,
    latest: Reading,
    short: HistoryBuffer,
    long: HistoryBuffer,
    mode: ModeController,
    sessions: SessionRegistry,
    generator: DemoGenerator,
}

impl SystemState {
    pub fn new(config: &RelayConfig, now: DateTime<Utc>) -> Self {
        let generator = DemoGenerator::new(config.demo.clone(), config.energy.profile());
        Self::with_generator(config, generator, now)
    }

    pub fn with_generator(config: &RelayConfig, generator: DemoGenerator, now: DateTime<Utc>) -> Self {
        let history = &config.history;
        Self {
            engine: MetricsEngine::new(config.battery.spec().energy_capacity_joules()),
            profile: config.energy.profile(),
            liveness_timeout: config.device.liveness_timeout(),
            stats: AggregateStats::new(now),
            latest: generator.last().clone(),
            short: HistoryBuffer::rolling(history.short_capacity),
            long: HistoryBuffer::gated(history.long_capacity, history.long_interval()),
            mode: ModeController::new(),
            sessions: SessionRegistry::new(),
            generator,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode.mode()
    }

    #[cfg(test)]
    pub fn stats(&self) -> &AggregateStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn latest(&self) -> &Reading {
        &self.latest
    }

    #[cfg(test)]
    pub fn short_history(&self) -> &HistoryBuffer {
        &self.short
    }

    #[cfg(test)]
    pub fn long_history(&self) -> &HistoryBuffer {
        &self.long
    }

    #[cfg(test)]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.latest, &self.stats, &self.short)
    }

    pub fn history_message(&self) -> ServerMessage {
        ServerMessage::History {
            data: self.long.history_series(),
        }
    }

    /// Register a freshly accepted connection under the role it was classified with.
    pub fn connect(&mut self, session: SessionHandle, now: DateTime<Utc>) {
        match session.role() {
            ConnectionRole::Device => {
                let id = session.id();
                if let Some(displaced) = self.sessions.register_device(session, now) {
                    tracing::warn!(
                        "Device {} replaces stale device {}",
                        id,
                        displaced.handle.id()
                    );
                } else {
                    tracing::info!("Device {} connected", id);
                }
                let effect = self.mode.device_registered();
                self.apply_effect(effect, now);
                BroadcastCoordinator::broadcast_status(&self.sessions);
            }
            ConnectionRole::Viewer => {
                tracing::info!("Viewer {} connected", session.id());
                self.welcome(&session);
                self.sessions.register_viewer(session);
            }
        }
    }

    /// Close or error on a connection. Safe to call more than once.
    pub fn disconnect(&mut self, id: SessionId, now: DateTime<Utc>) {
        match self.sessions.unregister(id) {
            Some(ConnectionRole::Device) => {
                tracing::info!("Device {} disconnected", id);
                self.device_lost(now);
            }
            Some(ConnectionRole::Viewer) => {
                tracing::info!(
                    "Viewer {} disconnected ({} remaining)",
                    id,
                    self.sessions.viewer_count()
                );
            }
            None => tracing::debug!("Session {} already unregistered", id),
        }
    }

    /// Route one text frame from `session`. Malformed payloads are reported to
    /// the caller; the connection stays open either way.
    pub fn handle_message(
        &mut self,
        session: &SessionHandle,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        let malformed = |source| RelayError::MalformedMessage {
            session: session.id(),
            source,
        };
        match session.role() {
            ConnectionRole::Device => {
                let payload: DevicePayload = serde_json::from_str(text).map_err(malformed)?;
                self.device_reading(session.id(), payload, now);
                Ok(())
            }
            ConnectionRole::Viewer => {
                let request: ViewerRequest = serde_json::from_str(text).map_err(malformed)?;
                self.viewer_request(session, request, now)
            }
        }
    }

    fn device_reading(&mut self, id: SessionId, payload: DevicePayload, now: DateTime<Utc>) {
        if !self.sessions.touch_device(id, now) {
            tracing::debug!("Ignoring reading from stale device {}", id);
            return;
        }
        if !self.mode.is_live() {
            // A viewer switched to demo while the device is attached.
            tracing::debug!("Device {} reading not relayed, demo mode requested", id);
            return;
        }

        let reading = payload.into_reading(&self.profile);
        tracing::debug!(
            "Device reading: voltage={} events={} energy={}",
            reading.voltage,
            reading.event_count,
            reading.energy
        );
        self.ingest(reading, now);
        BroadcastCoordinator::broadcast_data(&self.sessions, self.snapshot());
    }

    fn viewer_request(
        &mut self,
        session: &SessionHandle,
        request: ViewerRequest,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        match request {
            ViewerRequest::Mode { mode } => self.request_mode(session, mode, now),
            ViewerRequest::GetHistory => BroadcastCoordinator::send_to(session, &self.history_message()),
        }
    }

    /// Viewer-initiated mode switch. The requester always gets a
    /// `mode_change`; after a reset it also gets the cleared snapshot.
    pub fn request_mode(
        &mut self,
        session: &SessionHandle,
        requested: Mode,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        tracing::info!("Viewer {} requested {} mode", session.id(), requested);
        let effect = self
            .mode
            .viewer_requested(requested, self.sessions.has_device());
        self.apply_effect(effect, now);

        BroadcastCoordinator::send_to(session, &ServerMessage::ModeChange { mode: self.mode() })?;
        if effect == ModeEffect::FullReset {
            BroadcastCoordinator::send_to(session, &ServerMessage::Data { data: self.snapshot() })?;
        }
        Ok(())
    }

    /// One demo-timer period. Does nothing unless in demo mode.
    pub fn demo_tick(&mut self, now: DateTime<Utc>) -> bool {
        if self.mode.is_live() {
            return false;
        }
        let reading = self.generator.next_reading();
        tracing::debug!(
            "Demo reading: voltage={:.2} events={} energy={:.4}",
            reading.voltage,
            reading.event_count,
            reading.energy
        );
        self.ingest(reading, now);
        BroadcastCoordinator::broadcast_data(&self.sessions, self.snapshot());
        true
    }

    /// Liveness sweep: a device silent for longer than the timeout is treated
    /// as disconnected. Returns whether one was dropped.
    pub fn sweep_liveness(&mut self, now: DateTime<Utc>) -> bool {
        match self.sessions.expire_device(now, self.liveness_timeout) {
            Some(expired) => {
                tracing::warn!(
                    "Device {} timed out, last seen {}",
                    expired.handle.id(),
                    expired.last_seen_at
                );
                self.device_lost(now);
                true
            }
            None => false,
        }
    }

    fn device_lost(&mut self, now: DateTime<Utc>) {
        let effect = self.mode.device_lost();
        self.apply_effect(effect, now);
        BroadcastCoordinator::broadcast_status(&self.sessions);
    }

    fn apply_effect(&mut self, effect: ModeEffect, now: DateTime<Utc>) {
        match effect {
            ModeEffect::None => {}
            ModeEffect::ClearEnergy => {
                self.stats.clear_energy();
                self.latest.energy = 0.0;
            }
            ModeEffect::FullReset => {
                self.stats = AggregateStats::new(now);
                self.latest = Reading::zeroed(Mode::Live);
                self.short.clear();
                self.long.clear();
            }
        }
        self.latest.mode = self.mode.mode();
    }

    /// Metrics engine, then both history buffers.
    fn ingest(&mut self, reading: Reading, now: DateTime<Utc>) {
        self.stats = self
            .engine
            .apply_reading(&self.stats, self.latest.energy, &reading, now);

        let point = HistoryPoint {
            timestamp: now,
            voltage: reading.voltage,
            energy: reading.energy,
            power: self.stats.power,
            event_count: reading.event_count,
        };
        self.short.push(point.clone());
        self.long.push_gated(point, now);
        self.latest = reading;
    }

    fn welcome(&self, session: &SessionHandle) {
        let messages = [
            ServerMessage::Data {
                data: self.snapshot(),
            },
            self.history_message(),
            BroadcastCoordinator::status(&self.sessions),
        ];
        for message in &messages {
            if let Err(e) = BroadcastCoordinator::send_to(session, message) {
                tracing::warn!("Welcome to viewer {} incomplete: {}", session.id(), e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct Harness {
        state: SystemState,
        t0: DateTime<Utc>,
        next_id: u64,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(RelayConfig::default())
        }

        fn with_config(config: RelayConfig) -> Self {
            let t0 = Utc::now();
            let generator = DemoGenerator::with_rng(
                config.demo.clone(),
                config.energy.profile(),
                StdRng::seed_from_u64(42),
            );
            Self {
                state: SystemState::with_generator(&config, generator, t0),
                t0,
                next_id: 0,
            }
        }

        fn at(&self, secs: i64) -> DateTime<Utc> {
            self.t0 + TimeDelta::seconds(secs)
        }

        fn open(&mut self, role: ConnectionRole, secs: i64) -> (SessionHandle, mpsc::Receiver<String>) {
            self.next_id += 1;
            let (tx, rx) = mpsc::channel(64);
            let handle = SessionHandle::new(SessionId(self.next_id), role, tx);
            let now = self.at(secs);
            self.state.connect(handle.clone(), now);
            (handle, rx)
        }

        fn send(&mut self, session: &SessionHandle, text: &str, secs: i64) -> Result<(), RelayError> {
            let now = self.at(secs);
            self.state.handle_message(session, text, now)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    fn of_type<'a>(messages: &'a [Value], kind: &str) -> Vec<&'a Value> {
        messages.iter().filter(|m| m["type"] == kind).collect()
    }

    #[test]
    fn test_viewer_is_welcomed_with_data_history_status() {
        let mut h = Harness::new();
        let (_viewer, mut rx) = h.open(ConnectionRole::Viewer, 0);
        let messages = drain(&mut rx);
        let kinds: Vec<&str> = messages.iter().map(|m| m["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, ["data", "history", "status"]);
        assert_eq!(messages[0]["data"]["mode"], "demo");
        assert_eq!(messages[2]["deviceConnected"], false);
    }

    #[test]
    fn test_device_session_end_to_end() {
        let mut h = Harness::new();
        let (_v1, mut rx1) = h.open(ConnectionRole::Viewer, 0);
        let (_v2, mut rx2) = h.open(ConnectionRole::Viewer, 0);
        drain(&mut rx1);
        drain(&mut rx2);

        let (device, _device_rx) = h.open(ConnectionRole::Device, 0);
        assert_eq!(h.state.mode(), Mode::Live);
        assert_eq!(h.state.stats().total_energy, 0.0);
        assert_eq!(h.state.latest().energy, 0.0);

        h.send(&device, r#"{"voltage":3.3,"eventCount":1,"energy":0.002}"#, 2).unwrap();
        h.send(&device, r#"{"voltage":3.35,"eventCount":2,"energy":0.0035}"#, 4).unwrap();

        let stats = h.state.stats();
        assert!((stats.total_energy - 0.0035).abs() < 1e-9);
        assert!((stats.avg_energy_per_event - 0.00175).abs() < 1e-9);
        assert_eq!(stats.peak_voltage, 3.35);
        assert_eq!(h.state.short_history().len(), 2);

        for rx in [&mut rx1, &mut rx2] {
            let messages = drain(rx);
            assert_eq!(of_type(&messages, "status").len(), 1);
            let data = of_type(&messages, "data");
            assert_eq!(data.len(), 2);
            assert_eq!(data[1]["data"]["mode"], "live");
            assert_eq!(data[1]["data"]["insights"]["totalEnergy"], 0.0035);
            assert_eq!(data[1]["data"]["insights"]["avgEnergyPerEvent"], 0.00175);
            assert_eq!(
                data[1]["data"]["insights"]["timeSeriesData"]["voltage"]
                    .as_array()
                    .unwrap()
                    .len(),
                2
            );
        }
    }

    #[test]
    fn test_demo_only_end_to_end() {
        let mut h = Harness::new();
        let (_viewer, mut rx) = h.open(ConnectionRole::Viewer, 0);
        drain(&mut rx);

        for tick in 1..=3 {
            assert!(h.state.demo_tick(h.at(2 * tick)));
        }

        assert_eq!(h.state.short_history().len(), 3);
        assert_eq!(h.state.long_history().len(), 1);
        let data = drain(&mut rx);
        assert_eq!(data.len(), 3);
        assert!(data.iter().all(|m| m["type"] == "data" && m["data"]["mode"] == "demo"));
    }

    #[test]
    fn test_demo_tick_is_idle_while_live() {
        let mut h = Harness::new();
        let (_device, _rx) = h.open(ConnectionRole::Device, 0);
        assert!(!h.state.demo_tick(h.at(2)));
        assert!(h.state.short_history().is_empty());
    }

    #[test]
    fn test_device_disconnect_keeps_demo_voltage() {
        let mut h = Harness::new();
        h.state.demo_tick(h.at(2));
        let demo_voltage = h.state.generator.last().voltage;

        let (device, _rx) = h.open(ConnectionRole::Device, 3);
        h.send(&device, r#"{"voltage":3.5,"eventCount":1,"energy":0.001}"#, 4).unwrap();
        h.state.disconnect(device.id(), h.at(5));

        assert_eq!(h.state.mode(), Mode::Demo);
        assert!(!h.state.sessions().has_device());
        assert_eq!(h.state.generator.last().voltage, demo_voltage);

        // Closing twice is harmless.
        h.state.disconnect(device.id(), h.at(6));
        assert_eq!(h.state.mode(), Mode::Demo);
    }

    #[test]
    fn test_viewer_live_request_without_device_resets_everything() {
        let mut h = Harness::new();
        for tick in 1..=4 {
            h.state.demo_tick(h.at(2 * tick));
        }
        let (viewer, mut rx) = h.open(ConnectionRole::Viewer, 9);
        let (_other, mut other_rx) = h.open(ConnectionRole::Viewer, 9);
        drain(&mut rx);
        drain(&mut other_rx);

        h.send(&viewer, r#"{"type":"mode","mode":"live"}"#, 10).unwrap();

        assert_eq!(h.state.mode(), Mode::Live);
        assert_eq!(*h.state.stats(), AggregateStats::new(h.at(10)));
        assert!(h.state.short_history().is_empty());
        assert!(h.state.long_history().is_empty());

        let messages = drain(&mut rx);
        assert_eq!(messages[0], serde_json::json!({"type": "mode_change", "mode": "live"}));
        assert_eq!(messages[1]["data"]["voltage"], 0.0);
        assert_eq!(messages[1]["data"]["insights"]["totalEnergy"], 0.0);
        assert!(drain(&mut other_rx).is_empty());
    }

    #[test]
    fn test_viewer_live_request_with_device_is_not_a_reset() {
        let mut h = Harness::new();
        let (device, _drx) = h.open(ConnectionRole::Device, 0);
        h.send(&device, r#"{"voltage":3.3,"eventCount":1,"energy":0.002}"#, 2).unwrap();
        let (viewer, mut rx) = h.open(ConnectionRole::Viewer, 3);
        drain(&mut rx);

        h.send(&viewer, r#"{"type":"mode","mode":"live"}"#, 4).unwrap();

        assert_eq!(h.state.short_history().len(), 1);
        assert!((h.state.stats().total_energy - 0.002).abs() < 1e-12);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "mode_change");
    }

    #[test]
    fn test_viewer_demo_request_preserves_values() {
        let mut h = Harness::new();
        let (viewer, mut rx) = h.open(ConnectionRole::Viewer, 0);
        h.state.demo_tick(h.at(2));
        h.state.demo_tick(h.at(4));
        let before = h.state.stats().total_energy;
        let last_reading = h.state.generator.last().clone();
        drain(&mut rx);

        h.send(&viewer, r#"{"type":"mode","mode":"demo"}"#, 5).unwrap();

        assert_eq!(h.state.mode(), Mode::Demo);
        assert_eq!(h.state.stats().total_energy, before);
        assert_eq!(h.state.short_history().len(), 2);
        let messages = drain(&mut rx);
        assert_eq!(messages, vec![serde_json::json!({"type": "mode_change", "mode": "demo"})]);

        h.state.demo_tick(h.at(6));
        let next = h.state.latest();
        assert!(next.event_count >= last_reading.event_count);
        assert!((next.voltage - last_reading.voltage).abs() <= 0.1 + 1e-9);
    }

    #[test]
    fn test_liveness_sweep_drops_silent_device() {
        let mut h = Harness::new();
        let (_viewer, mut rx) = h.open(ConnectionRole::Viewer, 0);
        let (device, _drx) = h.open(ConnectionRole::Device, 0);
        h.send(&device, r#"{"voltage":3.3,"eventCount":1,"energy":0.002}"#, 10).unwrap();
        drain(&mut rx);

        // Sweeps every 30s; last reading at 10s, so 70s is exactly the limit.
        assert!(!h.state.sweep_liveness(h.at(30)));
        assert!(!h.state.sweep_liveness(h.at(60)));
        assert_eq!(h.state.mode(), Mode::Live);
        assert!(h.state.sweep_liveness(h.at(90)));

        assert_eq!(h.state.mode(), Mode::Demo);
        assert!(!h.state.sessions().has_device());
        let status = drain(&mut rx);
        assert_eq!(status.len(), 1);
        assert_eq!(status[0]["type"], "status");
        assert_eq!(status[0]["deviceConnected"], false);
        assert!(status[0]["deviceLastSeen"].is_string());

        // Demo resumes on the next tick.
        assert!(h.state.demo_tick(h.at(92)));
    }

    #[test]
    fn test_sweep_without_device_is_noop() {
        let mut h = Harness::new();
        assert!(!h.state.sweep_liveness(h.at(3600)));
        assert_eq!(h.state.mode(), Mode::Demo);
    }

    #[test]
    fn test_malformed_messages_are_reported_and_harmless() {
        let mut h = Harness::new();
        let (viewer, _vrx) = h.open(ConnectionRole::Viewer, 0);
        let (device, _drx) = h.open(ConnectionRole::Device, 0);

        assert!(matches!(
            h.send(&device, "not json", 1),
            Err(RelayError::MalformedMessage { .. })
        ));
        assert!(matches!(
            h.send(&viewer, r#"{"type":"explode"}"#, 1),
            Err(RelayError::MalformedMessage { .. })
        ));
        assert!(h.state.short_history().is_empty());
        assert_eq!(h.state.mode(), Mode::Live);
        assert_eq!(h.state.sessions().viewer_count(), 1);
    }

    #[test]
    fn test_get_history_replies_to_requester() {
        let mut h = Harness::new();
        h.state.demo_tick(h.at(2));
        let (viewer, mut rx) = h.open(ConnectionRole::Viewer, 3);
        drain(&mut rx);

        h.send(&viewer, r#"{"type":"getHistory"}"#, 4).unwrap();
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "history");
        assert_eq!(messages[0]["data"]["eventCount"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_replaced_device_is_ignored() {
        let mut h = Harness::new();
        let (first, _rx1) = h.open(ConnectionRole::Device, 0);
        let (second, _rx2) = h.open(ConnectionRole::Device, 1);

        h.send(&first, r#"{"voltage":3.3,"eventCount":1,"energy":0.002}"#, 2).unwrap();
        assert!(h.state.short_history().is_empty());

        h.state.disconnect(first.id(), h.at(3));
        assert_eq!(h.state.mode(), Mode::Live);
        assert!(h.state.sessions().is_current_device(second.id()));
    }

    #[test]
    fn test_device_readings_held_back_after_viewer_demo_request() {
        let mut h = Harness::new();
        let (device, _drx) = h.open(ConnectionRole::Device, 0);
        let (viewer, _vrx) = h.open(ConnectionRole::Viewer, 0);
        h.send(&viewer, r#"{"type":"mode","mode":"demo"}"#, 1).unwrap();

        h.send(&device, r#"{"voltage":3.3,"eventCount":1,"energy":0.002}"#, 2).unwrap();
        assert!(h.state.short_history().is_empty());
        // Still counts as traffic for liveness.
        assert_eq!(h.state.sessions().device_last_seen(), Some(h.at(2)));
        assert!(h.state.demo_tick(h.at(2)));
    }

    #[test]
    fn test_capacitive_model_derives_device_energy() {
        let mut config = RelayConfig::default();
        config.energy.model = crate::domain::energy::EnergyModel::CapacitiveInstantaneous;
        config.energy.capacitance_farads = 0.001;
        let mut h = Harness::with_config(config);
        let (device, _rx) = h.open(ConnectionRole::Device, 0);

        h.send(&device, r#"{"voltage":2.0,"passCount":3}"#, 2).unwrap();

        assert!((h.state.latest().energy - 0.002).abs() < 1e-12);
        assert!((h.state.stats().total_energy - 0.002).abs() < 1e-12);
        assert_eq!(h.state.latest().event_count, 3);
    }
}
