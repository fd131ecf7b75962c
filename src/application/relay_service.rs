// Relay service - Serialized access to the system state plus its timers
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::infrastructure::config::RelayConfig;

use super::error::RelayError;
use super::session_registry::{ConnectionMetadata, DeviceMarker, SessionHandle, SessionId};
use super::system_state::SystemState;

#[derive(Debug, Clone)]
struct Timing {
    demo_enabled: bool,
    demo_tick: Duration,
    sweep_interval: Duration,
}

/// Wall-clock time anchored at startup and advanced by tokio's clock, so the
/// timers and the timestamps they stamp agree even when time is paused.
#[derive(Debug, Clone, Copy)]
struct RelayClock {
    base: DateTime<Utc>,
    started: Instant,
}

impl RelayClock {
    fn start() -> Self {
        Self {
            base: Utc::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.started.elapsed()).unwrap_or(TimeDelta::MAX);
        self.base.checked_add_signed(elapsed).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Cheap to clone; every clone shares the same state. All connection events
/// and timer ticks go through one mutex, so they never interleave.
#[derive(Clone)]
pub struct RelayService {
    state: Arc<Mutex<SystemState>>,
    marker: DeviceMarker,
    next_id: Arc<AtomicU64>,
    outbound_queue: usize,
    timing: Timing,
    clock: RelayClock,
}

/// Handles to the demo ticker and liveness sweeper.
pub struct BackgroundTasks {
    demo: Option<JoinHandle<()>>,
    liveness: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn shutdown(self) {
        if let Some(demo) = self.demo {
            demo.abort();
        }
        self.liveness.abort();
    }
}

impl RelayService {
    pub fn new(config: &RelayConfig) -> Self {
        let clock = RelayClock::start();
        Self::with_state(config, SystemState::new(config, clock.now()), clock)
    }

    fn with_state(config: &RelayConfig, state: SystemState, clock: RelayClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            marker: DeviceMarker {
                client_type: config.device.client_type.clone(),
                user_agent_token: config.device.user_agent_token.clone(),
            },
            next_id: Arc::new(AtomicU64::new(1)),
            outbound_queue: config.viewer.outbound_queue.max(1),
            timing: Timing {
                demo_enabled: config.demo.enabled,
                demo_tick: Duration::from_secs(config.demo.tick_secs.max(1)),
                sweep_interval: Duration::from_secs(config.device.sweep_interval_secs.max(1)),
            },
            clock,
        }
    }

    /// Classify and register a new connection. The receiver yields everything
    /// addressed to it and must be drained by the transport.
    pub async fn open_session(&self, metadata: &ConnectionMetadata) -> (SessionHandle, mpsc::Receiver<String>) {
        let role = self.marker.classify(metadata);
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.outbound_queue);
        let handle = SessionHandle::new(id, role, tx);

        self.state.lock().await.connect(handle.clone(), self.clock.now());
        (handle, rx)
    }

    pub async fn handle_text(&self, session: &SessionHandle, text: &str) -> Result<(), RelayError> {
        self.state
            .lock()
            .await
            .handle_message(session, text, self.clock.now())
    }

    pub async fn close_session(&self, id: SessionId) {
        self.state.lock().await.disconnect(id, self.clock.now());
    }

    #[cfg(test)]
    pub async fn inspect<R>(&self, f: impl FnOnce(&SystemState) -> R) -> R {
        let state = self.state.lock().await;
        f(&state)
    }

    pub fn spawn_background_tasks(&self) -> BackgroundTasks {
        let demo = self.timing.demo_enabled.then(|| {
            let service = self.clone();
            tokio::spawn(async move { service.run_demo_ticker().await })
        });
        let service = self.clone();
        let liveness = tokio::spawn(async move { service.run_liveness_sweeper().await });
        BackgroundTasks { demo, liveness }
    }

    async fn run_demo_ticker(self) {
        tracing::info!("Demo ticker started ({:?} period)", self.timing.demo_tick);
        let mut ticker = tokio::time::interval(self.timing.demo_tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.state.lock().await.demo_tick(self.clock.now());
        }
    }

    async fn run_liveness_sweeper(self) {
        let mut ticker = tokio::time::interval(self.timing.sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.state.lock().await.sweep_liveness(self.clock.now());
        }
    }
}
