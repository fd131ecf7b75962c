// Reading domain model
use serde::{Deserialize, Serialize};

/// Which source is currently feeding the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Live,
    #[default]
    Demo,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Demo => "demo",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one sample, either decoded from the device or
/// synthesized by the demo generator.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub voltage: f64,
    pub event_count: u64,
    pub energy: f64,
    pub estimated_runtime: f64,
    pub mode: Mode,
}

impl Reading {
    pub fn new(voltage: f64, event_count: u64, energy: f64, estimated_runtime: f64, mode: Mode) -> Self {
        Self {
            voltage,
            event_count,
            energy,
            estimated_runtime,
            mode,
        }
    }

    /// All-zero reading, used after a full reset.
    pub fn zeroed(mode: Mode) -> Self {
        Self::new(0.0, 0, 0.0, 0.0, mode)
    }
}
