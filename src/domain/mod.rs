// Domain layer - Pure telemetry models and state machines (no I/O)
pub mod energy;
pub mod history;
pub mod metrics;
pub mod mode;
pub mod protocol;
pub mod reading;
pub mod snapshot;
