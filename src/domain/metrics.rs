// Metrics engine - Rolling statistics derived from successive readings
use chrono::{DateTime, Utc};

use super::reading::Reading;

/// Aggregate statistics kept at full precision. Rounding happens only when a
/// snapshot is serialized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateStats {
    pub total_energy: f64,
    pub avg_energy_per_event: f64,
    pub peak_voltage: f64,
    pub power: f64,
    pub charge_fraction: f64,
    pub last_update: DateTime<Utc>,
}

impl AggregateStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_energy: 0.0,
            avg_energy_per_event: 0.0,
            peak_voltage: 0.0,
            power: 0.0,
            charge_fraction: 0.0,
            last_update: now,
        }
    }

    /// Drop accumulated energy and everything derived from it. Peak voltage
    /// survives.
    pub fn clear_energy(&mut self) {
        self.total_energy = 0.0;
        self.avg_energy_per_event = 0.0;
        self.power = 0.0;
        self.charge_fraction = 0.0;
    }
}

/// Pure computation over `AggregateStats`; owns only the normalization constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsEngine {
    energy_capacity_joules: f64,
}

impl MetricsEngine {
    pub fn new(energy_capacity_joules: f64) -> Self {
        Self {
            energy_capacity_joules,
        }
    }

    /// Fold `reading` into `stats`, where `previous_energy` is the energy of the
    /// reading it replaces.
    pub fn apply_reading(
        &self,
        stats: &AggregateStats,
        previous_energy: f64,
        reading: &Reading,
        now: DateTime<Utc>,
    ) -> AggregateStats {
        let dt = (now - stats.last_update).num_milliseconds() as f64 / 1000.0;
        let energy_delta = (reading.energy - previous_energy).max(0.0);
        let total_energy = stats.total_energy + energy_delta;

        AggregateStats {
            total_energy,
            avg_energy_per_event: if reading.event_count > 0 {
                total_energy / reading.event_count as f64
            } else {
                0.0
            },
            peak_voltage: stats.peak_voltage.max(reading.voltage),
            power: if dt > 0.0 { energy_delta / dt } else { 0.0 },
            charge_fraction: self.charge_fraction(total_energy),
            last_update: now,
        }
    }

    fn charge_fraction(&self, total_energy: f64) -> f64 {
        if self.energy_capacity_joules <= 0.0 {
            return 0.0;
        }
        (total_energy / self.energy_capacity_joules).clamp(0.0, 1.0)
    }
}
