// Snapshot - Combined reading and insights as transmitted to viewers
use serde::Serialize;

use super::history::{ChartSeries, HistoryBuffer};
use super::metrics::AggregateStats;
use super::reading::{Mode, Reading};

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub voltage: f64,
    pub event_count: u64,
    pub energy: f64,
    pub estimated_runtime: f64,
    pub mode: Mode,
    pub insights: Insights,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub total_energy: f64,
    pub avg_energy_per_event: f64,
    pub peak_voltage: f64,
    pub power: f64,
    pub charge_fraction: f64,
    pub time_series_data: ChartSeries,
}

impl Snapshot {
    pub fn capture(reading: &Reading, stats: &AggregateStats, short: &HistoryBuffer) -> Self {
        Self {
            voltage: round_to(reading.voltage, 2),
            event_count: reading.event_count,
            energy: round_to(reading.energy, 4),
            estimated_runtime: round_to(reading.estimated_runtime, 1),
            mode: reading.mode,
            insights: Insights {
                total_energy: round_to(stats.total_energy, 4),
                avg_energy_per_event: round_to(stats.avg_energy_per_event, 6),
                peak_voltage: round_to(stats.peak_voltage, 2),
                power: round_to(stats.power, 6),
                charge_fraction: round_to(stats.charge_fraction, 4),
                time_series_data: short.chart_series(),
            },
        }
    }
}
