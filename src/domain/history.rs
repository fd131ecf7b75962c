// History buffers - Bounded, chronologically ordered series of past readings
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use super::snapshot::round_to;

/// One row of history. Keeping rows (rather than parallel columns) means an
/// eviction always drops every field of the oldest sample together.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub energy: f64,
    pub power: f64,
    pub event_count: u64,
}

/// Columnar view of the short buffer, as charted by dashboards.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ChartSeries {
    pub timestamps: Vec<DateTime<Utc>>,
    pub voltage: Vec<f64>,
    pub energy: Vec<f64>,
    pub power: Vec<f64>,
}

/// Columnar view of the long buffer, with the event counter alongside.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySeries {
    #[serde(flatten)]
    pub chart: ChartSeries,
    pub event_count: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    capacity: usize,
    min_spacing: Option<TimeDelta>,
    points: VecDeque<HistoryPoint>,
}

impl HistoryBuffer {
    /// Accepts every push; oldest point evicted past `capacity`.
    pub fn rolling(capacity: usize) -> Self {
        Self {
            capacity,
            min_spacing: None,
            points: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Accepts at most one push per `min_spacing`.
    pub fn gated(capacity: usize, min_spacing: TimeDelta) -> Self {
        Self {
            capacity,
            min_spacing: Some(min_spacing),
            points: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.points.iter()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Unconditional append with FIFO eviction.
    pub fn push(&mut self, point: HistoryPoint) {
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    /// Append only if the buffer is empty or `now` is at least the configured
    /// spacing past the newest retained point. Returns whether it was kept.
    pub fn push_gated(&mut self, point: HistoryPoint, now: DateTime<Utc>) -> bool {
        let due = self.is_empty()
            || match (self.min_spacing, self.last()) {
                (Some(spacing), Some(last)) => now - last.timestamp >= spacing,
                _ => true,
            };
        if due {
            self.push(point);
        }
        due
    }

    /// Oldest-to-newest columns, values rounded for transmission.
    pub fn chart_series(&self) -> ChartSeries {
        let mut series = ChartSeries {
            timestamps: Vec::with_capacity(self.len()),
            voltage: Vec::with_capacity(self.len()),
            energy: Vec::with_capacity(self.len()),
            power: Vec::with_capacity(self.len()),
        };
        for p in self.iter() {
            series.timestamps.push(p.timestamp);
            series.voltage.push(round_to(p.voltage, 2));
            series.energy.push(round_to(p.energy, 4));
            series.power.push(round_to(p.power, 6));
        }
        series
    }

    pub fn history_series(&self) -> HistorySeries {
        HistorySeries {
            chart: self.chart_series(),
            event_count: self.iter().map(|p| p.event_count).collect(),
        }
    }
}
