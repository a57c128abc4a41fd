use serde::{Deserialize, Serialize};

use crate::series::NormalizedSeries;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum State {
    Uptime,
    Downtime,
    /// The reading did not parse; its time is counted in neither state.
    Unknown,
}

pub fn classify(value: Option<f64>, threshold: f64) -> State {
    match value {
        None => State::Unknown,
        Some(v) if v < threshold => State::Downtime,
        Some(_) => State::Uptime,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ColumnResult {
    pub column_id: String,
    pub uptime_minutes: f64,
    pub downtime_minutes: f64,
    pub unknown_minutes: f64,
    pub uptime_pct: f64,
    pub downtime_pct: f64,
}

impl ColumnResult {
    /// Minutes that were classified as either uptime or downtime.
    pub fn classified_minutes(&self) -> f64 {
        self.uptime_minutes + self.downtime_minutes
    }
}

/// Sum a series' durations per state and derive the percentages.
///
/// Percentages are taken over classified time only, so they add up to 100
/// whenever any reading parsed and are both zero otherwise.
pub fn aggregate_series(series: &NormalizedSeries, threshold: f64) -> ColumnResult {
    let mut uptime = 0.0;
    let mut downtime = 0.0;
    let mut unknown = 0.0;
    for point in &series.points {
        match classify(point.value, threshold) {
            State::Uptime => uptime += point.duration_minutes,
            State::Downtime => downtime += point.duration_minutes,
            State::Unknown => unknown += point.duration_minutes,
        }
    }

    let total = uptime + downtime;
    let (uptime_pct, downtime_pct) = if total > 0.0 {
        (100.0 * uptime / total, 100.0 * downtime / total)
    } else {
        (0.0, 0.0)
    };

    ColumnResult {
        column_id: series.column_id.clone(),
        uptime_minutes: uptime,
        downtime_minutes: downtime,
        unknown_minutes: unknown,
        uptime_pct,
        downtime_pct,
    }
}
