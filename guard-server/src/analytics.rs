//! Efficiency and health scoring over a trailing window of readings.

use chrono::{DateTime, Duration, Utc};

use crate::errors::Result;
use crate::model::{AnalyticsSnapshot, Reading, STATE_DANGER, STATE_WARNING};
use crate::store::ReadingStore;

/// Length of the trailing window analytics are computed over.
pub const WINDOW_HOURS: i64 = 24;

const HEALTH_BASE: u64 = 100;
const WARNING_PENALTY: u64 = 2;
const DANGER_PENALTY: u64 = 5;

/// Fetches the trailing window for `device_id` and scores it.
pub async fn compute_analytics(
    store: &dyn ReadingStore,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<AnalyticsSnapshot> {
    let since = now - Duration::hours(WINDOW_HOURS);
    let readings = store.query_window(device_id, since).await?;
    Ok(snapshot(&readings))
}

/// Scores a set of readings. Order does not matter.
///
/// "Active" means the vibration flag was raised; efficiency is the rounded
/// share of active readings. `total_readings` reports the true count even
/// though the division floors the denominator at 1.
pub fn snapshot(readings: &[Reading]) -> AnalyticsSnapshot {
    let total = readings.len() as u64;
    let active = readings.iter().filter(|r| r.vibration_detected).count() as u64;
    let warnings = readings.iter().filter(|r| r.state == STATE_WARNING).count() as u64;
    let dangers = readings.iter().filter(|r| r.state == STATE_DANGER).count() as u64;

    AnalyticsSnapshot {
        efficiency: efficiency(active, total),
        health_score: health_score(warnings, dangers),
        total_readings: total,
        warnings,
        dangers,
    }
}

pub fn efficiency(active: u64, total: u64) -> u32 {
    let denominator = total.max(1) as f64;
    (100.0 * active as f64 / denominator).round() as u32
}

pub fn health_score(warnings: u64, dangers: u64) -> u32 {
    let penalty = warnings
        .saturating_mul(WARNING_PENALTY)
        .saturating_add(dangers.saturating_mul(DANGER_PENALTY));
    HEALTH_BASE.saturating_sub(penalty) as u32
}
