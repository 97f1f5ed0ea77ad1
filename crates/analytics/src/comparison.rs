//! Period-over-period comparison: baseline periods and growth percentages.

use chrono::Days;
use gym_core::types::DateRange;
use tracing::warn;

/// The period of identical length in days immediately preceding `range`.
///
/// This is a fixed-length shift, not a calendar-unit shift: the baseline of
/// March 2025 (31 days) is 2025-01-29..=2025-02-28.
pub fn baseline_range(range: DateRange) -> DateRange {
    let len = range.len_days() as u64;
    let baseline = range
        .start()
        .pred_opt()
        .and_then(|end| {
            end.checked_sub_days(Days::new(len - 1))
                .map(|start| (start, end))
        })
        .and_then(|(start, end)| DateRange::new(start, end).ok());

    baseline.unwrap_or_else(|| {
        warn!(%range, "Baseline range out of calendar bounds, comparing against itself");
        range
    })
}

/// Relative change in percent. A zero (or non-finite) baseline yields `0.0`,
/// so the result is always finite.
pub fn growth_percent(current: f64, previous: f64) -> f64 {
    if previous == 0.0 || !previous.is_finite() || !current.is_finite() {
        return 0.0;
    }
    let growth = (current - previous) / previous * 100.0;
    if growth.is_finite() {
        growth
    } else {
        0.0
    }
}
