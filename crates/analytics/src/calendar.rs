//! Calendar arithmetic: anchor ranges and relative navigation per granularity.
//!
//! Every function here is total. When chrono cannot represent a result (only
//! at the edges of the supported date span) the input range is returned
//! unchanged and a warning is logged.

use chrono::{Datelike, Days, Months, NaiveDate};
use gym_core::types::{DateRange, Direction, Granularity};
use tracing::warn;

/// The calendar unit of `granularity` that contains `reference`.
pub fn anchor_range(granularity: Granularity, reference: NaiveDate) -> DateRange {
    let anchored = match granularity {
        Granularity::Day => Some(DateRange::day(reference)),
        Granularity::Week => week_range(reference),
        Granularity::Month => month_range(reference.year(), reference.month()),
        Granularity::Year => year_range(reference.year()),
    };
    anchored.unwrap_or_else(|| {
        warn!(%granularity, %reference, "Anchor range out of calendar bounds, using identity");
        DateRange::day(reference)
    })
}

/// The range adjacent to the one starting at `current_start`.
///
/// Week, month and year results are re-anchored after the shift, so repeated
/// navigation never drifts off calendar boundaries.
pub fn relative_range(
    granularity: Granularity,
    direction: Direction,
    current_start: NaiveDate,
) -> DateRange {
    let shifted = match granularity {
        Granularity::Day => shift_days(current_start, 1, direction).map(DateRange::day),
        Granularity::Week => shift_days(current_start, 7, direction).and_then(week_range),
        Granularity::Month => {
            let (year, month) = shift_month(current_start.year(), current_start.month(), direction);
            month_range(year, month)
        }
        Granularity::Year => year_range(current_start.year() + direction.sign()),
    };
    shifted.unwrap_or_else(|| {
        warn!(
            %granularity,
            ?direction,
            %current_start,
            "Relative range out of calendar bounds, using identity"
        );
        DateRange::day(current_start)
    })
}

/// Navigation by granularity name. Unknown names yield the identity range.
pub fn relative_range_named(
    granularity: &str,
    direction: Direction,
    current: DateRange,
) -> DateRange {
    match granularity.parse::<Granularity>() {
        Ok(g) => relative_range(g, direction, current.start()),
        Err(e) => {
            warn!(error = %e, %current, "Unrecognized granularity, range unchanged");
            current
        }
    }
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> Option<NaiveDate> {
    let offset = date.weekday().num_days_from_monday();
    date.checked_sub_days(Days::new(u64::from(offset)))
}

fn week_range(reference: NaiveDate) -> Option<DateRange> {
    let start = week_start(reference)?;
    let end = start.checked_add_days(Days::new(6))?;
    DateRange::new(start, end).ok()
}

fn month_range(year: i32, month: u32) -> Option<DateRange> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    // Day 0 of the following month.
    let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
    DateRange::new(start, end).ok()
}

fn year_range(year: i32) -> Option<DateRange> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
    DateRange::new(start, end).ok()
}

fn shift_days(date: NaiveDate, days: u64, direction: Direction) -> Option<NaiveDate> {
    match direction {
        Direction::Prev => date.checked_sub_days(Days::new(days)),
        Direction::Next => date.checked_add_days(Days::new(days)),
    }
}

fn shift_month(year: i32, month: u32, direction: Direction) -> (i32, u32) {
    match (direction, month) {
        (Direction::Prev, 1) => (year - 1, 12),
        (Direction::Prev, m) => (year, m - 1),
        (Direction::Next, 12) => (year + 1, 1),
        (Direction::Next, m) => (year, m + 1),
    }
}
