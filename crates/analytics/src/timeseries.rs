//! Gap-filled time-series aggregation.
//!
//! Bucket spans are produced by walking [`calendar::relative_range`] from the
//! anchor of the range start, and every sample is keyed with the same
//! [`bucket_key`] function. Chart buckets therefore always line up with the
//! headline anchor ranges.
//!
//! Week keys use a simplified, non-ISO numbering:
//! `week = ceil((day_of_year0 + jan1_weekday_from_sunday + 1) / 7)`, evaluated
//! on the Monday that starts the week. Do not read them as ISO-8601 weeks.

use crate::calendar;
use chrono::{Datelike, NaiveDate};
use gym_core::types::{DateRange, Direction, Granularity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One labelled time slice of a chart series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub value: f64,
}

/// How the samples that fall into one bucket are folded into its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Sum,
    Count,
    Average,
    /// Number of distinct sample subjects (e.g. member ids).
    DistinctCount,
}

/// A dated value extracted from a raw record.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    pub date: NaiveDate,
    pub value: f64,
    pub subject: Option<&'a str>,
}

impl<'a> Sample<'a> {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self {
            date,
            value,
            subject: None,
        }
    }

    pub fn with_subject(date: NaiveDate, subject: &'a str) -> Self {
        Self {
            date,
            value: 1.0,
            subject: Some(subject),
        }
    }
}

/// Calendar unit covered by one bucket, clipped to the aggregated range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSpan {
    pub key: String,
    pub range: DateRange,
}

#[derive(Debug, Default)]
struct Accumulator<'a> {
    sum: f64,
    count: usize,
    subjects: HashSet<&'a str>,
}

impl<'a> Accumulator<'a> {
    fn push(&mut self, sample: &Sample<'a>) {
        self.sum += sample.value;
        self.count += 1;
        if let Some(subject) = sample.subject {
            self.subjects.insert(subject);
        }
    }

    fn finish(&self, reducer: Reducer) -> f64 {
        match reducer {
            Reducer::Sum => self.sum,
            Reducer::Count => self.count as f64,
            Reducer::Average if self.count == 0 => 0.0,
            Reducer::Average => self.sum / self.count as f64,
            Reducer::DistinctCount => self.subjects.len() as f64,
        }
    }
}

// ---------------------------------------------------------------------------
// Keys and spans
// ---------------------------------------------------------------------------

/// Label of the bucket that `date` falls into at `granularity`.
pub fn bucket_key(date: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Day => date.format("%Y-%m-%d").to_string(),
        Granularity::Week => {
            let monday = calendar::week_start(date).unwrap_or(date);
            format!("{}-W{:02}", monday.year(), week_number(monday))
        }
        Granularity::Month => format!("{:04}-{:02}", date.year(), date.month()),
        Granularity::Year => format!("{:04}", date.year()),
    }
}

/// Simplified week-of-year number, 1-based, weeks counted from the weekday of Jan 1.
pub fn week_number(date: NaiveDate) -> u32 {
    let jan1_weekday = NaiveDate::from_ymd_opt(date.year(), 1, 1)
        .map(|jan1| jan1.weekday().num_days_from_sunday())
        .unwrap_or(0);
    (date.ordinal0() + jan1_weekday + 1).div_ceil(7)
}

/// Every calendar unit touching `range`, in chronological order.
pub fn bucket_spans(range: DateRange, granularity: Granularity) -> Vec<BucketSpan> {
    let mut spans = Vec::new();
    let mut unit = calendar::anchor_range(granularity, range.start());

    loop {
        let start = unit.start().max(range.start());
        let end = unit.end().min(range.end());
        if let Ok(clipped) = DateRange::new(start, end) {
            spans.push(BucketSpan {
                key: bucket_key(start, granularity),
                range: clipped,
            });
        }
        if unit.end() >= range.end() {
            break;
        }
        let next = calendar::relative_range(granularity, Direction::Next, unit.start());
        if next.start() <= unit.start() {
            // Calendar exhausted; relative_range returned the identity.
            break;
        }
        unit = next;
    }

    spans
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Bucket `samples` over `range` at `granularity`, one bucket per calendar
/// unit, absent units valued `0`. Samples outside `range` are ignored.
pub fn aggregate<'a, I>(
    samples: I,
    range: DateRange,
    granularity: Granularity,
    reducer: Reducer,
) -> Vec<Bucket>
where
    I: IntoIterator<Item = Sample<'a>>,
{
    let mut accumulators: HashMap<String, Accumulator<'a>> = HashMap::new();
    for sample in samples {
        if !range.contains(sample.date) {
            continue;
        }
        accumulators
            .entry(bucket_key(sample.date, granularity))
            .or_default()
            .push(&sample);
    }

    bucket_spans(range, granularity)
        .into_iter()
        .map(|span| {
            let value = accumulators
                .get(&span.key)
                .map(|acc| acc.finish(reducer))
                .unwrap_or(0.0);
            Bucket {
                key: span.key,
                period_start: span.range.start(),
                period_end: span.range.end(),
                value,
            }
        })
        .collect()
}

/// Fold every sample inside `range` into one scalar with `reducer`.
pub fn reduce<'a, I>(samples: I, range: DateRange, reducer: Reducer) -> f64
where
    I: IntoIterator<Item = Sample<'a>>,
{
    let mut acc = Accumulator::default();
    for sample in samples.into_iter().filter(|s| range.contains(s.date)) {
        acc.push(&sample);
    }
    acc.finish(reducer)
}

/// Evaluate a per-period metric on every bucket span of `range`.
pub fn evaluate_spans<F>(range: DateRange, granularity: Granularity, metric: F) -> Vec<Bucket>
where
    F: Fn(DateRange) -> f64,
{
    bucket_spans(range, granularity)
        .into_iter()
        .map(|span| Bucket {
            value: metric(span.range),
            key: span.key,
            period_start: span.range.start(),
            period_end: span.range.end(),
        })
        .collect()
}

/// Keep the last `window` buckets. Must run after full-range aggregation;
/// a `window` of `0` keeps everything.
pub fn truncate_tail(mut buckets: Vec<Bucket>, window: usize) -> Vec<Bucket> {
    if window > 0 && buckets.len() > window {
        buckets.drain(..buckets.len() - window);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn may_2025() -> DateRange {
        DateRange::new(date(2025, 5, 1), date(2025, 5, 31)).unwrap()
    }

    // 1. Keys ------------------------------------------------------------------

    #[test]
    fn test_bucket_keys() {
        let d = date(2025, 5, 7);
        assert_eq!(bucket_key(d, Granularity::Day), "2025-05-07");
        assert_eq!(bucket_key(d, Granularity::Month), "2025-05");
        assert_eq!(bucket_key(d, Granularity::Year), "2025");
    }

    #[test]
    fn test_week_number_formula() {
        // 2023-01-01 is a Sunday: Sunday..Saturday is week 1.
        assert_eq!(week_number(date(2023, 1, 1)), 1);
        assert_eq!(week_number(date(2023, 1, 7)), 1);
        assert_eq!(week_number(date(2023, 1, 8)), 2);
        // 2025-01-01 is a Wednesday.
        assert_eq!(week_number(date(2025, 1, 1)), 1);
        assert_eq!(week_number(date(2025, 1, 4)), 1);
        assert_eq!(week_number(date(2025, 1, 5)), 2);
    }

    #[test]
    fn test_week_key_shared_by_monday_week() {
        // Monday 2025-05-12 through Sunday 2025-05-18.
        let key = bucket_key(date(2025, 5, 12), Granularity::Week);
        for day in 12..=18 {
            assert_eq!(bucket_key(date(2025, 5, day), Granularity::Week), key);
        }
        assert_ne!(bucket_key(date(2025, 5, 19), Granularity::Week), key);
        assert_eq!(key, "2025-W20");
    }

    #[test]
    fn test_week_key_uses_monday_year() {
        assert_eq!(
            bucket_key(date(2026, 1, 2), Granularity::Week),
            bucket_key(date(2025, 12, 29), Granularity::Week)
        );
        assert!(bucket_key(date(2026, 1, 2), Granularity::Week).starts_with("2025-W"));
    }

    // 2. Gap filling -------------------------------------------------------------

    #[test]
    fn test_empty_month_by_day() {
        let buckets = aggregate(Vec::new(), may_2025(), Granularity::Day, Reducer::Sum);
        assert_eq!(buckets.len(), 31);
        assert!(buckets.iter().all(|b| b.value == 0.0));
        assert_eq!(buckets[0].key, "2025-05-01");
        assert_eq!(buckets[30].key, "2025-05-31");
    }

    #[test]
    fn test_one_bucket_per_unit() {
        let cases = [
            (date(2024, 2, 1), date(2024, 2, 29), Granularity::Day, 29),
            (date(2025, 5, 1), date(2025, 5, 31), Granularity::Week, 5),
            (date(2025, 5, 12), date(2025, 5, 25), Granularity::Week, 2),
            (date(2024, 11, 15), date(2025, 2, 3), Granularity::Month, 4),
            (date(2023, 6, 1), date(2025, 1, 1), Granularity::Year, 3),
            (date(2025, 3, 3), date(2025, 3, 3), Granularity::Year, 1),
        ];
        for (start, end, granularity, expected) in cases {
            let range = DateRange::new(start, end).unwrap();
            let buckets = aggregate(Vec::new(), range, granularity, Reducer::Count);
            assert_eq!(buckets.len(), expected, "{range} at {granularity}");

            let keys: HashSet<_> = buckets.iter().map(|b| b.key.clone()).collect();
            assert_eq!(keys.len(), buckets.len(), "duplicate keys for {range}");

            assert_eq!(buckets.first().unwrap().period_start, start);
            assert_eq!(buckets.last().unwrap().period_end, end);
            for pair in buckets.windows(2) {
                assert_eq!(pair[0].period_end.succ_opt().unwrap(), pair[1].period_start);
            }
        }
    }

    #[test]
    fn test_week_buckets_match_anchor_ranges() {
        let range = DateRange::new(date(2025, 4, 28), date(2025, 6, 1)).unwrap();
        for span in bucket_spans(range, Granularity::Week) {
            let anchor = calendar::anchor_range(Granularity::Week, span.range.start());
            assert_eq!(span.range, anchor);
        }
    }

    // 3. Reducers ----------------------------------------------------------------

    #[test]
    fn test_sum_count_average() {
        let samples = vec![
            Sample::new(date(2025, 5, 1), 100.0),
            Sample::new(date(2025, 5, 1), 50.0),
            Sample::new(date(2025, 5, 3), 30.0),
            Sample::new(date(2025, 6, 1), 999.0),
        ];
        let range = may_2025();

        let sums = aggregate(samples.clone(), range, Granularity::Day, Reducer::Sum);
        assert!((sums[0].value - 150.0).abs() < f64::EPSILON);
        assert!(sums[1].value.abs() < f64::EPSILON);
        assert!((sums[2].value - 30.0).abs() < f64::EPSILON);

        let counts = aggregate(samples.clone(), range, Granularity::Month, Reducer::Count);
        assert_eq!(counts.len(), 1);
        assert!((counts[0].value - 3.0).abs() < f64::EPSILON);

        let averages = aggregate(samples.clone(), range, Granularity::Day, Reducer::Average);
        assert!((averages[0].value - 75.0).abs() < f64::EPSILON);
        assert!(averages[1].value.abs() < f64::EPSILON);

        assert!((reduce(samples.clone(), range, Reducer::Sum) - 180.0).abs() < f64::EPSILON);
        assert!((reduce(samples, range, Reducer::Average) - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_distinct_count() {
        let samples = vec![
            Sample::with_subject(date(2025, 5, 1), "m-1"),
            Sample::with_subject(date(2025, 5, 2), "m-1"),
            Sample::with_subject(date(2025, 5, 2), "m-2"),
        ];
        let range = may_2025();
        let distinct = reduce(samples.clone(), range, Reducer::DistinctCount);
        assert!((distinct - 2.0).abs() < f64::EPSILON);

        let daily = aggregate(samples, range, Granularity::Day, Reducer::DistinctCount);
        assert!((daily[0].value - 1.0).abs() < f64::EPSILON);
        assert!((daily[1].value - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_series_sum_matches_scalar() {
        let samples: Vec<_> = (1..=31)
            .map(|d| Sample::new(date(2025, 5, d), f64::from(d)))
            .collect();
        let range = may_2025();
        let total = reduce(samples.clone(), range, Reducer::Sum);
        for granularity in [Granularity::Day, Granularity::Week, Granularity::Month] {
            let series: f64 = aggregate(samples.clone(), range, granularity, Reducer::Sum)
                .iter()
                .map(|b| b.value)
                .sum();
            assert!((series - total).abs() < 1e-9);
        }
    }

    #[test]
    fn test_evaluate_spans() {
        let buckets = evaluate_spans(may_2025(), Granularity::Week, |r| r.len_days() as f64);
        let lengths: Vec<f64> = buckets.iter().map(|b| b.value).collect();
        assert_eq!(lengths, vec![4.0, 7.0, 7.0, 7.0, 6.0]);
    }

    // 4. Truncation ----------------------------------------------------------------

    #[test]
    fn test_truncate_after_aggregation() {
        let samples = vec![
            Sample::new(date(2025, 5, 1), 10.0),
            Sample::new(date(2025, 5, 31), 5.0),
        ];
        let buckets = aggregate(samples, may_2025(), Granularity::Day, Reducer::Sum);
        let tail = truncate_tail(buckets.clone(), 7);
        assert_eq!(tail.len(), 7);
        assert_eq!(tail[0].key, "2025-05-25");
        assert!((tail[6].value - 5.0).abs() < f64::EPSILON);

        assert_eq!(truncate_tail(buckets.clone(), 0).len(), 31);
        assert_eq!(truncate_tail(buckets, 100).len(), 31);
    }
}
