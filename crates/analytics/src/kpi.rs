//! KPI computation engine.
//!
//! Each KPI is built from one sample extractor (or one per-period metric
//! function) that feeds the headline value, the baseline value and the chart
//! series alike, so the three can never disagree.

use crate::comparison::{baseline_range, growth_percent};
use crate::timeseries::{self, Bucket, Reducer, Sample};
use chrono::{Months, NaiveDate};
use gym_core::clock::Clock;
use gym_core::config::AnalyticsConfig;
use gym_core::error::GymError;
use gym_core::types::{
    DateRange, Granularity, LockerRecord, LockerStatus, MemberRecord, PaymentRecord, PaymentStatus,
    RawData, StatusFilter,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiId {
    TotalRevenue,
    PaymentCount,
    AveragePayment,
    PayingMembers,
    PtUtilization,
    NewMembers,
    ActiveMembers,
    ExpiringMemberships,
    RenewalRate,
    LockerOccupancy,
    TodayAttendance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiCategory {
    Revenue,
    Members,
    Operations,
}

impl KpiId {
    /// Canonical display order.
    pub const ALL: [KpiId; 11] = [
        KpiId::TotalRevenue,
        KpiId::PaymentCount,
        KpiId::AveragePayment,
        KpiId::PayingMembers,
        KpiId::PtUtilization,
        KpiId::NewMembers,
        KpiId::ActiveMembers,
        KpiId::ExpiringMemberships,
        KpiId::RenewalRate,
        KpiId::LockerOccupancy,
        KpiId::TodayAttendance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalRevenue => "total_revenue",
            Self::PaymentCount => "payment_count",
            Self::AveragePayment => "average_payment",
            Self::PayingMembers => "paying_members",
            Self::PtUtilization => "pt_utilization",
            Self::NewMembers => "new_members",
            Self::ActiveMembers => "active_members",
            Self::ExpiringMemberships => "expiring_memberships",
            Self::RenewalRate => "renewal_rate",
            Self::LockerOccupancy => "locker_occupancy",
            Self::TodayAttendance => "today_attendance",
        }
    }

    pub fn category(&self) -> KpiCategory {
        match self {
            Self::TotalRevenue
            | Self::PaymentCount
            | Self::AveragePayment
            | Self::PayingMembers
            | Self::PtUtilization => KpiCategory::Revenue,
            Self::NewMembers
            | Self::ActiveMembers
            | Self::ExpiringMemberships
            | Self::RenewalRate => KpiCategory::Members,
            Self::LockerOccupancy | Self::TodayAttendance => KpiCategory::Operations,
        }
    }
}

impl fmt::Display for KpiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KpiId {
    type Err = GymError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| GymError::UnknownKpi(s.to_string()))
    }
}

impl KpiCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::Members => "members",
            Self::Operations => "operations",
        }
    }
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiRequest {
    pub range: DateRange,
    pub granularity: Granularity,
    pub status_filter: StatusFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiResult {
    pub id: KpiId,
    pub value: f64,
    /// Value over the baseline period. `None` for point-in-time metrics that
    /// have no history to compare against.
    pub previous_value: Option<f64>,
    pub growth_percent: f64,
    pub series: Vec<Bucket>,
}

struct Computed {
    value: f64,
    previous: Option<f64>,
    series: Vec<Bucket>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct KpiEngine {
    config: AnalyticsConfig,
    clock: Arc<dyn Clock>,
}

impl KpiEngine {
    pub fn new(config: AnalyticsConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Compute every known KPI.
    pub fn compute_all(&self, request: &KpiRequest, data: &RawData) -> BTreeMap<KpiId, KpiResult> {
        self.compute_selected(request, data, KpiId::ALL)
    }

    /// Compute only the given KPIs, keyed by id.
    pub fn compute_selected<I>(
        &self,
        request: &KpiRequest,
        data: &RawData,
        ids: I,
    ) -> BTreeMap<KpiId, KpiResult>
    where
        I: IntoIterator<Item = KpiId>,
    {
        let results: BTreeMap<KpiId, KpiResult> = ids
            .into_iter()
            .map(|id| (id, self.compute(id, request, data)))
            .collect();

        metrics::counter!("kpi.computations").increment(results.len() as u64);
        debug!(
            range = %request.range,
            granularity = %request.granularity,
            kpis = results.len(),
            "KPI cycle computed"
        );
        results
    }

    pub fn compute(&self, id: KpiId, request: &KpiRequest, data: &RawData) -> KpiResult {
        let filter = request.status_filter;
        let payments = || data.payments.iter().filter(move |p| filter.matches(p.status));

        let computed = match id {
            KpiId::TotalRevenue => self.event_metric(
                payments().map(|p| Sample::new(p.date, p.amount)).collect(),
                Reducer::Sum,
                request,
            ),
            KpiId::PaymentCount => self.event_metric(
                payments().map(|p| Sample::new(p.date, p.amount)).collect(),
                Reducer::Count,
                request,
            ),
            KpiId::AveragePayment => self.event_metric(
                payments().map(|p| Sample::new(p.date, p.amount)).collect(),
                Reducer::Average,
                request,
            ),
            KpiId::PayingMembers => self.event_metric(
                payments()
                    .map(|p| Sample::with_subject(p.date, &p.member_id))
                    .collect(),
                Reducer::DistinctCount,
                request,
            ),
            KpiId::NewMembers => self.event_metric(
                data.members
                    .iter()
                    .map(|m| Sample::new(m.join_date, 1.0))
                    .collect(),
                Reducer::Count,
                request,
            ),
            KpiId::ExpiringMemberships => self.event_metric(
                data.members
                    .iter()
                    .map(|m| Sample::new(m.membership_end, 1.0))
                    .collect(),
                Reducer::Count,
                request,
            ),
            KpiId::ActiveMembers => {
                self.period_metric(request, |range| active_members(&data.members, range))
            }
            KpiId::PtUtilization => {
                let multiplier = self.config.pt_threshold_multiplier;
                self.period_metric(request, |range| {
                    pt_utilization(&data.payments, filter, range, multiplier)
                })
            }
            KpiId::RenewalRate => {
                let renewals = RenewalIndex::new(&data.payments);
                self.period_metric(request, |range| {
                    renewals.rate(
                        &data.members,
                        range,
                        self.config.renewal_window_months,
                        self.config.renewal_placeholder_percent,
                    )
                })
            }
            KpiId::LockerOccupancy => {
                self.snapshot_metric(locker_occupancy(&data.lockers), request)
            }
            KpiId::TodayAttendance => self.snapshot_metric(data.today_attendance as f64, request),
        };

        KpiResult {
            id,
            value: computed.value,
            previous_value: computed.previous,
            growth_percent: computed
                .previous
                .map(|previous| growth_percent(computed.value, previous))
                .unwrap_or(0.0),
            series: timeseries::truncate_tail(computed.series, self.config.series_window),
        }
    }

    // -- metric shapes ------------------------------------------------------

    /// Dated samples folded with one reducer.
    fn event_metric(
        &self,
        samples: Vec<Sample<'_>>,
        reducer: Reducer,
        request: &KpiRequest,
    ) -> Computed {
        let baseline = baseline_range(request.range);
        Computed {
            value: timeseries::reduce(samples.iter().copied(), request.range, reducer),
            previous: Some(timeseries::reduce(samples.iter().copied(), baseline, reducer)),
            series: timeseries::aggregate(samples, request.range, request.granularity, reducer),
        }
    }

    /// A metric defined over a whole period rather than per record.
    fn period_metric<F>(&self, request: &KpiRequest, metric: F) -> Computed
    where
        F: Fn(DateRange) -> f64,
    {
        Computed {
            value: metric(request.range),
            previous: Some(metric(baseline_range(request.range))),
            series: timeseries::evaluate_spans(request.range, request.granularity, &metric),
        }
    }

    /// A current-state value with no history; charted on today's bucket.
    fn snapshot_metric(&self, value: f64, request: &KpiRequest) -> Computed {
        let today = self.clock.today();
        Computed {
            value,
            previous: None,
            series: timeseries::aggregate(
                [Sample::new(today, value)],
                request.range,
                request.granularity,
                Reducer::Sum,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Derived metrics
// ---------------------------------------------------------------------------

/// Members whose membership interval overlaps `range`.
fn active_members(members: &[MemberRecord], range: DateRange) -> f64 {
    members
        .iter()
        .filter(|m| range.overlaps(m.join_date, m.membership_end))
        .count() as f64
}

/// Share of payments in `range` classified as personal training, in percent.
///
/// Heuristic: a payment is personal training when it exceeds `multiplier`
/// times the mean payment of the same period.
fn pt_utilization(
    payments: &[PaymentRecord],
    filter: StatusFilter,
    range: DateRange,
    multiplier: f64,
) -> f64 {
    let amounts: Vec<f64> = payments
        .iter()
        .filter(|p| filter.matches(p.status) && range.contains(p.date))
        .map(|p| p.amount)
        .collect();
    if amounts.is_empty() {
        return 0.0;
    }
    let mean = amounts.iter().sum::<f64>() / amounts.len() as f64;
    let threshold = mean * multiplier;
    let pt = amounts.iter().filter(|&&a| a > threshold).count();
    pt as f64 / amounts.len() as f64 * 100.0
}

fn locker_occupancy(lockers: &[LockerRecord]) -> f64 {
    if lockers.is_empty() {
        return 0.0;
    }
    let occupied = lockers
        .iter()
        .filter(|l| l.status == LockerStatus::Occupied)
        .count();
    occupied as f64 / lockers.len() as f64 * 100.0
}

/// Completed payment dates per member, used to detect renewals.
struct RenewalIndex<'a> {
    completed: HashMap<&'a str, Vec<NaiveDate>>,
}

impl<'a> RenewalIndex<'a> {
    fn new(payments: &'a [PaymentRecord]) -> Self {
        let mut completed: HashMap<&str, Vec<NaiveDate>> = HashMap::new();
        for p in payments.iter().filter(|p| p.status == PaymentStatus::Completed) {
            completed.entry(p.member_id.as_str()).or_default().push(p.date);
        }
        Self { completed }
    }

    /// Did `member_id` pay within `(ended, ended + window_months]`?
    fn renewed(&self, member_id: &str, ended: NaiveDate, window_months: u32) -> bool {
        let window_end = ended
            .checked_add_months(Months::new(window_months))
            .unwrap_or(NaiveDate::MAX);
        self.completed
            .get(member_id)
            .is_some_and(|dates| dates.iter().any(|&d| d > ended && d <= window_end))
    }

    /// Renewed / expired * 100 over memberships ending in `range`, or the
    /// placeholder when nothing expired.
    fn rate(
        &self,
        members: &[MemberRecord],
        range: DateRange,
        window_months: u32,
        placeholder: f64,
    ) -> f64 {
        let expired: Vec<&MemberRecord> = members
            .iter()
            .filter(|m| range.contains(m.membership_end))
            .collect();
        if expired.is_empty() {
            return placeholder;
        }
        let renewed = expired
            .iter()
            .filter(|m| self.renewed(&m.id, m.membership_end, window_months))
            .count();
        renewed as f64 / expired.len() as f64 * 100.0
    }
}
