//! KPI dashboard orchestration.
//!
//! A refresh fans out to every raw-record source, waits for all of them, and
//! only then computes one immutable [`KpiSnapshot`] that replaces the previous
//! one wholesale. Every trigger (refresh or view change) bumps a generation
//! counter; a refresh whose generation is no longer the latest when it
//! finishes is discarded instead of overwriting newer state.

use crate::cards::{KpiCardConfig, KpiCardRegistry};
use crate::sources::DataSources;
use chrono::{DateTime, Utc};
use gym_analytics::calendar;
use gym_analytics::kpi::{KpiEngine, KpiId, KpiRequest, KpiResult};
use gym_core::clock::Clock;
use gym_core::config::AppConfig;
use gym_core::error::{GymError, GymResult};
use gym_core::types::{DateRange, Direction, Granularity, RawData, StatusFilter};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What the dashboard is currently looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub range: DateRange,
    pub granularity: Granularity,
    pub status_filter: StatusFilter,
}

impl ViewState {
    pub fn request(&self) -> KpiRequest {
        KpiRequest {
            range: self.range,
            granularity: self.granularity,
            status_filter: self.status_filter,
        }
    }
}

/// Result of one full computation cycle. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct KpiSnapshot {
    pub generation: u64,
    pub view: ViewState,
    pub computed_at: DateTime<Utc>,
    pub results: BTreeMap<KpiId, KpiResult>,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Applied(Arc<KpiSnapshot>),
    /// A newer trigger happened while this refresh was in flight.
    Superseded { generation: u64, latest: u64 },
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

pub struct KpiDashboard {
    sources: DataSources,
    engine: KpiEngine,
    registry: Arc<KpiCardRegistry>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    view: RwLock<ViewState>,
    generation: AtomicU64,
    snapshot: RwLock<Option<Arc<KpiSnapshot>>>,
    last_error: RwLock<Option<String>>,
}

impl KpiDashboard {
    /// Dashboard anchored on today at the configured default granularity.
    pub fn new(
        config: &AppConfig,
        sources: DataSources,
        registry: Arc<KpiCardRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let granularity = config.analytics.default_granularity;
        let view = ViewState {
            range: calendar::anchor_range(granularity, clock.today()),
            granularity,
            status_filter: StatusFilter::All,
        };
        info!(range = %view.range, %granularity, "KPI dashboard initialized");

        Self {
            sources,
            engine: KpiEngine::new(config.analytics.clone(), clock.clone()),
            registry,
            clock,
            fetch_timeout: Duration::from_millis(config.dashboard.fetch_timeout_ms),
            view: RwLock::new(view),
            generation: AtomicU64::new(0),
            snapshot: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    // ─── View state ─────────────────────────────────────────────────────────

    pub fn view(&self) -> ViewState {
        *self.view.read()
    }

    /// Move to the adjacent period and adopt `granularity`.
    pub fn navigate(&self, granularity: Granularity, direction: Direction) -> DateRange {
        let range = {
            let mut view = self.view.write();
            view.range = calendar::relative_range(granularity, direction, view.range.start());
            view.granularity = granularity;
            view.range
        };
        self.bump();
        range
    }

    /// Like [`navigate`](Self::navigate) with a granularity name. Unknown
    /// names leave the view untouched and return the current range.
    pub fn navigate_named(&self, granularity: &str, direction: Direction) -> DateRange {
        match granularity.parse::<Granularity>() {
            Ok(granularity) => self.navigate(granularity, direction),
            Err(_) => calendar::relative_range_named(granularity, direction, self.view().range),
        }
    }

    pub fn set_range(&self, range: DateRange) {
        self.view.write().range = range;
        self.bump();
    }

    /// Switch granularity, re-anchoring on the current range start.
    pub fn set_granularity(&self, granularity: Granularity) -> DateRange {
        let range = {
            let mut view = self.view.write();
            view.range = calendar::anchor_range(granularity, view.range.start());
            view.granularity = granularity;
            view.range
        };
        self.bump();
        range
    }

    pub fn set_status_filter(&self, status_filter: StatusFilter) {
        self.view.write().status_filter = status_filter;
        self.bump();
    }

    /// Anchor the current granularity on today's date.
    pub fn reset_to_today(&self) -> DateRange {
        let today = self.clock.today();
        let range = {
            let mut view = self.view.write();
            view.range = calendar::anchor_range(view.granularity, today);
            view.range
        };
        self.bump();
        range
    }

    // ─── Computation ────────────────────────────────────────────────────────

    /// Fetch everything, compute the enabled KPIs, and swap in the new
    /// snapshot unless a newer trigger arrived meanwhile.
    pub async fn refresh(&self) -> GymResult<RefreshOutcome> {
        let generation = self.bump();
        let view = self.view();
        debug!(generation, range = %view.range, "KPI refresh started");

        let data = match self.fetch_all().await {
            Ok(data) => data,
            Err(e) => {
                metrics::counter!("kpi.fetch_errors").increment(1);
                error!(error = %e, generation, "KPI data fetch failed, keeping previous snapshot");
                let _slot = self.snapshot.write();
                if self.generation.load(Ordering::SeqCst) == generation {
                    *self.last_error.write() = Some(e.to_string());
                }
                return Err(e);
            }
        };

        let snapshot = Arc::new(KpiSnapshot {
            generation,
            view,
            computed_at: self.clock.now(),
            results: self.compute_all(&view, &data),
        });

        {
            let mut slot = self.snapshot.write();
            let latest = self.generation.load(Ordering::SeqCst);
            if latest != generation {
                metrics::counter!("kpi.stale_discarded").increment(1);
                warn!(generation, latest, "Discarding stale KPI refresh");
                return Ok(RefreshOutcome::Superseded { generation, latest });
            }
            *slot = Some(snapshot.clone());
            *self.last_error.write() = None;
        }

        metrics::counter!("kpi.cycles").increment(1);
        info!(
            generation,
            range = %view.range,
            granularity = %view.granularity,
            kpis = snapshot.results.len(),
            "KPI snapshot applied"
        );
        Ok(RefreshOutcome::Applied(snapshot))
    }

    /// Compute the enabled KPIs for `view` over already-fetched data.
    pub fn compute_all(&self, view: &ViewState, data: &RawData) -> BTreeMap<KpiId, KpiResult> {
        self.engine
            .compute_selected(&view.request(), data, self.registry.enabled_kpis())
    }

    pub fn snapshot(&self) -> Option<Arc<KpiSnapshot>> {
        self.snapshot.read().clone()
    }

    /// Message of the last failed refresh, cleared by the next successful one.
    /// Both transitions happen under the snapshot lock and only for the latest
    /// generation.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // ─── Cards ──────────────────────────────────────────────────────────────

    pub fn set_card_enabled(&self, id: &str, enabled: bool) -> GymResult<()> {
        self.registry.set_enabled(id, enabled)
    }

    pub fn enabled_cards(&self) -> Vec<KpiCardConfig> {
        self.registry.enabled_cards()
    }

    pub fn registry(&self) -> &KpiCardRegistry {
        &self.registry
    }

    // -- internal helpers ---------------------------------------------------

    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// All sources concurrently; the first failure aborts the whole fetch.
    async fn fetch_all(&self) -> GymResult<RawData> {
        let fetch = async {
            tokio::try_join!(
                async {
                    self.sources
                        .members
                        .get_all()
                        .await
                        .map_err(|e| GymError::data_fetch("members", e))
                },
                async {
                    self.sources
                        .payments
                        .get_all()
                        .await
                        .map_err(|e| GymError::data_fetch("payments", e))
                },
                async {
                    self.sources
                        .lockers
                        .get_all()
                        .await
                        .map_err(|e| GymError::data_fetch("lockers", e))
                },
                async {
                    self.sources
                        .attendance
                        .today_count()
                        .await
                        .map_err(|e| GymError::data_fetch("attendance", e))
                },
            )
        };

        let (members, payments, lockers, today_attendance) =
            tokio::time::timeout(self.fetch_timeout, fetch)
                .await
                .map_err(|_| {
                    GymError::data_fetch(
                        "sources",
                        format!("timed out after {}ms", self.fetch_timeout.as_millis()),
                    )
                })??;

        Ok(RawData {
            members,
            payments,
            lockers,
            today_attendance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{InMemorySources, PaymentSource};
    use crate::store::MemoryConfigStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use gym_core::clock::FixedClock;
    use gym_core::types::{PaymentRecord, PaymentStatus};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Notify;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn payment(amount: f64, d: NaiveDate) -> PaymentRecord {
        PaymentRecord {
            member_id: "m-1".to_string(),
            amount,
            date: d,
            status: PaymentStatus::Completed,
        }
    }

    fn dashboard_with(sources: DataSources) -> KpiDashboard {
        dashboard_with_config(&AppConfig::default(), sources)
    }

    fn dashboard_with_config(config: &AppConfig, sources: DataSources) -> KpiDashboard {
        let registry = Arc::new(KpiCardRegistry::new(Arc::new(MemoryConfigStore::new()), "cards"));
        KpiDashboard::new(
            config,
            sources,
            registry,
            Arc::new(FixedClock::new(date(2025, 5, 15))),
        )
    }

    fn in_memory(data: RawData) -> DataSources {
        DataSources::from_shared(Arc::new(InMemorySources::new(data)))
    }

    /// Payments source that fails once `broken` is set.
    #[derive(Default)]
    struct FlakyPayments {
        broken: AtomicBool,
    }

    #[async_trait]
    impl PaymentSource for FlakyPayments {
        async fn get_all(&self) -> anyhow::Result<Vec<PaymentRecord>> {
            if self.broken.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            Ok(vec![payment(10.0, date(2025, 5, 1))])
        }
    }

    /// Payments source that outlasts a short fetch timeout once `slow` is set.
    #[derive(Default)]
    struct SlowPayments {
        slow: AtomicBool,
    }

    #[async_trait]
    impl PaymentSource for SlowPayments {
        async fn get_all(&self) -> anyhow::Result<Vec<PaymentRecord>> {
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(vec![payment(10.0, date(2025, 5, 1))])
        }
    }

    /// Payments source whose first call parks until released and then fails.
    #[derive(Default)]
    struct StalledPayments {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl PaymentSource for StalledPayments {
        async fn get_all(&self) -> anyhow::Result<Vec<PaymentRecord>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
                anyhow::bail!("upstream reset");
            }
            Ok(vec![payment(10.0, date(2025, 5, 1))])
        }
    }

    // 1. Navigation --------------------------------------------------------------

    #[test]
    fn test_initial_view_is_current_month() {
        let dash = dashboard_with(in_memory(RawData::default()));
        let view = dash.view();
        assert_eq!(view.granularity, Granularity::Month);
        assert_eq!(view.range, DateRange::new(date(2025, 5, 1), date(2025, 5, 31)).unwrap());
    }

    #[test]
    fn test_navigate_and_reset() {
        let dash = dashboard_with(in_memory(RawData::default()));

        let next = dash.navigate(Granularity::Month, Direction::Next);
        assert_eq!(next, DateRange::new(date(2025, 6, 1), date(2025, 6, 30)).unwrap());

        let week = dash.set_granularity(Granularity::Week);
        assert_eq!(week, DateRange::new(date(2025, 5, 26), date(2025, 6, 1)).unwrap());

        let prev = dash.navigate(Granularity::Week, Direction::Prev);
        assert_eq!(prev, DateRange::new(date(2025, 5, 19), date(2025, 5, 25)).unwrap());

        let today = dash.reset_to_today();
        assert_eq!(today, DateRange::new(date(2025, 5, 12), date(2025, 5, 18)).unwrap());
    }

    #[test]
    fn test_navigate_named_unknown_is_identity() {
        let dash = dashboard_with(in_memory(RawData::default()));
        let before = dash.view();
        assert_eq!(dash.navigate_named("quarter", Direction::Next), before.range);
        assert_eq!(dash.view(), before);

        let next = dash.navigate_named("year", Direction::Next);
        assert_eq!(next, DateRange::new(date(2026, 1, 1), date(2026, 12, 31)).unwrap());
        assert_eq!(dash.view().granularity, Granularity::Year);
    }

    // 2. Refresh -----------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_applies_snapshot() {
        let dash = dashboard_with(in_memory(RawData {
            payments: vec![payment(80.0, date(2025, 5, 2)), payment(20.0, date(2025, 5, 9))],
            ..RawData::default()
        }));

        let outcome = dash.refresh().await.unwrap();
        let RefreshOutcome::Applied(snapshot) = outcome else {
            panic!("expected applied snapshot");
        };
        assert_eq!(snapshot.results.len(), KpiId::ALL.len());
        assert!((snapshot.results[&KpiId::TotalRevenue].value - 100.0).abs() < f64::EPSILON);
        assert_eq!(dash.snapshot().unwrap().generation, snapshot.generation);
        assert!(dash.last_error().is_none());
    }

    #[tokio::test]
    async fn test_refresh_only_computes_enabled_cards() {
        let dash = dashboard_with(in_memory(RawData::default()));
        dash.registry().toggle_all(false).unwrap();
        dash.set_card_enabled("locker_occupancy", true).unwrap();

        let RefreshOutcome::Applied(snapshot) = dash.refresh().await.unwrap() else {
            panic!("expected applied snapshot");
        };
        assert_eq!(
            snapshot.results.keys().copied().collect::<Vec<_>>(),
            vec![KpiId::LockerOccupancy]
        );
        assert_eq!(dash.enabled_cards().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_previous_snapshot() {
        let flaky = Arc::new(FlakyPayments::default());
        let mut sources = in_memory(RawData::default());
        sources.payments = flaky.clone();
        let dash = dashboard_with(sources);

        dash.refresh().await.unwrap();
        let before = dash.snapshot().unwrap();

        flaky.broken.store(true, Ordering::SeqCst);
        let err = dash.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            GymError::DataFetch { ref source_name, .. } if source_name == "payments"
        ));
        assert!(err.is_retryable());
        assert_eq!(dash.snapshot().unwrap().generation, before.generation);
        assert!(dash.last_error().unwrap().contains("connection refused"));

        flaky.broken.store(false, Ordering::SeqCst);
        dash.refresh().await.unwrap();
        assert!(dash.last_error().is_none());
        assert!(dash.snapshot().unwrap().generation > before.generation);
    }

    // 3. Fetch failures ------------------------------------------------------------

    #[tokio::test]
    async fn test_fetch_timeout_is_data_fetch_failure() {
        let slow = Arc::new(SlowPayments::default());
        let mut sources = in_memory(RawData::default());
        sources.payments = slow.clone();
        let mut config = AppConfig::default();
        config.dashboard.fetch_timeout_ms = 20;
        let dash = dashboard_with_config(&config, sources);

        dash.refresh().await.unwrap();
        let before = dash.snapshot().unwrap();

        slow.slow.store(true, Ordering::SeqCst);
        let err = dash.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            GymError::DataFetch { ref source_name, .. } if source_name == "sources"
        ));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out after 20ms"));
        assert_eq!(dash.snapshot().unwrap().generation, before.generation);
        assert!(dash.last_error().unwrap().contains("timed out"));
        assert!(dash.generation() > before.generation);
    }

    #[tokio::test]
    async fn test_superseded_failure_does_not_set_error() {
        let stalled = Arc::new(StalledPayments::default());
        let mut sources = in_memory(RawData::default());
        sources.payments = stalled.clone();
        let dash = Arc::new(dashboard_with(sources));

        let older = tokio::spawn({
            let dash = dash.clone();
            async move { dash.refresh().await }
        });
        stalled.entered.notified().await;

        let RefreshOutcome::Applied(fresh) = dash.refresh().await.unwrap() else {
            panic!("expected applied snapshot");
        };
        stalled.release.notify_one();

        let err = older.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("upstream reset"));
        assert!(dash.last_error().is_none());
        assert_eq!(dash.snapshot().unwrap().generation, fresh.generation);
        assert_eq!(dash.generation(), fresh.generation);
    }
}
