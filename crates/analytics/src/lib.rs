//! Gym KPI analytics — calendar navigation, period comparison, gap-filled
//! time series, and the KPI computation engine.

pub mod calendar;
pub mod comparison;
pub mod kpi;
pub mod timeseries;

pub use calendar::{anchor_range, relative_range};
pub use comparison::{baseline_range, growth_percent};
pub use kpi::{KpiCategory, KpiEngine, KpiId, KpiRequest, KpiResult};
pub use timeseries::{aggregate, Bucket, Reducer, Sample};
