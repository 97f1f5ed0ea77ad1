//! Gym KPI dashboard — card visibility, configuration persistence, raw-record
//! sources, and the fetch/compute/snapshot cycle.

pub mod cards;
pub mod dashboard;
pub mod sources;
pub mod store;

pub use cards::{KpiCardConfig, KpiCardRegistry};
pub use dashboard::{KpiDashboard, KpiSnapshot, RefreshOutcome, ViewState};
pub use sources::{DataSources, InMemorySources, JsonFileSources};
pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore};
