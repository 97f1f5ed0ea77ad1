//! KPI card registry — which dashboard cards are enabled, in what order, and
//! how that choice survives restarts.

use crate::store::ConfigStore;
use gym_analytics::kpi::KpiId;
use gym_core::error::{GymError, GymResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiCardConfig {
    pub id: String,
    pub category: String,
    pub enabled: bool,
    pub order: u32,
}

/// Canonical card list, every card enabled.
pub fn default_cards() -> Vec<KpiCardConfig> {
    KpiId::ALL
        .iter()
        .zip(0u32..)
        .map(|(id, order)| KpiCardConfig {
            id: id.as_str().to_string(),
            category: id.category().as_str().to_string(),
            enabled: true,
            order,
        })
        .collect()
}

/// Start from `defaults` and copy only the `enabled` flag of every persisted
/// card that still exists. Unknown persisted ids are dropped; cards missing
/// from storage keep their default.
pub fn merge_with_defaults(
    defaults: &[KpiCardConfig],
    persisted: &[KpiCardConfig],
) -> Vec<KpiCardConfig> {
    let stored: HashMap<&str, bool> = persisted
        .iter()
        .map(|c| (c.id.as_str(), c.enabled))
        .collect();

    defaults
        .iter()
        .map(|card| KpiCardConfig {
            enabled: stored.get(card.id.as_str()).copied().unwrap_or(card.enabled),
            ..card.clone()
        })
        .collect()
}

pub struct KpiCardRegistry {
    cards: RwLock<Vec<KpiCardConfig>>,
    store: Arc<dyn ConfigStore>,
    key: String,
}

impl KpiCardRegistry {
    /// Registry holding the canonical defaults; nothing is read from storage.
    pub fn new(store: Arc<dyn ConfigStore>, key: impl Into<String>) -> Self {
        Self {
            cards: RwLock::new(default_cards()),
            store,
            key: key.into(),
        }
    }

    /// Registry initialised from storage.
    pub fn open(store: Arc<dyn ConfigStore>, key: impl Into<String>) -> Self {
        let registry = Self::new(store, key);
        registry.load();
        registry
    }

    /// Reload from storage, merged with the canonical defaults. Unreadable
    /// storage falls back to the defaults.
    pub fn load(&self) -> Vec<KpiCardConfig> {
        let defaults = default_cards();
        let merged = match self.store.load(&self.key) {
            Ok(Some(persisted)) => merge_with_defaults(&defaults, &persisted),
            Ok(None) => defaults,
            Err(e) => {
                warn!(
                    key = %self.key,
                    error = %e,
                    "Unreadable KPI card configuration, using defaults"
                );
                defaults
            }
        };
        *self.cards.write() = merged.clone();
        info!(
            key = %self.key,
            enabled = merged.iter().filter(|c| c.enabled).count(),
            total = merged.len(),
            "KPI card configuration loaded"
        );
        merged
    }

    /// Replace the configuration and persist it.
    pub fn save(&self, cards: &[KpiCardConfig]) -> GymResult<()> {
        let merged = merge_with_defaults(&default_cards(), cards);
        *self.cards.write() = merged.clone();
        self.persist(&merged)
    }

    pub fn cards(&self) -> Vec<KpiCardConfig> {
        self.cards.read().clone()
    }

    /// Enabled cards in display order.
    pub fn enabled_cards(&self) -> Vec<KpiCardConfig> {
        let mut enabled: Vec<KpiCardConfig> =
            self.cards.read().iter().filter(|c| c.enabled).cloned().collect();
        enabled.sort_by_key(|c| c.order);
        enabled
    }

    pub fn enabled_kpis(&self) -> Vec<KpiId> {
        self.enabled_cards()
            .iter()
            .filter_map(|c| c.id.parse().ok())
            .collect()
    }

    /// Flip one card. Returns the new state.
    pub fn toggle(&self, id: &str) -> GymResult<bool> {
        let (enabled, snapshot) = {
            let mut cards = self.cards.write();
            let card = cards
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| GymError::UnknownKpi(id.to_string()))?;
            card.enabled = !card.enabled;
            (card.enabled, cards.clone())
        };
        self.persist(&snapshot)?;
        Ok(enabled)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> GymResult<()> {
        let snapshot = {
            let mut cards = self.cards.write();
            let card = cards
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| GymError::UnknownKpi(id.to_string()))?;
            card.enabled = enabled;
            cards.clone()
        };
        self.persist(&snapshot)
    }

    pub fn toggle_all(&self, enabled: bool) -> GymResult<()> {
        let snapshot = {
            let mut cards = self.cards.write();
            for card in cards.iter_mut() {
                card.enabled = enabled;
            }
            cards.clone()
        };
        self.persist(&snapshot)
    }

    /// Set every card of `category`. Returns how many cards matched.
    pub fn toggle_category(&self, category: &str, enabled: bool) -> GymResult<usize> {
        let (matched, snapshot) = {
            let mut cards = self.cards.write();
            let mut matched = 0;
            for card in cards.iter_mut().filter(|c| c.category == category) {
                card.enabled = enabled;
                matched += 1;
            }
            (matched, cards.clone())
        };
        if matched == 0 {
            warn!(category, "No KPI cards in category");
            return Ok(0);
        }
        self.persist(&snapshot)?;
        Ok(matched)
    }

    // In-memory state stays authoritative when the write fails.
    fn persist(&self, cards: &[KpiCardConfig]) -> GymResult<()> {
        self.store.save(&self.key, cards).map_err(|e| {
            metrics::counter!("kpi.config_persist_errors").increment(1);
            warn!(key = %self.key, error = %e, "Failed to persist KPI card configuration");
            GymError::ConfigPersist(e.to_string())
        })
    }
}
