//! Durable storage for KPI card configuration.
//!
//! Stores hold opaque JSON blobs under a single key; merging with the
//! canonical card list is the registry's job.

use crate::cards::KpiCardConfig;
use dashmap::DashMap;
use gym_core::error::GymResult;
use std::path::PathBuf;
use tracing::debug;

pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted under `key` yet.
    fn load(&self, key: &str) -> GymResult<Option<Vec<KpiCardConfig>>>;

    fn save(&self, key: &str, cards: &[KpiCardConfig]) -> GymResult<()>;
}

/// Process-local store backed by DashMap.
#[derive(Default)]
pub struct MemoryConfigStore {
    blobs: DashMap<String, String>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw persisted blob, if any.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.blobs.get(key).map(|b| b.value().clone())
    }

    pub fn put_raw(&self, key: &str, blob: impl Into<String>) {
        self.blobs.insert(key.to_string(), blob.into());
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, key: &str) -> GymResult<Option<Vec<KpiCardConfig>>> {
        match self.blobs.get(key) {
            Some(blob) => Ok(Some(serde_json::from_str(blob.value())?)),
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, cards: &[KpiCardConfig]) -> GymResult<()> {
        let blob = serde_json::to_string(cards)?;
        self.blobs.insert(key.to_string(), blob);
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory.
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self, key: &str) -> GymResult<Option<Vec<KpiCardConfig>>> {
        let path = self.path_for(key);
        let blob = match std::fs::read_to_string(&path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&blob)?))
    }

    fn save(&self, key: &str, cards: &[KpiCardConfig]) -> GymResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(cards)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), cards = cards.len(), "KPI card configuration written");
        Ok(())
    }
}
