//! Raw-record sources the dashboard fans out to on every refresh.

use async_trait::async_trait;
use gym_core::types::{LockerRecord, MemberRecord, PaymentRecord, RawData};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait MemberSource: Send + Sync {
    async fn get_all(&self) -> anyhow::Result<Vec<MemberRecord>>;
}

#[async_trait]
pub trait PaymentSource: Send + Sync {
    async fn get_all(&self) -> anyhow::Result<Vec<PaymentRecord>>;
}

#[async_trait]
pub trait LockerSource: Send + Sync {
    async fn get_all(&self) -> anyhow::Result<Vec<LockerRecord>>;
}

#[async_trait]
pub trait AttendanceSource: Send + Sync {
    async fn today_count(&self) -> anyhow::Result<u64>;
}

/// The full set of collaborators one refresh reads from.
#[derive(Clone)]
pub struct DataSources {
    pub members: Arc<dyn MemberSource>,
    pub payments: Arc<dyn PaymentSource>,
    pub lockers: Arc<dyn LockerSource>,
    pub attendance: Arc<dyn AttendanceSource>,
}

impl DataSources {
    /// Use one backend for every collection.
    pub fn from_shared<S>(source: Arc<S>) -> Self
    where
        S: MemberSource + PaymentSource + LockerSource + AttendanceSource + 'static,
    {
        Self {
            members: source.clone(),
            payments: source.clone(),
            lockers: source.clone(),
            attendance: source,
        }
    }
}

// ─── In-memory ──────────────────────────────────────────────────────────────

/// Sources served from a `RawData` held in memory.
#[derive(Default)]
pub struct InMemorySources {
    data: RwLock<RawData>,
}

impl InMemorySources {
    pub fn new(data: RawData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn replace(&self, data: RawData) {
        *self.data.write() = data;
    }
}

#[async_trait]
impl MemberSource for InMemorySources {
    async fn get_all(&self) -> anyhow::Result<Vec<MemberRecord>> {
        Ok(self.data.read().members.clone())
    }
}

#[async_trait]
impl PaymentSource for InMemorySources {
    async fn get_all(&self) -> anyhow::Result<Vec<PaymentRecord>> {
        Ok(self.data.read().payments.clone())
    }
}

#[async_trait]
impl LockerSource for InMemorySources {
    async fn get_all(&self) -> anyhow::Result<Vec<LockerRecord>> {
        Ok(self.data.read().lockers.clone())
    }
}

#[async_trait]
impl AttendanceSource for InMemorySources {
    async fn today_count(&self) -> anyhow::Result<u64> {
        Ok(self.data.read().today_attendance)
    }
}

// ─── JSON files ─────────────────────────────────────────────────────────────

/// Sources read from `members.json`, `payments.json`, `lockers.json` and
/// `attendance.json` inside a data directory.
pub struct JsonFileSources {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct AttendanceSummary {
    today_count: u64,
}

impl JsonFileSources {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read_json<T: DeserializeOwned>(&self, file: &str) -> anyhow::Result<T> {
        let path = self.dir.join(file);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        let parsed = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Loaded data file");
        Ok(parsed)
    }
}

#[async_trait]
impl MemberSource for JsonFileSources {
    async fn get_all(&self) -> anyhow::Result<Vec<MemberRecord>> {
        self.read_json("members.json").await
    }
}

#[async_trait]
impl PaymentSource for JsonFileSources {
    async fn get_all(&self) -> anyhow::Result<Vec<PaymentRecord>> {
        self.read_json("payments.json").await
    }
}

#[async_trait]
impl LockerSource for JsonFileSources {
    async fn get_all(&self) -> anyhow::Result<Vec<LockerRecord>> {
        self.read_json("lockers.json").await
    }
}

#[async_trait]
impl AttendanceSource for JsonFileSources {
    async fn today_count(&self) -> anyhow::Result<u64> {
        let summary: AttendanceSummary = self.read_json("attendance.json").await?;
        Ok(summary.today_count)
    }
}
