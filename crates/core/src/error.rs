use chrono::NaiveDate;
use thiserror::Error;

pub type GymResult<T> = Result<T, GymError>;

#[derive(Error, Debug)]
pub enum GymError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Unknown granularity: {0}")]
    UnknownGranularity(String),

    #[error("Unknown KPI: {0}")]
    UnknownKpi(String),

    #[error("Unknown payment status filter: {0}")]
    UnknownStatus(String),

    #[error("Failed to fetch {source_name}: {message}")]
    DataFetch {
        source_name: String,
        message: String,
    },

    #[error("Failed to persist KPI card configuration: {0}")]
    ConfigPersist(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GymError {
    pub fn data_fetch(source_name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::DataFetch {
            source_name: source_name.into(),
            message: err.to_string(),
        }
    }

    /// Fetch failures abort the whole cycle and are worth a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DataFetch { .. })
    }
}
