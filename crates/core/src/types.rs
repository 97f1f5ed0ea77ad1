use crate::error::{GymError, GymResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Calendar ranges ────────────────────────────────────────────────────────

/// Inclusive calendar-date range. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = GymError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> GymResult<Self> {
        if start > end {
            return Err(GymError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Single-day range.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        start <= self.end && end >= self.start
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Calendar unit used both for navigation and for chart bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = GymError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" => Ok(Self::Week),
            "month" | "monthly" => Ok(Self::Month),
            "year" | "yearly" => Ok(Self::Year),
            other => Err(GymError::UnknownGranularity(other.to_string())),
        }
    }
}

/// Direction of relative period navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Prev,
    Next,
}

impl Direction {
    pub fn sign(&self) -> i32 {
        match self {
            Self::Prev => -1,
            Self::Next => 1,
        }
    }
}

// ─── Raw records ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Pending,
    Failed,
    Refunded,
}

impl FromStr for PaymentStatus {
    type Err = GymError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" | "paid" => Ok(Self::Completed),
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(GymError::UnknownStatus(other.to_string())),
        }
    }
}

/// Active payment-status filter selected in the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum StatusFilter {
    #[default]
    All,
    Only(PaymentStatus),
}

impl StatusFilter {
    pub fn matches(&self, status: PaymentStatus) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => *wanted == status,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = GymError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse().map(Self::Only)
    }
}

/// Member with the current membership window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: String,
    pub join_date: NaiveDate,
    pub membership_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub member_id: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockerStatus {
    Occupied,
    Available,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockerRecord {
    #[serde(default)]
    pub number: Option<u32>,
    pub status: LockerStatus,
}

/// One full fetch of every raw-record collection the KPI engine reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawData {
    pub members: Vec<MemberRecord>,
    pub payments: Vec<PaymentRecord>,
    pub lockers: Vec<LockerRecord>,
    pub today_attendance: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_range_rejects_inverted_bounds() {
        let err = DateRange::new(date(2025, 5, 2), date(2025, 5, 1)).unwrap_err();
        assert!(matches!(err, GymError::InvalidRange { .. }));
    }

    #[test]
    fn test_date_range_len_and_contains() {
        let range = DateRange::new(date(2024, 2, 1), date(2024, 2, 29)).unwrap();
        assert_eq!(range.len_days(), 29);
        assert!(range.contains(date(2024, 2, 29)));
        assert!(!range.contains(date(2024, 3, 1)));
        assert_eq!(DateRange::day(date(2025, 1, 1)).len_days(), 1);
    }

    #[test]
    fn test_date_range_deserialize_validates() {
        let ok: DateRange =
            serde_json::from_str(r#"{"start":"2025-05-01","end":"2025-05-31"}"#).unwrap();
        assert_eq!(ok.end(), date(2025, 5, 31));

        let bad = serde_json::from_str::<DateRange>(r#"{"start":"2025-06-01","end":"2025-05-31"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!("Month".parse::<Granularity>().unwrap(), Granularity::Month);
        assert_eq!("weekly".parse::<Granularity>().unwrap(), Granularity::Week);
        assert!("fortnight".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_status_filter() {
        let filter: StatusFilter = "completed".parse().unwrap();
        assert!(filter.matches(PaymentStatus::Completed));
        assert!(!filter.matches(PaymentStatus::Pending));
        assert!("ALL".parse::<StatusFilter>().unwrap().matches(PaymentStatus::Failed));
        assert!("bogus".parse::<StatusFilter>().is_err());
    }
}
