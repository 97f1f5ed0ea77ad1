pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use error::{GymError, GymResult};
pub use types::{DateRange, Direction, Granularity, RawData, StatusFilter};
