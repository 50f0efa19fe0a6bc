//! FeatureLab Core — cached, fault-tolerant external features for forecasting.
//!
//! This crate contains the feature resolver:
//! - File-backed JSON cache with TTL invalidation
//! - Rate-limited, retrying HTTP fetcher behind a `Transport` seam
//! - Fallback-chain resolution (cache → primary → secondary → static)
//! - Holiday and interest-rate sources plus calendar features
//! - Orchestrator merging every group into one vector per date

pub mod cache;
pub mod calendar;
pub mod config;
pub mod error;
pub mod features;
pub mod fetch;
pub mod holidays;
pub mod orchestrator;
pub mod rates;
pub mod source;

pub use cache::{CacheEntry, CacheStats, CacheStore};
pub use calendar::{calendar_features, CALENDAR_FEATURES};
pub use config::{
    CacheConfig, ConfigError, FeatureConfig, FetchConfig, FixedHoliday, HolidayConfig, RateConfig,
};
pub use error::{FeatureError, FetchError};
pub use features::{FeatureProvider, FeatureRow, FeatureTable, FeatureVector};
pub use fetch::{Fetcher, HttpTransport, Transport};
pub use holidays::{HolidayKind, HolidayRecord, HolidaySource, HOLIDAY_FEATURES};
pub use orchestrator::FeatureOrchestrator;
pub use rates::{DateRange, RatePoint, RateSource, RATE_FEATURES};
pub use source::{resolve, Provenance, Resolved, SourceChain};
