//! Resolver configuration.
//!
//! Stored as a TOML file with one section per component. Every field has a
//! default, so an empty file (or no file) yields a working configuration:
//!
//! ```toml
//! [cache]
//! dir = "cache"
//! ttl_hours = 24
//!
//! [fetch]
//! requests_per_minute = 60
//! max_retries = 3
//!
//! [holidays]
//! country_code = "DE"
//!
//! [rates]
//! remote_enabled = false
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config TOML: {0}")]
    Parse(String),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration for the whole resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub holidays: HolidayConfig,
    pub rates: RateConfig,
}

impl FeatureConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_hours == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.ttl_hours",
                reason: "must be at least 1".into(),
            });
        }
        if self.fetch.requests_per_minute == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch.requests_per_minute",
                reason: "must be at least 1".into(),
            });
        }
        if self.fetch.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch.max_retries",
                reason: "must be at least 1".into(),
            });
        }
        let base = self.fetch.backoff_base;
        if !(base.is_finite() && (1.0..=MAX_BACKOFF_BASE).contains(&base)) {
            return Err(ConfigError::Invalid {
                field: "fetch.backoff_base",
                reason: format!("must be within 1.0..={MAX_BACKOFF_BASE}, got {base}"),
            });
        }
        let code = &self.holidays.country_code;
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid {
                field: "holidays.country_code",
                reason: format!("expected a two-letter ISO code, got '{code}'"),
            });
        }
        for h in &self.holidays.fallback {
            if NaiveDate::from_ymd_opt(2024, h.month, h.day).is_none() {
                return Err(ConfigError::Invalid {
                    field: "holidays.fallback",
                    reason: format!("no such calendar day {:02}-{:02}", h.month, h.day),
                });
            }
        }
        self.rates.validate()
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            ttl_hours: 24,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }
}

/// Longest wait between two attempts of one request.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Largest accepted `fetch.backoff_base`.
pub const MAX_BACKOFF_BASE: f64 = 10.0;

/// `[fetch]` section: throttling, retry and timeout settings for one fetcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub requests_per_minute: u32,
    /// Total attempts per request, including the first.
    pub max_retries: u32,
    pub backoff_base: f64,
    /// Length of one backoff unit; the delay after attempt `i` is `unit * base^i`.
    pub backoff_unit_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            max_retries: 3,
            backoff_base: 2.0,
            backoff_unit_ms: 1000,
            timeout_secs: 10,
            user_agent: concat!("featurelab/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    /// Minimum spacing between two consecutive outbound attempts.
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / f64::from(self.requests_per_minute.max(1)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed), capped at
    /// [`MAX_BACKOFF`].
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_base
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let secs = Duration::from_millis(self.backoff_unit_ms).as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs).map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }
}

/// One entry of the static holiday list: a month/day recurring every year.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixedHoliday {
    pub month: u32,
    pub day: u32,
    pub name: String,
}

impl FixedHoliday {
    fn new(month: u32, day: u32, name: &str) -> Self {
        Self {
            month,
            day,
            name: name.to_string(),
        }
    }
}

/// `[holidays]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HolidayConfig {
    pub country_code: String,
    /// Calendarific API key. The secondary provider is skipped without one.
    pub api_key: Option<String>,
    pub primary_url: String,
    pub secondary_url: String,
    /// Used when every remote provider fails.
    pub fallback: Vec<FixedHoliday>,
}

impl Default for HolidayConfig {
    fn default() -> Self {
        Self {
            country_code: "DE".into(),
            api_key: None,
            primary_url: "https://date.nager.at/api/v3/PublicHolidays".into(),
            secondary_url: "https://calendarific.com/api/v2/holidays".into(),
            fallback: default_fallback_holidays(),
        }
    }
}

/// National holidays observed everywhere in Germany, plus the two
/// customary half-days around Christmas and New Year.
pub fn default_fallback_holidays() -> Vec<FixedHoliday> {
    vec![
        FixedHoliday::new(1, 1, "New Year's Day"),
        FixedHoliday::new(5, 1, "Labour Day"),
        FixedHoliday::new(10, 3, "German Unity Day"),
        FixedHoliday::new(12, 24, "Christmas Eve"),
        FixedHoliday::new(12, 25, "Christmas Day"),
        FixedHoliday::new(12, 26, "Second Day of Christmas"),
        FixedHoliday::new(12, 31, "New Year's Eve"),
    ]
}

/// `[rates]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateConfig {
    /// Query the remote SDMX endpoint before falling back to the synthetic model.
    pub remote_enabled: bool,
    pub base_url: String,
    pub policy_rate_series: String,
    pub long_bond_series: String,
    pub money_market_series: String,
    pub policy_rate_base: f64,
    pub long_bond_base: f64,
    pub money_market_base: f64,
    /// Day zero for the synthetic model's drift and meeting schedule.
    pub anchor_date: NaiveDate,
    /// Drift in percentage points per 365 days.
    pub drift_per_year: f64,
    pub max_drift: f64,
    pub meeting_interval_days: u32,
    pub daily_noise: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            remote_enabled: false,
            base_url: "https://api.statistiken.bundesbank.de/rest/data".into(),
            policy_rate_series: "BBK01/SU0202".into(),
            long_bond_series: "BBK01/WU3706".into(),
            money_market_series: "BBK01/SU0206".into(),
            policy_rate_base: 4.50,
            long_bond_base: 2.50,
            money_market_base: 3.80,
            anchor_date: NaiveDate::from_ymd_opt(2025, 11, 1).unwrap_or_default(),
            drift_per_year: -0.1,
            max_drift: 1.0,
            meeting_interval_days: 42,
            daily_noise: 0.02,
        }
    }
}

impl RateConfig {
    /// Model parameters must be finite; levels and spreads must also be
    /// non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let params: [(&'static str, f64, bool); 6] = [
            ("rates.policy_rate_base", self.policy_rate_base, true),
            ("rates.long_bond_base", self.long_bond_base, true),
            ("rates.money_market_base", self.money_market_base, true),
            ("rates.drift_per_year", self.drift_per_year, false),
            ("rates.max_drift", self.max_drift, true),
            ("rates.daily_noise", self.daily_noise, true),
        ];
        for (field, value, non_negative) in params {
            if !value.is_finite() || (non_negative && value < 0.0) {
                let expected = if non_negative {
                    "a finite value >= 0"
                } else {
                    "a finite value"
                };
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("expected {expected}, got {value}"),
                });
            }
        }
        if self.meeting_interval_days == 0 {
            return Err(ConfigError::Invalid {
                field: "rates.meeting_interval_days",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
