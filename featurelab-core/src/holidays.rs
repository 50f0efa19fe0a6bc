//! Public holiday source.
//!
//! Providers, in order:
//! - Nager.Date (free, no key): `GET {primary_url}/{year}/{country}`
//! - Calendarific (needs an API key): `GET {secondary_url}?api_key=..&country=..&year=..`
//! - Static list of fixed-date holidays from the config
//!
//! A full year is the unit of fetching and caching (`holidays_{COUNTRY}_{year}`).

use crate::cache::CacheStore;
use crate::config::{FixedHoliday, HolidayConfig};
use crate::error::FeatureError;
use crate::features::{FeatureProvider, FeatureVector};
use crate::fetch::Fetcher;
use crate::source::{resolve, Resolved, SourceChain};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const HOLIDAY_FEATURES: [&str; 4] = [
    "is_holiday",
    "days_to_next_holiday",
    "days_since_last_holiday",
    "is_holiday_week",
];

/// Distance reported when the year has no holiday on that side of the date.
pub const NO_HOLIDAY_DISTANCE: i64 = 365;

/// A date within this many days of a holiday is in a holiday week.
const HOLIDAY_WEEK_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolidayKind {
    Public,
    Regional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayRecord {
    pub date: NaiveDate,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: HolidayKind,
}

// ── Provider payloads ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NagerHoliday {
    date: NaiveDate,
    local_name: String,
    #[serde(default = "default_true")]
    global: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct CalendarificResponse {
    response: CalendarificBody,
}

#[derive(Debug, Deserialize)]
struct CalendarificBody {
    #[serde(default)]
    holidays: Vec<CalendarificHoliday>,
}

#[derive(Debug, Deserialize)]
struct CalendarificHoliday {
    name: String,
    date: CalendarificDate,
    #[serde(rename = "type", default)]
    kinds: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarificDate {
    iso: String,
}

/// Normalize a Nager.Date `PublicHolidays` response.
pub fn parse_nager(body: Value) -> Result<Vec<HolidayRecord>, FeatureError> {
    let raw: Vec<NagerHoliday> = serde_json::from_value(body).map_err(|e| FeatureError::Malformed {
        provider: "nager.date".into(),
        reason: e.to_string(),
    })?;
    let mut records: Vec<HolidayRecord> = raw
        .into_iter()
        .map(|h| HolidayRecord {
            date: h.date,
            name: h.local_name,
            kind: if h.global {
                HolidayKind::Public
            } else {
                HolidayKind::Regional
            },
        })
        .collect();
    records.sort_by_key(|h| h.date);
    Ok(records)
}

/// Normalize a Calendarific `holidays` response.
///
/// `date.iso` may carry a time and offset; only the date part is kept.
pub fn parse_calendarific(body: Value) -> Result<Vec<HolidayRecord>, FeatureError> {
    let malformed = |reason: String| FeatureError::Malformed {
        provider: "calendarific".into(),
        reason,
    };
    let raw: CalendarificResponse =
        serde_json::from_value(body).map_err(|e| malformed(e.to_string()))?;

    let mut records = Vec::with_capacity(raw.response.holidays.len());
    for h in raw.response.holidays {
        let iso = h.date.iso.get(..10).unwrap_or(&h.date.iso);
        let date = NaiveDate::parse_from_str(iso, "%Y-%m-%d")
            .map_err(|e| malformed(format!("bad date '{}': {e}", h.date.iso)))?;
        let regional = h
            .kinds
            .first()
            .is_some_and(|k| k.to_ascii_lowercase().contains("local"));
        records.push(HolidayRecord {
            date,
            name: h.name,
            kind: if regional {
                HolidayKind::Regional
            } else {
                HolidayKind::Public
            },
        });
    }
    records.sort_by_key(|h| h.date);
    Ok(records)
}

/// Expand the fixed list for `year`. Days that do not exist that year
/// (Feb 29) are skipped.
pub fn fallback_holidays(list: &[FixedHoliday], year: i32) -> Vec<HolidayRecord> {
    let mut records: Vec<HolidayRecord> = list
        .iter()
        .filter_map(|h| {
            NaiveDate::from_ymd_opt(year, h.month, h.day).map(|date| HolidayRecord {
                date,
                name: h.name.clone(),
                kind: HolidayKind::Public,
            })
        })
        .collect();
    records.sort_by_key(|h| h.date);
    records
}

/// Holiday features for `date` given that year's holiday list.
pub fn holiday_features(holidays: &[HolidayRecord], date: NaiveDate) -> FeatureVector {
    let is_holiday = holidays.iter().any(|h| h.date == date);

    let days_to_next = holidays
        .iter()
        .filter(|h| h.date >= date)
        .map(|h| (h.date - date).num_days())
        .min()
        .unwrap_or(NO_HOLIDAY_DISTANCE);

    let days_since_last = holidays
        .iter()
        .filter(|h| h.date <= date)
        .map(|h| (date - h.date).num_days())
        .min()
        .unwrap_or(NO_HOLIDAY_DISTANCE);

    let holiday_week = days_to_next <= HOLIDAY_WEEK_DAYS || days_since_last <= HOLIDAY_WEEK_DAYS;

    FeatureVector::from_pairs(&[
        ("is_holiday", if is_holiday { 1.0 } else { 0.0 }),
        ("days_to_next_holiday", days_to_next as f64),
        ("days_since_last_holiday", days_since_last as f64),
        ("is_holiday_week", if holiday_week { 1.0 } else { 0.0 }),
    ])
}

// ── Source ──────────────────────────────────────────────────────────

/// Holiday feature source for one country.
pub struct HolidaySource {
    config: HolidayConfig,
    country: String,
    fetcher: Fetcher,
    cache: Arc<CacheStore>,
}

impl HolidaySource {
    pub fn new(config: HolidayConfig, fetcher: Fetcher, cache: Arc<CacheStore>) -> Self {
        let country = config.country_code.to_ascii_uppercase();
        Self {
            config,
            country,
            fetcher,
            cache,
        }
    }

    pub fn country_code(&self) -> &str {
        &self.country
    }

    /// Outbound requests made by this source's fetcher.
    pub fn request_count(&self) -> u64 {
        self.fetcher.request_count()
    }

    /// The year's holidays along with the chain step that produced them.
    pub fn resolve_year(&self, year: i32) -> Resolved<HolidayRecord> {
        let mut resolved = resolve(self, &self.cache, &year);
        resolved.records.sort_by_key(|h| h.date);
        resolved
    }

    /// The year's holidays, sorted by date. Empty only if every step,
    /// including the static list, came up empty.
    pub fn holidays(&self, year: i32) -> Vec<HolidayRecord> {
        self.resolve_year(year).records
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays(date.year()).iter().any(|h| h.date == date)
    }

    /// Holiday features for `date`, looking only at `date`'s year.
    pub fn features(&self, date: NaiveDate) -> FeatureVector {
        holiday_features(&self.holidays(date.year()), date)
    }
}

impl SourceChain for HolidaySource {
    type Query = i32;
    type Record = HolidayRecord;

    fn name(&self) -> &'static str {
        "holidays"
    }

    fn cache_key(&self, year: &i32) -> String {
        format!("holidays_{}_{year}", self.country)
    }

    fn fetch_primary(&self, year: &i32) -> Option<Result<Vec<HolidayRecord>, FeatureError>> {
        let url = format!(
            "{}/{year}/{}",
            self.config.primary_url.trim_end_matches('/'),
            self.country
        );
        Some(
            self.fetcher
                .fetch(&url)
                .ok_or_else(|| FeatureError::NoData {
                    source_name: "nager.date".into(),
                    detail: format!("{} {year}", self.country),
                })
                .and_then(parse_nager),
        )
    }

    fn fetch_secondary(&self, year: &i32) -> Option<Result<Vec<HolidayRecord>, FeatureError>> {
        let api_key = self.config.api_key.as_deref().filter(|k| !k.is_empty())?;
        let url = format!(
            "{}?api_key={api_key}&country={}&year={year}",
            self.config.secondary_url, self.country
        );
        Some(
            self.fetcher
                .fetch(&url)
                .ok_or_else(|| FeatureError::NoData {
                    source_name: "calendarific".into(),
                    detail: format!("{} {year}", self.country),
                })
                .and_then(parse_calendarific),
        )
    }

    fn static_fallback(&self, year: &i32) -> Vec<HolidayRecord> {
        fallback_holidays(&self.config.fallback, *year)
    }
}

impl FeatureProvider for HolidaySource {
    fn name(&self) -> &'static str {
        "holidays"
    }

    fn feature_names(&self) -> Vec<&'static str> {
        HOLIDAY_FEATURES.to_vec()
    }

    fn features(&self, date: NaiveDate) -> Result<FeatureVector, FeatureError> {
        Ok(HolidaySource::features(self, date))
    }

    fn fallback_features(&self) -> FeatureVector {
        FeatureVector::from_pairs(&[
            ("is_holiday", 0.0),
            ("days_to_next_holiday", 30.0),
            ("days_since_last_holiday", 30.0),
            ("is_holiday_week", 0.0),
        ])
    }

    /// One fetch per distinct year in the range.
    fn prefetch(&self, start: NaiveDate, end: NaiveDate) -> Result<(), FeatureError> {
        for year in start.year()..=end.year() {
            self.resolve_year(year);
        }
        Ok(())
    }
}
