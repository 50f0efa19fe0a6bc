//! Interest-rate source.
//!
//! Three daily series: the ECB policy rate, the 10-year Bund yield and the
//! 3-month money-market rate. A date range is the unit of fetching and
//! caching (`rates_{YYYYMMDD}_{YYYYMMDD}`).
//!
//! The remote provider (Bundesbank SDMX REST) is off unless
//! `rates.remote_enabled` is set; the synthetic model below is the normal
//! source of values.
//!
//! # Synthetic model
//!
//! Every value is a pure function of its date, so any window over the same
//! dates yields the same numbers:
//!
//! ```text
//! level = base + w_drift * drift + w_step * step + noise
//! drift = clamp(drift_per_year * days_since_anchor / 365, ±max_drift)
//! step  = U(-0.15, 0.05), redrawn at every "meeting" (every 42 days from the anchor)
//! noise = U(±daily_noise * w_noise)
//! ```
//!
//! Weights `(w_drift, w_step, w_noise)`: policy `(1, 1, 1)`, long bond
//! `(0.5, 0.3, 2)`, money market `(0.8, 0.7, 1.5)`. Values are clamped at
//! zero and rounded to two decimals.

use crate::cache::CacheStore;
use crate::config::RateConfig;
use crate::error::FeatureError;
use crate::features::{FeatureProvider, FeatureVector};
use crate::fetch::Fetcher;
use crate::source::{resolve, Provenance, Resolved, SourceChain};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

pub const RATE_FEATURES: [&str; 6] = [
    "policy_rate",
    "long_bond",
    "money_market",
    "rate_trend_7d",
    "rate_trend_30d",
    "rate_volatility",
];

/// Calendar days of history fetched before the feature date.
pub const LOOKBACK_DAYS: i64 = 30;

const SHORT_TREND_POINTS: usize = 7;
const LONG_TREND_POINTS: usize = 30;
const VOLATILITY_POINTS: usize = 30;
const DEFAULT_VOLATILITY: f64 = 0.05;

const MEETING_STEP_LOW: f64 = -0.15;
const MEETING_STEP_HIGH: f64 = 0.05;

/// One day of all three series, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatePoint {
    pub date: NaiveDate,
    pub policy_rate: f64,
    pub long_bond: f64,
    pub money_market: f64,
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, FeatureError> {
        if start > end {
            return Err(FeatureError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn covers(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Values used when no rate history is available at all.
pub fn fallback_rate_features() -> FeatureVector {
    FeatureVector::from_pairs(&[
        ("policy_rate", 4.50),
        ("long_bond", 2.50),
        ("money_market", 3.80),
        ("rate_trend_7d", 0.0),
        ("rate_trend_30d", 0.0),
        ("rate_volatility", DEFAULT_VOLATILITY),
    ])
}

/// Rate features for `date` from a window of points sorted by date.
///
/// The current point is the last one on or before `date`; trends compare it
/// with the point 7 (30) observations back, counting the current one.
pub fn rate_features(window: &[RatePoint], date: NaiveDate) -> FeatureVector {
    let Some(first) = window.first() else {
        return fallback_rate_features();
    };

    let history: Vec<&RatePoint> = window.iter().filter(|p| p.date <= date).collect();
    let n = history.len();
    let current = history.last().copied().unwrap_or(first);

    let trend = |points: usize| {
        if n >= points {
            current.policy_rate - history[n - points].policy_rate
        } else {
            0.0
        }
    };

    let volatility = if n >= VOLATILITY_POINTS {
        let tail: Vec<f64> = history[n - VOLATILITY_POINTS..]
            .iter()
            .map(|p| p.policy_rate)
            .collect();
        sample_std(&tail)
    } else {
        DEFAULT_VOLATILITY
    };

    FeatureVector::from_pairs(&[
        ("policy_rate", current.policy_rate),
        ("long_bond", current.long_bond),
        ("money_market", current.money_market),
        ("rate_trend_7d", trend(SHORT_TREND_POINTS)),
        ("rate_trend_30d", trend(LONG_TREND_POINTS)),
        ("rate_volatility", volatility),
    ])
}

/// Sample standard deviation (n - 1 denominator).
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

// ── Synthetic model ─────────────────────────────────────────────────

/// Deterministic RNG for `(tag, index)`, seeded through BLAKE3.
fn seeded_rng(tag: &str, index: i64) -> StdRng {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tag.as_bytes());
    hasher.update(&index.to_le_bytes());
    StdRng::from_seed(*hasher.finalize().as_bytes())
}

fn round2(x: f64) -> f64 {
    (x.max(0.0) * 100.0).round() / 100.0
}

/// Width of a symmetric interval; non-finite widths collapse to zero.
fn spread(x: f64) -> f64 {
    if x.is_finite() {
        x.abs()
    } else {
        0.0
    }
}

/// The synthetic point for a single date.
pub fn synthetic_point(config: &RateConfig, date: NaiveDate) -> RatePoint {
    let days = (date - config.anchor_date).num_days();
    let max_drift = spread(config.max_drift);
    let drift = (config.drift_per_year * days as f64 / 365.0).clamp(-max_drift, max_drift);
    let drift = if drift.is_finite() { drift } else { 0.0 };

    let interval = i64::from(config.meeting_interval_days.max(1));
    let step = seeded_rng("meeting", days.div_euclid(interval))
        .gen_range(MEETING_STEP_LOW..MEETING_STEP_HIGH);

    let mut rng = seeded_rng("day", i64::from(date.num_days_from_ce()));
    let scale = spread(config.daily_noise);
    let mut noise = |weight: f64| rng.gen_range(-scale * weight..=scale * weight);

    RatePoint {
        date,
        policy_rate: round2(config.policy_rate_base + drift + step + noise(1.0)),
        long_bond: round2(config.long_bond_base + 0.5 * drift + 0.3 * step + noise(2.0)),
        money_market: round2(config.money_market_base + 0.8 * drift + 0.7 * step + noise(1.5)),
    }
}

/// One synthetic point per calendar day in `range`.
pub fn synthetic_series(config: &RateConfig, range: DateRange) -> Vec<RatePoint> {
    range.days().map(|d| synthetic_point(config, d)).collect()
}

// ── Remote (SDMX-JSON) ──────────────────────────────────────────────

fn parse_period(id: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(id, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(&format!("{id}-01"), "%Y-%m-%d").ok())
}

/// Extract `(date, value)` observations from an SDMX-JSON data message.
///
/// Accepts both the 1.0 layout (`dataSets` at the top level) and the 2.0
/// layout (under `data`). Only the first series is read.
pub fn parse_sdmx(body: &Value) -> Result<Vec<(NaiveDate, f64)>, FeatureError> {
    let malformed = |reason: &str| FeatureError::Malformed {
        provider: "sdmx".into(),
        reason: reason.to_string(),
    };
    let root = body.get("data").unwrap_or(body);

    let periods: Vec<Option<NaiveDate>> = root
        .pointer("/structure/dimensions/observation/0/values")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing observation dimension"))?
        .iter()
        .map(|v| v.get("id").and_then(Value::as_str).and_then(parse_period))
        .collect();

    let observations = root
        .pointer("/dataSets/0/series")
        .and_then(Value::as_object)
        .and_then(|series| series.values().next())
        .and_then(|s| s.get("observations"))
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("missing series observations"))?;

    let mut points = Vec::with_capacity(observations.len());
    for (index, obs) in observations {
        let Some(date) = index
            .parse::<usize>()
            .ok()
            .and_then(|i| periods.get(i).copied().flatten())
        else {
            continue;
        };
        let value = match obs.get(0) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse::<f64>().ok(),
            _ => None,
        };
        if let Some(value) = value {
            points.push((date, value));
        }
    }
    points.sort_by_key(|(d, _)| *d);
    Ok(points)
}

/// Join three observation lists on the policy rate's dates, carrying the
/// other two series forward. Dates before the first observation of either
/// secondary series are dropped.
pub fn merge_series(
    policy: &[(NaiveDate, f64)],
    long_bond: &[(NaiveDate, f64)],
    money_market: &[(NaiveDate, f64)],
) -> Vec<RatePoint> {
    let as_of = |series: &[(NaiveDate, f64)], date: NaiveDate| {
        series
            .iter()
            .take_while(|(d, _)| *d <= date)
            .last()
            .map(|(_, v)| *v)
    };
    policy
        .iter()
        .filter_map(|&(date, policy_rate)| {
            Some(RatePoint {
                date,
                policy_rate,
                long_bond: as_of(long_bond, date)?,
                money_market: as_of(money_market, date)?,
            })
        })
        .collect()
}

// ── Source ──────────────────────────────────────────────────────────

/// Most ranges a [`RateSource`] remembers; the oldest is forgotten first.
pub const MAX_REMEMBERED_WINDOWS: usize = 16;

/// Sorted points of one resolved range, kept in memory until its cache
/// entry would expire.
struct HotWindow {
    range: DateRange,
    points: Vec<RatePoint>,
    /// `None` never expires.
    expires: Option<Instant>,
}

impl HotWindow {
    fn new(
        range: DateRange,
        mut points: Vec<RatePoint>,
        ttl_left: Option<std::time::Duration>,
    ) -> Self {
        points.sort_by_key(|p| p.date);
        Self {
            range,
            points,
            expires: ttl_left.and_then(|left| Instant::now().checked_add(left)),
        }
    }

    fn is_live(&self) -> bool {
        self.expires.map_or(true, |at| Instant::now() < at)
    }

    fn slice(&self, range: DateRange) -> &[RatePoint] {
        let lo = self.points.partition_point(|p| p.date < range.start);
        let hi = self.points.partition_point(|p| p.date <= range.end);
        &self.points[lo..hi.max(lo)]
    }
}

/// Interest-rate feature source.
pub struct RateSource {
    config: RateConfig,
    fetcher: Fetcher,
    cache: Arc<CacheStore>,
    /// Ranges resolved by this instance, used to serve sub-range lookups
    /// from the covering cache entry.
    windows: Mutex<Vec<DateRange>>,
    hot: Mutex<Option<HotWindow>>,
}

impl RateSource {
    pub fn new(config: RateConfig, fetcher: Fetcher, cache: Arc<CacheStore>) -> Self {
        Self {
            config,
            fetcher,
            cache,
            windows: Mutex::new(Vec::new()),
            hot: Mutex::new(None),
        }
    }

    /// Outbound requests made by this source's fetcher.
    pub fn request_count(&self) -> u64 {
        self.fetcher.request_count()
    }

    /// All points in `[start, end]`, sorted by date.
    pub fn series(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RatePoint>, FeatureError> {
        let range = DateRange::new(start, end)?;
        if let Some(points) = self.from_covering_window(range) {
            return Ok(points);
        }
        Ok(self.resolve_range(range).records)
    }

    /// Run the fallback chain for exactly `range`.
    pub fn resolve_range(&self, range: DateRange) -> Resolved<RatePoint> {
        let mut resolved = resolve(self, &self.cache, &range);
        resolved.records.sort_by_key(|p| p.date);
        if !resolved.records.is_empty() {
            self.remember(range);
            // Entries served from the cache have an unknown age; the next
            // covering read picks them up with their real expiry.
            if resolved.provenance != Provenance::Cache {
                self.keep_hot(HotWindow::new(
                    range,
                    resolved.records.clone(),
                    Some(self.cache.ttl()),
                ));
            }
        }
        resolved
    }

    /// Rate features for `date` over the trailing [`LOOKBACK_DAYS`] window.
    pub fn features(&self, date: NaiveDate) -> Result<FeatureVector, FeatureError> {
        let start = date
            .checked_sub_signed(Duration::days(LOOKBACK_DAYS))
            .ok_or(FeatureError::DateOutOfRange(date))?;
        let window = self.series(start, date)?;
        Ok(rate_features(&window, date))
    }

    fn remember(&self, range: DateRange) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if windows.iter().any(|w| w.covers(&range)) {
            return;
        }
        windows.retain(|w| !range.covers(w));
        windows.push(range);
        if windows.len() > MAX_REMEMBERED_WINDOWS {
            let excess = windows.len() - MAX_REMEMBERED_WINDOWS;
            windows.drain(..excess);
        }
    }

    fn keep_hot(&self, window: HotWindow) {
        *self.hot.lock().unwrap_or_else(|e| e.into_inner()) = Some(window);
    }

    /// Slice of the in-memory window while its cache entry is still valid.
    fn from_hot_window(&self, range: DateRange) -> Option<Vec<RatePoint>> {
        let hot = self.hot.lock().unwrap_or_else(|e| e.into_inner());
        let window = hot.as_ref()?;
        if !window.range.covers(&range) || !window.is_live() {
            return None;
        }
        let slice = window.slice(range);
        (!slice.is_empty()).then(|| slice.to_vec())
    }

    /// Slice a still-cached window that contains `range`.
    fn from_covering_window(&self, range: DateRange) -> Option<Vec<RatePoint>> {
        if let Some(points) = self.from_hot_window(range) {
            return Some(points);
        }
        let candidates: Vec<DateRange> = {
            let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
            windows.iter().rev().filter(|w| w.covers(&range)).copied().collect()
        };
        for window in candidates {
            let Some(entry) = self.cache.entry(&self.cache_key(&window)) else {
                continue;
            };
            let ttl_left = entry.remaining_at(Utc::now(), self.cache.ttl());
            let points: Vec<RatePoint> = match serde_json::from_value(entry.payload) {
                Ok(points) => points,
                Err(e) => {
                    warn!(%window, error = %e, "cached rate window has unexpected shape");
                    continue;
                }
            };
            let hot = HotWindow::new(window, points, ttl_left);
            let slice = hot.slice(range).to_vec();
            if !slice.is_empty() {
                debug!(%range, %window, "served from covering window");
                self.keep_hot(hot);
                return Some(slice);
            }
        }
        None
    }

    fn series_url(&self, series: &str, range: &DateRange) -> String {
        format!(
            "{}/{series}?startPeriod={}&endPeriod={}&detail=dataonly",
            self.config.base_url.trim_end_matches('/'),
            range.start,
            range.end
        )
    }

    fn fetch_series(
        &self,
        series: &str,
        range: &DateRange,
    ) -> Result<Vec<(NaiveDate, f64)>, FeatureError> {
        let body = self
            .fetcher
            .fetch(&self.series_url(series, range))
            .ok_or_else(|| FeatureError::NoData {
                source_name: "bundesbank".into(),
                detail: format!("{series} {range}"),
            })?;
        parse_sdmx(&body)
    }

    fn fetch_remote(&self, range: &DateRange) -> Result<Vec<RatePoint>, FeatureError> {
        let policy = self.fetch_series(&self.config.policy_rate_series, range)?;
        let long_bond = self.fetch_series(&self.config.long_bond_series, range)?;
        let money_market = self.fetch_series(&self.config.money_market_series, range)?;
        Ok(merge_series(&policy, &long_bond, &money_market))
    }
}

impl SourceChain for RateSource {
    type Query = DateRange;
    type Record = RatePoint;

    fn name(&self) -> &'static str {
        "rates"
    }

    fn cache_key(&self, range: &DateRange) -> String {
        format!(
            "rates_{}_{}",
            range.start.format("%Y%m%d"),
            range.end.format("%Y%m%d")
        )
    }

    fn fetch_primary(&self, range: &DateRange) -> Option<Result<Vec<RatePoint>, FeatureError>> {
        if !self.config.remote_enabled {
            return None;
        }
        Some(self.fetch_remote(range))
    }

    fn static_fallback(&self, range: &DateRange) -> Vec<RatePoint> {
        synthetic_series(&self.config, *range)
    }
}

impl FeatureProvider for RateSource {
    fn name(&self) -> &'static str {
        "rates"
    }

    fn feature_names(&self) -> Vec<&'static str> {
        RATE_FEATURES.to_vec()
    }

    fn features(&self, date: NaiveDate) -> Result<FeatureVector, FeatureError> {
        RateSource::features(self, date)
    }

    fn fallback_features(&self) -> FeatureVector {
        fallback_rate_features()
    }

    /// One fetch covering the range plus the lookback.
    fn prefetch(&self, start: NaiveDate, end: NaiveDate) -> Result<(), FeatureError> {
        let start = start
            .checked_sub_signed(Duration::days(LOOKBACK_DAYS))
            .ok_or(FeatureError::DateOutOfRange(start))?;
        let range = DateRange::new(start, end)?;
        self.resolve_range(range);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{fast_config, StubTransport};
    use crate::source::Provenance;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn point(date: NaiveDate, policy: f64) -> RatePoint {
        RatePoint {
            date,
            policy_rate: policy,
            long_bond: 2.5,
            money_market: 3.8,
        }
    }

    fn source(stub: &StubTransport, config: RateConfig) -> (tempfile::TempDir, RateSource) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path(), std::time::Duration::from_secs(3600)));
        let fetcher = Fetcher::new(Box::new(stub.clone()), fast_config());
        (dir, RateSource::new(config, fetcher, cache))
    }

    #[test]
    fn empty_window_gives_fallback_constants() {
        let f = rate_features(&[], d(2025, 3, 1));
        assert_eq!(f, fallback_rate_features());
        assert_eq!(f.get("policy_rate"), Some(4.50));
        assert_eq!(f.get("long_bond"), Some(2.50));
        assert_eq!(f.get("money_market"), Some(3.80));
        assert_eq!(f.get("rate_trend_7d"), Some(0.0));
        assert_eq!(f.get("rate_trend_30d"), Some(0.0));
        assert_eq!(f.get("rate_volatility"), Some(0.05));
    }

    #[test]
    fn short_history_has_zero_trends() {
        let window: Vec<RatePoint> = (0..6)
            .map(|i| point(d(2025, 3, 1) + Duration::days(i), 4.0 + i as f64 * 0.1))
            .collect();
        let f = rate_features(&window, d(2025, 3, 6));
        assert_eq!(f.get("policy_rate"), Some(window[5].policy_rate));
        assert_eq!(f.get("rate_trend_7d"), Some(0.0));
        assert_eq!(f.get("rate_trend_30d"), Some(0.0));
        assert_eq!(f.get("rate_volatility"), Some(0.05));
    }

    #[test]
    fn trends_and_volatility_over_full_window() {
        // 31 daily points, policy rising by 0.01 per day
        let window: Vec<RatePoint> = (0..31)
            .map(|i| point(d(2025, 1, 1) + Duration::days(i), 4.0 + i as f64 * 0.01))
            .collect();
        let f = rate_features(&window, d(2025, 1, 31));
        // current index 30; 7 back counting current is index 24
        assert!((f.get("rate_trend_7d").unwrap() - 0.06).abs() < 1e-9);
        // 30 back counting current is index 1
        assert!((f.get("rate_trend_30d").unwrap() - 0.29).abs() < 1e-9);
        let expected_std = sample_std(&(1..31).map(|i| 4.0 + i as f64 * 0.01).collect::<Vec<_>>());
        assert!((f.get("rate_volatility").unwrap() - expected_std).abs() < 1e-12);
    }

    #[test]
    fn carry_forward_uses_last_point_before_date() {
        let window = vec![point(d(2025, 1, 1), 4.0), point(d(2025, 1, 3), 4.2)];
        let f = rate_features(&window, d(2025, 1, 2));
        assert_eq!(f.get("policy_rate"), Some(4.0));
    }

    #[test]
    fn date_before_window_uses_first_point() {
        let window = vec![point(d(2025, 1, 5), 4.1), point(d(2025, 1, 6), 4.2)];
        let f = rate_features(&window, d(2025, 1, 1));
        assert_eq!(f.get("policy_rate"), Some(4.1));
    }

    #[test]
    fn sample_std_matches_hand_computation() {
        // mean 2, squared deviations 1+0+1 = 2, / (3-1) = 1
        assert!((sample_std(&[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
        assert_eq!(sample_std(&[5.0]), 0.0);
    }

    #[test]
    fn synthetic_values_are_bounded_and_rounded() {
        let config = RateConfig::default();
        let range = DateRange::new(d(2020, 1, 1), d(2030, 12, 31)).unwrap();
        for p in synthetic_series(&config, range) {
            for v in [p.policy_rate, p.long_bond, p.money_market] {
                assert!(v >= 0.0 && v.is_finite());
                assert!(((v * 100.0).round() - v * 100.0).abs() < 1e-6);
            }
            assert!((p.policy_rate - config.policy_rate_base).abs() <= 1.0 + 0.15 + 0.02 + 0.005 + 1e-9);
        }
    }

    #[test]
    fn synthetic_value_depends_only_on_date() {
        let config = RateConfig::default();
        let wide = synthetic_series(&config, DateRange::new(d(2025, 1, 1), d(2025, 6, 30)).unwrap());
        let narrow = synthetic_series(&config, DateRange::new(d(2025, 3, 1), d(2025, 3, 31)).unwrap());
        for p in &narrow {
            assert!(wide.contains(p));
        }
    }

    #[test]
    fn synthetic_level_is_constant_between_meetings_modulo_noise() {
        let config = RateConfig {
            daily_noise: 0.0,
            drift_per_year: 0.0,
            ..RateConfig::default()
        };
        let a = synthetic_point(&config, config.anchor_date);
        let b = synthetic_point(&config, config.anchor_date + Duration::days(41));
        assert_eq!(a.policy_rate, b.policy_rate);
    }

    #[test]
    fn remote_disabled_uses_synthetic_without_network() {
        let stub = StubTransport::new();
        let (_dir, src) = source(&stub, RateConfig::default());
        let range = DateRange::new(d(2025, 1, 1), d(2025, 1, 31)).unwrap();
        let resolved = src.resolve_range(range);
        assert_eq!(resolved.provenance, Provenance::StaticFallback);
        assert_eq!(resolved.records.len(), 31);
        assert_eq!(stub.calls(), 0);
        assert_eq!(src.resolve_range(range).provenance, Provenance::Cache);
    }

    #[test]
    fn sub_range_served_from_covering_window() {
        let stub = StubTransport::new();
        let (dir, src) = source(&stub, RateConfig::default());
        FeatureProvider::prefetch(&src, d(2025, 2, 1), d(2025, 3, 31)).unwrap();
        let entries_after_prefetch = CacheStore::new(dir.path(), std::time::Duration::from_secs(3600))
            .stats()
            .count;

        let points = src.series(d(2025, 2, 10), d(2025, 3, 12)).unwrap();
        assert_eq!(points.len(), 31);
        assert_eq!(points[0].date, d(2025, 2, 10));

        // No new cache entry was created for the sub-range
        let entries_after_lookup = CacheStore::new(dir.path(), std::time::Duration::from_secs(3600))
            .stats()
            .count;
        assert_eq!(entries_after_prefetch, entries_after_lookup);
    }

    #[test]
    fn non_finite_model_params_do_not_panic() {
        let config = RateConfig {
            max_drift: f64::NAN,
            daily_noise: f64::INFINITY,
            drift_per_year: f64::NEG_INFINITY,
            ..RateConfig::default()
        };
        let start = config.anchor_date;
        let range = DateRange::new(start, start + Duration::days(90)).unwrap();
        for p in synthetic_series(&config, range) {
            for v in [p.policy_rate, p.long_bond, p.money_market] {
                assert!(v.is_finite() && v >= 0.0, "{p:?}");
            }
        }
    }

    #[test]
    fn covering_window_is_served_from_memory() {
        let stub = StubTransport::new();
        let (dir, src) = source(&stub, RateConfig::default());
        FeatureProvider::prefetch(&src, d(2025, 2, 1), d(2025, 3, 31)).unwrap();
        let expected = src.series(d(2025, 3, 1), d(2025, 3, 10)).unwrap();

        let cache = CacheStore::new(dir.path(), std::time::Duration::from_secs(3600));
        assert_eq!(cache.clear(), 1);
        for day in 1..=31 {
            let date = d(2025, 3, day);
            let window = src.series(date - Duration::days(LOOKBACK_DAYS), date).unwrap();
            assert_eq!(window.len(), 31);
            assert_eq!(window.last().unwrap().date, date);
        }
        assert_eq!(src.series(d(2025, 3, 1), d(2025, 3, 10)).unwrap(), expected);
        // Nothing was re-resolved
        assert_eq!(cache.stats().count, 0);
    }

    #[test]
    fn remembered_windows_stay_bounded() {
        let stub = StubTransport::new();
        let (_dir, src) = source(&stub, RateConfig::default());
        for i in 0..(3 * MAX_REMEMBERED_WINDOWS as i64) {
            let start = d(2020, 1, 1) + Duration::days(i * 10);
            src.series(start, start + Duration::days(4)).unwrap();
        }
        let windows = src.windows.lock().unwrap();
        assert_eq!(windows.len(), MAX_REMEMBERED_WINDOWS);
        // The most recent range survives
        let last = d(2020, 1, 1) + Duration::days((3 * MAX_REMEMBERED_WINDOWS as i64 - 1) * 10);
        assert_eq!(windows.last().unwrap().start, last);
    }

    #[test]
    fn hot_window_expires_with_cache_ttl() {
        let stub = StubTransport::new();
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path(), std::time::Duration::from_millis(20)));
        let fetcher = Fetcher::new(Box::new(stub.clone()), fast_config());
        let src = RateSource::new(RateConfig::default(), fetcher, Arc::clone(&cache));

        src.resolve_range(DateRange::new(d(2025, 1, 1), d(2025, 1, 31)).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(60));

        // Both the memory copy and the file are stale: the sub-range is resolved anew
        let points = src.series(d(2025, 1, 10), d(2025, 1, 20)).unwrap();
        assert_eq!(points.len(), 11);
        assert_eq!(cache.stats().count, 2);
    }

    #[test]
    fn features_use_thirty_day_lookback() {
        let stub = StubTransport::new();
        let (_dir, src) = source(&stub, RateConfig::default());
        let f = src.features(d(2025, 6, 15)).unwrap();
        assert!(f.has_exactly(&RATE_FEATURES));
        // 31 points available: both trends and volatility are computed
        let window = synthetic_series(
            &RateConfig::default(),
            DateRange::new(d(2025, 5, 16), d(2025, 6, 15)).unwrap(),
        );
        assert_eq!(f, rate_features(&window, d(2025, 6, 15)));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let stub = StubTransport::new();
        let (_dir, src) = source(&stub, RateConfig::default());
        assert!(matches!(
            src.series(d(2025, 2, 1), d(2025, 1, 1)),
            Err(FeatureError::InvalidRange { .. })
        ));
    }

    fn sdmx(dates: &[&str], values: &[f64]) -> Value {
        let periods: Vec<Value> = dates.iter().map(|d| json!({"id": d})).collect();
        let mut obs = serde_json::Map::new();
        for (i, v) in values.iter().enumerate() {
            obs.insert(i.to_string(), json!([v]));
        }
        json!({
            "structure": {"dimensions": {"observation": [{"id": "TIME_PERIOD", "values": periods}]}},
            "dataSets": [{"series": {"0:0:0:0": {"observations": obs}}}]
        })
    }

    #[test]
    fn sdmx_observations_are_parsed() {
        let body = sdmx(&["2025-01-02", "2025-01-03"], &[3.15, 3.16]);
        let points = parse_sdmx(&body).unwrap();
        assert_eq!(points, vec![(d(2025, 1, 2), 3.15), (d(2025, 1, 3), 3.16)]);

        let wrapped = json!({ "data": body });
        assert_eq!(parse_sdmx(&wrapped).unwrap().len(), 2);

        assert!(parse_sdmx(&json!({"oops": true})).is_err());
    }

    #[test]
    fn merge_carries_secondary_series_forward() {
        let policy = vec![(d(2025, 1, 2), 3.15), (d(2025, 1, 3), 3.15), (d(2025, 1, 6), 2.90)];
        let bond = vec![(d(2025, 1, 2), 2.40), (d(2025, 1, 6), 2.45)];
        let mm = vec![(d(2025, 1, 3), 2.80)];
        let merged = merge_series(&policy, &bond, &mm);
        // 2025-01-02 dropped: no money-market value yet
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].long_bond, 2.40);
        assert_eq!(merged[1].long_bond, 2.45);
        assert_eq!(merged[1].money_market, 2.80);
    }

    #[test]
    fn remote_enabled_prefers_remote_series() {
        let body = sdmx(&["2025-01-02", "2025-01-03"], &[3.15, 3.16]);
        let stub = StubTransport::new().route("https://api.statistiken.bundesbank.de", body);
        let config = RateConfig {
            remote_enabled: true,
            ..RateConfig::default()
        };
        let (_dir, src) = source(&stub, config);
        let resolved = src.resolve_range(DateRange::new(d(2025, 1, 2), d(2025, 1, 3)).unwrap());
        assert_eq!(resolved.provenance, Provenance::Primary);
        assert_eq!(resolved.records.len(), 2);
        assert_eq!(stub.calls(), 3);
        assert!(stub.seen()[0].starts_with(
            "https://api.statistiken.bundesbank.de/rest/data/BBK01/SU0202?startPeriod=2025-01-02&endPeriod=2025-01-03"
        ));
    }

    #[test]
    fn remote_failure_falls_back_to_synthetic() {
        let stub = StubTransport::new();
        let config = RateConfig {
            remote_enabled: true,
            ..RateConfig::default()
        };
        let (_dir, src) = source(&stub, config);
        let resolved = src.resolve_range(DateRange::new(d(2025, 1, 1), d(2025, 1, 10)).unwrap());
        assert_eq!(resolved.provenance, Provenance::StaticFallback);
        assert_eq!(resolved.records.len(), 10);
    }
}
