//! Feature orchestrator: composes feature sources and calendar features into
//! one vector per date.
//!
//! A failing source never fails the row. Its error is logged and the source's
//! fallback constants take its place, so every vector carries the same names.

use crate::cache::CacheStore;
use crate::calendar::{calendar_features, CALENDAR_FEATURES};
use crate::config::FeatureConfig;
use crate::error::FeatureError;
use crate::features::{FeatureProvider, FeatureTable, FeatureVector};
use crate::fetch::Fetcher;
use crate::holidays::HolidaySource;
use crate::rates::RateSource;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

/// Date used to discover the full list of feature names.
pub const PROBE_DATE: (i32, u32, u32) = (2025, 1, 1);

const CALENDAR_GROUP: &str = "calendar";

pub struct FeatureOrchestrator {
    sources: Vec<Box<dyn FeatureProvider>>,
}

impl FeatureOrchestrator {
    /// Compose `sources` in order. Calendar features always come last.
    ///
    /// Fails if two groups declare the same feature name.
    pub fn new(sources: Vec<Box<dyn FeatureProvider>>) -> Result<Self, FeatureError> {
        let mut owners: Vec<(&'static str, &'static str)> = Vec::new();
        let groups = sources
            .iter()
            .map(|s| (s.name(), s.feature_names()))
            .chain(std::iter::once((CALENDAR_GROUP, CALENDAR_FEATURES.to_vec())));

        for (group, names) in groups {
            for name in names {
                if let Some((_, first)) = owners.iter().find(|(n, _)| *n == name) {
                    return Err(FeatureError::NameCollision {
                        name: name.to_string(),
                        first: first.to_string(),
                        second: group.to_string(),
                    });
                }
                owners.push((name, group));
            }
        }
        Ok(Self { sources })
    }

    /// Holidays and rates sharing one cache, each with its own HTTP fetcher.
    pub fn from_config(config: &FeatureConfig) -> Result<Self, FeatureError> {
        let cache = Arc::new(CacheStore::from_config(&config.cache));
        let holidays = HolidaySource::new(
            config.holidays.clone(),
            Fetcher::http(config.fetch.clone())?,
            Arc::clone(&cache),
        );
        let rates = RateSource::new(
            config.rates.clone(),
            Fetcher::http(config.fetch.clone())?,
            cache,
        );
        Self::new(vec![Box::new(holidays), Box::new(rates)])
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Every feature for `date`. Never fails.
    pub fn features_for_date(&self, date: NaiveDate) -> FeatureVector {
        let mut vector = FeatureVector::new();
        for source in &self.sources {
            let group = self.source_features(source.as_ref(), date);
            if let Err(e) = vector.extend_disjoint(group, source.name()) {
                warn!(source = source.name(), %date, error = %e, "dropping source features");
            }
        }
        if let Err(e) = vector.extend_disjoint(calendar_features(date), CALENDAR_GROUP) {
            warn!(%date, error = %e, "dropping calendar features");
        }
        vector
    }

    fn source_features(&self, source: &dyn FeatureProvider, date: NaiveDate) -> FeatureVector {
        match source.features(date) {
            Ok(v) if v.has_exactly(&source.feature_names()) && v.iter().all(|(_, x)| x.is_finite()) => v,
            Ok(v) => {
                warn!(
                    source = source.name(),
                    %date,
                    got = v.len(),
                    "unexpected feature set, using fallback"
                );
                source.fallback_features()
            }
            Err(e) => {
                warn!(source = source.name(), %date, error = %e, "source failed, using fallback");
                source.fallback_features()
            }
        }
    }

    /// One row per date in `[start, end]`, after a per-source pre-fetch of the
    /// whole range.
    pub fn features_for_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FeatureTable, FeatureError> {
        if start > end {
            return Err(FeatureError::InvalidRange { start, end });
        }

        for source in &self.sources {
            if let Err(e) = source.prefetch(start, end) {
                warn!(source = source.name(), %start, %end, error = %e, "prefetch failed");
            }
        }

        let days = (end - start).num_days() + 1;
        let mut table = FeatureTable::with_capacity(usize::try_from(days).unwrap_or(0));
        for date in start.iter_days().take_while(|d| *d <= end) {
            table.push(date, self.features_for_date(date))?;
        }
        info!(%start, %end, rows = table.len(), "feature table built");
        Ok(table)
    }

    /// Feature names in column order, without `date`.
    pub fn feature_names(&self) -> Vec<String> {
        let (y, m, d) = PROBE_DATE;
        let Some(probe) = NaiveDate::from_ymd_opt(y, m, d) else {
            return Vec::new();
        };
        self.features_for_date(probe)
            .names()
            .map(str::to_string)
            .collect()
    }
}
