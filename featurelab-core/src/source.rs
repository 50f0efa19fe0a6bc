//! Fallback-chain resolution shared by every feature source.
//!
//! For one query the chain is walked in a fixed order and the first step
//! that yields a non-empty result wins:
//!
//! 1. cache (valid entry under the query's key)
//! 2. primary remote provider
//! 3. secondary remote provider, if one is configured
//! 4. static fallback (no network, never empty)
//!
//! Whatever wins from steps 2–4 is written back to the cache. Results of
//! different steps are never merged.

use crate::cache::CacheStore;
use crate::error::FeatureError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Which step of the chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Cache,
    Primary,
    Secondary,
    StaticFallback,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provenance::Cache => "cache",
            Provenance::Primary => "primary",
            Provenance::Secondary => "secondary",
            Provenance::StaticFallback => "static_fallback",
        };
        f.write_str(s)
    }
}

/// Records for one query plus where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub records: Vec<T>,
    pub provenance: Provenance,
}

/// Provider-specific half of a feature source.
///
/// Remote steps return `None` when the provider is not configured (no API
/// key, remote access disabled) and `Some(Err(_))` when it was tried and
/// failed.
pub trait SourceChain {
    type Query: fmt::Display;
    type Record: Serialize + DeserializeOwned;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn cache_key(&self, query: &Self::Query) -> String;

    fn fetch_primary(&self, query: &Self::Query)
        -> Option<Result<Vec<Self::Record>, FeatureError>>;

    fn fetch_secondary(
        &self,
        _query: &Self::Query,
    ) -> Option<Result<Vec<Self::Record>, FeatureError>> {
        None
    }

    /// Deterministic local result. Must not be empty.
    fn static_fallback(&self, query: &Self::Query) -> Vec<Self::Record>;
}

/// Walk the chain for `query`.
pub fn resolve<C: SourceChain>(
    chain: &C,
    cache: &CacheStore,
    query: &C::Query,
) -> Resolved<C::Record> {
    let key = chain.cache_key(query);

    if let Some(records) = cache.read_as::<Vec<C::Record>>(&key) {
        if !records.is_empty() {
            debug!(source = chain.name(), %query, "served from cache");
            return Resolved {
                records,
                provenance: Provenance::Cache,
            };
        }
    }

    // The secondary is only contacted after the primary has failed
    let primary = chain.fetch_primary(query);
    if let Some(resolved) = accept(chain, cache, &key, query, Provenance::Primary, primary) {
        return resolved;
    }
    let secondary = chain.fetch_secondary(query);
    if let Some(resolved) = accept(chain, cache, &key, query, Provenance::Secondary, secondary) {
        return resolved;
    }

    let records = chain.static_fallback(query);
    warn!(source = chain.name(), %query, count = records.len(), "using static fallback");
    if !records.is_empty() {
        cache.write_as(&key, &records);
    }
    Resolved {
        records,
        provenance: Provenance::StaticFallback,
    }
}

/// Cache and return a remote step's records if it produced any.
fn accept<C: SourceChain>(
    chain: &C,
    cache: &CacheStore,
    key: &str,
    query: &C::Query,
    provenance: Provenance,
    attempt: Option<Result<Vec<C::Record>, FeatureError>>,
) -> Option<Resolved<C::Record>> {
    match attempt? {
        Ok(records) if !records.is_empty() => {
            info!(source = chain.name(), %query, %provenance, count = records.len(), "resolved");
            cache.write_as(key, &records);
            Some(Resolved {
                records,
                provenance,
            })
        }
        Ok(_) => {
            warn!(source = chain.name(), %query, %provenance, "provider returned no records");
            None
        }
        Err(e) => {
            warn!(source = chain.name(), %query, %provenance, error = %e, "provider failed");
            None
        }
    }
}
