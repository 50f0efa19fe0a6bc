//! JSON blob cache with TTL-based invalidation.
//!
//! Layout: `{cache_dir}/{sanitized_key}.json`, one entry per file:
//!
//! ```json
//! { "key": "holidays_DE_2025", "written_at": "2025-11-03T09:12:44Z", "payload": [...] }
//! ```
//!
//! - Writes are atomic (write to .tmp, rename into place)
//! - Expired entries are ignored on read and overwritten on the next write
//! - Nothing here returns an error: I/O and parse failures are logged and
//!   treated as a miss (read) or dropped (write)

use crate::config::CacheConfig;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const ENTRY_EXTENSION: &str = "json";

/// One persisted cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub written_at: DateTime<Utc>,
    pub payload: Value,
}

impl CacheEntry {
    /// An entry is valid while its age is strictly below the TTL.
    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.written_at) < ttl,
            // TTL too large to represent: never expires
            Err(_) => true,
        }
    }

    /// Time left before the entry expires, `None` if it never does.
    pub fn remaining_at(&self, now: DateTime<Utc>, ttl: Duration) -> Option<Duration> {
        let age = now
            .signed_duration_since(self.written_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        chrono::Duration::from_std(ttl)
            .ok()
            .map(|_| ttl.saturating_sub(age))
    }
}

/// Diagnostic summary of a cache directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub total_size_bytes: u64,
    pub ttl: Duration,
    pub cache_dir: PathBuf,
}

/// File-backed key/value cache.
#[derive(Debug)]
pub struct CacheStore {
    cache_dir: PathBuf,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(cache_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        let cache_dir = cache_dir.into();
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(dir = %cache_dir.display(), error = %e, "failed to create cache directory");
        }
        Self { cache_dir, ttl }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.dir, config.ttl())
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Map a logical key onto a file-name-safe identifier.
    ///
    /// Anything outside `[A-Za-z0-9._-]` becomes `_`, so `a/b:c` and `a_b_c`
    /// share a slot.
    pub fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Path of the file holding `key`: `{cache_dir}/{sanitized}.json`
    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{ENTRY_EXTENSION}", Self::sanitize_key(key)))
    }

    /// Return the payload for `key` if present and not expired.
    pub fn read(&self, key: &str) -> Option<Value> {
        self.read_at(key, Utc::now())
    }

    /// Same as [`read`](Self::read), evaluating the TTL at `now`.
    pub fn read_at(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        self.entry_at(key, now).map(|entry| entry.payload)
    }

    /// The whole entry for `key`, with its write time, if present and not
    /// expired.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entry_at(key, Utc::now())
    }

    fn entry_at(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }

        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "cache read failed");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "corrupt cache entry ignored");
                return None;
            }
        };

        if !entry.is_valid_at(now, self.ttl) {
            debug!(key, written_at = %entry.written_at, "cache entry expired");
            return None;
        }
        debug!(key, "cache hit");
        Some(entry)
    }

    /// Typed variant of [`read`](Self::read). A payload that no longer matches
    /// `T` counts as a miss.
    pub fn read_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.read(key)?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "cached payload has unexpected shape");
                None
            }
        }
    }

    /// Persist `payload` under `key`, replacing any previous entry.
    pub fn write(&self, key: &str, payload: Value) {
        self.write_at(key, payload, Utc::now());
    }

    /// Same as [`write`](Self::write) with an explicit write timestamp.
    pub fn write_at(&self, key: &str, payload: Value, written_at: DateTime<Utc>) {
        let entry = CacheEntry {
            key: key.to_string(),
            written_at,
            payload,
        };
        let json = match serde_json::to_string_pretty(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "cache serialization failed");
                return;
            }
        };

        let path = self.entry_path(key);
        let tmp_path = path.with_extension(format!("{ENTRY_EXTENSION}.tmp"));
        if let Err(e) = fs::write(&tmp_path, json) {
            warn!(key, path = %tmp_path.display(), error = %e, "cache write failed");
            return;
        }
        // Atomic rename
        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            warn!(key, path = %path.display(), error = %e, "cache rename failed");
            return;
        }
        debug!(key, "cache write");
    }

    /// Typed variant of [`write`](Self::write).
    pub fn write_as<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(payload) => self.write(key, payload),
            Err(e) => warn!(key, error = %e, "cache serialization failed"),
        }
    }

    /// Remove every entry regardless of age. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for path in self.entry_files() {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to delete cache entry"),
            }
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let files = self.entry_files();
        let total_size_bytes = files
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        CacheStats {
            count: files.len(),
            total_size_bytes,
            ttl: self.ttl,
            cache_dir: self.cache_dir.clone(),
        }
    }

    /// All `*.json` files in the cache directory (temp files excluded).
    fn entry_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.cache_dir.display(), error = %e, "cannot list cache directory");
                return Vec::new();
            }
        };
        entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION))
            .collect()
    }
}
