//! Structured error types for the feature resolver.
//!
//! Transport errors never escape the fetcher (they degrade to "no result"),
//! and feature errors never escape the orchestrator (they degrade to
//! fallback constants). They exist so each layer can log what went wrong.

use chrono::NaiveDate;
use thiserror::Error;

/// A single failed outbound request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("response is not valid JSON: {0}")]
    Decode(String),

    #[error("fetch error: {0}")]
    Other(String),
}

/// Errors raised while computing features for a date or range.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("feature '{name}' is produced by both '{first}' and '{second}'")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("row for {date} does not follow {previous}")]
    UnorderedRow { previous: NaiveDate, date: NaiveDate },

    #[error("date arithmetic out of range near {0}")]
    DateOutOfRange(NaiveDate),

    #[error("{source_name} produced no data for {detail}")]
    NoData { source_name: String, detail: String },

    #[error("malformed {provider} payload: {reason}")]
    Malformed { provider: String, reason: String },

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] FetchError),
}
