//! Calendar-derived features. Pure functions of the date, no I/O.

use crate::features::FeatureVector;
use chrono::{Datelike, NaiveDate};

pub const CALENDAR_FEATURES: [&str; 8] = [
    "day_of_week",
    "day_of_month",
    "month",
    "quarter",
    "is_weekend",
    "is_month_start",
    "is_month_end",
    "week_of_year",
];

/// Days 1–7 count as the start of a month.
const MONTH_START_LAST_DAY: u32 = 7;
/// Days from the 24th on count as the end of a month.
const MONTH_END_FIRST_DAY: u32 = 24;

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Calendar features for `date`. `day_of_week` is Monday = 0.
pub fn calendar_features(date: NaiveDate) -> FeatureVector {
    let weekday = date.weekday().num_days_from_monday();
    let day = date.day();
    let month = date.month();

    FeatureVector::from_pairs(&[
        ("day_of_week", f64::from(weekday)),
        ("day_of_month", f64::from(day)),
        ("month", f64::from(month)),
        ("quarter", f64::from((month - 1) / 3 + 1)),
        ("is_weekend", flag(weekday >= 5)),
        ("is_month_start", flag(day <= MONTH_START_LAST_DAY)),
        ("is_month_end", flag(day >= MONTH_END_FIRST_DAY)),
        ("week_of_year", f64::from(date.iso_week().week())),
    ])
}
