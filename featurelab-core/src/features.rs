//! Feature vectors, feature tables and the provider trait.
//!
//! A [`FeatureVector`] keeps insertion order so that table columns come out
//! grouped the way the orchestrator assembled them (holidays, rates,
//! calendar).

use crate::error::FeatureError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ordered mapping from feature name to value for one date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    entries: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from literal pairs. Later duplicates replace earlier ones.
    pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        let mut v = Self::new();
        for (name, value) in pairs {
            v.insert(*name, *value);
        }
        v
    }

    /// Set `name` to `value`, keeping its original position if present.
    /// Returns the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First name present in both vectors, if any.
    pub fn first_collision<'a>(&self, other: &'a FeatureVector) -> Option<&'a str> {
        other.names().find(|n| self.contains(n))
    }

    /// Append every entry of `other`. Fails without modifying `self` if any
    /// name already exists.
    pub fn extend_disjoint(
        &mut self,
        other: FeatureVector,
        group: &str,
    ) -> Result<(), FeatureError> {
        if let Some(name) = self.first_collision(&other) {
            return Err(FeatureError::NameCollision {
                name: name.to_string(),
                first: "existing features".into(),
                second: group.to_string(),
            });
        }
        self.entries.extend(other.entries);
        Ok(())
    }

    /// True when the vector holds exactly `names`, in any order.
    pub fn has_exactly(&self, names: &[&str]) -> bool {
        self.len() == names.len() && names.iter().all(|n| self.contains(n))
    }
}

/// One table row: a date and its features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub features: FeatureVector,
}

/// Rows for consecutive dates, strictly increasing, no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            rows: Vec::with_capacity(n),
        }
    }

    /// Append a row. The date must be later than the last row's.
    pub fn push(&mut self, date: NaiveDate, features: FeatureVector) -> Result<(), FeatureError> {
        if let Some(last) = self.rows.last() {
            if date <= last.date {
                return Err(FeatureError::UnorderedRow {
                    previous: last.date,
                    date,
                });
            }
        }
        self.rows.push(FeatureRow { date, features });
        Ok(())
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn row(&self, date: NaiveDate) -> Option<&FeatureRow> {
        self.rows
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .map(|i| &self.rows[i])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    /// Feature names of the first row (the table's columns minus `date`).
    pub fn feature_names(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|r| r.features.names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// `date` followed by the feature names.
    pub fn columns(&self) -> Vec<String> {
        std::iter::once("date".to_string())
            .chain(self.feature_names())
            .collect()
    }
}

/// A group of features the orchestrator can compose.
///
/// `features` may fail; the orchestrator then substitutes
/// `fallback_features`, which must carry exactly the names in
/// `feature_names`.
pub trait FeatureProvider: Send + Sync {
    /// Short name used in logs and collision reports.
    fn name(&self) -> &'static str;

    fn feature_names(&self) -> Vec<&'static str>;

    fn features(&self, date: NaiveDate) -> Result<FeatureVector, FeatureError>;

    fn fallback_features(&self) -> FeatureVector;

    /// Warm whatever cache backs `features` for every date in `[start, end]`.
    fn prefetch(&self, start: NaiveDate, end: NaiveDate) -> Result<(), FeatureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn vector_keeps_insertion_order() {
        let mut v = FeatureVector::new();
        v.insert("b", 1.0);
        v.insert("a", 2.0);
        v.insert("b", 3.0);
        assert_eq!(v.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(v.get("b"), Some(3.0));
        assert_eq!(v.get("c"), None);
    }

    #[test]
    fn extend_disjoint_rejects_collisions() {
        let mut v = FeatureVector::from_pairs(&[("x", 1.0)]);
        let other = FeatureVector::from_pairs(&[("y", 2.0), ("x", 3.0)]);
        let err = v.extend_disjoint(other, "rates").unwrap_err();
        assert!(matches!(err, FeatureError::NameCollision { ref name, .. } if name == "x"));
        // untouched
        assert_eq!(v.len(), 1);
        assert_eq!(v.get("x"), Some(1.0));

        v.extend_disjoint(FeatureVector::from_pairs(&[("y", 2.0)]), "rates")
            .unwrap();
        assert!(v.has_exactly(&["y", "x"]));
    }

    #[test]
    fn table_enforces_chronological_order() {
        let mut t = FeatureTable::new();
        t.push(d(2025, 1, 1), FeatureVector::from_pairs(&[("a", 1.0)]))
            .unwrap();
        t.push(d(2025, 1, 2), FeatureVector::from_pairs(&[("a", 2.0)]))
            .unwrap();
        assert!(t.push(d(2025, 1, 2), FeatureVector::new()).is_err());
        assert!(t.push(d(2024, 12, 31), FeatureVector::new()).is_err());
        assert_eq!(t.len(), 2);
        assert_eq!(t.columns(), vec!["date", "a"]);
        assert_eq!(t.row(d(2025, 1, 2)).unwrap().features.get("a"), Some(2.0));
        assert!(t.row(d(2025, 1, 3)).is_none());
        assert_eq!(t.first_date(), Some(d(2025, 1, 1)));
        assert_eq!(t.last_date(), Some(d(2025, 1, 2)));
    }

    #[test]
    fn empty_table_has_only_date_column() {
        let t = FeatureTable::new();
        assert!(t.is_empty());
        assert_eq!(t.columns(), vec!["date"]);
    }
}
