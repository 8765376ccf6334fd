use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Point-in-time set of named statistic values.
///
/// A snapshot handed out by the sample model is frozen: it is built inside
/// the model's accumulation buffers and shared read-only afterwards. The
/// mutating methods exist for the accumulation side only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatisticsSnapshot {
    values: BTreeMap<String, f64>,
}

impl StatisticsSnapshot {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    #[must_use]
    pub fn value_or_zero(&self, key: &str) -> f64 {
        self.get(key).unwrap_or(0.0)
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_owned(), value);
    }

    /// Consuming setter for building snapshots inline.
    #[must_use]
    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.set(key, value);
        self
    }

    /// Add every value of `delta` into this snapshot, inserting keys that
    /// are not present yet.
    pub fn add(&mut self, delta: &StatisticsSnapshot) {
        for (key, value) in &delta.values {
            self.values
                .entry(key.clone())
                .and_modify(|current| *current += value)
                .or_insert(*value);
        }
    }

    pub fn zero(&mut self) {
        self.values.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
