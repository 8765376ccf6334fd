//! Registered tests and the per-run sample accumulation model.
//!
//! The model folds the per-test interval deltas carried by statistics
//! reports into cumulative and last-interval state, per test and in total.
//! Everything is recomputed from the deltas it is fed; the model owns no
//! timers and knows nothing about report files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::statistics::StatisticsSnapshot;

/// A script-defined transaction registered once by the worker side.
/// Identity is the test number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub number: u32,
    pub description: String,
}

/// One test's share of a statistics report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatisticsDelta {
    pub test_number: u32,
    pub statistics: StatisticsSnapshot,
}

#[derive(Debug, Default)]
pub struct SampleModel {
    tests: Vec<Test>,
    slots: HashMap<u32, usize>,
    per_test_cumulative: Vec<StatisticsSnapshot>,
    per_test_last_interval: Vec<StatisticsSnapshot>,
    total_cumulative: StatisticsSnapshot,
}

impl SampleModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register tests in arrival order, deduplicating by number.
    pub fn register_tests(&mut self, tests: &[Test]) {
        for test in tests {
            if self.slots.contains_key(&test.number) {
                continue;
            }
            self.slots.insert(test.number, self.tests.len());
            self.tests.push(test.clone());
            self.per_test_cumulative.push(StatisticsSnapshot::new());
            self.per_test_last_interval.push(StatisticsSnapshot::new());
        }
    }

    /// Fold one report's per-test deltas into the model and return the
    /// frozen (interval, cumulative) total snapshots for this tick.
    ///
    /// Deltas for unregistered test numbers still count into the totals;
    /// they only miss a per-test breakdown slot.
    pub fn accumulate(
        &mut self,
        deltas: &[TestStatisticsDelta],
    ) -> (StatisticsSnapshot, StatisticsSnapshot) {
        for snapshot in &mut self.per_test_last_interval {
            snapshot.zero();
        }
        let mut interval = StatisticsSnapshot::new();
        for delta in deltas {
            interval.add(&delta.statistics);
            if let Some(slot) = self.slots.get(&delta.test_number).copied() {
                if let Some(cumulative) = self.per_test_cumulative.get_mut(slot) {
                    cumulative.add(&delta.statistics);
                }
                if let Some(last) = self.per_test_last_interval.get_mut(slot) {
                    last.add(&delta.statistics);
                }
            }
        }
        self.total_cumulative.add(&interval);
        (interval, self.total_cumulative.clone())
    }

    /// Discard accumulated statistics but keep registered tests. Used while
    /// warm-up samples are being ignored.
    pub fn zero(&mut self) {
        for snapshot in &mut self.per_test_cumulative {
            snapshot.zero();
        }
        for snapshot in &mut self.per_test_last_interval {
            snapshot.zero();
        }
        self.total_cumulative.zero();
    }

    /// Discard everything, including registered tests. Used at sampling
    /// start and stop.
    pub fn reset(&mut self) {
        self.tests.clear();
        self.slots.clear();
        self.per_test_cumulative.clear();
        self.per_test_last_interval.clear();
        self.total_cumulative.zero();
    }

    #[must_use]
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    #[must_use]
    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    #[must_use]
    pub fn cumulative_for(&self, slot: usize) -> Option<&StatisticsSnapshot> {
        self.per_test_cumulative.get(slot)
    }

    #[must_use]
    pub fn last_sample_for(&self, slot: usize) -> Option<&StatisticsSnapshot> {
        self.per_test_last_interval.get(slot)
    }
}
