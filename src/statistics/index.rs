use super::snapshot::StatisticsSnapshot;

/// Shared registry of statistic key names.
///
/// Built once at run setup and passed by reference to every component that
/// has to agree on key names; there is no process-global registry.
#[derive(Debug, Clone)]
pub struct MetricIndex {
    keys: Vec<String>,
}

impl MetricIndex {
    /// Count of timed test executions within a snapshot.
    pub const TIMED_TESTS: &'static str = "timedTests";
    /// Count of errored test executions within a snapshot.
    pub const ERRORS: &'static str = "errors";

    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: vec![Self::TIMED_TESTS.to_owned(), Self::ERRORS.to_owned()],
        }
    }

    /// Register an additional statistic key. No-op when already present.
    pub fn register(&mut self, key: &str) {
        if !self.contains(key) {
            self.keys.push(key.to_owned());
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|known| known == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    #[must_use]
    pub fn timed_tests(&self, snapshot: &StatisticsSnapshot) -> f64 {
        snapshot.value_or_zero(Self::TIMED_TESTS)
    }

    #[must_use]
    pub fn errors(&self, snapshot: &StatisticsSnapshot) -> f64 {
        snapshot.value_or_zero(Self::ERRORS)
    }

    /// Collapse whitespace runs in a display name to single underscores so
    /// the name is usable as a report file stem and CSV column.
    #[must_use]
    pub fn normalize_display_name(name: &str) -> String {
        name.split_whitespace().collect::<Vec<_>>().join("_")
    }
}

impl Default for MetricIndex {
    fn default() -> Self {
        Self::new()
    }
}
