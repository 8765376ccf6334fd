use std::collections::BTreeMap;

use serde::Serialize;

/// Statistic names surfaced in published samples. Other registered views
/// still reach the report files; these are the ones the surrounding
/// application charts and inspects.
pub const INTERESTING_STATISTICS: [&str; 8] = [
    "Tests",
    "Errors",
    "TPS",
    "Response_bytes_per_second",
    "Mean_time_to_first_byte",
    "Peak_TPS",
    "Mean_Test_Time_(ms)",
    "User_defined",
];

/// Display name of the throughput view that drives `tps_chart_data` and
/// the peak tracker.
pub(in crate::coordinator) const TPS_VIEW: &str = "TPS";
/// Display name of the peak view, excluded from CSV columns.
pub(in crate::coordinator) const PEAK_TPS_VIEW: &str = "Peak_TPS";

/// One test's slice of a published sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestStatisticsEntry {
    #[serde(rename = "testNumber")]
    pub test_number: u32,
    #[serde(rename = "testDescription")]
    pub test_description: String,
    #[serde(flatten)]
    pub statistics: BTreeMap<String, f64>,
}

/// The one current aggregated sample, replaced atomically each tick.
///
/// `success` mirrors "the run is still going": it flips to false once
/// every worker looks finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedSample {
    #[serde(rename = "test_time")]
    pub test_time: u64,
    #[serde(rename = "totalStatistics")]
    pub total_statistics: BTreeMap<String, f64>,
    #[serde(rename = "cumulativeStatistics")]
    pub cumulative_statistics: Vec<TestStatisticsEntry>,
    #[serde(rename = "lastSampleStatistics")]
    pub last_sample_statistics: Vec<TestStatisticsEntry>,
    #[serde(rename = "tpsChartData")]
    pub tps_chart_data: f64,
    #[serde(rename = "peakTpsForGraph")]
    pub peak_tps_for_graph: f64,
    #[serde(rename = "process")]
    pub running_process: u32,
    #[serde(rename = "thread")]
    pub running_thread: u32,
    pub success: bool,
}

impl AggregatedSample {
    /// floor(Tests) + floor(Errors), missing values counting as zero.
    #[must_use]
    pub fn execution_count(&self) -> u64 {
        let tests = self
            .total_statistics
            .get("Tests")
            .copied()
            .unwrap_or(0.0)
            .floor();
        let errors = self
            .total_statistics
            .get("Errors")
            .copied()
            .unwrap_or(0.0)
            .floor();
        let clamp = |value: f64| -> u64 {
            if value <= 0.0 {
                0
            } else if value >= u64::MAX as f64 {
                u64::MAX
            } else {
                value as u64
            }
        };
        clamp(tests).saturating_add(clamp(errors))
    }

    /// Cumulative error ratio over every execution so far.
    #[must_use]
    pub fn error_ratio(&self) -> f64 {
        let executions = self.execution_count();
        if executions == 0 {
            return 0.0;
        }
        let errors = self.total_statistics.get("Errors").copied().unwrap_or(0.0);
        errors / executions as f64
    }
}
