use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arcshift::ArcShift;
use chrono::{Local, TimeZone};
use tracing::{debug, info};

use crate::error::CoreResult;
use crate::model::{SampleModel, Test, TestStatisticsDelta};
use crate::statistics::{
    ExpressionEngine, ExpressionView, ExpressionViewRegistry, MetricIndex, StatisticsSnapshot,
    format_value, real_double_value,
};

use super::health::HealthMonitor;
use super::listener::{
    ConsoleShutdownListener, ListenerSet, SamplingLifeCycleListener, StopReason,
};
use super::report::{REPORT_DATA_SUFFIX, ReportWriters};
use super::status::{
    AggregatedSample, INTERESTING_STATISTICS, PEAK_TPS_VIEW, TPS_VIEW, TestStatisticsEntry,
};
use super::tracker::ProcessCounts;

/// Consumes sampling ticks and turns them into the published sample,
/// report lines, and health checks.
///
/// Single-writer: only the dispatch loop and the coordinator's control
/// operations touch it, one at a time, behind the coordinator's lock.
pub(in crate::coordinator) struct SampleAggregator {
    index: Arc<MetricIndex>,
    engine: Arc<dyn ExpressionEngine>,
    model: SampleModel,
    views: ExpressionViewRegistry,
    writers: Option<ReportWriters>,
    header_added: bool,
    sampling: bool,
    sampling_count: u64,
    ignore_sample_count: u64,
    first_sampling: bool,
    last_sampling_ms: u64,
    tps_value: f64,
    peak_tps: f64,
    health: HealthMonitor,
    start_time_ms: Arc<AtomicU64>,
    published: ArcShift<Option<AggregatedSample>>,
    shutdown_listeners: Arc<ListenerSet<dyn ConsoleShutdownListener>>,
    sampling_listeners: Arc<ListenerSet<dyn SamplingLifeCycleListener>>,
}

impl SampleAggregator {
    pub(in crate::coordinator) fn new(
        index: Arc<MetricIndex>,
        engine: Arc<dyn ExpressionEngine>,
        start_time_ms: Arc<AtomicU64>,
        published: ArcShift<Option<AggregatedSample>>,
        shutdown_listeners: Arc<ListenerSet<dyn ConsoleShutdownListener>>,
        sampling_listeners: Arc<ListenerSet<dyn SamplingLifeCycleListener>>,
    ) -> Self {
        Self {
            index,
            engine,
            model: SampleModel::new(),
            views: ExpressionViewRegistry::new(),
            writers: None,
            header_added: false,
            sampling: false,
            sampling_count: 0,
            ignore_sample_count: 0,
            first_sampling: true,
            last_sampling_ms: 0,
            tps_value: 0.0,
            peak_tps: 0.0,
            health: HealthMonitor::new(),
            start_time_ms,
            published,
            shutdown_listeners,
            sampling_listeners,
        }
    }

    pub(in crate::coordinator) fn register_tests(&mut self, tests: &[Test]) {
        self.model.register_tests(tests);
    }

    /// Compile and register an expression view. Duplicates (by normalized
    /// display name) are ignored; the first registration wins.
    ///
    /// # Errors
    ///
    /// Returns an error when the expression engine rejects the formula.
    pub(in crate::coordinator) fn register_view(
        &mut self,
        display_name: &str,
        formula: &str,
    ) -> CoreResult<()> {
        let expression = self.engine.compile(display_name, formula)?;
        let view = ExpressionView::new(display_name, expression);
        let name = view.display_name().to_owned();
        if self.views.register(view) {
            debug!("Registered expression view {}", name);
        } else {
            debug!("Ignoring duplicate expression view {}", name);
        }
        Ok(())
    }

    pub(in crate::coordinator) fn set_report_directory(&mut self, directory: PathBuf) {
        self.writers = Some(ReportWriters::new(directory));
        self.header_added = false;
    }

    pub(in crate::coordinator) fn report_directory(&self) -> Option<&Path> {
        self.writers.as_ref().map(ReportWriters::directory)
    }

    pub(in crate::coordinator) fn start_sampling(&mut self, ignore_sample_count: u64) {
        self.ignore_sample_count = ignore_sample_count;
        self.sampling_count = 0;
        self.first_sampling = true;
        self.model.reset();
        self.sampling = true;
        self.sampling_listeners
            .apply("sampling start", |listener| listener.on_sampling_started());
        info!(
            "Sampling started (ignoring first {} samples)",
            ignore_sample_count
        );
    }

    pub(in crate::coordinator) fn unregister_sampling(&mut self) {
        self.sampling = false;
        self.model.reset();
        info!("Sampling stopped");
        self.sampling_listeners
            .apply("sampling end", |listener| listener.on_sampling_ended());
    }

    /// Stop sampling and release every report writer. Called exactly once
    /// at coordinator shutdown, after the dispatch loop has been joined, so
    /// no write can be in flight.
    pub(in crate::coordinator) fn shutdown(&mut self) {
        self.sampling = false;
        self.sampling_count = 0;
        if let Some(writers) = self.writers.as_mut() {
            writers.close_all();
        }
    }

    pub(in crate::coordinator) const fn sampling_count(&self) -> u64 {
        self.sampling_count
    }

    pub(in crate::coordinator) const fn tps_value(&self) -> f64 {
        self.tps_value
    }

    pub(in crate::coordinator) const fn peak_tps(&self) -> f64 {
        self.peak_tps
    }

    /// Ingest one statistics report (= one sampling tick).
    ///
    /// # Errors
    ///
    /// Returns a report error when a CSV or data line cannot be written;
    /// the caller decides whether that fails the run.
    pub(in crate::coordinator) fn on_report_statistics(
        &mut self,
        deltas: &[TestStatisticsDelta],
        now_ms: u64,
        counts: ProcessCounts,
    ) -> CoreResult<()> {
        if !self.sampling {
            return Ok(());
        }
        self.sampling_count = self.sampling_count.saturating_add(1);
        if self.sampling_count <= self.ignore_sample_count {
            // Warm-up noise is absorbed, not aggregated.
            self.model.zero();
            return Ok(());
        }
        if self.first_sampling {
            // Anchor one second back so the first interval has a defined,
            // non-zero duration for rate math.
            self.last_sampling_ms = now_ms.saturating_sub(1000);
            self.first_sampling = false;
        }

        let (interval, cumulative) = self.model.accumulate(deltas);

        let tps = self
            .views
            .find(TPS_VIEW)
            .map_or(0.0, |view| real_double_value(view.value(&interval)));
        self.tps_value = tps;
        if tps > self.peak_tps {
            self.peak_tps = tps;
        }
        if let Some(reason) = self.health.check_too_low_tps(tps, now_ms) {
            self.notify_stop(reason);
        }

        self.publish_sample(now_ms, &interval, &cumulative, counts);
        self.write_report_lines(now_ms, &interval, &cumulative)?;
        self.last_sampling_ms = now_ms;

        if let Some(reason) =
            self.health
                .check_too_many_errors(self.index.as_ref(), &cumulative, now_ms)
        {
            self.notify_stop(reason);
        }
        Ok(())
    }

    /// Emit one CSV line and one set of data lines per whole-second
    /// boundary crossed since the previous tick. Delayed ticks backfill a
    /// line per elapsed second so reporting cadence tracks wall-clock time.
    fn write_report_lines(
        &mut self,
        now_ms: u64,
        interval: &StatisticsSnapshot,
        cumulative: &StatisticsSnapshot,
    ) -> CoreResult<()> {
        let gap = now_ms
            .checked_div(1000)
            .unwrap_or(0)
            .saturating_sub(self.last_sampling_ms.checked_div(1000).unwrap_or(0));
        if gap == 0 || self.writers.is_none() {
            return Ok(());
        }
        let header = if self.header_added {
            None
        } else {
            Some(self.build_csv_header())
        };
        let (csv_line, per_test_tps) = self.build_csv_line(now_ms, interval);
        let summary_lines = self.build_summary_lines(interval);
        let Some(writers) = self.writers.as_mut() else {
            return Ok(());
        };
        if let Some(header_line) = header {
            writers.write_csv_line(&header_line)?;
            self.header_added = true;
        }
        let report_path = writers.directory().to_path_buf();
        for _second in 0..gap {
            writers.write_csv_line(&csv_line)?;
            for (name, value) in &per_test_tps {
                writers.write_line(name, value)?;
            }
            for (name, value) in &summary_lines {
                writers.write_line(name, value)?;
            }
            self.sampling_listeners.apply("sampling", |listener| {
                listener.on_sampling(&report_path, interval, cumulative)
            });
        }
        Ok(())
    }

    fn build_csv_header(&self) -> String {
        let mut columns = vec!["DateTime".to_owned()];
        for view in self.non_peak_views() {
            columns.push(view.display_name().to_owned());
        }
        let test_count = self.model.test_count();
        if test_count != 1 {
            for slot in 0..test_count {
                columns.push("Description".to_owned());
                for view in self.non_peak_views() {
                    columns.push(format!("{}-{}", view.display_name(), slot));
                }
            }
        }
        columns.join(",")
    }

    /// Build the CSV row for this second, plus the per-test TPS data lines
    /// that fan out when more than one test runs.
    fn build_csv_line(
        &self,
        now_ms: u64,
        interval: &StatisticsSnapshot,
    ) -> (String, Vec<(String, String)>) {
        let mut columns = vec![format_timestamp(now_ms)];
        for view in self.non_peak_views() {
            columns.push(format_value(Some(view.value(interval))));
        }
        let mut per_test_tps = Vec::new();
        let test_count = self.model.test_count();
        if test_count != 1 {
            let empty = StatisticsSnapshot::new();
            for (slot, test) in self.model.tests().iter().enumerate() {
                let last = self.model.last_sample_for(slot).unwrap_or(&empty);
                columns.push(test.description.clone());
                for view in self.views.views() {
                    if view.display_name() != PEAK_TPS_VIEW {
                        columns.push(format_value(Some(view.value(last))));
                    }
                    if view.display_name() == TPS_VIEW {
                        let file_name = format!(
                            "TPS-{}{}",
                            MetricIndex::normalize_display_name(&test.description),
                            REPORT_DATA_SUFFIX
                        );
                        per_test_tps.push((file_name, format_value(Some(view.value(last)))));
                    }
                }
            }
        }
        (columns.join(","), per_test_tps)
    }

    /// One data line per registered view, `Peak_TPS` included.
    fn build_summary_lines(&self, interval: &StatisticsSnapshot) -> Vec<(String, String)> {
        self.views
            .views()
            .iter()
            .map(|view| {
                (
                    format!("{}{}", view.display_name(), REPORT_DATA_SUFFIX),
                    format_value(Some(view.value(interval))),
                )
            })
            .collect()
    }

    fn publish_sample(
        &mut self,
        now_ms: u64,
        interval: &StatisticsSnapshot,
        cumulative: &StatisticsSnapshot,
        counts: ProcessCounts,
    ) {
        let start_ms = self.start_time_ms.load(Ordering::Relaxed);
        let test_time = now_ms
            .saturating_sub(start_ms)
            .checked_div(1000)
            .unwrap_or(0);

        let test_count = self.model.test_count();
        let empty = StatisticsSnapshot::new();
        let mut cumulative_statistics = Vec::with_capacity(test_count);
        let mut last_sample_statistics = Vec::with_capacity(test_count);
        for (slot, test) in self.model.tests().iter().enumerate() {
            // With exactly one test the top-level snapshots are already the
            // per-test view; otherwise slice from the model.
            let (test_cumulative, test_last) = if test_count == 1 {
                (cumulative, interval)
            } else {
                (
                    self.model.cumulative_for(slot).unwrap_or(&empty),
                    self.model.last_sample_for(slot).unwrap_or(&empty),
                )
            };
            cumulative_statistics.push(self.build_entry(test, test_cumulative));
            last_sample_statistics.push(self.build_entry(test, test_last));
        }

        let mut total_statistics = BTreeMap::new();
        for view in self.views.views() {
            if INTERESTING_STATISTICS.contains(&view.display_name()) {
                total_statistics.insert(
                    view.display_name().to_owned(),
                    real_double_value(view.value(cumulative)),
                );
            }
        }

        let finished = counts.running_thread == 0 || counts.not_finished_process == 0;
        let sample = AggregatedSample {
            test_time,
            total_statistics,
            cumulative_statistics,
            last_sample_statistics,
            tps_chart_data: self.tps_value,
            peak_tps_for_graph: self.peak_tps,
            running_process: counts.running_process,
            running_thread: counts.running_thread,
            success: !finished,
        };
        self.published.rcu(|_current| Some(sample.clone()));
    }

    fn build_entry(&self, test: &Test, snapshot: &StatisticsSnapshot) -> TestStatisticsEntry {
        let mut statistics = BTreeMap::new();
        for view in self.views.views() {
            if INTERESTING_STATISTICS.contains(&view.display_name()) {
                statistics.insert(
                    view.display_name().to_owned(),
                    real_double_value(view.value(snapshot)),
                );
            }
        }
        TestStatisticsEntry {
            test_number: test.number,
            test_description: test.description.clone(),
            statistics,
        }
    }

    fn non_peak_views(&self) -> impl Iterator<Item = &ExpressionView> {
        self.views
            .views()
            .iter()
            .filter(|view| view.display_name() != PEAK_TPS_VIEW)
    }

    fn notify_stop(&self, reason: StopReason) {
        self.shutdown_listeners.apply("shutdown signal", |listener| {
            listener.ready_to_stop(reason)
        });
    }
}

fn format_timestamp(now_ms: u64) -> String {
    let millis = i64::try_from(now_ms).unwrap_or(i64::MAX);
    Local.timestamp_millis_opt(millis).single().map_or_else(
        || millis.to_string(),
        |datetime| datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}
