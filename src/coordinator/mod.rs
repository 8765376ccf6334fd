//! The run coordinator: lifecycle state machine, protocol dispatch, and
//! the control surface exposed to the surrounding application.
//!
//! One coordinator drives one test run. It is wired up explicitly at a
//! composition root — construct the ports, build a [`RunCoordinator`], and
//! pass dependencies as constructor arguments; there is no container and
//! no global state.

mod aggregator;
mod dispatch;
mod distribution;
mod health;
mod listener;
mod ports;
mod report;
mod status;
mod tracker;

pub use distribution::{AgentCacheState, DistributedFile, DistributionHandler, FileDistribution};
pub use health::HealthMonitor;
pub use listener::{
    ConsoleShutdownListener, FileDistributionListener, HookError, HookResult, ListenerSet,
    SamplingLifeCycleListener, StopReason,
};
pub use ports::{ConsoleTransport, LaunchSpec, ProcessControl};
pub use status::{AggregatedSample, INTERESTING_STATISTICS, TestStatisticsEntry};
pub use tracker::{AgentReportTracker, ProcessCounts};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arcshift::ArcShift;
use chrono::Utc;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::ConsoleConfig;
use crate::error::{CoordinatorError, CoreError, CoreResult};
use crate::protocol::AgentIdentity;
use crate::shutdown::ShutdownSender;
use crate::statistics::{ExpressionEngine, MetricIndex};

use aggregator::SampleAggregator;
use dispatch::DispatchContext;

/// How long `start` waits for the dispatch loop's ready signal before
/// proceeding anyway.
const START_READY_TIMEOUT: Duration = Duration::from_secs(5);
/// Bounded join of the dispatch task at shutdown.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a single-use coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Started,
    Sampling,
    Stopped,
}

impl RunState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::Started => "started",
            RunState::Sampling => "sampling",
            RunState::Stopped => "stopped",
        }
    }
}

/// External collaborators, constructed by the composition root.
pub struct CoordinatorDeps {
    pub transport: Box<dyn ConsoleTransport>,
    pub process_control: Arc<dyn ProcessControl>,
    pub file_distribution: Arc<dyn FileDistribution>,
    pub expression_engine: Arc<dyn ExpressionEngine>,
}

struct Lifecycle {
    state: RunState,
    transport: Option<Box<dyn ConsoleTransport>>,
    dispatch: Option<JoinHandle<()>>,
}

/// Coordinates one distributed test run.
///
/// Single-use: once shut down, a coordinator cannot be restarted.
pub struct RunCoordinator {
    config: Mutex<ConsoleConfig>,
    metric_index: Arc<MetricIndex>,
    aggregator: Arc<Mutex<SampleAggregator>>,
    tracker: AgentReportTracker,
    process_control: Arc<dyn ProcessControl>,
    file_distribution: Arc<dyn FileDistribution>,
    shutdown_listeners: Arc<ListenerSet<dyn ConsoleShutdownListener>>,
    sampling_listeners: Arc<ListenerSet<dyn SamplingLifeCycleListener>>,
    distribution_listeners: Arc<ListenerSet<dyn FileDistributionListener>>,
    sample_reader: ArcShift<Option<AggregatedSample>>,
    start_time_ms: Arc<AtomicU64>,
    cancel: Arc<AtomicBool>,
    shutdown_tx: ShutdownSender,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    run_error: Arc<Mutex<Option<String>>>,
}

impl RunCoordinator {
    #[must_use]
    pub fn new(config: ConsoleConfig, deps: CoordinatorDeps) -> Self {
        let metric_index = Arc::new(MetricIndex::new());
        let shutdown_listeners: Arc<ListenerSet<dyn ConsoleShutdownListener>> =
            Arc::new(ListenerSet::new());
        let sampling_listeners: Arc<ListenerSet<dyn SamplingLifeCycleListener>> =
            Arc::new(ListenerSet::new());
        let distribution_listeners: Arc<ListenerSet<dyn FileDistributionListener>> =
            Arc::new(ListenerSet::new());
        let start_time_ms = Arc::new(AtomicU64::new(0));
        let published: ArcShift<Option<AggregatedSample>> = ArcShift::new(None);
        let sample_reader = published.clone();
        let aggregator = Arc::new(Mutex::new(SampleAggregator::new(
            Arc::clone(&metric_index),
            Arc::clone(&deps.expression_engine),
            Arc::clone(&start_time_ms),
            published,
            Arc::clone(&shutdown_listeners),
            Arc::clone(&sampling_listeners),
        )));
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            config: Mutex::new(config),
            metric_index,
            aggregator,
            tracker: AgentReportTracker::new(),
            process_control: deps.process_control,
            file_distribution: deps.file_distribution,
            shutdown_listeners,
            sampling_listeners,
            distribution_listeners,
            sample_reader,
            start_time_ms,
            cancel: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                state: RunState::Created,
                transport: Some(deps.transport),
                dispatch: None,
            }),
            run_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Bind the transport and start the dispatch loop, then wait (bounded)
    /// for the loop's ready signal.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Bootstrap`] when the transport cannot
    /// bind and [`CoordinatorError::InvalidState`] when already started.
    pub async fn start(&self) -> CoreResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != RunState::Created {
            return Err(CoreError::coordinator(CoordinatorError::InvalidState {
                operation: "start",
                state: lifecycle.state.name(),
            }));
        }
        let Some(mut transport) = lifecycle.transport.take() else {
            return Err(CoreError::coordinator(CoordinatorError::InvalidState {
                operation: "start",
                state: lifecycle.state.name(),
            }));
        };
        let inbox = match transport.bind().await {
            Ok(inbox) => inbox,
            Err(err) => {
                lifecycle.transport = Some(transport);
                return Err(CoreError::coordinator(err));
            }
        };
        lifecycle.transport = Some(transport);

        let ready = Arc::new(Notify::new());
        let context = DispatchContext {
            aggregator: Arc::clone(&self.aggregator),
            tracker: self.tracker.clone(),
            shutdown_listeners: Arc::clone(&self.shutdown_listeners),
            run_error: Arc::clone(&self.run_error),
        };
        lifecycle.dispatch = Some(tokio::spawn(dispatch::dispatch_loop(
            inbox,
            context,
            Arc::clone(&ready),
            self.shutdown_tx.subscribe(),
        )));
        lifecycle.state = RunState::Started;
        drop(lifecycle);

        if timeout(START_READY_TIMEOUT, ready.notified()).await.is_err() {
            warn!(
                "Dispatch loop ready signal not observed within {:?}; continuing",
                START_READY_TIMEOUT
            );
        }
        info!("Console {} started", self.console_address());
        Ok(())
    }

    /// Begin tick ingestion, discarding the first `ignore_sample_count`
    /// samples as warm-up.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidState`] unless the coordinator is
    /// started and not yet sampling.
    pub async fn start_sampling(&self, ignore_sample_count: u64) -> CoreResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != RunState::Started {
            return Err(CoreError::coordinator(CoordinatorError::InvalidState {
                operation: "start_sampling",
                state: lifecycle.state.name(),
            }));
        }
        lifecycle.state = RunState::Sampling;
        drop(lifecycle);
        self.lock_aggregator().start_sampling(ignore_sample_count);
        Ok(())
    }

    /// Halt tick ingestion. The dispatch loop keeps running until
    /// [`shutdown`](RunCoordinator::shutdown).
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidState`] unless sampling.
    pub async fn unregister_sampling(&self) -> CoreResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != RunState::Sampling {
            return Err(CoreError::coordinator(CoordinatorError::InvalidState {
                operation: "unregister_sampling",
                state: lifecycle.state.name(),
            }));
        }
        lifecycle.state = RunState::Started;
        drop(lifecycle);
        self.tracker.zero_not_finished();
        self.lock_aggregator().unregister_sampling();
        Ok(())
    }

    /// Stop the dispatch loop and release every report writer. Idempotent;
    /// safe to call concurrently with an in-flight dispatch iteration. The
    /// writers are released even when the join times out, and only after
    /// the loop is no longer running a write.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == RunState::Stopped {
            return;
        }
        drop(self.shutdown_tx.send(()));
        if let Some(transport) = lifecycle.transport.as_mut() {
            transport.shutdown().await;
        }
        if let Some(mut handle) = lifecycle.dispatch.take() {
            if timeout(SHUTDOWN_JOIN_TIMEOUT, &mut handle).await.is_err() {
                warn!("Dispatch loop did not stop within the join bound; aborting");
                handle.abort();
            }
        }
        self.lock_aggregator().shutdown();
        lifecycle.state = RunState::Stopped;
        info!("Console {} shut down", self.console_address());
    }

    /// Launch worker processes through the process-control port and record
    /// the run start time.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::WorkerLaunch`] when the port fails.
    pub async fn start_test(&self, spec: &LaunchSpec) -> CoreResult<u64> {
        let mut launch = spec.clone();
        {
            let config = self.lock_config();
            launch
                .properties
                .insert("console.host".to_owned(), config.host.clone());
            launch
                .properties
                .insert("console.port".to_owned(), config.port.to_string());
        }
        self.process_control
            .start_worker_processes(&launch)
            .await
            .map_err(CoreError::coordinator)?;
        let now_ms = epoch_millis();
        self.start_time_ms.store(now_ms, Ordering::Relaxed);
        Ok(now_ms)
    }

    /// Distribute the artifacts under `directory` to every attached agent.
    ///
    /// # Errors
    ///
    /// Returns a distribution error when a transfer fails, or an I/O error
    /// when the console properties cannot be persisted.
    pub async fn distribute_files(&self, directory: &Path, safe: bool) -> CoreResult<()> {
        self.set_distribution_directory(directory).await?;
        distribution::run_distribution(
            self.file_distribution.as_ref(),
            directory,
            safe,
            &self.distribution_listeners,
            &self.cancel,
        )
        .await
        .map_err(CoreError::distribution)
    }

    /// Record (and, when a properties path is configured, persist) the
    /// distribution directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the properties file cannot be written.
    pub async fn set_distribution_directory(&self, directory: &Path) -> CoreResult<()> {
        let snapshot = {
            let mut config = self.lock_config();
            config.distribution_directory = Some(directory.to_path_buf());
            config.clone()
        };
        if let Some(path) = snapshot.properties_path.as_ref() {
            let rendered = snapshot.to_toml_string()?;
            tokio::fs::write(path, rendered).await?;
        }
        Ok(())
    }

    /// Create the report directory and open it for report output.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the directory cannot be created.
    pub fn set_report_path(&self, path: &Path) -> CoreResult<()> {
        std::fs::create_dir_all(path)?;
        self.lock_aggregator()
            .set_report_directory(path.to_path_buf());
        Ok(())
    }

    #[must_use]
    pub fn report_path(&self) -> Option<PathBuf> {
        self.lock_aggregator().report_directory().map(Path::to_path_buf)
    }

    /// Flag the run as canceled. Idempotent; in-flight waits and
    /// distribution passes exit promptly. Does not stop already-started
    /// worker processes.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Ask every attached agent to stop its workers.
    pub async fn send_stop_message_to_agents(&self) {
        self.process_control.stop_agent_and_worker_processes().await;
    }

    /// Block until exactly `expected` agents are connected.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::ConnectionTimeout`] past the wait bound.
    pub async fn wait_until_agents_connected(&self, expected: usize) -> CoreResult<()> {
        self.tracker
            .wait_until_agents_connected(expected, &self.cancel)
            .await
            .map_err(CoreError::coordinator)
    }

    /// Block until every worker thread is gone, re-sending the stop command
    /// periodically.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::DisconnectTimeout`] past the wait bound.
    pub async fn wait_until_all_agents_disconnected(&self) -> CoreResult<()> {
        self.tracker
            .wait_until_all_disconnected(self.process_control.as_ref())
            .await
            .map_err(CoreError::coordinator)
    }

    #[must_use]
    pub fn is_run_finished(&self) -> bool {
        self.tracker.is_finished()
    }

    #[must_use]
    pub fn running_thread(&self) -> u32 {
        self.tracker.counts().running_thread
    }

    #[must_use]
    pub fn running_process(&self) -> u32 {
        self.tracker.counts().running_process
    }

    #[must_use]
    pub fn attached_agent_count(&self) -> usize {
        self.tracker.agent_count()
    }

    #[must_use]
    pub fn attached_agents(&self) -> Vec<AgentIdentity> {
        self.tracker.agents()
    }

    /// The current aggregated sample, when at least one tick has been
    /// counted.
    #[must_use]
    pub fn current_sample(&self) -> Option<AggregatedSample> {
        self.sample_reader.shared_get().clone()
    }

    /// The published statistics as a JSON map. Before the first counted
    /// tick the map carries only `test_time`.
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        self.current_sample().map_or_else(
            || {
                serde_json::json!({
                    "test_time": self
                        .current_running_time_ms()
                        .checked_div(1000)
                        .unwrap_or(0),
                })
            },
            |sample| serde_json::to_value(&sample).unwrap_or(serde_json::Value::Null),
        )
    }

    /// floor(Tests) + floor(Errors) from the total statistics, missing
    /// values counting as zero.
    #[must_use]
    pub fn current_execution_count(&self) -> u64 {
        self.current_sample()
            .map_or(0, |sample| sample.execution_count())
    }

    /// Whether more than 20% of executions errored so far.
    #[must_use]
    pub fn has_too_many_errors(&self) -> bool {
        self.current_sample()
            .is_some_and(|sample| sample.error_ratio() > 0.2)
    }

    /// Whether not a single test execution has been counted yet.
    #[must_use]
    pub fn has_no_performed_test(&self) -> bool {
        self.current_execution_count() == 0
    }

    #[must_use]
    pub fn tps_value(&self) -> f64 {
        self.lock_aggregator().tps_value()
    }

    #[must_use]
    pub fn peak_tps(&self) -> f64 {
        self.lock_aggregator().peak_tps()
    }

    #[must_use]
    pub fn start_time_ms(&self) -> u64 {
        self.start_time_ms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_running_time_ms(&self) -> u64 {
        epoch_millis().saturating_sub(self.start_time_ms())
    }

    #[must_use]
    pub fn is_running_time_over(&self, duration: Duration) -> bool {
        u128::from(self.current_running_time_ms()) > duration.as_millis()
    }

    pub async fn state(&self) -> RunState {
        self.lifecycle.lock().await.state
    }

    /// The failure that stopped the dispatch loop, if any.
    #[must_use]
    pub fn run_error(&self) -> Option<String> {
        self.run_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_shutdown_listener(&self, listener: Arc<dyn ConsoleShutdownListener>) {
        self.shutdown_listeners.add(listener);
    }

    pub fn add_sampling_listener(&self, listener: Arc<dyn SamplingLifeCycleListener>) {
        self.sampling_listeners.add(listener);
    }

    pub fn add_distribution_listener(&self, listener: Arc<dyn FileDistributionListener>) {
        self.distribution_listeners.add(listener);
    }

    #[must_use]
    pub fn metric_index(&self) -> Arc<MetricIndex> {
        Arc::clone(&self.metric_index)
    }

    #[must_use]
    pub fn console_address(&self) -> String {
        let config = self.lock_config();
        format!("{}:{}", config.host, config.port)
    }

    fn lock_aggregator(&self) -> MutexGuard<'_, SampleAggregator> {
        self.aggregator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_config(&self) -> MutexGuard<'_, ConsoleConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wall-clock epoch milliseconds, clamped to zero before the epoch.
pub(in crate::coordinator) fn epoch_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests;
