mod aggregation;
mod health_rules;

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arcshift::ArcShift;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CoordinatorError, CoreError, CoreResult, DistributionError};
use crate::model::TestStatisticsDelta;
use crate::protocol::{
    AgentIdentity, AgentProcessReport, ConsoleMessage, WorkerProcessState, WorkerState,
};
use crate::statistics::{ExpressionEngine, MetricIndex, NamedLookupEngine, StatisticsSnapshot};

use super::aggregator::SampleAggregator;
use super::distribution::{AgentCacheState, DistributedFile, DistributionHandler, FileDistribution};
use super::listener::{ConsoleShutdownListener, HookResult, ListenerSet, StopReason};
use super::ports::{ConsoleTransport, LaunchSpec, ProcessControl};
use super::status::AggregatedSample;

pub(super) fn check(condition: bool, message: &'static str) -> CoreResult<()> {
    if condition {
        Ok(())
    } else {
        Err(CoreError::coordinator(message))
    }
}

pub(super) fn check_value(condition: bool, message: &'static str, value: String) -> CoreResult<()> {
    if condition {
        Ok(())
    } else {
        Err(CoreError::coordinator(format!("{}: {}", message, value)))
    }
}

pub(super) fn delta(test_number: u32, pairs: &[(&str, f64)]) -> TestStatisticsDelta {
    let mut statistics = StatisticsSnapshot::new();
    for (key, value) in pairs {
        statistics.set(key, *value);
    }
    TestStatisticsDelta {
        test_number,
        statistics,
    }
}

pub(super) fn worker(state: WorkerState, threads: u32) -> WorkerProcessState {
    WorkerProcessState {
        state,
        running_threads: threads,
    }
}

pub(super) fn agent_report(name: &str, workers: Vec<WorkerProcessState>) -> AgentProcessReport {
    AgentProcessReport {
        agent: AgentIdentity {
            name: name.to_owned(),
        },
        workers,
    }
}

pub(super) struct RecordingShutdownListener {
    reasons: Mutex<Vec<StopReason>>,
}

impl RecordingShutdownListener {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self {
            reasons: Mutex::new(Vec::new()),
        })
    }

    pub(super) fn reasons(&self) -> Vec<StopReason> {
        self.reasons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConsoleShutdownListener for RecordingShutdownListener {
    fn ready_to_stop(&self, reason: StopReason) -> HookResult {
        self.reasons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reason);
        Ok(())
    }
}

pub(super) struct AggregatorFixture {
    pub(super) aggregator: SampleAggregator,
    pub(super) reader: ArcShift<Option<AggregatedSample>>,
    pub(super) stops: Arc<RecordingShutdownListener>,
    pub(super) start_time_ms: Arc<AtomicU64>,
}

impl AggregatorFixture {
    pub(super) fn current_sample(&self) -> Option<AggregatedSample> {
        self.reader.shared_get().clone()
    }
}

pub(super) fn aggregator_fixture() -> AggregatorFixture {
    let index = Arc::new(MetricIndex::new());
    let engine: Arc<dyn ExpressionEngine> = Arc::new(NamedLookupEngine);
    let start_time_ms = Arc::new(AtomicU64::new(0));
    let published: ArcShift<Option<AggregatedSample>> = ArcShift::new(None);
    let reader = published.clone();
    let shutdown_listeners: Arc<ListenerSet<dyn ConsoleShutdownListener>> =
        Arc::new(ListenerSet::new());
    let stops = RecordingShutdownListener::new();
    shutdown_listeners.add(Arc::clone(&stops) as Arc<dyn ConsoleShutdownListener>);
    let sampling_listeners = Arc::new(ListenerSet::new());
    let aggregator = SampleAggregator::new(
        index,
        engine,
        Arc::clone(&start_time_ms),
        published,
        shutdown_listeners,
        sampling_listeners,
    );
    AggregatorFixture {
        aggregator,
        reader,
        stops,
        start_time_ms,
    }
}

pub(super) struct ChannelTransport {
    inbox: Option<mpsc::Receiver<ConsoleMessage>>,
    fail_bind: bool,
}

impl ChannelTransport {
    pub(super) fn new() -> (Self, mpsc::Sender<ConsoleMessage>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                inbox: Some(rx),
                fail_bind: false,
            },
            tx,
        )
    }

    pub(super) const fn failing() -> Self {
        Self {
            inbox: None,
            fail_bind: true,
        }
    }
}

#[async_trait]
impl ConsoleTransport for ChannelTransport {
    async fn bind(&mut self) -> Result<mpsc::Receiver<ConsoleMessage>, CoordinatorError> {
        if self.fail_bind {
            return Err(CoordinatorError::Bootstrap {
                context: "bind",
                source: "address already in use".into(),
            });
        }
        self.inbox.take().ok_or(CoordinatorError::ChannelClosed)
    }

    async fn shutdown(&mut self) {}
}

pub(super) struct StubProcessControl {
    launches: Mutex<Vec<LaunchSpec>>,
    stop_count: AtomicU32,
}

impl StubProcessControl {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self {
            launches: Mutex::new(Vec::new()),
            stop_count: AtomicU32::new(0),
        })
    }

    pub(super) fn launches(&self) -> Vec<LaunchSpec> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(super) fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessControl for StubProcessControl {
    async fn start_worker_processes(&self, spec: &LaunchSpec) -> Result<(), CoordinatorError> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());
        Ok(())
    }

    async fn stop_agent_and_worker_processes(&self) {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
    }
}

pub(super) struct SeqHandler {
    files: Vec<String>,
    cursor: usize,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl DistributionHandler for SeqHandler {
    async fn send_next_file(&mut self) -> Result<Option<DistributedFile>, DistributionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = self.files.get(self.cursor).cloned();
        self.cursor = self.cursor.saturating_add(1);
        Ok(name.map(|name| DistributedFile { name }))
    }
}

pub(super) struct StubFileDistribution {
    pub(super) cache: Arc<AgentCacheState>,
    pub(super) files: Vec<String>,
    pub(super) calls: Arc<AtomicU32>,
}

impl StubFileDistribution {
    pub(super) fn new(files: &[&str]) -> Self {
        Self {
            cache: Arc::new(AgentCacheState::new()),
            files: files.iter().map(|name| (*name).to_owned()).collect(),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl FileDistribution for StubFileDistribution {
    fn handler(&self, _directory: &Path) -> Result<Box<dyn DistributionHandler>, DistributionError> {
        Ok(Box::new(SeqHandler {
            files: self.files.clone(),
            cursor: 0,
            calls: Arc::clone(&self.calls),
        }))
    }

    fn cache_state(&self) -> Arc<AgentCacheState> {
        Arc::clone(&self.cache)
    }
}
