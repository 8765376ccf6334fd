use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::debug;

use crate::error::CoordinatorError;
use crate::protocol::{AgentIdentity, AgentProcessReport, WorkerState};

use super::listener::StopReason;
use super::ports::ProcessControl;

/// Trials of a one-second wait while expecting agents to connect.
const CONNECT_WAIT_TRIALS: u32 = 10;
const CONNECT_WAIT_INTERVAL: Duration = Duration::from_secs(1);
/// Trials of a half-second wait while expecting agents to drain.
const DISCONNECT_WAIT_TRIALS: u32 = 40;
const DISCONNECT_WAIT_INTERVAL: Duration = Duration::from_millis(500);
/// Every Nth disconnect trial re-sends the stop command.
const STOP_RESEND_EVERY: u32 = 10;

/// Aggregate liveness counters derived from the latest process report set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessCounts {
    pub running_process: u32,
    pub running_thread: u32,
    pub not_finished_process: u32,
}

#[derive(Debug, Default)]
struct TrackerState {
    counts: ProcessCounts,
    agents: Vec<AgentIdentity>,
    had_reports: bool,
}

/// Tracks the live population of agents, worker processes, and threads.
///
/// Counters are recomputed wholesale from every inbound report set; there
/// is no incremental arithmetic to drift. The counter group lives behind a
/// single lock so readers always observe a consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct AgentReportTracker {
    state: Arc<Mutex<TrackerState>>,
    report_notify: Arc<Notify>,
}

impl AgentReportTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one liveness update.
    ///
    /// Returns a [`StopReason::ScriptError`] signal when the whole agent
    /// population vanished between reports while the sampling count is
    /// still zero. The guard against an already-started sampling run is
    /// deliberate: the very first reports of a run routinely oscillate and
    /// must not look like a crash.
    pub fn on_report(
        &self,
        reports: &[AgentProcessReport],
        before_first_sample: bool,
    ) -> Option<StopReason> {
        let mut counts = ProcessCounts::default();
        let mut agents = Vec::with_capacity(reports.len());
        for report in reports {
            agents.push(report.agent.clone());
            for worker in &report.workers {
                match worker.state {
                    WorkerState::Created | WorkerState::Started | WorkerState::Running => {
                        counts.not_finished_process = counts.not_finished_process.saturating_add(1);
                    }
                    WorkerState::Finished => {}
                }
                counts.running_process = counts.running_process.saturating_add(1);
                counts.running_thread =
                    counts.running_thread.saturating_add(worker.running_threads);
            }
        }

        let script_error = {
            let mut state = self.lock_state();
            let vanished = state.had_reports && reports.is_empty() && before_first_sample;
            state.counts = counts;
            state.agents = agents;
            state.had_reports = !reports.is_empty();
            vanished
        };
        self.report_notify.notify_waiters();
        if script_error {
            debug!("All agents vanished before the first counted sample");
            return Some(StopReason::ScriptError);
        }
        None
    }

    #[must_use]
    pub fn counts(&self) -> ProcessCounts {
        self.lock_state().counts
    }

    #[must_use]
    pub fn agents(&self) -> Vec<AgentIdentity> {
        self.lock_state().agents.clone()
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.lock_state().agents.len()
    }

    /// Whether every test looks finished. Thread count and not-finished
    /// process count can lag each other under teardown races; either one
    /// reaching zero counts as finished so no caller blocks on the slower
    /// signal.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        let counts = self.counts();
        counts.running_thread == 0 || counts.not_finished_process == 0
    }

    /// Clear the not-finished counter when sampling stops.
    pub fn zero_not_finished(&self) {
        self.lock_state().counts.not_finished_process = 0;
    }

    /// Block until exactly `expected` agents are connected.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::ConnectionTimeout`] when the expected
    /// count is not reached within the trial budget. Observing cancellation
    /// returns early without error.
    pub async fn wait_until_agents_connected(
        &self,
        expected: usize,
        cancel: &AtomicBool,
    ) -> Result<(), CoordinatorError> {
        for _ in 0..CONNECT_WAIT_TRIALS {
            if self.agent_count() == expected {
                return Ok(());
            }
            if cancel.load(Ordering::Relaxed) {
                return Ok(());
            }
            drop(timeout(CONNECT_WAIT_INTERVAL, self.report_notify.notified()).await);
        }
        if self.agent_count() == expected {
            return Ok(());
        }
        Err(CoordinatorError::ConnectionTimeout {
            expected,
            actual: self.agent_count(),
        })
    }

    /// Block until no thread is running anywhere, periodically re-sending
    /// the stop command against lost stop signals.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::DisconnectTimeout`] when threads are
    /// still running after the trial budget.
    pub async fn wait_until_all_disconnected(
        &self,
        process_control: &dyn ProcessControl,
    ) -> Result<(), CoordinatorError> {
        for trial in 1..=DISCONNECT_WAIT_TRIALS {
            if self.counts().running_thread == 0 {
                return Ok(());
            }
            drop(timeout(DISCONNECT_WAIT_INTERVAL, self.report_notify.notified()).await);
            if trial % STOP_RESEND_EVERY == 0 {
                process_control.stop_agent_and_worker_processes().await;
            }
        }
        let counts = self.counts();
        if counts.running_thread == 0 {
            return Ok(());
        }
        Err(CoordinatorError::DisconnectTimeout {
            running_thread: counts.running_thread,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
