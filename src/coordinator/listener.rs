use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;

use crate::statistics::StatisticsSnapshot;

/// Advisory reason attached to a stop signal. Stop signals are
/// notifications, not errors; the run continues until a listener acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TooLowTps,
    TooManyErrors,
    ScriptError,
}

/// Failure raised by a listener callback. Hook failures are logged and
/// never abort the caller's own bookkeeping.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    #[must_use]
    pub fn new<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self {
            message: message.into(),
        }
    }
}

pub type HookResult = Result<(), HookError>;

/// Notified when a health heuristic or the tracker decides the run should
/// stop.
pub trait ConsoleShutdownListener: Send + Sync {
    /// # Errors
    ///
    /// Listener failures are logged by the fan-out and do not propagate.
    fn ready_to_stop(&self, reason: StopReason) -> HookResult;
}

/// Observes sampling lifecycle transitions and every reporting second.
pub trait SamplingLifeCycleListener: Send + Sync {
    /// # Errors
    ///
    /// Listener failures are logged by the fan-out and do not propagate.
    fn on_sampling_started(&self) -> HookResult;

    /// Called once per reporting second with the tick's frozen snapshots.
    ///
    /// # Errors
    ///
    /// Listener failures are logged by the fan-out and do not propagate.
    fn on_sampling(
        &self,
        report_path: &Path,
        interval: &StatisticsSnapshot,
        cumulative: &StatisticsSnapshot,
    ) -> HookResult;

    /// # Errors
    ///
    /// Listener failures are logged by the fan-out and do not propagate.
    fn on_sampling_ended(&self) -> HookResult;
}

/// Observes a file distribution pass.
pub trait FileDistributionListener: Send + Sync {
    /// Returns the effective safe mode for this pass; a listener may force
    /// safe mode on. The last registered listener wins.
    fn on_start(&self, directory: &Path, safe: bool) -> bool;

    /// # Errors
    ///
    /// Listener failures are logged by the fan-out and do not propagate.
    fn on_distributed(&self, file_name: &str) -> HookResult;
}

/// Ordered fan-out list of subscribers. Callbacks run synchronously in
/// registration order; a failing subscriber never prevents later ones.
pub struct ListenerSet<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<L>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Current subscribers, in registration order. Snapshot semantics: the
    /// callbacks run without the registration lock held.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn apply<F>(&self, context: &'static str, callback: F)
    where
        F: Fn(&L) -> HookResult,
    {
        for listener in self.snapshot() {
            if let Err(err) = callback(listener.as_ref()) {
                tracing::error!("Listener failure during {}: {}", context, err);
            }
        }
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerSet<L> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        formatter
            .debug_struct("ListenerSet")
            .field("count", &count)
            .finish()
    }
}
