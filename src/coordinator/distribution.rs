use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::DistributionError;

use super::listener::{FileDistributionListener, ListenerSet};

/// Interval between cache-consistency polls.
const CACHE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Polls allowed per file already sent.
const CACHE_POLLS_PER_FILE: u32 = 10;

/// Agent-side cache consistency state.
///
/// The transport flips `out_of_date` as agents report their cache status;
/// distribution passes wait on it before letting transfers run ahead of
/// the agents.
#[derive(Debug, Default)]
pub struct AgentCacheState {
    out_of_date: AtomicBool,
    changed: Notify,
}

impl AgentCacheState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_out_of_date(&self, value: bool) {
        self.out_of_date.store(value, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    #[must_use]
    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date.load(Ordering::SeqCst)
    }

    async fn wait_changed(&self, bound: Duration) {
        drop(timeout(bound, self.changed.notified()).await);
    }
}

/// One transferred artifact.
#[derive(Debug, Clone)]
pub struct DistributedFile {
    pub name: String,
}

/// Pull-based transfer port: yields the next file to send until the pass
/// is complete.
#[async_trait]
pub trait DistributionHandler: Send {
    /// Transfer the next file, or return `None` when every file is sent.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError`] on artifact read or transfer failure,
    /// which aborts the current pass.
    async fn send_next_file(&mut self) -> Result<Option<DistributedFile>, DistributionError>;
}

/// File-distribution collaborator: produces transfer handlers and exposes
/// the shared agent cache state.
pub trait FileDistribution: Send + Sync {
    /// # Errors
    ///
    /// Returns [`DistributionError::HandlerUnavailable`] when no handler
    /// can be produced for the directory.
    fn handler(&self, directory: &Path) -> Result<Box<dyn DistributionHandler>, DistributionError>;

    fn cache_state(&self) -> Arc<AgentCacheState>;
}

/// Drive one distribution pass.
///
/// Safe mode blocks after every file until the agent caches catch up,
/// bounded by ten polls per file already sent; unsafe mode trades per-file
/// synchrony for throughput and performs a single delayed re-check after
/// the last file. Cancellation is observed before each file request.
///
/// # Errors
///
/// Returns [`DistributionError`] when the handler cannot be produced or a
/// transfer fails.
pub(in crate::coordinator) async fn run_distribution(
    distribution: &dyn FileDistribution,
    directory: &Path,
    safe: bool,
    listeners: &ListenerSet<dyn FileDistributionListener>,
    cancel: &AtomicBool,
) -> Result<(), DistributionError> {
    let cache_state = distribution.cache_state();
    let mut effective_safe = safe;
    for listener in listeners.snapshot() {
        effective_safe = listener.on_start(directory, safe);
    }
    info!(
        "Distributing {} (safe: {})",
        directory.display(),
        effective_safe
    );

    let mut handler = distribution.handler(directory)?;
    let mut file_count: u32 = 0;
    loop {
        if cancel.load(Ordering::Relaxed) {
            info!("Distribution canceled after {} files", file_count);
            return Ok(());
        }
        let Some(file) = handler.send_next_file().await? else {
            break;
        };
        file_count = file_count.saturating_add(1);
        debug!("Distributed {}", file.name);
        listeners.apply("file distribution", |listener| {
            listener.on_distributed(&file.name)
        });
        if effective_safe {
            // Agent caches update asynchronously; never let the transfer
            // outrun the agents' ability to materialize files.
            wait_for_cache_consistency(&cache_state, file_count).await;
        }
    }
    if !effective_safe {
        tokio::time::sleep(Duration::from_secs(1)).await;
        wait_for_cache_consistency(&cache_state, file_count).await;
    }
    Ok(())
}

async fn wait_for_cache_consistency(cache_state: &AgentCacheState, file_count: u32) {
    let bound = file_count.saturating_mul(CACHE_POLLS_PER_FILE);
    for _ in 0..bound {
        if !cache_state.is_out_of_date() {
            return;
        }
        cache_state.wait_changed(CACHE_POLL_INTERVAL).await;
    }
}
