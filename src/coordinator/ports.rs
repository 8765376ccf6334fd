use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::CoordinatorError;
use crate::protocol::ConsoleMessage;

/// Worker launch properties handed to the process-control port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub script_path: Option<PathBuf>,
    pub agent_count: u32,
    pub processes_per_agent: u32,
    pub threads_per_process: u32,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Wire transport port. Implementations own sockets and codecs; the
/// coordinator only consumes the decoded message stream.
#[async_trait]
pub trait ConsoleTransport: Send {
    /// Bind the underlying endpoints and return the inbound message stream.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Bootstrap`] when resources cannot bind.
    async fn bind(&mut self) -> Result<mpsc::Receiver<ConsoleMessage>, CoordinatorError>;

    /// Stop accepting and delivering messages. Idempotent; closing the
    /// message stream ends the dispatch loop.
    async fn shutdown(&mut self);
}

/// Worker-lifecycle port: launches and stops remote agent processes.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CoordinatorError::WorkerLaunch`] when processes cannot be
    /// started.
    async fn start_worker_processes(&self, spec: &LaunchSpec) -> Result<(), CoordinatorError>;

    /// Ask every attached agent to stop its worker processes. Idempotent;
    /// also used as a periodic nudge against lost stop signals.
    async fn stop_agent_and_worker_processes(&self);
}
