use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Bootstrap failure during {context}: {source}")]
    Bootstrap {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Timed out waiting for {expected} agents (got {actual}).")]
    ConnectionTimeout { expected: usize, actual: usize },
    #[error("Timed out waiting for agents to disconnect ({running_thread} threads still running).")]
    DisconnectTimeout { running_thread: u32 },
    #[error("Operation {operation} is not allowed in state {state}.")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("Worker launch failed: {source}")]
    WorkerLaunch {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Console message channel closed.")]
    ChannelClosed,
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
