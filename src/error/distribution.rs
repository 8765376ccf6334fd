use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("Transfer error during {context}: {source}")]
    Transfer {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("No distribution handler available for {directory}.")]
    HandlerUnavailable { directory: String },
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
