use thiserror::Error;

use super::{CoordinatorError, DistributionError, ReportError};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("TOML error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },
    #[error("TOML serialization error: {source}")]
    TomlSerialize {
        #[from]
        source: toml::ser::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Expression error: {message}")]
    Expression { message: String },
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("Report error: {0}")]
    Report(#[from] ReportError),
    #[error("Distribution error: {0}")]
    Distribution(#[from] DistributionError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn expression<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        CoreError::Expression {
            message: message.into(),
        }
    }

    pub fn coordinator<E>(error: E) -> Self
    where
        E: Into<CoordinatorError>,
    {
        error.into().into()
    }

    pub fn report<E>(error: E) -> Self
    where
        E: Into<ReportError>,
    {
        error.into().into()
    }

    pub fn distribution<E>(error: E) -> Self
    where
        E: Into<DistributionError>,
    {
        error.into().into()
    }
}
