// Error types shared across the dispatcher

use thiserror::Error;

/// Errors raised from handler invocation.
///
/// `Transient` failures are counted against the task's retry budget;
/// `Fatal` failures send the task to the dead-letter queue immediately.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        HandlerError::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        HandlerError::Fatal(msg.into())
    }
}

/// Fatal startup errors: an unreadable or invalid configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Invalid {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
