use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

/// Enumeration of errors raised while configuring or starting an acknowledgement processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("acknowledgement executor not set")]
    MissingExecutor,
    #[error("acknowledgement ordering not set")]
    MissingOrdering,
    #[error("flush threshold not set")]
    MissingFlushThreshold,
    #[error("flush interval not set")]
    MissingFlushInterval,
    #[error("flush threshold must be greater than zero")]
    InvalidFlushThreshold,
    #[error("flush interval must be a positive duration")]
    InvalidFlushInterval,
    #[error("max batch size must be greater than zero")]
    InvalidMaxBatchSize,
    #[error("{0} is not a valid acknowledgement ordering")]
    InvalidOrdering(String),
    #[error("{0} is not a valid acknowledgement mode")]
    InvalidMode(String),
    #[error("acknowledgement processors must be started from within a tokio runtime")]
    NoRuntime,
    #[error("processor is still stopping, wait for stop to return before starting it again")]
    Stopping,
}

/// Enumeration of errors surfaced by the futures returned when acknowledging messages.
///
/// Errors are `Clone` as a single outcome may be observed by several chained futures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcknowledgementError {
    #[error("failed to acknowledge {} messages: {reason}", ids.len())]
    Commit { ids: Vec<Uuid>, reason: String },
    #[error("acknowledgement result callback failed: {0}")]
    Callback(String),
    #[error("acknowledgement was cancelled before completing")]
    Cancelled,
    #[error("acknowledgement task panicked: {0}")]
    Panicked(String),
    #[error("a batch must hold between 1 and {max} messages, got {size}")]
    InvalidBatch { size: usize, max: usize },
}

impl AcknowledgementError {
    /// Build a commit failure for the given message ids out of any displayable backend error.
    pub fn commit(ids: Vec<Uuid>, reason: impl std::fmt::Display) -> Self {
        AcknowledgementError::Commit {
            ids,
            reason: reason.to_string(),
        }
    }
}

impl From<JoinError> for AcknowledgementError {
    fn from(error: JoinError) -> Self {
        if error.is_cancelled() {
            AcknowledgementError::Cancelled
        } else {
            AcknowledgementError::Panicked(error.to_string())
        }
    }
}
