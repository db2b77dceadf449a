use async_trait::async_trait;
use metrics::{counter, histogram};

use crate::error::AcknowledgementError;
use crate::message::Batch;
use crate::metrics_consts::{PRINT_EXECUTOR_BATCH_SIZE, PRINT_EXECUTOR_MESSAGES};

/// Performs the backend call that commits one batch of messages.
///
/// Implementations make exactly one backend call per invocation and resolve to `Ok` only
/// when the backend confirmed the commit of the whole batch. Partial failures inside a batch
/// are reported as an `AcknowledgementError::Commit`. Implementations must not retry,
/// whether to resubmit is up to the owner of the messages.
#[async_trait]
pub trait AcknowledgementExecutor: Send + Sync {
    async fn execute(&self, batch: &Batch) -> Result<(), AcknowledgementError>;
}

/// An executor that commits nothing and logs every batch it receives.
pub struct PrintExecutor {}

#[async_trait]
impl AcknowledgementExecutor for PrintExecutor {
    async fn execute(&self, batch: &Batch) -> Result<(), AcknowledgementError> {
        let span = tracing::span!(tracing::Level::INFO, "batch of acknowledgements");
        let _enter = span.enter();

        histogram!(PRINT_EXECUTOR_BATCH_SIZE).record(batch.len() as f64);
        counter!(PRINT_EXECUTOR_MESSAGES).increment(batch.len() as u64);
        for handle in batch.handles() {
            tracing::info!("acknowledged: {:?}", handle);
        }

        Ok(())
    }
}
