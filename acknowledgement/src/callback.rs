use async_trait::async_trait;

use crate::error::AcknowledgementError;
use crate::message::MessageHandle;

/// Hooks invoked once the backend has answered for a batch of messages.
///
/// Both hooks default to doing nothing. Returning an error from either hook turns the result
/// of the batch into `AcknowledgementError::Callback`.
#[async_trait]
pub trait AcknowledgementResultCallback: Send + Sync {
    async fn on_success(&self, _handles: &[MessageHandle]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_failure(
        &self,
        _handles: &[MessageHandle],
        _error: &AcknowledgementError,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The callback used when none is configured.
pub struct NoopCallback;

impl AcknowledgementResultCallback for NoopCallback {}
