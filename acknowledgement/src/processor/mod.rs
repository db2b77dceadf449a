use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, FutureExt};
use metrics::counter;
use tokio::runtime::Handle;
use tracing::debug;

use crate::callback::{AcknowledgementResultCallback, NoopCallback};
use crate::coordinator::{AcknowledgementFuture, OrderingCoordinator};
use crate::error::ConfigError;
use crate::executor::AcknowledgementExecutor;
use crate::message::MessageHandle;
use crate::metrics_consts::DISCARDED;
use crate::ordering::AcknowledgementOrdering;

pub mod batching;
pub mod immediate;

/// Largest batch accepted by SQS `DeleteMessageBatch`.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Accepts acknowledgement requests from message handlers and gets them committed.
///
/// Requests made while the processor is not running are discarded: the returned future is
/// already completed and nothing is committed.
#[async_trait]
pub trait AcknowledgementProcessor: Send + Sync {
    fn id(&self) -> &str;

    fn on_acknowledge(&self, handle: MessageHandle) -> AcknowledgementFuture {
        self.on_acknowledge_batch(vec![handle])
    }

    fn on_acknowledge_batch(&self, handles: Vec<MessageHandle>) -> AcknowledgementFuture;

    /// Validate the configuration and start accepting requests.
    ///
    /// Must be called from within a tokio runtime, which is then used for every commit.
    fn start(&self) -> Result<(), ConfigError>;

    async fn stop(&self);

    fn is_running(&self) -> bool;
}

/// Configuration shared by every processor.
pub struct ProcessorOptions {
    id: String,
    executor: Option<Arc<dyn AcknowledgementExecutor>>,
    callback: Arc<dyn AcknowledgementResultCallback>,
    ordering: Option<AcknowledgementOrdering>,
    max_batch_size: NonZeroUsize,
}

impl ProcessorOptions {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            executor: None,
            callback: Arc::new(NoopCallback),
            ordering: None,
            max_batch_size: NonZeroUsize::new(DEFAULT_MAX_BATCH_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ordering(&self) -> Option<AcknowledgementOrdering> {
        self.ordering
    }

    pub fn max_batch_size(&self) -> NonZeroUsize {
        self.max_batch_size
    }

    /// Build the coordinator committing on `runtime`, failing if anything required is unset.
    pub(crate) fn coordinator(&self, runtime: Handle) -> Result<OrderingCoordinator, ConfigError> {
        let executor = self.executor.clone().ok_or(ConfigError::MissingExecutor)?;
        let ordering = self.ordering.ok_or(ConfigError::MissingOrdering)?;

        Ok(OrderingCoordinator::new(
            &self.id,
            executor,
            self.callback.clone(),
            ordering,
            self.max_batch_size,
            runtime,
        ))
    }
}

/// Setters shared by every processor, to be called before `start`.
pub trait ProcessorSettings {
    fn options_mut(&mut self) -> &mut ProcessorOptions;

    fn set_executor(&mut self, executor: Arc<dyn AcknowledgementExecutor>) {
        self.options_mut().executor = Some(executor);
    }

    fn set_ordering(&mut self, ordering: AcknowledgementOrdering) {
        self.options_mut().ordering = Some(ordering);
    }

    fn set_max_batch_size(&mut self, max_batch_size: usize) -> Result<(), ConfigError> {
        self.options_mut().max_batch_size =
            NonZeroUsize::new(max_batch_size).ok_or(ConfigError::InvalidMaxBatchSize)?;
        Ok(())
    }

    fn set_result_callback(&mut self, callback: Arc<dyn AcknowledgementResultCallback>) {
        self.options_mut().callback = callback;
    }
}

/// The future returned for requests made while a processor is not running.
pub(crate) fn discard(processor: &str, count: usize) -> AcknowledgementFuture {
    debug!(
        processor,
        count, "processor is not running, discarding acknowledgements"
    );
    counter!(DISCARDED, "processor" => processor.to_owned(), "reason" => "stopped")
        .increment(count as u64);

    future::ready(Ok(())).boxed()
}
