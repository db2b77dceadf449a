//! Acknowledgement processing for queue consumers.
//!
//! Message handlers hand the messages they are done with to an [`AcknowledgementProcessor`],
//! which commits them through an [`AcknowledgementExecutor`] in batches bounded by the
//! backend's maximum batch size, either right away or once a size or time threshold is hit.

pub mod callback;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod message;
pub mod metrics_consts;
pub mod ordering;
pub mod partition;
pub mod processor;
pub mod test_utils;

pub use callback::{AcknowledgementResultCallback, NoopCallback};
pub use config::{AcknowledgementConfig, AcknowledgementMode};
pub use coordinator::{AcknowledgementFuture, Dispatch, OrderingCoordinator};
pub use error::{AcknowledgementError, ConfigError};
pub use executor::{AcknowledgementExecutor, PrintExecutor};
pub use message::{Batch, MessageHandle};
pub use ordering::AcknowledgementOrdering;
pub use processor::batching::BatchingAcknowledgementProcessor;
pub use processor::immediate::ImmediateAcknowledgementProcessor;
pub use processor::{AcknowledgementProcessor, ProcessorSettings};
