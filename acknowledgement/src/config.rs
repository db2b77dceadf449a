use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time;

use envconfig::Envconfig;

use crate::error::ConfigError;
use crate::executor::AcknowledgementExecutor;
use crate::ordering::AcknowledgementOrdering;
use crate::processor::batching::BatchingAcknowledgementProcessor;
use crate::processor::immediate::ImmediateAcknowledgementProcessor;
use crate::processor::{AcknowledgementProcessor, ProcessorSettings};

#[derive(Envconfig, Clone, Debug)]
pub struct AcknowledgementConfig {
    #[envconfig(from = "ACK_MODE", default = "batching")]
    pub mode: AcknowledgementMode,

    #[envconfig(from = "ACK_ORDERING", default = "parallel")]
    pub ordering: AcknowledgementOrdering,

    #[envconfig(from = "ACK_FLUSH_THRESHOLD", default = "10")]
    pub flush_threshold: usize,

    #[envconfig(from = "ACK_FLUSH_INTERVAL_MS", default = "1000")]
    pub flush_interval: EnvMsDuration,

    #[envconfig(from = "ACK_SHUTDOWN_TIMEOUT_MS", default = "20000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(from = "ACK_MAX_BATCH_SIZE", default = "10")]
    pub max_batch_size: usize,
}

impl AcknowledgementConfig {
    /// Build a processor ready to be started, committing through `executor`.
    pub fn build_processor(
        &self,
        id: &str,
        executor: Arc<dyn AcknowledgementExecutor>,
    ) -> Result<Box<dyn AcknowledgementProcessor>, ConfigError> {
        match self.mode {
            AcknowledgementMode::Immediate => {
                let mut processor = ImmediateAcknowledgementProcessor::new(id);
                processor.set_executor(executor);
                processor.set_ordering(self.ordering);
                processor.set_max_batch_size(self.max_batch_size)?;
                Ok(Box::new(processor))
            }
            AcknowledgementMode::Batching => {
                let mut processor = BatchingAcknowledgementProcessor::new(id);
                processor.set_executor(executor);
                processor.set_ordering(self.ordering);
                processor.set_max_batch_size(self.max_batch_size)?;
                processor.set_flush_threshold(self.flush_threshold)?;
                processor.set_flush_interval(self.flush_interval.0)?;
                processor.set_shutdown_timeout(self.shutdown_timeout.0);
                Ok(Box::new(processor))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgementMode {
    Immediate,
    Batching,
}

impl fmt::Display for AcknowledgementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcknowledgementMode::Immediate => f.write_str("immediate"),
            AcknowledgementMode::Batching => f.write_str("batching"),
        }
    }
}

impl FromStr for AcknowledgementMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(AcknowledgementMode::Immediate),
            "batching" => Ok(AcknowledgementMode::Batching),
            _ => Err(ConfigError::InvalidMode(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
