use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use acknowledgement::{AcknowledgementError, AcknowledgementExecutor, Batch};
use anyhow::bail;
use async_trait::async_trait;
use rand::Rng;

/// Stands in for a queue's batch delete call: takes `latency` per batch and fails a share of them.
pub struct SimulatedExecutor {
    latency: Duration,
    failure_rate: f64,
    committed: AtomicU64,
    rejected: AtomicU64,
}

impl SimulatedExecutor {
    /// Fails unless `failure_rate` is a probability between 0 and 1.
    pub fn new(latency: Duration, failure_rate: f64) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&failure_rate) {
            bail!("commit failure rate must be between 0 and 1, got {failure_rate}");
        }

        Ok(Self {
            latency,
            failure_rate,
            committed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Messages committed so far.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Messages in batches that failed to commit so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AcknowledgementExecutor for SimulatedExecutor {
    async fn execute(&self, batch: &Batch) -> Result<(), AcknowledgementError> {
        let fail = rand::thread_rng().gen_bool(self.failure_rate);
        tokio::time::sleep(self.latency).await;

        if fail {
            self.rejected.fetch_add(batch.len() as u64, Ordering::Relaxed);
            return Err(AcknowledgementError::commit(
                batch.ids(),
                "simulated backend failure",
            ));
        }

        self.committed.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}
