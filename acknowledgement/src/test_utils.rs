//! Helpers for testing code built on acknowledgement processors.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::AcknowledgementError;
use crate::executor::AcknowledgementExecutor;
use crate::message::{Batch, MessageHandle};

/// Build `count` ungrouped handles with distinct ids and receipt handles.
pub fn handles(count: usize) -> Vec<MessageHandle> {
    (0..count)
        .map(|index| MessageHandle::new(Uuid::now_v7(), format!("receipt-{index}")))
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Latency {
    None,
    Fixed(Duration),
    /// Varies between zero and the given duration from one call to the next.
    Jitter(Duration),
    /// Calls never complete.
    Stalled,
}

/// An executor recording every batch it is given.
///
/// Batches are recorded when the executor is called, in call order.
pub struct RecordingExecutor {
    latency: Latency,
    failing: HashSet<Uuid>,
    panicking: HashSet<Uuid>,
    batches: Mutex<Vec<Batch>>,
    windows: Mutex<Vec<(Instant, Instant)>>,
    calls: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            latency: Latency::None,
            failing: HashSet::new(),
            panicking: HashSet::new(),
            batches: Mutex::new(Vec::new()),
            windows: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call takes `delay` to complete.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.latency = Latency::Fixed(delay);
        self
    }

    /// Calls take anywhere between zero and `max` to complete.
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.latency = Latency::Jitter(max);
        self
    }

    /// Calls never complete, they can only be cancelled.
    pub fn stalled(mut self) -> Self {
        self.latency = Latency::Stalled;
        self
    }

    /// Fail every batch containing the message `id`.
    pub fn failing_on(mut self, id: Uuid) -> Self {
        self.failing.insert(id);
        self
    }

    /// Panic on every batch containing the message `id`, once the call's latency has elapsed.
    pub fn panicking_on(mut self, id: Uuid) -> Self {
        self.panicking.insert(id);
        self
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    /// Ids of every handle received, in call order.
    pub fn executed_ids(&self) -> Vec<Uuid> {
        self.batches.lock().iter().flat_map(Batch::ids).collect()
    }

    /// Start and end of every completed call, in completion order.
    pub fn commit_windows(&self) -> Vec<(Instant, Instant)> {
        self.windows.lock().clone()
    }

    pub fn started(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Calls dropped before completing.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn delay_for(&self, call: usize) -> Option<Duration> {
        match self.latency {
            Latency::None | Latency::Stalled => None,
            Latency::Fixed(delay) => Some(delay),
            Latency::Jitter(max) => Some(max.mul_f64(((call * 7) % 11) as f64 / 10.0)),
        }
    }
}

/// Counts the call as cancelled if dropped before being marked complete.
struct CallGuard<'a> {
    executor: &'a RecordingExecutor,
    completed: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.executor.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.completed {
            self.executor.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.executor.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl AcknowledgementExecutor for RecordingExecutor {
    async fn execute(&self, batch: &Batch) -> Result<(), AcknowledgementError> {
        let start = Instant::now();
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().push(batch.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let mut guard = CallGuard {
            executor: self,
            completed: false,
        };

        if let Latency::Stalled = self.latency {
            futures::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay_for(call) {
            tokio::time::sleep(delay).await;
        }

        self.windows.lock().push((start, Instant::now()));
        guard.completed = true;

        if batch.handles().iter().any(|h| self.panicking.contains(&h.id())) {
            panic!("recording executor panicked on batch {:?}", batch.ids());
        }
        if batch.handles().iter().any(|h| self.failing.contains(&h.id())) {
            return Err(AcknowledgementError::commit(
                batch.ids(),
                "rejected by recording executor",
            ));
        }
        Ok(())
    }
}

/// Poll `check` until it holds or `timeout` elapses, returning its last value.
pub async fn wait_until<F>(check: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}
