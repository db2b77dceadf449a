//! Batching processor - Buffers acknowledgements and flushes them on a size or time trigger
//!
//! Producers push handles on an unbounded channel. A single flusher task moves them into its
//! pending queue and flushes them to the coordinator when either `flush_threshold` handles are
//! pending, or `flush_interval` elapsed since the last flush. On stop, the flusher waits up to
//! `shutdown_timeout` for in-flight commits, then cancels whatever is left.

use std::collections::{HashMap, VecDeque};
use std::future::IntoFuture;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{self, FutureExt};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{self, AbortHandle, JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::coordinator::{AcknowledgementFuture, OrderingCoordinator};
use crate::error::{AcknowledgementError, ConfigError};
use crate::message::MessageHandle;
use crate::metrics_consts::{CANCELLED, DISCARDED, FLUSHES, PENDING_MESSAGES};
use crate::processor::{discard, AcknowledgementProcessor, ProcessorOptions, ProcessorSettings};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

pub struct BatchingAcknowledgementProcessor {
    options: ProcessorOptions,
    flush_threshold: Option<NonZeroUsize>,
    flush_interval: Option<Duration>,
    shutdown_timeout: Duration,
    running: AtomicBool,
    sender: RwLock<Option<mpsc::UnboundedSender<MessageHandle>>>,
    flusher: Mutex<FlusherState>,
}

enum FlusherState {
    Idle,
    Running(RunningFlusher),
    /// `stop` is waiting for the flusher to drain.
    Stopping,
}

struct RunningFlusher {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Marks the flusher idle once `stop` is done with it, even if `stop` itself is cancelled.
struct IdleOnDrop<'a>(&'a Mutex<FlusherState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock() = FlusherState::Idle;
    }
}

impl BatchingAcknowledgementProcessor {
    pub fn new(id: &str) -> Self {
        Self {
            options: ProcessorOptions::new(id),
            flush_threshold: None,
            flush_interval: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            running: AtomicBool::new(false),
            sender: RwLock::new(None),
            flusher: Mutex::new(FlusherState::Idle),
        }
    }

    /// Number of pending handles that triggers a flush.
    pub fn set_flush_threshold(&mut self, flush_threshold: usize) -> Result<(), ConfigError> {
        self.flush_threshold =
            Some(NonZeroUsize::new(flush_threshold).ok_or(ConfigError::InvalidFlushThreshold)?);
        Ok(())
    }

    /// Longest time a handle waits in the pending queue before being flushed.
    pub fn set_flush_interval(&mut self, flush_interval: Duration) -> Result<(), ConfigError> {
        if flush_interval.is_zero() {
            return Err(ConfigError::InvalidFlushInterval);
        }
        self.flush_interval = Some(flush_interval);
        Ok(())
    }

    /// How long `stop` waits for in-flight commits before cancelling them.
    pub fn set_shutdown_timeout(&mut self, shutdown_timeout: Duration) {
        self.shutdown_timeout = shutdown_timeout;
    }
}

impl ProcessorSettings for BatchingAcknowledgementProcessor {
    fn options_mut(&mut self) -> &mut ProcessorOptions {
        &mut self.options
    }
}

#[async_trait]
impl AcknowledgementProcessor for BatchingAcknowledgementProcessor {
    fn id(&self) -> &str {
        self.options.id()
    }

    /// Enqueue the handles and return at once, commits happen on the flusher.
    fn on_acknowledge_batch(&self, handles: Vec<MessageHandle>) -> AcknowledgementFuture {
        if !self.running.load(Ordering::Acquire) {
            return discard(self.id(), handles.len());
        }

        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            return discard(self.id(), handles.len());
        };

        let count = handles.len();
        for (sent, handle) in handles.into_iter().enumerate() {
            if sender.send(handle).is_err() {
                return discard(self.id(), count - sent);
            }
        }

        future::ready(Ok(())).boxed()
    }

    /// Fails with `ConfigError::Stopping` while a previous `stop` is still draining.
    fn start(&self) -> Result<(), ConfigError> {
        let mut state = self.flusher.lock();
        match *state {
            FlusherState::Idle => {}
            FlusherState::Running(_) => return Ok(()),
            FlusherState::Stopping => return Err(ConfigError::Stopping),
        }

        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let coordinator = self.options.coordinator(runtime.clone())?;
        let flush_threshold = self
            .flush_threshold
            .ok_or(ConfigError::MissingFlushThreshold)?;
        let flush_interval = self
            .flush_interval
            .ok_or(ConfigError::MissingFlushInterval)?;

        debug!(
            processor = self.id(),
            ordering = %coordinator.ordering(),
            flush_threshold = flush_threshold.get(),
            flush_interval_ms = flush_interval.as_millis() as u64,
            "starting batching acknowledgement processor"
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = runtime.spawn(
            Flusher::new(
                self.id(),
                coordinator,
                receiver,
                flush_threshold.get(),
                flush_interval,
                self.shutdown_timeout,
            )
            .run(shutdown.clone()),
        );

        *self.sender.write() = Some(sender);
        *state = FlusherState::Running(RunningFlusher { shutdown, task });
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop accepting acknowledgements and wait for in-flight commits, up to the shutdown timeout.
    async fn stop(&self) {
        let RunningFlusher { shutdown, task } = {
            let mut state = self.flusher.lock();
            self.running.store(false, Ordering::Release);
            self.sender.write().take();
            match std::mem::replace(&mut *state, FlusherState::Stopping) {
                FlusherState::Running(running) => running,
                other => {
                    *state = other;
                    return;
                }
            }
        };
        let _idle = IdleOnDrop(&self.flusher);

        debug!(
            processor = self.id(),
            "stopping batching acknowledgement processor"
        );
        shutdown.cancel();
        if let Err(e) = task.await {
            error!(processor = self.id(), error = %e, "acknowledgement flusher failed");
        }
        debug!(
            processor = self.id(),
            "stopped batching acknowledgement processor"
        );
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Owns the pending queue and every in-flight flush of a running processor.
struct Flusher {
    processor: String,
    coordinator: OrderingCoordinator,
    receiver: mpsc::UnboundedReceiver<MessageHandle>,
    pending: VecDeque<MessageHandle>,
    flush_threshold: usize,
    flush_interval: Duration,
    shutdown_timeout: Duration,
    in_flight: JoinSet<Result<(), AcknowledgementError>>,
    /// Batch tasks of every in-flight flush, aborted if the drain times out.
    abort_handles: HashMap<task::Id, Vec<AbortHandle>>,
    #[cfg(test)]
    peak_in_flight: usize,
}

impl Flusher {
    fn new(
        processor: &str,
        coordinator: OrderingCoordinator,
        receiver: mpsc::UnboundedReceiver<MessageHandle>,
        flush_threshold: usize,
        flush_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            processor: processor.to_owned(),
            coordinator,
            receiver,
            pending: VecDeque::new(),
            flush_threshold,
            flush_interval,
            shutdown_timeout,
            in_flight: JoinSet::new(),
            abort_handles: HashMap::new(),
            #[cfg(test)]
            peak_in_flight: 0,
        }
    }

    async fn run(mut self, shutdown: CancellationToken) {
        self.flush_until_stopped(&shutdown).await;
        self.drain().await;
    }

    async fn flush_until_stopped(&mut self, shutdown: &CancellationToken) {
        let mut last_flush = Instant::now();

        loop {
            self.reap_finished();
            while let Ok(handle) = self.receiver.try_recv() {
                self.pending.push_back(handle);
            }
            gauge!(PENDING_MESSAGES, "processor" => self.processor.clone())
                .set(self.pending.len() as f64);

            let now = Instant::now();
            let interval_elapsed = now.duration_since(last_flush) >= self.flush_interval;
            let threshold_reached = self.pending.len() >= self.flush_threshold;

            if !self.pending.is_empty() && (interval_elapsed || threshold_reached) {
                // A late flush takes everything pending, a threshold flush exactly one threshold
                if interval_elapsed {
                    self.flush(self.pending.len(), "interval");
                } else {
                    self.flush(self.flush_threshold, "threshold");
                }
                last_flush = now;
                task::yield_now().await;
                continue;
            }

            if interval_elapsed {
                last_flush = now;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.receiver.recv() => match received {
                    Some(handle) => self.pending.push_back(handle),
                    None => break,
                },
                Some(joined) = self.in_flight.join_next_with_id(), if !self.in_flight.is_empty() => {
                    self.reap(joined);
                }
                _ = tokio::time::sleep_until(last_flush + self.flush_interval) => {}
            }
        }
    }

    fn flush(&mut self, count: usize, trigger: &'static str) {
        let count = count.min(self.pending.len());
        let handles: Vec<MessageHandle> = self.pending.drain(..count).collect();

        counter!(FLUSHES, "processor" => self.processor.clone(), "trigger" => trigger)
            .increment(1);
        trace!(
            processor = %self.processor,
            trigger,
            count,
            remaining = self.pending.len(),
            "flushing acknowledgements"
        );

        let dispatch = self.coordinator.dispatch(handles);
        let abort_handles = dispatch.abort_handles();
        let id = self.in_flight.spawn(dispatch.into_future()).id();
        self.abort_handles.insert(id, abort_handles);

        #[cfg(test)]
        {
            self.peak_in_flight = self.peak_in_flight.max(self.in_flight.len());
        }
    }

    /// Forget every flush that completed since the last call.
    fn reap_finished(&mut self) {
        while let Some(joined) = self.in_flight.try_join_next_with_id() {
            self.reap(joined);
        }
    }

    fn reap(&mut self, joined: Result<(task::Id, Result<(), AcknowledgementError>), JoinError>) {
        match joined {
            Ok((id, result)) => {
                self.abort_handles.remove(&id);
                if let Err(e) = result {
                    // Already reported with the failed message ids
                    trace!(processor = %self.processor, error = %e, "flush completed with errors");
                }
            }
            Err(e) => {
                self.abort_handles.remove(&e.id());
                if e.is_panic() {
                    error!(processor = %self.processor, error = %e, "acknowledgement flush panicked");
                }
            }
        }
    }

    /// Discard what was never flushed and wait for in-flight commits, returning how many
    /// commits had to be cancelled.
    async fn drain(&mut self) -> usize {
        self.receiver.close();
        while let Ok(handle) = self.receiver.try_recv() {
            self.pending.push_back(handle);
        }

        if !self.pending.is_empty() {
            let count = self.pending.len();
            warn!(
                processor = %self.processor,
                count,
                "discarding acknowledgements not flushed before stop, messages will be redelivered"
            );
            counter!(DISCARDED, "processor" => self.processor.clone(), "reason" => "shutdown")
                .increment(count as u64);
            self.pending.clear();
        }
        gauge!(PENDING_MESSAGES, "processor" => self.processor.clone()).set(0.0);

        let mut cancelled = 0;
        let deadline = Instant::now() + self.shutdown_timeout;
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.in_flight.join_next_with_id()).await {
                Ok(Some(joined)) => self.reap(joined),
                Ok(None) => break,
                Err(_) => {
                    cancelled = self.cancel_in_flight().await;
                    break;
                }
            }
        }

        debug!(processor = %self.processor, "acknowledgement flusher stopped");
        cancelled
    }

    async fn cancel_in_flight(&mut self) -> usize {
        self.reap_finished();
        let outstanding = self
            .abort_handles
            .values()
            .flatten()
            .filter(|handle| !handle.is_finished())
            .count();
        warn!(
            processor = %self.processor,
            count = outstanding,
            timeout_ms = self.shutdown_timeout.as_millis() as u64,
            "acknowledgements still in flight after shutdown timeout, cancelling them"
        );
        counter!(CANCELLED, "processor" => self.processor.clone()).increment(outstanding as u64);

        for handle in self.abort_handles.values().flatten() {
            handle.abort();
        }
        self.in_flight.abort_all();
        while let Some(joined) = self.in_flight.join_next_with_id().await {
            self.reap(joined);
        }
        outstanding
    }
}
