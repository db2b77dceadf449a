//! Ordering Coordinator - Hands batches of acknowledgements to the executor
//!
//! In `Parallel` mode every batch is committed concurrently. In the ordered modes every
//! batch is appended to a chain: a batch is only handed to the executor once the previous
//! batch of its chain has finished, whatever its outcome. `Ordered` keeps a single chain,
//! `OrderedByGroup` keeps one chain per message group.
//!
//! Chains are extended under a fair lock, so concurrent callers extend them in the order
//! they asked to. The lock only covers the extension, never the commits.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use metrics::{counter, histogram};
use parking_lot::FairMutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, trace};

use crate::callback::AcknowledgementResultCallback;
use crate::error::AcknowledgementError;
use crate::executor::AcknowledgementExecutor;
use crate::message::{Batch, MessageHandle};
use crate::metrics_consts::{BATCHES, BATCH_SIZE, COMMIT_DURATION, COMMIT_ERRORS};
use crate::ordering::AcknowledgementOrdering;
use crate::partition::partition;

/// The future returned for a request to acknowledge messages.
pub type AcknowledgementFuture = BoxFuture<'static, Result<(), AcknowledgementError>>;

/// Resolves once the last batch appended to a chain has finished, successfully or not.
type Link = Shared<BoxFuture<'static, ()>>;

/// Chain used for `Ordered`, and for messages without a group under `OrderedByGroup`.
const DEFAULT_GROUP: &str = "default";

/// The batches spawned for one dispatch request.
///
/// Commits run whether or not this is awaited. Awaiting it resolves once every batch has
/// finished, to the first failure in batch order if any batch failed.
pub struct Dispatch {
    tasks: Vec<JoinHandle<Result<(), AcknowledgementError>>>,
}

impl Dispatch {
    fn empty() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Number of batches spawned.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Handles to cancel every batch of this dispatch.
    pub fn abort_handles(&self) -> Vec<AbortHandle> {
        self.tasks.iter().map(JoinHandle::abort_handle).collect()
    }
}

impl IntoFuture for Dispatch {
    type Output = Result<(), AcknowledgementError>;
    type IntoFuture = AcknowledgementFuture;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            future::join_all(self.tasks)
                .await
                .into_iter()
                .map(|joined| joined.unwrap_or_else(|error| Err(error.into())))
                .find(Result::is_err)
                .unwrap_or(Ok(()))
        }
        .boxed()
    }
}

/// Commits a single batch and reports its outcome.
struct Committer {
    processor: String,
    ordering: AcknowledgementOrdering,
    executor: Arc<dyn AcknowledgementExecutor>,
    callback: Arc<dyn AcknowledgementResultCallback>,
}

impl Committer {
    async fn commit(&self, batch: Batch) -> Result<(), AcknowledgementError> {
        let labels = [
            ("processor", self.processor.clone()),
            ("ordering", self.ordering.to_string()),
        ];
        counter!(BATCHES, &labels).increment(1);
        histogram!(BATCH_SIZE).record(batch.len() as f64);

        let start = Instant::now();
        let result = self.executor.execute(&batch).await;
        let elapsed = start.elapsed();
        histogram!(COMMIT_DURATION).record(elapsed.as_secs_f64());

        trace!(
            processor = %self.processor,
            count = batch.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "executed acknowledgement batch"
        );

        match result {
            Ok(()) => self
                .callback
                .on_success(batch.handles())
                .await
                .map_err(|e| AcknowledgementError::Callback(format!("{e:#}"))),
            Err(error) => {
                counter!(COMMIT_ERRORS, "processor" => self.processor.clone()).increment(1);
                error!(
                    processor = %self.processor,
                    message_ids = ?batch.ids(),
                    error = %error,
                    "failed to acknowledge messages"
                );

                if let Err(e) = self.callback.on_failure(batch.handles(), &error).await {
                    return Err(AcknowledgementError::Callback(format!("{e:#}")));
                }
                Err(error)
            }
        }
    }
}

pub struct OrderingCoordinator {
    processor: String,
    ordering: AcknowledgementOrdering,
    max_batch_size: NonZeroUsize,
    committer: Arc<Committer>,
    /// Commits are spawned here, so callers don't need to be on a runtime thread.
    runtime: Handle,
    /// Tail of every chain, by message group.
    chains: FairMutex<HashMap<String, Link>>,
}

impl OrderingCoordinator {
    pub fn new(
        processor: &str,
        executor: Arc<dyn AcknowledgementExecutor>,
        callback: Arc<dyn AcknowledgementResultCallback>,
        ordering: AcknowledgementOrdering,
        max_batch_size: NonZeroUsize,
        runtime: Handle,
    ) -> Self {
        Self {
            processor: processor.to_owned(),
            ordering,
            max_batch_size,
            committer: Arc::new(Committer {
                processor: processor.to_owned(),
                ordering,
                executor,
                callback,
            }),
            runtime,
            chains: FairMutex::new(HashMap::new()),
        }
    }

    pub fn ordering(&self) -> AcknowledgementOrdering {
        self.ordering
    }

    /// Partition `handles` into batches and spawn their commits according to the ordering.
    pub fn dispatch(&self, handles: Vec<MessageHandle>) -> Dispatch {
        if handles.is_empty() {
            return Dispatch::empty();
        }

        trace!(
            processor = %self.processor,
            ordering = %self.ordering,
            count = handles.len(),
            "dispatching acknowledgements"
        );

        let tasks = match self.ordering {
            AcknowledgementOrdering::Parallel => self.dispatch_parallel(handles),
            AcknowledgementOrdering::Ordered => {
                self.dispatch_ordered(vec![(DEFAULT_GROUP.to_owned(), handles)])
            }
            AcknowledgementOrdering::OrderedByGroup => {
                self.dispatch_ordered(group_by_message_group(handles))
            }
        };

        Dispatch { tasks }
    }

    fn dispatch_parallel(
        &self,
        handles: Vec<MessageHandle>,
    ) -> Vec<JoinHandle<Result<(), AcknowledgementError>>> {
        partition(handles, self.max_batch_size)
            .into_iter()
            .map(|batch| {
                let committer = self.committer.clone();
                self.runtime
                    .spawn(async move { committer.commit(batch).await })
            })
            .collect()
    }

    fn dispatch_ordered(
        &self,
        groups: Vec<(String, Vec<MessageHandle>)>,
    ) -> Vec<JoinHandle<Result<(), AcknowledgementError>>> {
        let mut chains = self.chains.lock();
        let mut tasks = Vec::new();

        for (group, handles) in groups {
            for batch in partition(handles, self.max_batch_size) {
                // The sender is dropped if the commit is cancelled or panics, which also
                // releases the next link.
                let (done_tx, done_rx) = oneshot::channel::<()>();
                let link: Link = done_rx.map(|_| ()).boxed().shared();
                let previous = chains
                    .insert(group.clone(), link)
                    .unwrap_or_else(finished_link);

                let committer = self.committer.clone();
                tasks.push(self.runtime.spawn(async move {
                    previous.await;
                    let result = committer.commit(batch).await;
                    _ = done_tx.send(());
                    result
                }));
            }
        }

        chains.retain(|_, link| !is_finished(link));
        tasks
    }

    #[cfg(test)]
    fn chain_count(&self) -> usize {
        self.chains.lock().len()
    }
}

fn finished_link() -> Link {
    future::ready(()).boxed().shared()
}

fn is_finished(link: &Link) -> bool {
    link.peek().is_some() || link.clone().now_or_never().is_some()
}

/// Group handles by message group, keeping groups in order of first appearance.
fn group_by_message_group(handles: Vec<MessageHandle>) -> Vec<(String, Vec<MessageHandle>)> {
    let mut groups: Vec<(String, Vec<MessageHandle>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for handle in handles {
        let group = handle.group().unwrap_or(DEFAULT_GROUP).to_owned();
        match positions.get(&group) {
            Some(&position) => groups[position].1.push(handle),
            None => {
                positions.insert(group.clone(), groups.len());
                groups.push((group, vec![handle]));
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::callback::NoopCallback;
    use crate::test_utils::{handles, RecordingExecutor};

    fn coordinator(
        executor: Arc<RecordingExecutor>,
        ordering: AcknowledgementOrdering,
    ) -> OrderingCoordinator {
        coordinator_with_callback(executor, Arc::new(NoopCallback), ordering)
    }

    fn coordinator_with_callback(
        executor: Arc<RecordingExecutor>,
        callback: Arc<dyn AcknowledgementResultCallback>,
        ordering: AcknowledgementOrdering,
    ) -> OrderingCoordinator {
        OrderingCoordinator::new(
            "test-coordinator",
            executor,
            callback,
            ordering,
            NonZeroUsize::new(10).unwrap(),
            Handle::current(),
        )
    }

    fn ids(handles: &[MessageHandle]) -> Vec<Uuid> {
        handles.iter().map(MessageHandle::id).collect()
    }

    #[tokio::test]
    async fn test_empty_dispatch_does_nothing() {
        let executor = Arc::new(RecordingExecutor::new());
        let coordinator = coordinator(executor.clone(), AcknowledgementOrdering::Ordered);

        let dispatch = coordinator.dispatch(vec![]);
        assert!(dispatch.is_empty());
        dispatch.await.expect("empty dispatch failed");

        assert_eq!(executor.started(), 0);
    }

    #[tokio::test]
    async fn test_parallel_dispatch_commits_batches_concurrently() {
        let executor = Arc::new(RecordingExecutor::new().with_delay(Duration::from_millis(100)));
        let coordinator = coordinator(executor.clone(), AcknowledgementOrdering::Parallel);

        let dispatch = coordinator.dispatch(handles(30));
        assert_eq!(dispatch.len(), 3);
        dispatch.await.expect("parallel dispatch failed");

        let batches = executor.batches();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|batch| batch.len() == 10));

        // A batch started before another one finished
        let windows = executor.commit_windows();
        let overlapping = windows.iter().enumerate().any(|(i, (start, _))| {
            windows
                .iter()
                .enumerate()
                .any(|(j, (other_start, other_end))| {
                    i != j && other_start <= start && start < other_end
                })
        });
        assert!(overlapping);
        assert!(executor.max_concurrency() > 1);
    }

    #[tokio::test]
    async fn test_parallel_dispatch_surfaces_failure_without_cancelling_siblings() {
        let input = handles(30);
        let executor = Arc::new(
            RecordingExecutor::new()
                .with_delay(Duration::from_millis(20))
                .failing_on(input[0].id()),
        );
        let coordinator = coordinator(executor.clone(), AcknowledgementOrdering::Parallel);

        let result = coordinator.dispatch(input.clone()).await;

        match result {
            Err(AcknowledgementError::Commit { ids: failed, .. }) => {
                assert_eq!(failed, ids(&input[0..10]))
            }
            other => panic!("expected a commit failure, got {:?}", other),
        }
        assert_eq!(executor.completed(), 3);
    }

    #[tokio::test]
    async fn test_ordered_dispatch_preserves_order_without_overlap() {
        let executor = Arc::new(RecordingExecutor::new().with_jitter(Duration::from_millis(15)));
        let coordinator = coordinator(executor.clone(), AcknowledgementOrdering::Ordered);

        let mut submitted = Vec::new();
        let mut dispatches = Vec::new();
        for size in [3, 12, 1, 25, 7] {
            let batch = handles(size);
            submitted.extend(ids(&batch));
            dispatches.push(coordinator.dispatch(batch));
        }

        for dispatch in dispatches {
            dispatch.await.expect("ordered dispatch failed");
        }

        assert_eq!(executor.executed_ids(), submitted);
        assert_eq!(executor.max_concurrency(), 1);
        assert!(executor.batches().iter().all(|batch| batch.len() <= 10));
    }

    #[tokio::test]
    async fn test_ordered_chain_recovers_from_failure() {
        let input = handles(30);
        let executor = Arc::new(RecordingExecutor::new().failing_on(input[15].id()));
        let coordinator = coordinator(executor.clone(), AcknowledgementOrdering::Ordered);

        let failed = coordinator.dispatch(input.clone());
        let next_input = handles(5);
        let next = coordinator.dispatch(next_input.clone());

        assert!(matches!(
            failed.await,
            Err(AcknowledgementError::Commit { .. })
        ));
        next.await.expect("dispatch after a failure failed");

        let mut expected = ids(&input);
        expected.extend(ids(&next_input));
        assert_eq!(executor.executed_ids(), expected);
        assert_eq!(executor.batches().len(), 4);
    }

    #[tokio::test]
    async fn test_ordered_chain_recovers_from_panic() {
        let input = handles(3);
        let executor = Arc::new(RecordingExecutor::new().panicking_on(input[0].id()));
        let coordinator = coordinator(executor.clone(), AcknowledgementOrdering::Ordered);

        let panicked = coordinator.dispatch(input.clone());
        let next_input = handles(2);
        let next = coordinator.dispatch(next_input.clone());

        assert!(matches!(
            panicked.await,
            Err(AcknowledgementError::Panicked(_))
        ));
        next.await.expect("dispatch after a panic failed");

        let mut expected = ids(&input);
        expected.extend(ids(&next_input));
        assert_eq!(executor.executed_ids(), expected);
    }

    #[tokio::test]
    async fn test_ordered_by_group_orders_within_groups() {
        let executor = Arc::new(RecordingExecutor::new().with_jitter(Duration::from_millis(10)));
        let coordinator = coordinator(executor.clone(), AcknowledgementOrdering::OrderedByGroup);

        let groups = ["group-a", "group-b", "group-c"];
        let mut submitted: HashMap<&str, Vec<Uuid>> = HashMap::new();
        let mut dispatches = Vec::new();
        for round in 0..5 {
            let mut request = Vec::new();
            for group in groups {
                for index in 0..(round + 3) {
                    let handle = MessageHandle::new(Uuid::now_v7(), format!("{group}-{index}"))
                        .with_group(group);
                    submitted.entry(group).or_default().push(handle.id());
                    request.push(handle);
                }
            }
            dispatches.push(coordinator.dispatch(request));
        }

        for dispatch in dispatches {
            dispatch.await.expect("grouped dispatch failed");
        }

        for batch in executor.batches() {
            let group = batch.handles()[0].group();
            assert!(batch.handles().iter().all(|handle| handle.group() == group));
        }
        for group in groups {
            let executed: Vec<Uuid> = executor
                .batches()
                .iter()
                .flat_map(|batch| batch.handles().to_vec())
                .filter(|handle| handle.group() == Some(group))
                .map(|handle| handle.id())
                .collect();
            assert_eq!(&executed, &submitted[group]);
        }
    }

    #[tokio::test]
    async fn test_finished_chains_are_pruned() {
        let executor = Arc::new(RecordingExecutor::new());
        let coordinator = coordinator(executor.clone(), AcknowledgementOrdering::OrderedByGroup);

        let first: Vec<MessageHandle> = handles(3)
            .into_iter()
            .map(|handle| handle.with_group("first"))
            .collect();
        coordinator
            .dispatch(first)
            .await
            .expect("first dispatch failed");

        let second: Vec<MessageHandle> = handles(3)
            .into_iter()
            .map(|handle| handle.with_group("second"))
            .collect();
        let dispatch = coordinator.dispatch(second);

        // "first" has finished and is pruned while extending "second"
        assert!(coordinator.chain_count() <= 1);
        dispatch.await.expect("second dispatch failed");
    }

    #[derive(Default)]
    struct CountingCallback {
        successes: AtomicUsize,
        failures: AtomicUsize,
        fail_on_success: bool,
    }

    #[async_trait]
    impl AcknowledgementResultCallback for CountingCallback {
        async fn on_success(&self, handles: &[MessageHandle]) -> anyhow::Result<()> {
            self.successes.fetch_add(handles.len(), Ordering::SeqCst);
            if self.fail_on_success {
                anyhow::bail!("callback exploded");
            }
            Ok(())
        }

        async fn on_failure(
            &self,
            handles: &[MessageHandle],
            _error: &AcknowledgementError,
        ) -> anyhow::Result<()> {
            self.failures.fetch_add(handles.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_result_callback_is_invoked() {
        let input = handles(15);
        let executor = Arc::new(RecordingExecutor::new().failing_on(input[12].id()));
        let callback = Arc::new(CountingCallback::default());
        let coordinator = coordinator_with_callback(
            executor,
            callback.clone(),
            AcknowledgementOrdering::Parallel,
        );

        let result = coordinator.dispatch(input).await;

        assert!(matches!(result, Err(AcknowledgementError::Commit { .. })));
        assert_eq!(callback.successes.load(Ordering::SeqCst), 10);
        assert_eq!(callback.failures.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_failing_callback_fails_the_dispatch() {
        let executor = Arc::new(RecordingExecutor::new());
        let callback = Arc::new(CountingCallback {
            fail_on_success: true,
            ..Default::default()
        });
        let coordinator =
            coordinator_with_callback(executor, callback, AcknowledgementOrdering::Ordered);

        let result = coordinator.dispatch(handles(1)).await;

        assert!(matches!(result, Err(AcknowledgementError::Callback(_))));
    }
}
