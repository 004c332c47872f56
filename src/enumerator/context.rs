//! Host-implemented dispatch surface. The crate owns no executor of its
//! own: `call_async` hands a discovery future to the host's I/O
//! executor, and the host is responsible for delivering its result back
//! onto the single logical coordinator thread via
//! `next_discovery_outcome` — mirroring the split between "what a task
//! computation returns" and "how the host schedules/delivers it" in
//! `automations::Executor`/`PollOutcome`, without this crate taking on
//! that crate's database-backed task supervision.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::ids::SubtaskId;
use crate::split::Split;

use super::events::DiscoveryOutcome;

pub type DiscoveryFuture = Pin<Box<dyn Future<Output = DiscoveryOutcome> + Send>>;

#[async_trait::async_trait]
pub trait EnumeratorContext: Send + Sync {
    /// Subtasks currently registered with the host runtime.
    fn registered_readers(&self) -> BTreeSet<SubtaskId>;

    /// The job's configured parallelism. Assignment is deferred while
    /// `registered_readers().len() < current_parallelism()`, so a split
    /// never lands on a subtask that a later-registering reader then
    /// displaces.
    fn current_parallelism(&self) -> usize;

    /// Submits a discovery task to the host's I/O executor. Must not
    /// block; the future's result is delivered later, out of band, via
    /// [`EnumeratorContext::next_discovery_outcome`].
    fn call_async(&self, discovery: DiscoveryFuture);

    /// Awaits the next completed discovery outcome. The enumerator's
    /// event loop selects between this and its periodic discovery
    /// timer; the host must never deliver two outcomes concurrently —
    /// the callback must not run while the coordinator is already
    /// handling another event.
    async fn next_discovery_outcome(&self) -> DiscoveryOutcome;

    /// Delivers a batch assignment to workers. The enumerator commits
    /// `splitTracker.markAsAssigned` only after this returns: a split is
    /// never marked assigned before the call that delivers it to the
    /// worker returns.
    fn assign_splits(&self, assignment: BTreeMap<SubtaskId, Vec<Split>>);

    /// Flink's `SplitEnumeratorContext` always exposes this; it has no
    /// meaningful effect for an unbounded change-log source, since a
    /// discovery cycle can always observe new splits later.
    fn signal_no_more_splits(&self, _subtask: SubtaskId) {}
}

/// A single-threaded, in-process [`EnumeratorContext`] for tests.
/// `call_async` spawns the discovery future onto the current Tokio
/// runtime and forwards its result through an internal queue, so
/// `next_discovery_outcome` behaves like the host's callback delivery
/// without requiring a real cluster.
#[cfg(feature = "test-util")]
pub struct TestEnumeratorContext {
    registered_readers: Mutex<BTreeSet<SubtaskId>>,
    parallelism: usize,
    outcomes_tx: tokio::sync::mpsc::UnboundedSender<DiscoveryOutcome>,
    outcomes_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<DiscoveryOutcome>>,
    assignments: Mutex<VecDeque<BTreeMap<SubtaskId, Vec<Split>>>>,
}

#[cfg(feature = "test-util")]
impl TestEnumeratorContext {
    pub fn new(registered_readers: BTreeSet<SubtaskId>, parallelism: usize) -> Self {
        let (outcomes_tx, outcomes_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            registered_readers: Mutex::new(registered_readers),
            parallelism,
            outcomes_tx,
            outcomes_rx: tokio::sync::Mutex::new(outcomes_rx),
            assignments: Mutex::new(VecDeque::new()),
        }
    }

    pub fn register_reader(&self, subtask: SubtaskId) {
        self.registered_readers.lock().unwrap().insert(subtask);
    }

    /// Pops the oldest batch assignment delivered via `assign_splits`,
    /// for test assertions.
    pub fn take_assignment(&self) -> Option<BTreeMap<SubtaskId, Vec<Split>>> {
        self.assignments.lock().unwrap().pop_front()
    }
}

#[cfg(feature = "test-util")]
#[async_trait::async_trait]
impl EnumeratorContext for TestEnumeratorContext {
    fn registered_readers(&self) -> BTreeSet<SubtaskId> {
        self.registered_readers.lock().unwrap().clone()
    }

    fn current_parallelism(&self) -> usize {
        self.parallelism
    }

    fn call_async(&self, discovery: DiscoveryFuture) {
        let tx = self.outcomes_tx.clone();
        tokio::spawn(async move {
            let outcome = discovery.await;
            let _ = tx.send(outcome);
        });
    }

    async fn next_discovery_outcome(&self) -> DiscoveryOutcome {
        let mut rx = self.outcomes_rx.lock().await;
        rx.recv()
            .await
            .expect("outcomes_tx is never dropped while self is alive")
    }

    fn assign_splits(&self, assignment: BTreeMap<SubtaskId, Vec<Split>>) {
        self.assignments.lock().unwrap().push_back(assignment);
    }
}
