//! Orchestrates periodic discovery, assignment, subtask events, and
//! checkpoints — the component that ties [`crate::graph_tracker`],
//! [`crate::split_tracker`] and [`crate::assigner`] together into a
//! single logical coordinator thread, processing one event at a time
//! with no concurrent access to its own state.

pub mod context;
pub mod events;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::assigner::{AssignmentContext, ShardAssigner};
use crate::config::EnumeratorConfig;
use crate::error::{EnumeratorError, Result};
use crate::graph_tracker;
use crate::ids::{ShardId, StreamArn, SubtaskId};
use crate::proxy::StreamProxy;
use crate::split::{Split, SplitAssignmentStatus};
use crate::split_tracker::SplitTracker;

pub use context::{DiscoveryFuture, EnumeratorContext};
pub use events::{DiscoveryOutcome, FinishedSplit, SplitsFinishedEvent};

/// A checkpointable snapshot of everything the enumerator needs to
/// resume after a restart.
pub type EnumeratorSnapshot = (Vec<(Split, SplitAssignmentStatus)>, DateTime<Utc>);

pub struct Enumerator<C: EnumeratorContext> {
    stream_arn: StreamArn,
    context: C,
    proxy: Arc<dyn StreamProxy>,
    assigner: Arc<dyn ShardAssigner>,
    retry_count: usize,
    /// Upstream-defined retention of the stream being read. Not one of
    /// the recognized configuration keys — it describes a fact about
    /// the stream itself, supplied by whatever discovers stream
    /// metadata, not a tunable of this core.
    retention: chrono::Duration,

    split_tracker: SplitTracker,
    start_timestamp: DateTime<Utc>,
    /// In-memory mirror of what has been committed to workers via
    /// `context.assign_splits`. Never persisted: after a restart this
    /// starts empty and is rebuilt purely from fresh discovery plus
    /// reader re-registration, since the subtask mapping is not part
    /// of what gets checkpointed.
    split_assignment: BTreeMap<SubtaskId, Vec<Split>>,
}

impl<C: EnumeratorContext> Enumerator<C> {
    /// Constructs an enumerator. When `prior_state` is `Some`, `start_timestamp`
    /// is restored from it and `SplitTracker` is rebuilt from the snapshot;
    /// otherwise `start_timestamp := now()` and the tracker starts empty.
    pub fn new(
        stream_arn: StreamArn,
        config: &EnumeratorConfig,
        retention: chrono::Duration,
        proxy: Arc<dyn StreamProxy>,
        assigner: Arc<dyn ShardAssigner>,
        context: C,
        prior_state: Option<EnumeratorSnapshot>,
    ) -> Result<Self> {
        let initial_position = config.initial_position_mode()?;

        let (split_tracker, start_timestamp) = match prior_state {
            Some((snapshot, start_timestamp)) => (
                SplitTracker::from_snapshot(
                    stream_arn.clone(),
                    initial_position,
                    start_timestamp,
                    snapshot,
                ),
                start_timestamp,
            ),
            None => {
                let now = Utc::now();
                (
                    SplitTracker::new(stream_arn.clone(), initial_position, now),
                    now,
                )
            }
        };

        Ok(Self {
            stream_arn,
            context,
            proxy,
            assigner,
            retry_count: config.inconsistency_resolution_retry_count,
            retention,
            split_tracker,
            start_timestamp,
            split_assignment: BTreeMap::new(),
        })
    }

    /// The host-supplied dispatch surface, exposed for callers that need
    /// to drive or observe it directly (e.g. tests polling
    /// `TestEnumeratorContext::take_assignment`).
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Submits the immediate discovery triggered at `start()`, and every
    /// subsequent periodic discovery. Fire and forget: the result is
    /// delivered later via [`EnumeratorContext::next_discovery_outcome`].
    #[tracing::instrument(skip(self), fields(stream_arn = %self.stream_arn))]
    pub fn start(&self) {
        tracing::info!("starting discovery");
        self.submit_discovery();
    }

    fn submit_discovery(&self) {
        let proxy = Arc::clone(&self.proxy);
        let stream_arn = self.stream_arn.clone();
        let retry_count = self.retry_count;
        let fut: DiscoveryFuture = Box::pin(async move {
            let initial = match proxy.list_shards(&stream_arn, None).await {
                Ok(resp) => resp,
                Err(e) => return DiscoveryOutcome::Failed(e),
            };
            match graph_tracker::resolve(proxy.as_ref(), &stream_arn, initial, retry_count).await {
                Ok(result) => DiscoveryOutcome::Resolved(result),
                Err(e) => DiscoveryOutcome::Failed(e),
            }
        });
        self.context.call_async(fut);
    }

    /// Runs the coordinator's event loop: a periodic discovery timer
    /// interleaved with discovery outcomes delivered by the host.
    /// Returns only on a fatal discovery error; the host is expected to
    /// treat that as cause for a cluster-level restart.
    pub async fn run(&mut self, discovery_interval: std::time::Duration) -> Result<()> {
        self.start();
        let mut interval = tokio::time::interval(discovery_interval);
        interval.tick().await; // first tick fires immediately; start() already covered it
        loop {
            tokio::select! {
                _ = interval.tick() => self.submit_discovery(),
                outcome = self.context.next_discovery_outcome() => self.handle_discovery_result(outcome)?,
            }
        }
    }

    /// Handles one discovery outcome back on the coordinator thread:
    /// merges newly discovered shards, evicts finished splits that have
    /// aged out, and assigns whatever is now eligible.
    #[tracing::instrument(skip(self, outcome), fields(stream_arn = %self.stream_arn))]
    pub fn handle_discovery_result(&mut self, outcome: DiscoveryOutcome) -> Result<()> {
        let result = match outcome {
            DiscoveryOutcome::Failed(e) => {
                tracing::error!(error = %e, "discovery failed");
                return Err(EnumeratorError::Discovery(e));
            }
            DiscoveryOutcome::Resolved(result) => result,
        };

        if result.inconsistency_detected {
            tracing::warn!("discovery returned with residual inconsistency; state untouched");
            return Ok(());
        }

        let discovered_ids: std::collections::BTreeSet<ShardId> =
            result.shards.iter().map(|s| s.shard_id.clone()).collect();
        let newly_discovered = result.shards.len();
        self.split_tracker.add_splits(result.shards);

        let evicted =
            self.split_tracker
                .clean_up_old_finished_splits(&discovered_ids, Utc::now(), self.retention);
        tracing::info!(
            newly_discovered,
            evicted = evicted.len(),
            "discovery cycle merged"
        );

        if self.context.registered_readers().len() < self.context.current_parallelism() {
            tracing::debug!("deferring assignment until all readers register");
            return Ok(());
        }

        self.assign_all();
        Ok(())
    }

    /// Assigns every currently-eligible split.
    fn assign_all(&mut self) {
        let available: Vec<Split> = self
            .split_tracker
            .splits_available_for_assignment()
            .into_iter()
            .cloned()
            .collect();
        if available.is_empty() {
            return;
        }

        let pending = self.plan_assignment(&available);
        self.commit_assignment(&available, pending);
        tracing::info!(count = available.len(), "assigned splits");
    }

    /// Assigns the newly-unblocked children of just-finished splits,
    /// via the indexed `get_unassigned_child_splits` fast path.
    fn assign_children(&mut self, parent_ids: &[ShardId]) {
        let children: Vec<Split> = self
            .split_tracker
            .get_unassigned_child_splits(parent_ids)
            .into_iter()
            .cloned()
            .collect();
        if children.is_empty() {
            return;
        }

        let pending = self.plan_assignment(&children);
        self.commit_assignment(&children, pending);
        tracing::info!(count = children.len(), "assigned unblocked children");
    }

    fn plan_assignment(&self, splits: &[Split]) -> BTreeMap<SubtaskId, Vec<Split>> {
        let registered: Vec<SubtaskId> = self.context.registered_readers().into_iter().collect();
        let mut pending: BTreeMap<SubtaskId, Vec<Split>> = BTreeMap::new();
        for split in splits {
            let subtask = {
                let ctx = AssignmentContext {
                    committed: &self.split_assignment,
                    pending: &pending,
                    registered_readers: &registered,
                };
                self.assigner.assign(split, &ctx)
            };
            pending.entry(subtask).or_default().push(split.clone());
        }
        pending
    }

    fn commit_assignment(&mut self, splits: &[Split], pending: BTreeMap<SubtaskId, Vec<Split>>) {
        self.context.assign_splits(pending.clone());
        self.split_tracker
            .mark_as_assigned(splits.iter().map(|s| s.shard_id.clone()));
        for (subtask, assigned) in pending {
            self.split_assignment.entry(subtask).or_default().extend(assigned);
        }
    }

    /// Ingests a `SplitsFinishedEvent`: records each split as finished,
    /// registers its child shards, and assigns any children that are
    /// now unblocked.
    #[tracing::instrument(skip(self, event), fields(stream_arn = %self.stream_arn, subtask = %event.subtask))]
    pub fn handle_splits_finished(&mut self, event: SplitsFinishedEvent) {
        let SplitsFinishedEvent { subtask, finished } = event;
        let finished_ids: Vec<ShardId> = finished.iter().map(|f| f.split_id.clone()).collect();

        self.split_tracker
            .mark_as_finished(finished.iter().map(|f| (f.split_id.clone(), f.child_splits.clone())));
        let all_children = finished.into_iter().flat_map(|f| f.child_splits).collect();
        self.split_tracker.add_child_splits(all_children);

        let Some(assigned) = self.split_assignment.get_mut(&subtask) else {
            tracing::warn!(
                "SplitsFinishedEvent for a subtask with no recorded assignment; \
                 children deferred to the next periodic discovery"
            );
            return;
        };
        assigned.retain(|s| !finished_ids.contains(&s.shard_id));

        self.assign_children(&finished_ids);
    }

    /// Explicitly unsupported: failover always requires full
    /// re-enumeration from checkpoint rather than patching splits back
    /// in from a failed subtask.
    pub fn add_splits_back(&self, _splits: Vec<Split>, _subtask: SubtaskId) -> Result<()> {
        Err(EnumeratorError::UnsupportedOperation("addSplitsBack"))
    }

    /// The split tracker's state plus `start_timestamp`, together
    /// sufficient to reconstruct this enumerator after a restart.
    pub fn snapshot_state(&self, checkpoint_id: u64) -> EnumeratorSnapshot {
        (
            self.split_tracker.snapshot_state(checkpoint_id),
            self.start_timestamp,
        )
    }

    /// Closes the owned `StreamProxy`. In-flight `list_shards` calls
    /// that complete afterward are discarded by the callback path
    /// rather than merged.
    pub async fn close(&self) {
        tracing::info!(stream_arn = %self.stream_arn, "closing enumerator");
        self.proxy.close().await;
    }
}
