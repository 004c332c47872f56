//! The worker-facing event contract, and the result of one discovery
//! cycle as it is carried back across the coordinator's async-call
//! boundary.

use crate::graph_tracker::ResolutionResult;
use crate::ids::{ShardId, SubtaskId};
use crate::proxy::ProxyError;
use crate::shard::Shard;

/// One finished split reported by a reader, with the child shards it
/// observed while draining — the upward event a worker sends when it
/// finishes a split.
#[derive(Clone, Debug)]
pub struct FinishedSplit {
    pub split_id: ShardId,
    pub child_splits: Vec<Shard>,
}

/// `SplitsFinishedEvent` — the only worker event this crate recognizes.
/// Any other event type is a protocol violation, logged and swallowed
/// by the host before it ever reaches the enumerator.
#[derive(Clone, Debug)]
pub struct SplitsFinishedEvent {
    pub subtask: SubtaskId,
    pub finished: Vec<FinishedSplit>,
}

/// What a submitted discovery task resolves to once it is delivered
/// back onto the coordinator thread by [`crate::enumerator::context::EnumeratorContext::next_discovery_outcome`].
/// A `Failed` outcome is fatal to the enumerator — a transient upstream
/// error surfaces to the cluster rather than being retried here;
/// `Resolved` is always handled, whether or not it carries a residual
/// inconsistency.
pub enum DiscoveryOutcome {
    Resolved(ResolutionResult),
    Failed(ProxyError),
}
