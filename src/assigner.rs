//! A pluggable policy mapping a split to a subtask.

use std::collections::BTreeMap;

use crate::ids::SubtaskId;
use crate::split::Split;

/// Everything a [`ShardAssigner`] needs to make a pure decision: the
/// currently committed assignment, the assignment accumulated so far
/// within this batch (not yet committed), and the set of registered
/// readers. Grounded on `automations::Executor`'s shape of passing a
/// small, explicit view of relevant state into a policy function rather
/// than letting it reach into shared mutable state.
pub struct AssignmentContext<'a> {
    pub committed: &'a BTreeMap<SubtaskId, Vec<Split>>,
    pub pending: &'a BTreeMap<SubtaskId, Vec<Split>>,
    pub registered_readers: &'a [SubtaskId],
}

impl<'a> AssignmentContext<'a> {
    fn load(&self, subtask: &SubtaskId) -> usize {
        self.committed.get(subtask).map_or(0, Vec::len) + self.pending.get(subtask).map_or(0, Vec::len)
    }
}

/// Implementations must be pure functions of `(split, context)` — no
/// hidden state, no randomness — so that assignment is reproducible
/// across a restart that replays the same discovery sequence.
pub trait ShardAssigner: Send + Sync {
    fn assign(&self, split: &Split, context: &AssignmentContext<'_>) -> SubtaskId;
}

/// The default policy: pick the subtask with the fewest
/// committed-plus-pending splits, ties broken by lowest subtask id.
pub struct UniformShardAssigner;

impl ShardAssigner for UniformShardAssigner {
    fn assign(&self, _split: &Split, context: &AssignmentContext<'_>) -> SubtaskId {
        *context
            .registered_readers
            .iter()
            .min_by_key(|subtask| (context.load(subtask), subtask.0))
            .expect("assign() is only called when registered_readers is non-empty")
    }
}
