//! [`Split`] is the unit of assignable work: one split per shard,
//! `split_id == shard_id`. Splits are immutable once constructed;
//! `is_finished` and `child_splits` are set only by re-constructing a
//! new `Split` during event handling, never mutated in place.

use crate::ids::{ShardId, StreamArn};
use crate::shard::Shard;
use crate::starting_position::StartingPosition;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Split {
    pub stream_arn: StreamArn,
    pub shard_id: ShardId,
    pub starting_position: StartingPosition,
    pub parent_shard_id: Option<ShardId>,
    pub is_finished: bool,
    pub child_splits: Vec<Shard>,
}

impl Split {
    pub fn new(
        stream_arn: StreamArn,
        shard_id: ShardId,
        starting_position: StartingPosition,
        parent_shard_id: Option<ShardId>,
    ) -> Self {
        Self {
            stream_arn,
            shard_id,
            starting_position,
            parent_shard_id,
            is_finished: false,
            child_splits: Vec::new(),
        }
    }

    /// `splitId == shardId`.
    pub fn split_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Returns a new `Split` with `is_finished = true` and the given
    /// child-shard hints recorded, as handling a `SplitsFinishedEvent`
    /// does. Does not mutate `self`.
    pub fn finished_with_children(&self, child_splits: Vec<Shard>) -> Self {
        Self {
            is_finished: true,
            child_splits,
            ..self.clone()
        }
    }
}

/// The tri-state lifecycle of a split's assignment. A split may
/// transition `Unassigned -> Assigned -> Finished`; any other
/// transition is a bug.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SplitAssignmentStatus {
    Unassigned,
    Assigned,
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequenceNumber;

    fn split(id: &str, parent: Option<&str>) -> Split {
        Split::new(
            StreamArn::new("arn:aws:dynamodb:stream"),
            ShardId::new(id),
            StartingPosition::TrimHorizon,
            parent.map(ShardId::new),
        )
    }

    #[test]
    fn finished_with_children_does_not_mutate_original() {
        let s0 = split("s0", None);
        let child = Shard {
            shard_id: ShardId::new("s1"),
            parent_shard_id: Some(ShardId::new("s0")),
            sequence_number_range: crate::shard::SequenceNumberRange {
                starting_sequence_number: SequenceNumber::new("1"),
                ending_sequence_number: None,
            },
        };
        let finished = s0.finished_with_children(vec![child.clone()]);

        assert!(!s0.is_finished);
        assert!(s0.child_splits.is_empty());
        assert!(finished.is_finished);
        assert_eq!(finished.child_splits, vec![child]);
    }
}
