//! The opaque upstream shard record returned by `listShards`, and the
//! stream-level status that accompanies a listing response.

use crate::ids::{SequenceNumber, ShardId};

/// A shard as reported by the upstream listing API. Immutable; the core
/// never mutates a `Shard` in place, only replaces its recorded copy
/// wholesale on a fresh listing.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Shard {
    pub shard_id: ShardId,
    pub parent_shard_id: Option<ShardId>,
    pub sequence_number_range: SequenceNumberRange,
}

impl Shard {
    /// A shard is closed iff its ending sequence number is set: no new
    /// records will ever appear in it.
    pub fn is_closed(&self) -> bool {
        self.sequence_number_range.ending_sequence_number.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SequenceNumberRange {
    pub starting_sequence_number: SequenceNumber,
    pub ending_sequence_number: Option<SequenceNumber>,
}

/// Upstream stream-level status returned alongside a `listShards`
/// response. `Disabled` is significant to the resolution loop: once a
/// stream is disabled, no further children will ever appear, so the
/// retry loop can stop early instead of burning its budget.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StreamStatus {
    Enabled,
    Disabling,
    Disabled,
    Enabling,
}

impl StreamStatus {
    pub fn is_disabled(&self) -> bool {
        matches!(self, StreamStatus::Disabled)
    }
}
