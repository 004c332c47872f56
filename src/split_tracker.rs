//! The canonical registry of known shards and their assignment status.
//! This is the component that enforces the core's five safety
//! invariants: no split double-counted as both assigned and
//! finished, no orphaned assignment/finish bookkeeping, no child ever
//! eligible for assignment before its parent is finished-or-gone, no
//! `Finished -> Assigned` style illegal transition, and no garbage
//! collection of a split whose direct child is still live.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::ids::{ShardId, StreamArn};
use crate::shard::Shard;
use crate::split::{Split, SplitAssignmentStatus};
use crate::starting_position::StartingPosition;

/// How newly-observed shards are anchored when a job (re)starts. This is
/// the runtime counterpart of [`crate::config::InitialPositionConfig`];
/// `Latest`/`AtTimestamp` share one anchoring algorithm, parameterized
/// by the anchor instant.
#[derive(Clone, Debug, PartialEq)]
pub enum InitialPositionMode {
    TrimHorizon,
    Latest,
    AtTimestamp(DateTime<Utc>),
}

pub struct SplitTracker {
    stream_arn: StreamArn,
    initial_position: InitialPositionMode,
    start_timestamp: DateTime<Utc>,

    known_splits: BTreeMap<ShardId, Split>,
    assigned_splits: BTreeSet<ShardId>,
    finished_splits: BTreeSet<ShardId>,
    /// Reverse index `parent -> children`, maintained in lock-step with
    /// `known_splits`. Never model the graph with direct pointer links:
    /// a child may be observed before its parent node exists.
    parent_child_index: BTreeMap<ShardId, BTreeSet<ShardId>>,
}

impl SplitTracker {
    pub fn new(
        stream_arn: StreamArn,
        initial_position: InitialPositionMode,
        start_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stream_arn,
            initial_position,
            start_timestamp,
            known_splits: BTreeMap::new(),
            assigned_splits: BTreeSet::new(),
            finished_splits: BTreeSet::new(),
            parent_child_index: BTreeMap::new(),
        }
    }

    /// Rebuilds a tracker from a checkpointed snapshot on restart.
    /// Partial recovery (patching in a subset of splits left over from a
    /// prior run) is not supported: the tracker is reconstructed
    /// wholesale from the snapshot, never incrementally patched.
    pub fn from_snapshot(
        stream_arn: StreamArn,
        initial_position: InitialPositionMode,
        start_timestamp: DateTime<Utc>,
        snapshot: Vec<(Split, SplitAssignmentStatus)>,
    ) -> Self {
        let mut tracker = Self::new(stream_arn, initial_position, start_timestamp);
        for (split, status) in snapshot {
            let id = split.shard_id.clone();
            if let Some(parent) = &split.parent_shard_id {
                tracker
                    .parent_child_index
                    .entry(parent.clone())
                    .or_default()
                    .insert(id.clone());
            }
            tracker.known_splits.insert(id.clone(), split);
            match status {
                SplitAssignmentStatus::Unassigned => {}
                SplitAssignmentStatus::Assigned => {
                    tracker.assigned_splits.insert(id);
                }
                SplitAssignmentStatus::Finished => {
                    tracker.finished_splits.insert(id);
                }
            }
        }
        tracker
    }

    fn insert_new_split(&mut self, shard: &Shard, starting_position: StartingPosition) {
        if self.known_splits.contains_key(&shard.shard_id) {
            return;
        }
        let split = Split::new(
            self.stream_arn.clone(),
            shard.shard_id.clone(),
            starting_position,
            shard.parent_shard_id.clone(),
        );
        if let Some(parent) = &split.parent_shard_id {
            self.parent_child_index
                .entry(parent.clone())
                .or_default()
                .insert(split.shard_id.clone());
        }
        self.known_splits.insert(split.shard_id.clone(), split);
    }

    /// Merges a freshly-discovered, graph-consistent shard batch.
    /// Idempotent: re-adding an already-known shard is a no-op.
    #[tracing::instrument(skip(self, shards), fields(stream_arn = %self.stream_arn))]
    pub fn add_splits(&mut self, shards: Vec<Shard>) {
        let by_id: BTreeMap<ShardId, Shard> = shards
            .iter()
            .cloned()
            .map(|s| (s.shard_id.clone(), s))
            .collect();

        match self.initial_position.clone() {
            InitialPositionMode::TrimHorizon => {
                for shard in &shards {
                    self.insert_new_split(shard, StartingPosition::TrimHorizon);
                }
            }
            InitialPositionMode::Latest => {
                let anchor = self.start_timestamp;
                self.add_splits_anchored(&shards, &by_id, anchor);
            }
            InitialPositionMode::AtTimestamp(anchor) => {
                self.add_splits_anchored(&shards, &by_id, anchor);
            }
        }
    }

    /// `Latest`/`AtTimestamp` anchoring: for each open shard
    /// not yet known, walk ancestors upward until finding the first
    /// shard whose creation time is `<=` the anchor (or the oldest
    /// ancestor this discovery round can see, if the lineage runs out
    /// before then); that shard is tracked from `Latest`/the anchor
    /// timestamp, and every descendant walked through on the way back
    /// down is tracked from `TrimHorizon`, so no record between the
    /// anchor and the first split is lost.
    fn add_splits_anchored(
        &mut self,
        shards: &[Shard],
        by_id: &BTreeMap<ShardId, Shard>,
        anchor: DateTime<Utc>,
    ) {
        for shard in shards {
            if shard.is_closed() || self.known_splits.contains_key(&shard.shard_id) {
                continue;
            }
            self.walk_ancestors_and_anchor(shard, by_id, anchor);
        }

        // A closed shard that is itself new but wasn't reached by any
        // open-descendant walk above (because its only descendants were
        // already known from an earlier discovery round) predates
        // whatever anchor that earlier round picked, so it is always
        // TrimHorizon, never Latest.
        for shard in shards {
            if !shard.is_closed() || self.known_splits.contains_key(&shard.shard_id) {
                continue;
            }
            let has_known_child = self
                .parent_child_index
                .get(&shard.shard_id)
                .map_or(false, |children| !children.is_empty());
            if has_known_child {
                self.insert_new_split(shard, StartingPosition::TrimHorizon);
            }
        }
    }

    fn walk_ancestors_and_anchor(
        &mut self,
        start: &Shard,
        by_id: &BTreeMap<ShardId, Shard>,
        anchor: DateTime<Utc>,
    ) {
        let mut path: Vec<Shard> = vec![start.clone()];
        let mut current: Shard = start.clone();
        let mut reached_known_ancestor = false;

        loop {
            if self.known_splits.contains_key(&current.shard_id) {
                // Already resolved by a prior discovery round; that
                // ancestor keeps its existing starting position, and
                // everything below it in `path` is a descendant that
                // appeared *after* that round, so it must read from its
                // own beginning rather than being promoted to `Latest`.
                path.pop();
                reached_known_ancestor = true;
                break;
            }

            let is_anchor = match current.shard_id.creation_time() {
                Some(t) => t <= anchor,
                // Undecodable creation time: treat conservatively as not
                // yet at the anchor, keep walking if possible.
                None => false,
            };
            if is_anchor {
                break;
            }

            let Some(parent_id) = current.parent_shard_id.clone() else {
                // Reached the root of what we can see; best-effort anchor.
                break;
            };
            let Some(parent_shard) = by_id.get(&parent_id) else {
                // Parent is either already tracked from an earlier round,
                // or has aged out of the upstream retention window and is
                // simply absent. Either way, this is the oldest ancestor
                // we can see this round; stop without re-adding it.
                break;
            };
            path.push(parent_shard.clone());
            current = parent_shard.clone();
        }

        if reached_known_ancestor {
            for descendant in path.into_iter().rev() {
                self.insert_new_split(&descendant, StartingPosition::TrimHorizon);
            }
            return;
        }

        let Some(anchor_shard) = path.pop() else {
            return;
        };
        self.insert_new_split(&anchor_shard, StartingPosition::Latest);
        for descendant in path.into_iter().rev() {
            self.insert_new_split(&descendant, StartingPosition::TrimHorizon);
        }
    }

    /// Registers children announced via `SplitsFinishedEvent`. Children
    /// are always read from their beginning, the same rule `TrimHorizon`
    /// mode applies to every split.
    #[tracing::instrument(skip(self, shards), fields(stream_arn = %self.stream_arn))]
    pub fn add_child_splits(&mut self, shards: Vec<Shard>) {
        for shard in &shards {
            self.insert_new_split(shard, StartingPosition::TrimHorizon);
        }
    }

    pub fn mark_as_assigned(&mut self, split_ids: impl IntoIterator<Item = ShardId>) {
        for id in split_ids {
            debug_assert!(
                !self.finished_splits.contains(&id),
                "bug: marking a finished split as assigned"
            );
            self.assigned_splits.insert(id);
        }
    }

    /// Marks each listed split finished, recording its child-shard hints
    /// on the split itself. `is_finished`/`child_splits` are set only by
    /// reconstructing the split this way, never mutated in place. Does
    /// not register the children as tracked splits in their own right —
    /// call [`SplitTracker::add_child_splits`] separately for that.
    pub fn mark_as_finished(
        &mut self,
        finished: impl IntoIterator<Item = (ShardId, Vec<Shard>)>,
    ) {
        for (id, children) in finished {
            self.assigned_splits.remove(&id);
            self.finished_splits.insert(id.clone());
            if let Some(split) = self.known_splits.get(&id) {
                let updated = split.finished_with_children(children);
                self.known_splits.insert(id, updated);
            }
        }
    }

    fn parent_is_finished_or_gone(&self, split: &Split) -> bool {
        match &split.parent_shard_id {
            None => true,
            Some(parent) => {
                self.finished_splits.contains(parent) || !self.known_splits.contains_key(parent)
            }
        }
    }

    fn can_assign(&self, split: &Split) -> bool {
        !self.assigned_splits.contains(&split.shard_id)
            && !self.finished_splits.contains(&split.shard_id)
            && self.parent_is_finished_or_gone(split)
    }

    /// Every known split eligible for assignment right now.
    pub fn splits_available_for_assignment(&self) -> Vec<&Split> {
        self.known_splits
            .values()
            .filter(|s| self.can_assign(s))
            .collect()
    }

    /// Eligible children of the given parents, via the indexed reverse
    /// lookup — the low-latency path used right after a parent finishes,
    /// avoiding a full scan of `known_splits`.
    pub fn get_unassigned_child_splits(&self, parent_ids: &[ShardId]) -> Vec<&Split> {
        parent_ids
            .iter()
            .filter_map(|p| self.parent_child_index.get(p))
            .flatten()
            .filter_map(|child_id| self.known_splits.get(child_id))
            .filter(|s| self.can_assign(s))
            .collect()
    }

    /// A deterministic, point-in-time snapshot of every known split and
    /// its status, for checkpointing.
    pub fn snapshot_state(&self, checkpoint_id: u64) -> Vec<(Split, SplitAssignmentStatus)> {
        tracing::debug!(
            checkpoint_id,
            known_splits = self.known_splits.len(),
            "snapshotting split tracker state"
        );
        self.known_splits
            .values()
            .map(|split| {
                let status = if self.finished_splits.contains(&split.shard_id) {
                    SplitAssignmentStatus::Finished
                } else if self.assigned_splits.contains(&split.shard_id) {
                    SplitAssignmentStatus::Assigned
                } else {
                    SplitAssignmentStatus::Unassigned
                };
                (split.clone(), status)
            })
            .collect()
    }

    /// Evicts finished splits that are safe to forget: finished, with a
    /// parent that is itself finished-or-gone, no longer returned by
    /// `listShards`, old enough to exceed retention, *and* with no
    /// direct child still tracked and not-yet-finished. The last
    /// condition is the one a naive implementation misses: evicting a
    /// finished split whose child is still live would strand that
    /// child without a discoverable lineage.
    #[tracing::instrument(skip(self, discovered_ids), fields(stream_arn = %self.stream_arn))]
    pub fn clean_up_old_finished_splits(
        &mut self,
        discovered_ids: &BTreeSet<ShardId>,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> Vec<ShardId> {
        let mut to_evict = Vec::new();
        for id in &self.finished_splits {
            let Some(split) = self.known_splits.get(id) else {
                continue;
            };
            if !self.parent_is_finished_or_gone(split) {
                continue;
            }
            if discovered_ids.contains(id) {
                continue;
            }
            if !id.age_exceeds_retention(now, retention) {
                continue;
            }
            let has_live_child = self.parent_child_index.get(id).map_or(false, |children| {
                children
                    .iter()
                    .any(|c| self.known_splits.contains_key(c) && !self.finished_splits.contains(c))
            });
            if has_live_child {
                continue;
            }
            to_evict.push(id.clone());
        }

        for id in &to_evict {
            if let Some(split) = self.known_splits.remove(id) {
                if let Some(parent) = &split.parent_shard_id {
                    if let Some(children) = self.parent_child_index.get_mut(parent) {
                        children.remove(id);
                        if children.is_empty() {
                            self.parent_child_index.remove(parent);
                        }
                    }
                }
            }
            self.finished_splits.remove(id);
            self.parent_child_index.remove(id);
        }

        if !to_evict.is_empty() {
            tracing::info!(count = to_evict.len(), "garbage collected retired splits");
        }
        to_evict
    }

    pub fn known_split_ids(&self) -> BTreeSet<ShardId> {
        self.known_splits.keys().cloned().collect()
    }

    #[cfg(test)]
    fn status_of(&self, id: &ShardId) -> Option<SplitAssignmentStatus> {
        if !self.known_splits.contains_key(id) {
            return None;
        }
        Some(if self.finished_splits.contains(id) {
            SplitAssignmentStatus::Finished
        } else if self.assigned_splits.contains(id) {
            SplitAssignmentStatus::Assigned
        } else {
            SplitAssignmentStatus::Unassigned
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequenceNumber;
    use crate::shard::SequenceNumberRange;

    fn shard(id: &str, parent: Option<&str>, closed: bool) -> Shard {
        Shard {
            shard_id: ShardId::new(id),
            parent_shard_id: parent.map(ShardId::new),
            sequence_number_range: SequenceNumberRange {
                starting_sequence_number: SequenceNumber::new("1"),
                ending_sequence_number: closed.then(|| SequenceNumber::new("2")),
            },
        }
    }

    fn tracker(mode: InitialPositionMode) -> SplitTracker {
        SplitTracker::new(StreamArn::new("arn"), mode, Utc::now())
    }

    #[test]
    fn trim_horizon_mode_tracks_every_shard() {
        let mut t = tracker(InitialPositionMode::TrimHorizon);
        t.add_splits(vec![shard("s0", None, true), shard("s1", Some("s0"), false)]);
        assert_eq!(t.known_split_ids().len(), 2);
        assert_eq!(t.splits_available_for_assignment().len(), 2);
    }

    #[test]
    fn add_splits_is_idempotent() {
        let mut t = tracker(InitialPositionMode::TrimHorizon);
        let batch = vec![shard("s0", None, true), shard("s1", Some("s0"), false)];
        t.add_splits(batch.clone());
        t.add_splits(batch);
        assert_eq!(t.known_split_ids().len(), 2);
    }

    #[test]
    fn latest_mode_anchors_on_root_and_trim_horizons_the_rest() {
        let mut t = tracker(InitialPositionMode::Latest);
        t.add_splits(vec![shard("s0", None, true), shard("s1", Some("s0"), false)]);

        let s0 = &t.known_splits[&ShardId::new("s0")];
        let s1 = &t.known_splits[&ShardId::new("s1")];
        assert_eq!(s0.starting_position, StartingPosition::Latest);
        assert_eq!(s1.starting_position, StartingPosition::TrimHorizon);
        // Only s0 is known so far; s1 isn't assignable until s0 finishes.
        let available: Vec<_> = t
            .splits_available_for_assignment()
            .into_iter()
            .map(|s| s.shard_id.clone())
            .collect();
        assert_eq!(available, vec![ShardId::new("s0")]);
    }

    #[test]
    fn latest_mode_trim_horizons_children_of_a_post_start_split() {
        let mut t = tracker(InitialPositionMode::Latest);
        t.add_splits(vec![shard("s0", None, true), shard("s1", Some("s0"), false)]);
        assert_eq!(
            t.known_splits[&ShardId::new("s1")].starting_position,
            StartingPosition::TrimHorizon
        );

        // s1 splits after the job started: s1a/s1b are discovered in a
        // later round with s1 (already known) as their ancestor. The
        // walk must stop at the known s1 and trim-horizon its new
        // children, not promote them to Latest.
        t.add_splits(vec![
            shard("s1", Some("s0"), true),
            shard("s1a", Some("s1"), false),
            shard("s1b", Some("s1"), false),
        ]);

        assert_eq!(
            t.known_splits[&ShardId::new("s1a")].starting_position,
            StartingPosition::TrimHorizon
        );
        assert_eq!(
            t.known_splits[&ShardId::new("s1b")].starting_position,
            StartingPosition::TrimHorizon
        );
    }

    #[test]
    fn child_observed_before_parent_is_not_assignable() {
        let mut t = tracker(InitialPositionMode::TrimHorizon);
        // s0 is never discovered at all.
        t.add_splits(vec![shard("s1", Some("s0"), false)]);
        assert_eq!(t.splits_available_for_assignment().len(), 0);
    }

    #[test]
    fn parent_before_child_invariant_across_finish() {
        let mut t = tracker(InitialPositionMode::TrimHorizon);
        t.add_splits(vec![shard("s0", None, true)]);
        t.mark_as_assigned(vec![ShardId::new("s0")]);
        t.mark_as_finished(vec![(ShardId::new("s0"), vec![shard("s1", Some("s0"), false)])]);
        t.add_child_splits(vec![shard("s1", Some("s0"), false)]);

        assert_eq!(
            t.status_of(&ShardId::new("s0")),
            Some(SplitAssignmentStatus::Finished)
        );
        let available: Vec<_> = t
            .splits_available_for_assignment()
            .into_iter()
            .map(|s| s.shard_id.clone())
            .collect();
        assert_eq!(available, vec![ShardId::new("s1")]);
    }

    #[test]
    fn restart_replay_blocks_until_parent_finishes() {
        let snapshot = vec![
            (
                Split::new(
                    StreamArn::new("arn"),
                    ShardId::new("s0"),
                    StartingPosition::TrimHorizon,
                    None,
                ),
                SplitAssignmentStatus::Finished,
            ),
            (
                Split::new(
                    StreamArn::new("arn"),
                    ShardId::new("s1"),
                    StartingPosition::TrimHorizon,
                    None,
                ),
                SplitAssignmentStatus::Assigned,
            ),
            (
                Split::new(
                    StreamArn::new("arn"),
                    ShardId::new("s2"),
                    StartingPosition::TrimHorizon,
                    Some(ShardId::new("s1")),
                ),
                SplitAssignmentStatus::Unassigned,
            ),
        ];
        let mut t = SplitTracker::from_snapshot(
            StreamArn::new("arn"),
            InitialPositionMode::TrimHorizon,
            Utc::now(),
            snapshot,
        );
        assert!(t.splits_available_for_assignment().is_empty());

        t.mark_as_finished(vec![(ShardId::new("s1"), vec![])]);
        let available: Vec<_> = t
            .splits_available_for_assignment()
            .into_iter()
            .map(|s| s.shard_id.clone())
            .collect();
        assert_eq!(available, vec![ShardId::new("s2")]);
    }

    #[test]
    fn garbage_collection_evicts_retired_splits_with_no_live_child() {
        let mut t = tracker(InitialPositionMode::TrimHorizon);
        t.add_splits(vec![shard("s0", None, true)]);
        t.mark_as_assigned(vec![ShardId::new("s0")]);
        t.mark_as_finished(vec![(ShardId::new("s0"), vec![])]);

        let old_id = ShardId::new("shardId-000001000000000000-aaa");
        let now = old_id.creation_time().unwrap() + chrono::Duration::days(100);
        let discovered = BTreeSet::new();

        let mut t2 = tracker(InitialPositionMode::TrimHorizon);
        t2.add_splits(vec![shard(old_id.as_str(), None, true)]);
        t2.mark_as_assigned(vec![old_id.clone()]);
        t2.mark_as_finished(vec![(old_id.clone(), vec![])]);

        let evicted = t2.clean_up_old_finished_splits(&discovered, now, chrono::Duration::days(7));
        assert_eq!(evicted, vec![old_id.clone()]);
        assert_eq!(t2.known_split_ids().len(), 0);

        // s0 (no encodable creation time) never exceeds retention, so it
        // is untouched regardless of how much time passes.
        let evicted_s0 = t.clean_up_old_finished_splits(
            &BTreeSet::new(),
            Utc::now() + chrono::Duration::days(3650),
            chrono::Duration::seconds(0),
        );
        assert!(evicted_s0.is_empty());
    }

    #[test]
    fn garbage_collection_never_evicts_a_split_with_a_live_child() {
        let old_id = ShardId::new("shardId-000001000000000000-aaa");
        let mut t = tracker(InitialPositionMode::TrimHorizon);
        t.add_splits(vec![
            shard(old_id.as_str(), None, true),
            shard("s1", Some(old_id.as_str()), false),
        ]);
        t.mark_as_assigned(vec![old_id.clone()]);
        t.mark_as_finished(vec![(old_id.clone(), vec![])]);

        let now = old_id.creation_time().unwrap() + chrono::Duration::days(100);
        let evicted =
            t.clean_up_old_finished_splits(&BTreeSet::new(), now, chrono::Duration::days(7));

        assert!(evicted.is_empty());
        assert!(t.known_split_ids().contains(&old_id));
    }
}
