//! Detects and drives resolution of the inconsistent snapshots returned
//! by the upstream listing API.
//!
//! The listing API is not linearizable: a parent shard may appear in one
//! response while its child appears only several polling rounds later.
//! A *closed leaf* — a closed shard with no observed child — is the
//! signature of that inconsistency: the child simply hasn't been
//! returned yet. [`ShardGraphTracker`] accumulates nodes across one or
//! more responses and answers whether the accumulated set is currently
//! graph-consistent.

use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{ShardId, StreamArn};
use crate::proxy::{ListShardsResponse, ProxyError, StreamProxy};
use crate::shard::Shard;

#[derive(Default)]
pub struct ShardGraphTracker {
    nodes: BTreeMap<ShardId, Shard>,
    /// Closed shards with no observed child yet. Non-empty means
    /// inconsistent. Ordered so `earliest_closed_leaf` is O(log n);
    /// shard ids sort lexicographically, which tracks creation order
    /// for the fixed-width numeric id prefixes this crate decodes in
    /// `ids::ShardId::creation_time`.
    closed_leaf_ids: BTreeSet<ShardId>,
}

impl ShardGraphTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_nodes(&mut self, shards: impl IntoIterator<Item = Shard>) {
        for shard in shards {
            self.add_node(shard);
        }
    }

    fn add_node(&mut self, shard: Shard) {
        if let Some(parent) = &shard.parent_shard_id {
            self.closed_leaf_ids.remove(parent);
        }
        if shard.is_closed() {
            self.closed_leaf_ids.insert(shard.shard_id.clone());
        } else {
            self.closed_leaf_ids.remove(&shard.shard_id);
        }
        self.nodes.insert(shard.shard_id.clone(), shard);
    }

    pub fn is_consistent(&self) -> bool {
        self.closed_leaf_ids.is_empty()
    }

    /// The inconsistency anchor: the closed leaf with the smallest id,
    /// used as the `startShardIdExclusive` of the next anchored listing.
    pub fn earliest_closed_leaf(&self) -> Option<&ShardId> {
        self.closed_leaf_ids.iter().next()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Shard> {
        self.nodes.values()
    }

    pub fn into_nodes(self) -> Vec<Shard> {
        self.nodes.into_values().collect()
    }
}

/// The outcome of running inconsistency resolution to convergence (or
/// until the retry budget / a disabled stream cuts it short).
pub struct ResolutionResult {
    pub shards: Vec<Shard>,
    pub inconsistency_detected: bool,
}

/// Folds the initial response into a graph, then repeatedly re-lists
/// from the earliest closed leaf until the graph is consistent, the
/// stream is disabled (no further children will ever appear), or
/// `max_retries` is exhausted. Uses an explicit iteration counter and
/// early-exit predicates rather than exceptions for control flow.
#[tracing::instrument(skip(proxy, initial), fields(stream_arn = %stream_arn))]
pub async fn resolve(
    proxy: &dyn StreamProxy,
    stream_arn: &StreamArn,
    initial: ListShardsResponse,
    max_retries: usize,
) -> Result<ResolutionResult, ProxyError> {
    let mut graph = ShardGraphTracker::new();
    graph.add_nodes(initial.shards);
    let mut stream_status = initial.stream_status;

    for attempt in 0..max_retries {
        if graph.is_consistent() {
            break;
        }
        if stream_status.is_disabled() {
            tracing::info!(attempt, "stream disabled; no further children can appear");
            break;
        }

        let anchor = graph
            .earliest_closed_leaf()
            .expect("non-empty closed_leaf_ids checked above")
            .clone();
        tracing::debug!(attempt, anchor = %anchor, "re-listing from inconsistency anchor");

        let resp = proxy.list_shards(stream_arn, Some(&anchor)).await?;
        stream_status = resp.stream_status;
        graph.add_nodes(resp.shards);
    }

    let inconsistency_detected = !graph.is_consistent();
    if inconsistency_detected {
        tracing::warn!(
            stream_arn = %stream_arn,
            "retry budget exhausted with residual inconsistency"
        );
    }

    Ok(ResolutionResult {
        shards: graph.into_nodes(),
        inconsistency_detected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequenceNumber;
    use crate::shard::{SequenceNumberRange, StreamStatus};

    fn closed(id: &str, parent: Option<&str>) -> Shard {
        Shard {
            shard_id: ShardId::new(id),
            parent_shard_id: parent.map(ShardId::new),
            sequence_number_range: SequenceNumberRange {
                starting_sequence_number: SequenceNumber::new("1"),
                ending_sequence_number: Some(SequenceNumber::new("2")),
            },
        }
    }

    fn open(id: &str, parent: Option<&str>) -> Shard {
        Shard {
            shard_id: ShardId::new(id),
            parent_shard_id: parent.map(ShardId::new),
            sequence_number_range: SequenceNumberRange {
                starting_sequence_number: SequenceNumber::new("1"),
                ending_sequence_number: None,
            },
        }
    }

    #[test]
    fn linear_ancestry_is_consistent() {
        let mut graph = ShardGraphTracker::new();
        graph.add_nodes(vec![closed("s0", None), open("s1", Some("s0"))]);
        assert!(graph.is_consistent());
    }

    #[test]
    fn closed_leaf_with_no_child_is_inconsistent() {
        let mut graph = ShardGraphTracker::new();
        graph.add_nodes(vec![closed("s0", None)]);
        assert!(!graph.is_consistent());
        assert_eq!(graph.earliest_closed_leaf(), Some(&ShardId::new("s0")));
    }

    #[test]
    fn observing_a_child_resolves_the_parents_leaf() {
        let mut graph = ShardGraphTracker::new();
        graph.add_nodes(vec![closed("s0", None)]);
        graph.add_nodes(vec![open("s1", Some("s0")), open("s2", Some("s0"))]);
        assert!(graph.is_consistent());
    }

    struct ScriptedProxy(tokio::sync::Mutex<Vec<ListShardsResponse>>);

    #[async_trait::async_trait]
    impl StreamProxy for ScriptedProxy {
        async fn list_shards(
            &self,
            _stream_arn: &StreamArn,
            _start_shard_id_exclusive: Option<&ShardId>,
        ) -> Result<ListShardsResponse, ProxyError> {
            Ok(self.0.lock().await.remove(0))
        }
    }

    #[tokio::test]
    async fn resolves_across_an_anchored_relist() {
        let proxy = ScriptedProxy(tokio::sync::Mutex::new(vec![ListShardsResponse {
            shards: vec![open("s1", Some("s0")), open("s2", Some("s0"))],
            stream_status: StreamStatus::Enabled,
            inconsistency_detected: false,
        }]));

        let initial = ListShardsResponse {
            shards: vec![closed("s0", None)],
            stream_status: StreamStatus::Enabled,
            inconsistency_detected: true,
        };

        let result = resolve(&proxy, &StreamArn::new("arn"), initial, 5)
            .await
            .unwrap();

        assert!(!result.inconsistency_detected);
        assert_eq!(result.shards.len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget_with_residual_inconsistency() {
        let proxy = ScriptedProxy(tokio::sync::Mutex::new(vec![
            ListShardsResponse {
                shards: vec![],
                stream_status: StreamStatus::Enabled,
                inconsistency_detected: true,
            };
            5
        ]));

        let initial = ListShardsResponse {
            shards: vec![closed("s0", None)],
            stream_status: StreamStatus::Enabled,
            inconsistency_detected: true,
        };

        let result = resolve(&proxy, &StreamArn::new("arn"), initial, 5)
            .await
            .unwrap();

        assert!(result.inconsistency_detected);
    }

    #[tokio::test]
    async fn stops_early_once_stream_is_disabled() {
        let proxy = ScriptedProxy(tokio::sync::Mutex::new(vec![ListShardsResponse {
            shards: vec![],
            stream_status: StreamStatus::Disabled,
            inconsistency_detected: true,
        }]));

        let initial = ListShardsResponse {
            shards: vec![closed("s0", None)],
            stream_status: StreamStatus::Enabled,
            inconsistency_detected: true,
        };

        let result = resolve(&proxy, &StreamArn::new("arn"), initial, 5)
            .await
            .unwrap();

        // Only the single scripted response should have been consumed.
        assert!(proxy.0.lock().await.is_empty());
        assert!(result.inconsistency_detected);
    }
}
