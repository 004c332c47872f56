//! The RPC boundary to the upstream stream service. Concrete transport
//! (DynamoDB Streams `DescribeStream`/`ListShards`, or Kinesis
//! `ListShards`) is explicitly out of scope for this crate — hosts
//! supply their own [`StreamProxy`] implementation; this module only
//! defines the trait boundary plus, behind the `test-util` feature, a
//! deterministic in-memory double for tests.

use std::collections::VecDeque;
use std::error::Error as StdError;

use crate::ids::{ShardId, StreamArn};
use crate::shard::{Shard, StreamStatus};

pub type ProxyError = Box<dyn StdError + Send + Sync + 'static>;

/// One `listShards` response. `inconsistency_detected` is whatever hint
/// (if any) the upstream API itself provides; the core does not rely on
/// it for correctness — [`crate::graph_tracker::ShardGraphTracker`]
/// derives consistency independently from the accumulated node set.
#[derive(Clone, Debug, PartialEq)]
pub struct ListShardsResponse {
    pub shards: Vec<Shard>,
    pub stream_status: StreamStatus,
    pub inconsistency_detected: bool,
}

#[async_trait::async_trait]
pub trait StreamProxy: Send + Sync {
    /// Lists shards for `stream_arn`. When `start_shard_id_exclusive` is
    /// set, the listing resumes strictly after that shard id — used for
    /// anchored re-listing once inconsistency resolution has an anchor
    /// to restart from.
    async fn list_shards(
        &self,
        stream_arn: &StreamArn,
        start_shard_id_exclusive: Option<&ShardId>,
    ) -> Result<ListShardsResponse, ProxyError>;

    /// Releases any resources held by this proxy. The enumerator calls
    /// this once, from `Enumerator::close`; in-flight `list_shards`
    /// calls that complete afterward are discarded by the caller rather
    /// than acted upon. Most proxies have nothing to release.
    async fn close(&self) {}
}

/// A deterministic, in-memory [`StreamProxy`] for tests. Responses are
/// scripted: each call to `list_shards` pops the next scripted response
/// regardless of its arguments, which is enough to drive the resolution
/// loop and enumerator through a discovery sequence chosen by the test.
#[cfg(feature = "test-util")]
pub struct StubStreamProxy {
    responses: tokio::sync::Mutex<VecDeque<ListShardsResponse>>,
}

#[cfg(feature = "test-util")]
impl StubStreamProxy {
    pub fn new(responses: Vec<ListShardsResponse>) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(responses.into()),
        }
    }
}

#[cfg(feature = "test-util")]
#[async_trait::async_trait]
impl StreamProxy for StubStreamProxy {
    async fn list_shards(
        &self,
        _stream_arn: &StreamArn,
        _start_shard_id_exclusive: Option<&ShardId>,
    ) -> Result<ListShardsResponse, ProxyError> {
        let mut responses = self.responses.lock().await;
        match responses.pop_front() {
            Some(resp) => Ok(resp),
            None => Ok(ListShardsResponse {
                shards: Vec::new(),
                stream_status: StreamStatus::Enabled,
                inconsistency_detected: false,
            }),
        }
    }
}
