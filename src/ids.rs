//! Opaque upstream identifiers, wrapped so that shard-id arithmetic lives
//! in one place instead of being re-derived at every call site.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// The ARN (or equivalent opaque handle) of the stream being enumerated.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct StreamArn(String);

impl StreamArn {
    pub fn new(arn: impl Into<String>) -> Self {
        Self(arn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StreamArn {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The id of a single shard, unique within a stream.
///
/// Shard ids encode their creation time. DynamoDB Streams and Kinesis
/// both mint ids of the shape `shardId-<20-digit-epoch-millis>-<suffix>`;
/// [`ShardId::creation_time`] decodes that leading timestamp when present
/// and returns `None` for ids that don't follow the convention (callers
/// must treat an undecodable id as "never ages out", i.e. retain it).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ShardId(String);

const SHARD_ID_PREFIX: &str = "shardId-";

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the creation timestamp embedded in the shard id, if any.
    ///
    /// Layout: `shardId-<20-digit-epoch-millis>-<opaque-suffix>`. Ids
    /// that don't match this convention (e.g. synthetic ids used in
    /// tests, or upstream formats this crate hasn't seen) decode to
    /// `None`.
    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        let rest = self.0.strip_prefix(SHARD_ID_PREFIX)?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.len() < 15 {
            // Too short to plausibly be a millisecond epoch timestamp.
            return None;
        }
        let millis: i64 = digits.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// True iff the shard's encoded creation time is older than `retention`
    /// relative to `now`. Ids with no decodable creation time are treated
    /// as *not* exceeding retention, so that garbage collection never
    /// races ahead of uncertainty and evicts a split whose child is
    /// still live.
    pub fn age_exceeds_retention(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        match self.creation_time() {
            Some(created) => now.signed_duration_since(created) > retention,
            None => false,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ShardId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An opaque, lexicographically-ordered upstream sequence number.
/// Never compared numerically: upstream guarantees ordering only as
/// strings.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SequenceNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a parallel reader subtask that splits are assigned to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct SubtaskId(pub usize);

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_shard_id() {
        // 2024-01-01T00:00:00Z in epoch millis.
        let id = ShardId::new("shardId-000001704067200000-69f6b378");
        let ts = id.creation_time().expect("should decode");
        assert_eq!(ts.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn undecodable_ids_return_none() {
        assert_eq!(ShardId::new("s0").creation_time(), None);
        assert_eq!(ShardId::new("shardId-notanumber-x").creation_time(), None);
    }

    #[test]
    fn undecodable_ids_never_exceed_retention() {
        let id = ShardId::new("s0");
        assert!(!id.age_exceeds_retention(Utc::now(), chrono::Duration::seconds(0)));
    }

    #[test]
    fn old_ids_exceed_retention_after_the_window() {
        let id = ShardId::new("shardId-000001704067200000-69f6b378");
        let now = id.creation_time().unwrap() + chrono::Duration::days(10);
        assert!(id.age_exceeds_retention(now, chrono::Duration::days(7)));
        assert!(!id.age_exceeds_retention(now, chrono::Duration::days(30)));
    }
}
