//! [`StartingPosition`] is a closed sum type describing where a reader
//! must begin within a shard: a tagged variant rather than an
//! interface-style dispatch target, so equality considers both the
//! variant tag and its payload.

use chrono::{DateTime, Utc};

use crate::ids::SequenceNumber;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum StartingPosition {
    /// Read from the oldest available record in the shard.
    TrimHorizon,
    /// Only records arriving after subscription are visible.
    Latest,
    /// Read from the first record with an arrival timestamp >= `at`.
    AtTimestamp { at: DateTime<Utc> },
    /// Resume reading after the given sequence number.
    AfterSequenceNumber { after: SequenceNumber },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_with_different_payloads_are_not_equal() {
        let a = StartingPosition::AfterSequenceNumber {
            after: SequenceNumber::new("A"),
        };
        let b = StartingPosition::AfterSequenceNumber {
            after: SequenceNumber::new("B"),
        };
        assert_ne!(a, b);
        assert_ne!(a, StartingPosition::TrimHorizon);
    }
}
