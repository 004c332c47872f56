//! Versioned on-wire/state encoding of [`Split`]s and enumerator state.
//! Big-endian, length-prefixed, grounded on this codebase's direct
//! `byteorder` framing idiom (see
//! `connector_proxy::connector_runners::commandutils`, which frames
//! messages with a `byteorder`-encoded length prefix rather than a
//! self-describing format like `serde_json`/`bincode`).

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{EnumeratorError, Result};
use crate::ids::{SequenceNumber, ShardId, StreamArn};
use crate::shard::{SequenceNumberRange, Shard};
use crate::split::Split;
use crate::starting_position::StartingPosition;

/// Current on-wire version. Compatible (readable) versions are `{0,1,2}`.
pub const CURRENT_VERSION: u8 = 2;
pub const COMPATIBLE_VERSIONS: [u8; 3] = [0, 1, 2];

fn write_utf(buf: &mut Vec<u8>, s: &str) {
    buf.write_u32::<BigEndian>(s.len() as u32)
        .expect("writing to a Vec<u8> never fails");
    buf.extend_from_slice(s.as_bytes());
}

fn read_utf(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| EnumeratorError::MalformedState(e.to_string()))? as usize;
    let mut bytes = vec![0u8; len];
    cursor
        .read_exact(&mut bytes)
        .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| EnumeratorError::MalformedState(e.to_string()))
}

fn write_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(v as u8);
}

fn read_bool(cursor: &mut Cursor<&[u8]>) -> Result<bool> {
    Ok(cursor
        .read_u8()
        .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?
        != 0)
}

fn iterator_type_name(pos: &StartingPosition) -> &'static str {
    match pos {
        StartingPosition::TrimHorizon => "TRIM_HORIZON",
        StartingPosition::Latest => "LATEST",
        StartingPosition::AtTimestamp { .. } => "AT_TIMESTAMP",
        StartingPosition::AfterSequenceNumber { .. } => "AFTER_SEQUENCE_NUMBER",
    }
}

/// Serializes a [`Split`] at [`CURRENT_VERSION`]. Legacy-version output
/// is only ever produced in tests, to exercise the backward-compatible
/// reader against historical shapes; see [`serialize_split_for_version`].
pub fn serialize_split(split: &Split) -> Vec<u8> {
    serialize_split_for_version(split, CURRENT_VERSION)
}

/// Serializes at an explicit version. Production code always writes
/// [`CURRENT_VERSION`]; this exists so tests can fabricate the shapes
/// that `deserialize_split` must still accept.
pub fn serialize_split_for_version(split: &Split, version: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(version);

    write_utf(&mut buf, split.stream_arn.as_str());
    write_utf(&mut buf, split.shard_id.as_str());
    write_utf(&mut buf, iterator_type_name(&split.starting_position));

    match &split.starting_position {
        StartingPosition::AtTimestamp { at } => {
            write_bool(&mut buf, true);
            write_bool(&mut buf, false); // not a string marker
            write_utf(&mut buf, &at.timestamp_millis().to_string());
        }
        StartingPosition::AfterSequenceNumber { after } => {
            write_bool(&mut buf, true);
            write_bool(&mut buf, true); // string marker
            write_utf(&mut buf, after.as_str());
        }
        StartingPosition::TrimHorizon | StartingPosition::Latest => {
            write_bool(&mut buf, false);
        }
    }

    if version >= 2 {
        write_bool(&mut buf, split.parent_shard_id.is_some());
        if let Some(parent) = &split.parent_shard_id {
            write_utf(&mut buf, parent.as_str());
        }
    } else {
        // Legacy shape: a set of parent shard ids rather than a single
        // optional one.
        match &split.parent_shard_id {
            Some(parent) => {
                buf.write_i32::<BigEndian>(1)
                    .expect("writing to a Vec<u8> never fails");
                write_utf(&mut buf, parent.as_str());
            }
            None => {
                buf.write_i32::<BigEndian>(0)
                    .expect("writing to a Vec<u8> never fails");
            }
        }
    }

    if version >= 1 {
        write_bool(&mut buf, split.is_finished);
    }

    if version >= 2 {
        buf.write_i32::<BigEndian>(split.child_splits.len() as i32)
            .expect("writing to a Vec<u8> never fails");
        for child in &split.child_splits {
            write_utf(&mut buf, child.shard_id.as_str());
            write_bool(&mut buf, child.parent_shard_id.is_some());
            if let Some(parent) = &child.parent_shard_id {
                write_utf(&mut buf, parent.as_str());
            }
            write_utf(
                &mut buf,
                child.sequence_number_range.starting_sequence_number.as_str(),
            );
            write_bool(
                &mut buf,
                child.sequence_number_range.ending_sequence_number.is_some(),
            );
            if let Some(ending) = &child.sequence_number_range.ending_sequence_number {
                write_utf(&mut buf, ending.as_str());
            }
        }
    }

    buf
}

/// Deserializes a [`Split`] written at any of [`COMPATIBLE_VERSIONS`].
/// Fields absent at the encoded version take their documented defaults
/// (`is_finished = false`, `child_splits = []`).
pub fn deserialize_split(bytes: &[u8]) -> Result<Split> {
    let mut cursor = Cursor::new(bytes);
    let version = cursor
        .read_u8()
        .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?;
    if !COMPATIBLE_VERSIONS.contains(&version) {
        return Err(EnumeratorError::VersionMismatch { found: version });
    }

    let stream_arn = StreamArn::new(read_utf(&mut cursor)?);
    let shard_id = ShardId::new(read_utf(&mut cursor)?);
    let iterator_type = read_utf(&mut cursor)?;

    let marker_present = read_bool(&mut cursor)?;
    let starting_position = if marker_present {
        let is_string = read_bool(&mut cursor)?;
        let marker = read_utf(&mut cursor)?;
        match (iterator_type.as_str(), is_string) {
            ("AT_TIMESTAMP", false) => {
                let millis: i64 = marker
                    .parse()
                    .map_err(|_| EnumeratorError::MalformedState("bad AT_TIMESTAMP marker".into()))?;
                let at = Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| EnumeratorError::MalformedState("bad AT_TIMESTAMP marker".into()))?;
                StartingPosition::AtTimestamp { at }
            }
            ("AFTER_SEQUENCE_NUMBER", true) => StartingPosition::AfterSequenceNumber {
                after: SequenceNumber::new(marker),
            },
            _ => {
                return Err(EnumeratorError::MalformedState(format!(
                    "unexpected marker for iterator type {iterator_type}"
                )))
            }
        }
    } else {
        match iterator_type.as_str() {
            "TRIM_HORIZON" => StartingPosition::TrimHorizon,
            "LATEST" => StartingPosition::Latest,
            other => {
                return Err(EnumeratorError::MalformedState(format!(
                    "unrecognized iterator type {other}"
                )))
            }
        }
    };

    let parent_shard_id = if version >= 2 {
        if read_bool(&mut cursor)? {
            Some(ShardId::new(read_utf(&mut cursor)?))
        } else {
            None
        }
    } else {
        // Legacy set-of-parents shape: take the first element, if any,
        // as the parent. Order is otherwise undefined upstream for that
        // shape; this is a documented, arbitrary-but-deterministic
        // choice, not a guess.
        let count = cursor
            .read_i32::<BigEndian>()
            .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?;
        let mut first = None;
        for i in 0..count {
            let id = read_utf(&mut cursor)?;
            if i == 0 {
                first = Some(ShardId::new(id));
            }
        }
        first
    };

    let is_finished = if version >= 1 { read_bool(&mut cursor)? } else { false };

    let child_splits = if version >= 2 {
        let count = cursor
            .read_i32::<BigEndian>()
            .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?;
        let mut children = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let child_shard_id = ShardId::new(read_utf(&mut cursor)?);
            let child_parent = if read_bool(&mut cursor)? {
                Some(ShardId::new(read_utf(&mut cursor)?))
            } else {
                None
            };
            let starting_sequence_number = SequenceNumber::new(read_utf(&mut cursor)?);
            let ending_sequence_number = if read_bool(&mut cursor)? {
                Some(SequenceNumber::new(read_utf(&mut cursor)?))
            } else {
                None
            };
            children.push(Shard {
                shard_id: child_shard_id,
                parent_shard_id: child_parent,
                sequence_number_range: SequenceNumberRange {
                    starting_sequence_number,
                    ending_sequence_number,
                },
            });
        }
        children
    } else {
        Vec::new()
    };

    Ok(Split {
        stream_arn,
        shard_id,
        starting_position,
        parent_shard_id,
        is_finished,
        child_splits,
    })
}

/// Enumerator checkpoint state: the split list plus `startTimestamp`
/// encoded as epoch-millis.
pub fn serialize_enumerator_state(
    splits: &[(Split, crate::split::SplitAssignmentStatus)],
    start_timestamp: DateTime<Utc>,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(CURRENT_VERSION);
    buf.write_i64::<BigEndian>(start_timestamp.timestamp_millis())
        .expect("writing to a Vec<u8> never fails");
    buf.write_i32::<BigEndian>(splits.len() as i32)
        .expect("writing to a Vec<u8> never fails");
    for (split, status) in splits {
        let status_byte = match status {
            crate::split::SplitAssignmentStatus::Unassigned => 0u8,
            crate::split::SplitAssignmentStatus::Assigned => 1u8,
            crate::split::SplitAssignmentStatus::Finished => 2u8,
        };
        let encoded = serialize_split(split);
        buf.write_i32::<BigEndian>(encoded.len() as i32)
            .expect("writing to a Vec<u8> never fails");
        buf.extend_from_slice(&encoded);
        buf.push(status_byte);
    }
    buf
}

pub fn deserialize_enumerator_state(
    bytes: &[u8],
) -> Result<(Vec<(Split, crate::split::SplitAssignmentStatus)>, DateTime<Utc>)> {
    let mut cursor = Cursor::new(bytes);
    let version = cursor
        .read_u8()
        .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?;
    if !COMPATIBLE_VERSIONS.contains(&version) {
        return Err(EnumeratorError::VersionMismatch { found: version });
    }
    let start_millis = cursor
        .read_i64::<BigEndian>()
        .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?;
    let start_timestamp = Utc
        .timestamp_millis_opt(start_millis)
        .single()
        .ok_or_else(|| EnumeratorError::MalformedState("bad startTimestamp".into()))?;

    let count = cursor
        .read_i32::<BigEndian>()
        .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?;
    let mut splits = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let len = cursor
            .read_i32::<BigEndian>()
            .map_err(|e| EnumeratorError::MalformedState(e.to_string()))? as usize;
        let mut split_bytes = vec![0u8; len];
        cursor
            .read_exact(&mut split_bytes)
            .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?;
        let split = deserialize_split(&split_bytes)?;
        let status_byte = cursor
            .read_u8()
            .map_err(|e| EnumeratorError::MalformedState(e.to_string()))?;
        let status = match status_byte {
            0 => crate::split::SplitAssignmentStatus::Unassigned,
            1 => crate::split::SplitAssignmentStatus::Assigned,
            2 => crate::split::SplitAssignmentStatus::Finished,
            other => {
                return Err(EnumeratorError::MalformedState(format!(
                    "unrecognized split status byte {other}"
                )))
            }
        };
        splits.push((split, status));
    }

    Ok((splits, start_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_split() -> Split {
        Split {
            stream_arn: StreamArn::new("arn:aws:dynamodb:us-east-1:123:table/t/stream/2024"),
            shard_id: ShardId::new("shardId-000001704067200000-69f6b378"),
            starting_position: StartingPosition::AfterSequenceNumber {
                after: SequenceNumber::new("495226"),
            },
            parent_shard_id: Some(ShardId::new("shardId-parent")),
            is_finished: true,
            child_splits: vec![Shard {
                shard_id: ShardId::new("shardId-child"),
                parent_shard_id: Some(ShardId::new("shardId-000001704067200000-69f6b378")),
                sequence_number_range: SequenceNumberRange {
                    starting_sequence_number: SequenceNumber::new("1"),
                    ending_sequence_number: None,
                },
            }],
        }
    }

    #[test]
    fn round_trips_at_current_version() {
        let split = sample_split();
        let bytes = serialize_split(&split);
        let decoded = deserialize_split(&bytes).unwrap();
        assert_eq!(decoded, split);
    }

    #[test]
    fn v0_and_v1_decode_with_defaulted_fields() {
        let split = sample_split();
        for version in [0u8, 1u8] {
            let bytes = serialize_split_for_version(&split, version);
            let decoded = deserialize_split(&bytes).unwrap();
            assert_eq!(decoded.shard_id, split.shard_id);
            assert_eq!(decoded.parent_shard_id, split.parent_shard_id);
            if version == 0 {
                assert!(!decoded.is_finished);
            }
            assert!(decoded.child_splits.is_empty());
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let split = sample_split();
        let mut bytes = serialize_split(&split);
        bytes[0] = 99;
        let err = deserialize_split(&bytes).unwrap_err();
        assert!(matches!(err, EnumeratorError::VersionMismatch { found: 99 }));
    }

    #[test]
    fn legacy_multi_parent_shape_takes_first_element() {
        // Hand-roll the legacy (v<=1) wire shape with two parent ids to
        // exercise the documented "take the first" resolution of open
        // question #1.
        let mut buf = Vec::new();
        buf.push(1u8);
        write_utf(&mut buf, "arn");
        write_utf(&mut buf, "s1");
        write_utf(&mut buf, "TRIM_HORIZON");
        write_bool(&mut buf, false); // no marker
        buf.write_i32::<BigEndian>(2).unwrap();
        write_utf(&mut buf, "first-parent");
        write_utf(&mut buf, "second-parent");
        write_bool(&mut buf, false); // is_finished

        let decoded = deserialize_split(&buf).unwrap();
        assert_eq!(decoded.parent_shard_id, Some(ShardId::new("first-parent")));
    }

    #[test]
    fn enumerator_state_round_trips() {
        let splits = vec![(sample_split(), crate::split::SplitAssignmentStatus::Finished)];
        let start = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        let bytes = serialize_enumerator_state(&splits, start);
        let (decoded_splits, decoded_start) = deserialize_enumerator_state(&bytes).unwrap();
        assert_eq!(decoded_splits, splits);
        assert_eq!(decoded_start, start);
    }
}
