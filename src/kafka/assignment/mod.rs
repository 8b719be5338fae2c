//! Partition Assignment Module
//!
//! Client-side partition assignment for consumer groups. The group leader
//! receives every member's subscription in its JoinGroup response, runs the
//! strategy the coordinator selected, and hands the result back through
//! SyncGroup. Two standard Kafka strategies are provided:
//!
//! - **Range**: Assigns consecutive partition ranges per topic
//! - **RoundRobin**: Deals all subscribed partitions out one at a time
//!
//! # Wire Format
//!
//! Subscription and assignment metadata use Kafka's consumer protocol
//! encoding, so they are opaque bytes to the coordinator:
//!
//! ```text
//! MemberSubscription (JoinGroup metadata):
//!   version: i16
//!   topics: [String]
//!   user_data: bytes
//!
//! MemberAssignment (SyncGroup assignment):
//!   version: i16
//!   topic_partitions: [(String, [i32])]
//!   user_data: bytes
//! ```

pub mod member_assignment;
pub mod strategies;
pub mod subscription;


use std::collections::BTreeMap;

use bytes::{Buf, BufMut};

use super::error::{KafkaError, Result};

pub use member_assignment::MemberAssignment;
pub use strategies::{
    create_strategy, select_common_strategy, AssignmentInput, AssignmentOutput, AssignmentStrategy,
};
pub use subscription::MemberSubscription;

/// Run the named strategy over raw JoinGroup member metadata
///
/// # Arguments
/// * `strategy_name` - Protocol name chosen by the coordinator
/// * `members` - (member_id, subscription_metadata) pairs from the leader's JoinGroup response
/// * `topic_partitions` - Partition count per subscribed topic, as seen by the leader
///
/// # Returns
/// (member_id, encoded MemberAssignment) for every member, ready for SyncGroup
pub fn compute_assignments(
    strategy_name: &str,
    members: &[(String, Vec<u8>)],
    topic_partitions: &BTreeMap<String, i32>,
) -> Result<Vec<(String, Vec<u8>)>> {
    let strategy = create_strategy(strategy_name).ok_or_else(|| {
        KafkaError::InvalidArgument(format!("unsupported assignment strategy: {}", strategy_name))
    })?;

    let mut subscriptions = BTreeMap::new();
    for (member_id, metadata) in members {
        subscriptions.insert(member_id.clone(), MemberSubscription::parse(metadata)?);
    }

    let input = AssignmentInput::new(subscriptions, topic_partitions.clone());
    let output = strategy.assign(&input);

    Ok(output
        .into_iter()
        .map(|(member_id, assignment)| (member_id, assignment.encode()))
        .collect())
}

// ===== Shared codec helpers =====

fn corrupt(message: impl Into<String>) -> KafkaError {
    KafkaError::CorruptMessage {
        message: message.into(),
    }
}

/// Read an i16-length-prefixed string; `None` for a null string
pub(crate) fn read_string(buf: &mut &[u8], what: &str) -> Result<Option<String>> {
    if buf.remaining() < 2 {
        return Err(corrupt(format!("Unexpected end of data reading {} length", what)));
    }
    let len = buf.get_i16();
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(corrupt(format!(
            "{} length {} exceeds remaining data {}",
            what,
            len,
            buf.remaining()
        )));
    }
    let text = String::from_utf8(buf[..len].to_vec())
        .map_err(|e| corrupt(format!("Invalid UTF-8 in {}: {}", what, e)))?;
    buf.advance(len);
    Ok(Some(text))
}

/// Read an i32 array length, rejecting negative counts
pub(crate) fn read_array_len(buf: &mut &[u8], what: &str) -> Result<usize> {
    if buf.remaining() < 4 {
        return Err(corrupt(format!("Unexpected end of data reading {} count", what)));
    }
    let len = buf.get_i32();
    if len < 0 {
        return Err(corrupt(format!("Invalid {} count: {}", what, len)));
    }
    Ok(len as usize)
}

/// Read trailing nullable user data; missing or truncated data reads as `None`
pub(crate) fn read_user_data(buf: &mut &[u8]) -> Option<Vec<u8>> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_i32();
    if len < 0 || buf.remaining() < len as usize {
        return None;
    }
    let data = buf[..len as usize].to_vec();
    buf.advance(len as usize);
    Some(data)
}

pub(crate) fn put_string(buf: &mut Vec<u8>, value: &str) {
    buf.put_i16(value.len() as i16);
    buf.put_slice(value.as_bytes());
}

pub(crate) fn put_user_data(buf: &mut Vec<u8>, data: Option<&[u8]>) {
    match data {
        Some(data) => {
            buf.put_i32(data.len() as i32);
            buf.put_slice(data);
        }
        None => buf.put_i32(-1),
    }
}
