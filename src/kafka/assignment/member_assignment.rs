//! MemberAssignment encoding
//!
//! Produced by the group leader for every member and returned to each member
//! by SyncGroup.
//!
//! # Wire Format (Kafka ConsumerProtocolAssignment v0)
//!
//! ```text
//! version: i16
//! topic_partitions: i32 count, then for each topic:
//!   topic: i16-length-prefixed string
//!   partitions: i32 count, then i32 partition ids
//! user_data: i32 length (-1 for null), then bytes
//! ```

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};

use super::{put_string, put_user_data, read_array_len, read_string, read_user_data};
use crate::kafka::error::{KafkaError, Result};
use crate::kafka::messages::TopicPartition;

/// Partitions assigned to one group member
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberAssignment {
    pub version: i16,
    /// topic -> assigned partition ids
    pub topic_partitions: BTreeMap<String, Vec<i32>>,
    pub user_data: Option<Vec<u8>>,
}

impl MemberAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an assignment from individual partitions
    pub fn from_partitions<'a>(partitions: impl IntoIterator<Item = &'a TopicPartition>) -> Self {
        let mut assignment = Self::new();
        for tp in partitions {
            assignment.add(&tp.topic, tp.partition);
        }
        assignment
    }

    pub fn add(&mut self, topic: &str, partition: i32) {
        self.topic_partitions
            .entry(topic.to_string())
            .or_default()
            .push(partition);
    }

    pub fn is_empty(&self) -> bool {
        self.topic_partitions.values().all(Vec::is_empty)
    }

    /// Total number of partitions assigned
    pub fn partition_count(&self) -> usize {
        self.topic_partitions.values().map(Vec::len).sum()
    }

    /// Flatten into sorted `TopicPartition`s
    pub fn partitions(&self) -> Vec<TopicPartition> {
        let mut out: Vec<TopicPartition> = self
            .topic_partitions
            .iter()
            .flat_map(|(topic, parts)| parts.iter().map(move |p| TopicPartition::new(topic.clone(), *p)))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Decode SyncGroup assignment bytes
    ///
    /// Empty input decodes to an empty assignment.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }

        let mut buf = bytes;
        if buf.remaining() < 2 {
            return Err(KafkaError::CorruptMessage {
                message: format!("MemberAssignment too short: {} bytes", buf.remaining()),
            });
        }
        let version = buf.get_i16();

        let topic_count = read_array_len(&mut buf, "assigned topic")?;
        let mut topic_partitions = BTreeMap::new();
        for _ in 0..topic_count {
            let topic = read_string(&mut buf, "assigned topic name")?;
            let count = read_array_len(&mut buf, "partition")?;
            if buf.remaining() < count * 4 {
                return Err(KafkaError::CorruptMessage {
                    message: format!(
                        "Partition array of {} entries exceeds remaining data {}",
                        count,
                        buf.remaining()
                    ),
                });
            }
            let partitions: Vec<i32> = (0..count).map(|_| buf.get_i32()).collect();
            if let Some(topic) = topic {
                topic_partitions.insert(topic, partitions);
            }
        }

        Ok(Self {
            version,
            topic_partitions,
            user_data: read_user_data(&mut buf),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.put_i16(self.version);
        buf.put_i32(self.topic_partitions.len() as i32);
        for (topic, partitions) in &self.topic_partitions {
            put_string(&mut buf, topic);
            buf.put_i32(partitions.len() as i32);
            for partition in partitions {
                buf.put_i32(*partition);
            }
        }
        put_user_data(&mut buf, self.user_data.as_deref());
        buf
    }
}
