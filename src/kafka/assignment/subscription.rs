//! MemberSubscription encoding
//!
//! Sent by every consumer as the metadata of each protocol it advertises in
//! JoinGroup. The coordinator never looks inside; only the group leader parses
//! it to learn which topics each member wants.
//!
//! # Wire Format (Kafka ConsumerProtocolSubscription v0)
//!
//! ```text
//! version: i16
//! topics: i32 count, then i16-length-prefixed UTF-8 strings
//! user_data: i32 length (-1 for null), then bytes
//! ```

use bytes::{Buf, BufMut};

use super::{put_string, put_user_data, read_array_len, read_string, read_user_data};
use crate::kafka::error::{KafkaError, Result};

/// Topics a group member subscribes to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberSubscription {
    pub version: i16,
    /// Subscribed topic names
    pub topics: Vec<String>,
    /// Opaque client data, passed through unchanged
    pub user_data: Option<Vec<u8>>,
}

impl MemberSubscription {
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            version: 0,
            topics,
            user_data: None,
        }
    }

    /// Whether the member subscribes to `topic`
    pub fn includes(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    /// Decode JoinGroup protocol metadata
    ///
    /// Empty input decodes to an empty subscription; null topic names are skipped.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }

        let mut buf = bytes;
        if buf.remaining() < 2 {
            return Err(KafkaError::CorruptMessage {
                message: format!("MemberSubscription too short: {} bytes", buf.remaining()),
            });
        }
        let version = buf.get_i16();

        let count = read_array_len(&mut buf, "topic")?;
        let mut topics = Vec::with_capacity(count.min(buf.remaining() / 2));
        for _ in 0..count {
            if let Some(topic) = read_string(&mut buf, "topic name")? {
                topics.push(topic);
            }
        }

        Ok(Self {
            version,
            topics,
            user_data: read_user_data(&mut buf),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            10 + self.topics.iter().map(|t| t.len() + 2).sum::<usize>(),
        );
        buf.put_i16(self.version);
        buf.put_i32(self.topics.len() as i32);
        for topic in &self.topics {
            put_string(&mut buf, topic);
        }
        put_user_data(&mut buf, self.user_data.as_deref());
        buf
    }
}
