//! Message types shared by the producer and consumer
//!
//! - `OutboundMessage`: what an application hands to `Producer::enqueue`
//! - `Record`: the transport-level form of a message (what gets appended to a log)
//! - `DeliveryReport`: the one-shot outcome of an accepted message, handed back
//!   together with the message itself
//! - `ConsumedMessage`: what `Consumer::poll` yields

use std::any::Any;
use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use super::error::DeliveryError;

/// A partition of a topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// Record header (key-value metadata)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Header key (UTF-8 string)
    pub key: String,
    /// Header value (binary data)
    pub value: Vec<u8>,
}

/// A record as handed to the transport for appending to a partition log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Optional message key (used for partitioning and log compaction)
    pub key: Option<Vec<u8>>,
    /// Optional message value (payload)
    pub value: Option<Vec<u8>>,
    /// Message headers
    pub headers: Vec<RecordHeader>,
    /// Timestamp (milliseconds since epoch)
    pub timestamp: Option<i64>,
}

/// Opaque per-message application handle, returned untouched in the delivery report
pub type Opaque = Box<dyn Any + Send>;

/// Identity assigned to a message when the producer accepts it
///
/// Ids are unique and increasing per producer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A message submitted for asynchronous delivery
///
/// Built with `OutboundMessage::to(topic)` and the `with_*` methods. Once
/// accepted by `Producer::enqueue` the message belongs to the producer until it
/// comes back inside its `DeliveryReport`.
#[derive(Debug)]
pub struct OutboundMessage {
    pub topic: String,
    /// Explicit partition; `None` lets the partitioner choose
    pub partition: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<RecordHeader>,
    /// CreateTime in milliseconds since epoch; filled in at enqueue when absent
    pub timestamp: Option<i64>,
    pub opaque: Option<Opaque>,
}

impl OutboundMessage {
    /// Start a message for `topic`
    pub fn to(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            value: None,
            headers: Vec::new(),
            timestamp: None,
            opaque: None,
        }
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(RecordHeader {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    pub fn with_opaque<T: Any + Send>(mut self, opaque: T) -> Self {
        self.opaque = Some(Box::new(opaque));
        self
    }

    /// Length of the value in bytes (0 for a null value)
    pub fn value_len(&self) -> usize {
        self.value.as_ref().map_or(0, Vec::len)
    }

    /// Bytes this message occupies in the producer queue
    pub fn size(&self) -> usize {
        let key_len = self.key.as_ref().map_or(0, Vec::len);
        let header_len: usize = self
            .headers
            .iter()
            .map(|h| h.key.len() + h.value.len())
            .sum();
        key_len + self.value_len() + header_len
    }

    /// Downcast the opaque handle, if one of type `T` was attached
    pub fn opaque_ref<T: Any>(&self) -> Option<&T> {
        self.opaque.as_ref().and_then(|o| o.downcast_ref::<T>())
    }

    pub(crate) fn to_record(&self) -> Record {
        Record {
            key: self.key.clone(),
            value: self.value.clone(),
            headers: self.headers.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Terminal outcome of a produced message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Appended to the partition log at `offset`
    Delivered { partition: i32, offset: i64 },
    /// Permanently failed; the producer does not retry
    Failed(DeliveryError),
}

/// Delivery report for one accepted message
///
/// Produced exactly once per message and handed to the producer's
/// `DeliveryHandler` from inside `Producer::poll`.
#[derive(Debug)]
pub struct DeliveryReport {
    pub id: MessageId,
    pub message: OutboundMessage,
    pub outcome: DeliveryOutcome,
    /// When the producer accepted the message
    pub enqueued_at: Instant,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }

    /// Partition the message was written to (or targeted, on failure)
    pub fn partition(&self) -> Option<i32> {
        match self.outcome {
            DeliveryOutcome::Delivered { partition, .. } => Some(partition),
            DeliveryOutcome::Failed(_) => self.message.partition,
        }
    }

    pub fn offset(&self) -> Option<i64> {
        match self.outcome {
            DeliveryOutcome::Delivered { offset, .. } => Some(offset),
            DeliveryOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&DeliveryError> {
        match &self.outcome {
            DeliveryOutcome::Delivered { .. } => None,
            DeliveryOutcome::Failed(err) => Some(err),
        }
    }
}

/// A message yielded by `Consumer::poll`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<RecordHeader>,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

impl ConsumedMessage {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// Current wall-clock time in milliseconds since epoch
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_partition_ordering() {
        let mut parts = vec![
            TopicPartition::new("b", 0),
            TopicPartition::new("a", 1),
            TopicPartition::new("a", 0),
        ];
        parts.sort();
        assert_eq!(parts[0], TopicPartition::new("a", 0));
        assert_eq!(parts[1], TopicPartition::new("a", 1));
        assert_eq!(parts[2], TopicPartition::new("b", 0));
        assert_eq!(parts[2].to_string(), "b[0]");
    }

    #[test]
    fn test_outbound_message_builder() {
        let msg = OutboundMessage::to("events")
            .with_partition(2)
            .with_key("k")
            .with_value("hello")
            .with_header("trace", vec![1, 2])
            .with_opaque(42u32);

        assert_eq!(msg.topic, "events");
        assert_eq!(msg.partition, Some(2));
        assert_eq!(msg.key.as_deref(), Some(&b"k"[..]));
        assert_eq!(msg.value_len(), 5);
        assert_eq!(msg.size(), 1 + 5 + 5 + 2);
        assert_eq!(msg.opaque_ref::<u32>(), Some(&42));
        assert!(msg.opaque_ref::<String>().is_none());
    }

    #[test]
    fn test_null_value_has_zero_length() {
        let msg = OutboundMessage::to("t");
        assert_eq!(msg.value_len(), 0);
        assert_eq!(msg.size(), 0);
    }

    #[test]
    fn test_to_record_copies_payload() {
        let msg = OutboundMessage::to("t")
            .with_key("k")
            .with_value("v")
            .with_timestamp(1234);
        let record = msg.to_record();
        assert_eq!(record.key, Some(b"k".to_vec()));
        assert_eq!(record.value, Some(b"v".to_vec()));
        assert_eq!(record.timestamp, Some(1234));
    }

    #[test]
    fn test_delivery_report_accessors() {
        let report = DeliveryReport {
            id: MessageId(7),
            message: OutboundMessage::to("t").with_partition(1),
            outcome: DeliveryOutcome::Failed(DeliveryError::MessageTimedOut),
            enqueued_at: Instant::now(),
        };
        assert!(!report.is_delivered());
        assert_eq!(report.partition(), Some(1));
        assert_eq!(report.offset(), None);
        assert_eq!(report.error(), Some(&DeliveryError::MessageTimedOut));

        let report = DeliveryReport {
            id: MessageId(8),
            message: OutboundMessage::to("t"),
            outcome: DeliveryOutcome::Delivered {
                partition: 3,
                offset: 99,
            },
            enqueued_at: Instant::now(),
        };
        assert!(report.is_delivered());
        assert_eq!(report.partition(), Some(3));
        assert_eq!(report.offset(), Some(99));
        assert!(report.error().is_none());
    }
}
