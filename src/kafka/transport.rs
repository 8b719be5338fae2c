//! Transport abstraction layer
//!
//! This module defines the `Transport` trait: the request/response surface the
//! producer and consumer need from a Kafka cluster. Separating it from the
//! client logic gives us:
//! 1. Testability - the client runs against `MemoryCluster` or a mock
//! 2. Clean separation of concerns - queueing and group logic don't know about sockets
//! 3. One error taxonomy - every failure arrives as a `TransportError` carrying a Kafka code
//!
//! Implementations must be `Send + Sync`: the producer calls `produce` and
//! `metadata` from its delivery worker thread while the application thread
//! holds the same transport.

use std::collections::HashMap;
use std::time::Duration;

use super::constants::{OFFSET_EARLIEST, OFFSET_LATEST};
use super::error::TransportError;
use super::messages::{Record, RecordHeader, TopicPartition};

/// Result type for transport calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Metadata about a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    /// Topic name
    pub name: String,
    /// Number of partitions
    pub partition_count: i32,
}

/// Which end of a partition log to look up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpec {
    /// The log start offset (oldest retained message)
    Earliest,
    /// The high watermark (offset the next appended message will get)
    Latest,
}

impl OffsetSpec {
    /// ListOffsets timestamp for this spec
    pub fn as_timestamp(&self) -> i64 {
        match self {
            OffsetSpec::Earliest => OFFSET_EARLIEST,
            OffsetSpec::Latest => OFFSET_LATEST,
        }
    }
}

/// A record read back from a partition log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRecord {
    /// Partition offset
    pub offset: i64,
    /// Message key (nullable)
    pub key: Option<Vec<u8>>,
    /// Message value (nullable)
    pub value: Option<Vec<u8>>,
    pub headers: Vec<RecordHeader>,
    /// Timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

impl FetchedRecord {
    /// Approximate size counted against fetch byte limits
    pub fn size(&self) -> usize {
        self.key.as_ref().map_or(0, Vec::len) + self.value.as_ref().map_or(0, Vec::len)
    }
}

/// Fetch request across one or more partitions
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Partitions to read and the offset to read each from
    pub partitions: Vec<(TopicPartition, i64)>,
    /// How long the broker may wait for data before answering empty
    pub max_wait: Duration,
    /// Soft limit on returned bytes (at least one record is always returned)
    pub max_bytes: usize,
}

/// Per-partition part of a fetch response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionData {
    pub partition: TopicPartition,
    /// Partition-level error (e.g. OFFSET_OUT_OF_RANGE)
    pub error: Option<TransportError>,
    pub high_watermark: i64,
    pub log_start_offset: i64,
    pub records: Vec<FetchedRecord>,
}

/// JoinGroup request
#[derive(Debug, Clone)]
pub struct JoinGroupRequest {
    pub group_id: String,
    /// None on the first join; the coordinator assigns one
    pub member_id: Option<String>,
    pub client_id: String,
    pub session_timeout: Duration,
    /// Supported assignment strategies with subscription metadata:
    /// Vec<(strategy_name, subscription_metadata)>
    pub protocols: Vec<(String, Vec<u8>)>,
}

/// Result of one generation's join phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupGeneration {
    pub member_id: String,
    pub generation_id: i32,
    pub leader_id: String,
    /// Assignment strategy chosen by the coordinator
    pub protocol_name: String,
    /// (member_id, subscription_metadata) for every member; only sent to the leader
    pub members: Vec<(String, Vec<u8>)>,
}

impl GroupGeneration {
    pub fn is_leader(&self) -> bool {
        self.member_id == self.leader_id
    }
}

/// JoinGroup response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinGroupResponse {
    /// Other members have not rejoined yet; join again shortly with this id
    Pending { member_id: String },
    /// The join phase completed
    Joined(GroupGeneration),
}

/// SyncGroup request
#[derive(Debug, Clone)]
pub struct SyncGroupRequest {
    pub group_id: String,
    pub member_id: String,
    pub generation_id: i32,
    /// (member_id, assignment_bytes); empty unless sent by the leader
    pub assignments: Vec<(String, Vec<u8>)>,
}

/// OffsetCommit request
#[derive(Debug, Clone)]
pub struct OffsetCommitRequest {
    pub group_id: String,
    /// None for commits made outside an active generation
    pub member_id: Option<String>,
    pub generation_id: i32,
    /// (partition, next offset to consume)
    pub offsets: Vec<(TopicPartition, i64)>,
}

/// Abstract interface to a Kafka cluster
///
/// This trait is the contract between the client core and the network layer.
/// Implementors own connection management and the wire codec; the core only
/// sees requests, responses, and `TransportError`s.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    // ===== Metadata =====

    /// Partition count for a topic
    ///
    /// Fails with UNKNOWN_TOPIC_OR_PARTITION when the topic does not exist.
    fn metadata(&self, topic: &str) -> TransportResult<TopicMetadata>;

    // ===== Produce / Fetch =====

    /// Append records to a partition
    ///
    /// # Returns
    /// Offset assigned to the first record; the rest follow consecutively
    fn produce(&self, partition: &TopicPartition, records: &[Record]) -> TransportResult<i64>;

    /// Read records from one or more partitions
    ///
    /// Blocks up to `request.max_wait` when none of the partitions has data at
    /// or beyond the requested offset.
    fn fetch(&self, request: &FetchRequest) -> TransportResult<Vec<PartitionData>>;

    /// Earliest or latest offset of a partition
    fn list_offset(&self, partition: &TopicPartition, spec: OffsetSpec) -> TransportResult<i64>;

    // ===== Group Membership =====

    fn join_group(&self, request: &JoinGroupRequest) -> TransportResult<JoinGroupResponse>;

    /// Leader submits assignments; every member receives its own
    ///
    /// # Returns
    /// The member's assignment bytes, or None while the leader has not assigned yet
    fn sync_group(&self, request: &SyncGroupRequest) -> TransportResult<Option<Vec<u8>>>;

    fn heartbeat(&self, group_id: &str, member_id: &str, generation_id: i32)
        -> TransportResult<()>;

    fn leave_group(&self, group_id: &str, member_id: &str) -> TransportResult<()>;

    // ===== Offsets =====

    fn commit_offsets(&self, request: &OffsetCommitRequest) -> TransportResult<()>;

    /// Committed offsets for the given partitions; partitions without a commit are absent
    fn fetch_committed(
        &self,
        group_id: &str,
        partitions: &[TopicPartition],
    ) -> TransportResult<HashMap<TopicPartition, i64>>;
}
