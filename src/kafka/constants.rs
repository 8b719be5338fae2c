//! Kafka client constants
//!
//! This module centralizes the magic numbers used by the producer and consumer:
//! configuration defaults and their accepted ranges, special offsets, and the
//! subset of Kafka protocol error codes the client understands.
//!
//! # Naming
//! - `DEFAULT_*` is the value used when a property is not set
//! - `MIN_*` / `MAX_*` bound what `config` accepts for that property

// ===== Producer Queue Configuration =====

/// Default maximum number of messages held by a producer
/// (queued, in flight, or awaiting their delivery report)
pub const DEFAULT_QUEUE_MAX_MESSAGES: usize = 100_000;

/// Minimum value for queue.buffering.max.messages
pub const MIN_QUEUE_MAX_MESSAGES: usize = 1;

/// Maximum value for queue.buffering.max.messages
pub const MAX_QUEUE_MAX_MESSAGES: usize = 10_000_000;

/// Default maximum total message size held by a producer, in kilobytes
pub const DEFAULT_QUEUE_MAX_KBYTES: usize = 1_048_576;

/// Minimum value for queue.buffering.max.kbytes
pub const MIN_QUEUE_MAX_KBYTES: usize = 1;

/// Maximum value for queue.buffering.max.kbytes
pub const MAX_QUEUE_MAX_KBYTES: usize = 2_147_483_647;

/// Default time a message may wait in the queue for more messages to batch with
pub const DEFAULT_LINGER_MS: u64 = 5;

/// Maximum value for linger.ms
pub const MAX_LINGER_MS: u64 = 900_000;

/// Default number of messages sent to one partition in a single produce call
pub const DEFAULT_BATCH_NUM_MESSAGES: usize = 10_000;

/// Minimum value for batch.num.messages
pub const MIN_BATCH_NUM_MESSAGES: usize = 1;

/// Maximum value for batch.num.messages
pub const MAX_BATCH_NUM_MESSAGES: usize = 1_000_000;

/// Default maximum size of a single message value (1 MB, matching Kafka)
pub const DEFAULT_MESSAGE_MAX_BYTES: usize = 1_000_000;

/// Minimum value for message.max.bytes
pub const MIN_MESSAGE_MAX_BYTES: usize = 1;

/// Maximum value for message.max.bytes
pub const MAX_MESSAGE_MAX_BYTES: usize = 1_000_000_000;

/// Default delivery deadline for a message, measured from enqueue
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 300_000;

/// Minimum value for message.timeout.ms
pub const MIN_MESSAGE_TIMEOUT_MS: u64 = 1;

/// Maximum value for message.timeout.ms
pub const MAX_MESSAGE_TIMEOUT_MS: u64 = 2_147_483_647;

/// Upper bound on one poll() slice inside the blocking enqueue retry loop
pub const ENQUEUE_RETRY_POLL_MS: u64 = 100;

// ===== Consumer Configuration =====

/// Default session timeout for group membership
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 45_000;

/// Minimum value for session.timeout.ms
pub const MIN_SESSION_TIMEOUT_MS: u64 = 1;

/// Maximum value for session.timeout.ms
pub const MAX_SESSION_TIMEOUT_MS: u64 = 3_600_000;

/// Default interval between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;

/// Minimum value for heartbeat.interval.ms
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1;

/// Maximum value for heartbeat.interval.ms
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 3_600_000;

/// Default interval between automatic offset commits
pub const DEFAULT_AUTO_COMMIT_INTERVAL_MS: u64 = 5_000;

/// Maximum value for auto.commit.interval.ms
pub const MAX_AUTO_COMMIT_INTERVAL_MS: u64 = 86_400_000;

/// Default maximum time a fetch waits on the broker for new data
pub const DEFAULT_FETCH_WAIT_MAX_MS: u64 = 500;

/// Maximum value for fetch.wait.max.ms
pub const MAX_FETCH_WAIT_MAX_MS: u64 = 300_000;

/// Default maximum bytes returned by one fetch (50 MB, matching Kafka)
pub const DEFAULT_FETCH_MAX_BYTES: usize = 52_428_800;

/// Minimum value for fetch.max.bytes
pub const MIN_FETCH_MAX_BYTES: usize = 1;

/// Maximum value for fetch.max.bytes
pub const MAX_FETCH_MAX_BYTES: usize = 2_147_483_647;

/// Default backoff after a failed request before retrying
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Maximum value for retry.backoff.ms
pub const MAX_RETRY_BACKOFF_MS: u64 = 300_000;

/// Default interval at which the group leader re-checks partition counts
pub const DEFAULT_METADATA_REFRESH_INTERVAL_MS: u64 = 300_000;

/// Maximum value for topic.metadata.refresh.interval.ms
pub const MAX_METADATA_REFRESH_INTERVAL_MS: u64 = 3_600_000;

/// Delay between join/sync attempts while other members finish rejoining
pub const GROUP_PENDING_RETRY_MS: u64 = 5;

/// Default client id reported to the coordinator
pub const DEFAULT_CLIENT_ID: &str = "kafka_core";

/// Protocol type advertised by consumers in JoinGroup
pub const CONSUMER_PROTOCOL_TYPE: &str = "consumer";

// ===== Assignment Strategy Names =====

/// Range assignment strategy
pub const STRATEGY_RANGE: &str = "range";

/// Round-robin assignment strategy
pub const STRATEGY_ROUNDROBIN: &str = "roundrobin";

/// Strategies advertised when partition.assignment.strategy is not set
pub const DEFAULT_ASSIGNMENT_STRATEGIES: &str = "range,roundrobin";

// ===== Special Offsets =====
// ListOffsets timestamps, as sent on the wire

/// Query the latest offset (the high watermark)
pub const OFFSET_LATEST: i64 = -1;

/// Query the earliest retained offset (the log start offset)
pub const OFFSET_EARLIEST: i64 = -2;

/// Generation id used for commits made outside of an active group generation
pub const NO_GENERATION: i32 = -1;

// ===== In-Process Cluster =====

/// Partition count used when a topic is auto-created
pub const DEFAULT_TOPIC_PARTITIONS: i32 = 1;

// ===== Kafka Error Codes =====
// See: https://kafka.apache.org/protocol.html#protocol_error_codes

/// No error
pub const ERROR_NONE: i16 = 0;

/// Unknown server error
pub const ERROR_UNKNOWN_SERVER_ERROR: i16 = -1;

/// Requested offset is outside the range of offsets held by the broker
pub const ERROR_OFFSET_OUT_OF_RANGE: i16 = 1;

/// Corrupt message
pub const ERROR_CORRUPT_MESSAGE: i16 = 2;

/// Unknown topic or partition
pub const ERROR_UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;

/// Leader not available (transient during leader election)
pub const ERROR_LEADER_NOT_AVAILABLE: i16 = 5;

/// Request timed out on the broker
pub const ERROR_REQUEST_TIMED_OUT: i16 = 7;

/// Broker not available
pub const ERROR_BROKER_NOT_AVAILABLE: i16 = 8;

/// Message is larger than the broker accepts
pub const ERROR_MESSAGE_TOO_LARGE: i16 = 10;

/// Coordinator not available
pub const ERROR_COORDINATOR_NOT_AVAILABLE: i16 = 15;

/// Not coordinator for group
pub const ERROR_NOT_COORDINATOR: i16 = 16;

/// Invalid topic name
pub const ERROR_INVALID_TOPIC_EXCEPTION: i16 = 17;

/// Generation id does not match the group's current generation
pub const ERROR_ILLEGAL_GENERATION: i16 = 22;

/// Members do not share a common assignment strategy
pub const ERROR_INCONSISTENT_GROUP_PROTOCOL: i16 = 23;

/// Member id is not known to the coordinator
pub const ERROR_UNKNOWN_MEMBER_ID: i16 = 25;

/// Group is rebalancing; members must rejoin
pub const ERROR_REBALANCE_IN_PROGRESS: i16 = 27;

/// Not authorized to access the topic
pub const ERROR_TOPIC_AUTHORIZATION_FAILED: i16 = 29;

/// Not authorized to access the group
pub const ERROR_GROUP_AUTHORIZATION_FAILED: i16 = 30;

/// Topic already exists
pub const ERROR_TOPIC_ALREADY_EXISTS: i16 = 36;

/// Invalid number of partitions
pub const ERROR_INVALID_PARTITIONS: i16 = 37;

/// Human-readable name for a Kafka error code
pub fn error_name(code: i16) -> &'static str {
    match code {
        ERROR_NONE => "NONE",
        ERROR_UNKNOWN_SERVER_ERROR => "UNKNOWN_SERVER_ERROR",
        ERROR_OFFSET_OUT_OF_RANGE => "OFFSET_OUT_OF_RANGE",
        ERROR_CORRUPT_MESSAGE => "CORRUPT_MESSAGE",
        ERROR_UNKNOWN_TOPIC_OR_PARTITION => "UNKNOWN_TOPIC_OR_PARTITION",
        ERROR_LEADER_NOT_AVAILABLE => "LEADER_NOT_AVAILABLE",
        ERROR_REQUEST_TIMED_OUT => "REQUEST_TIMED_OUT",
        ERROR_BROKER_NOT_AVAILABLE => "BROKER_NOT_AVAILABLE",
        ERROR_MESSAGE_TOO_LARGE => "MESSAGE_TOO_LARGE",
        ERROR_COORDINATOR_NOT_AVAILABLE => "COORDINATOR_NOT_AVAILABLE",
        ERROR_NOT_COORDINATOR => "NOT_COORDINATOR",
        ERROR_INVALID_TOPIC_EXCEPTION => "INVALID_TOPIC_EXCEPTION",
        ERROR_ILLEGAL_GENERATION => "ILLEGAL_GENERATION",
        ERROR_INCONSISTENT_GROUP_PROTOCOL => "INCONSISTENT_GROUP_PROTOCOL",
        ERROR_UNKNOWN_MEMBER_ID => "UNKNOWN_MEMBER_ID",
        ERROR_REBALANCE_IN_PROGRESS => "REBALANCE_IN_PROGRESS",
        ERROR_TOPIC_AUTHORIZATION_FAILED => "TOPIC_AUTHORIZATION_FAILED",
        ERROR_GROUP_AUTHORIZATION_FAILED => "GROUP_AUTHORIZATION_FAILED",
        ERROR_TOPIC_ALREADY_EXISTS => "TOPIC_ALREADY_EXISTS",
        ERROR_INVALID_PARTITIONS => "INVALID_PARTITIONS",
        _ => "UNKNOWN",
    }
}

/// Whether a request failing with this code may succeed if retried unchanged
pub fn is_retriable_code(code: i16) -> bool {
    matches!(
        code,
        ERROR_UNKNOWN_TOPIC_OR_PARTITION
            | ERROR_LEADER_NOT_AVAILABLE
            | ERROR_REQUEST_TIMED_OUT
            | ERROR_BROKER_NOT_AVAILABLE
            | ERROR_COORDINATOR_NOT_AVAILABLE
            | ERROR_NOT_COORDINATOR
            | ERROR_REBALANCE_IN_PROGRESS
    )
}

/// Whether this code means the client lacks permission, which no retry fixes
pub fn is_authorization_code(code: i16) -> bool {
    matches!(
        code,
        ERROR_TOPIC_AUTHORIZATION_FAILED | ERROR_GROUP_AUTHORIZATION_FAILED
    )
}
