//! Kafka client error types
//!
//! One enum per concern, so callers can match on exactly the failures an
//! operation can produce:
//!
//! - `KafkaError`: configuration, argument, and codec failures
//! - `TransportError`: a request to the cluster failed (carries the Kafka error code)
//! - `EnqueueError` / `EnqueueFailure`: the producer refused a message
//! - `DeliveryError`: an accepted message permanently failed
//! - `ConsumerPollError`: informational error surfaced by `Consumer::poll`
//! - `CommitError`: an offset commit failed

use thiserror::Error;

use super::constants::{
    error_name, is_authorization_code, is_retriable_code, ERROR_BROKER_NOT_AVAILABLE,
    ERROR_REQUEST_TIMED_OUT,
};
use super::messages::{OutboundMessage, TopicPartition};

/// Errors from configuration, arguments, and metadata encoding
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid argument passed to a client operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Group metadata could not be decoded
    #[error("Corrupt message: {message}")]
    CorruptMessage { message: String },

    /// Request to the cluster failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation on a closed client
    #[error("Client is closed")]
    Closed,

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Kafka operations
pub type Result<T> = std::result::Result<T, KafkaError>;

/// A request to the cluster failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No broker could be reached
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The request did not complete in time
    #[error("Request timed out")]
    Timeout,

    /// The broker answered with a Kafka error code
    #[error("Kafka error code {code}: {message}")]
    Broker { code: i16, message: String },
}

impl TransportError {
    /// Broker error from a code, using the code's name as the message
    pub fn broker(code: i16) -> Self {
        TransportError::Broker {
            code,
            message: error_name(code).to_string(),
        }
    }

    /// Broker error from a code with a custom message
    pub fn broker_with(code: i16, message: impl Into<String>) -> Self {
        TransportError::Broker {
            code,
            message: message.into(),
        }
    }

    /// The Kafka error code this failure maps to
    pub fn code(&self) -> i16 {
        match self {
            TransportError::Unavailable(_) => ERROR_BROKER_NOT_AVAILABLE,
            TransportError::Timeout => ERROR_REQUEST_TIMED_OUT,
            TransportError::Broker { code, .. } => *code,
        }
    }

    /// Whether the same request may succeed later
    pub fn is_retriable(&self) -> bool {
        match self {
            TransportError::Unavailable(_) | TransportError::Timeout => true,
            TransportError::Broker { code, .. } => is_retriable_code(*code),
        }
    }

    /// Whether the client lacks permission (requires an application decision)
    pub fn is_authorization_failure(&self) -> bool {
        is_authorization_code(self.code())
    }
}

/// Why the producer refused to accept a message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue bound reached; call `poll` to make room, then retry
    #[error("Producer queue is full")]
    QueueFull,

    /// The message can never be accepted as-is
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The producer has been closed
    #[error("Producer is closed")]
    Closed,
}

impl EnqueueError {
    /// Whether retrying the same message later can succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, EnqueueError::QueueFull)
    }
}

/// A refused enqueue: the error plus the message, returned to the caller
#[derive(Error, Debug)]
#[error("{error}")]
pub struct EnqueueFailure {
    pub error: EnqueueError,
    pub message: OutboundMessage,
}

/// Terminal delivery failure for an accepted message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The broker rejected the produce request
    #[error("Broker rejected message: {0}")]
    BrokerRejected(TransportError),

    /// The request never reached the broker, or its outcome is unknown
    #[error("Transport failure: {0}")]
    Transport(TransportError),

    /// The message was not delivered within message.timeout.ms
    #[error("Message timed out")]
    MessageTimedOut,

    /// The destination topic does not exist
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The explicit partition does not exist in the topic
    #[error("Unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: i32 },

    /// The producer was closed before the message was sent
    #[error("Message purged from queue")]
    Purged,
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Broker { .. } => DeliveryError::BrokerRejected(err),
            TransportError::Unavailable(_) | TransportError::Timeout => {
                DeliveryError::Transport(err)
            }
        }
    }
}

/// Offset commit failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// Nothing was consumed since the last commit
    #[error("No offsets to commit")]
    NoOffset,

    /// The coordinator refused or never received the commit
    #[error("Commit rejected: {0}")]
    Rejected(TransportError),

    /// The consumer has been closed
    #[error("Consumer is closed")]
    Closed,
}

/// Error surfaced by `Consumer::poll`
///
/// These are informational: the consumer keeps recovering on its own and the
/// caller only needs to keep polling. `is_fatal` flags the few that need an
/// application decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerPollError {
    /// A fetch for one partition failed
    #[error("Fetch failed for {partition}: {source}")]
    Fetch {
        partition: TopicPartition,
        source: TransportError,
    },

    /// Group coordination (join, sync, heartbeat) failed
    #[error("Group coordination failed: {0}")]
    Group(TransportError),

    /// The starting offset for a partition could not be determined
    #[error("Offset reset failed for {partition}: {source}")]
    OffsetReset {
        partition: TopicPartition,
        source: TransportError,
    },

    /// A background (async) commit failed
    #[error("Offset commit failed: {0}")]
    Commit(CommitError),

    /// A subscribed topic does not exist
    #[error("Subscribed topic {0} does not exist")]
    UnknownTopic(String),

    /// The consumer has been closed; polling again will not help
    #[error("Consumer is closed")]
    Closed,
}

impl ConsumerPollError {
    /// Whether this error needs an application decision rather than more polling
    pub fn is_fatal(&self) -> bool {
        match self {
            ConsumerPollError::Closed => true,
            ConsumerPollError::Group(err) => err.is_authorization_failure(),
            ConsumerPollError::Fetch { source, .. } => source.is_authorization_failure(),
            _ => false,
        }
    }
}
