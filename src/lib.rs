//! kafka_core: the client-side core of a Kafka producer and consumer
//!
//! - [`kafka::Producer`] accepts messages into a bounded queue without
//!   blocking, delivers them from a background worker, and reports every
//!   accepted message exactly once through `poll`/`flush`.
//! - [`kafka::Consumer`] joins a consumer group, tracks per-partition fetch
//!   positions, and yields messages from a single bounded `poll`.
//!
//! Both talk to the cluster through the [`kafka::Transport`] trait.
//! [`kafka::MemoryCluster`] implements it in-process, with a group
//! coordinator, long-polling fetches, and fault injection.

// Module declarations
pub mod config; // Client configuration (property map + typed configs)
pub mod kafka; // Producer, consumer, transport, and in-process cluster

// Test utilities (only compiled in test builds)
#[cfg(test)]
pub mod testing;

pub use config::{ClientConfig, ConsumerConfig, OffsetReset, ProducerConfig};
pub use kafka::{
    CommitError, CommitMode, ConsumedMessage, Consumer, ConsumerPollError, ConsumerState,
    DeliveryError, DeliveryHandler, DeliveryOutcome, DeliveryReport, EnqueueError,
    EnqueueFailure, KafkaError, MemoryCluster, MessageId, OutboundMessage, PollResult, Producer,
    Result, TopicPartition, Transport, TransportError,
};
