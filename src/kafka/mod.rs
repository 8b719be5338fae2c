// Kafka client module
//
// This module contains all Kafka-specific code:
// - Message, error and constant definitions shared by both clients
// - The Transport trait and MemoryCluster, an in-process cluster implementing it
// - Client-side partition assignment (consumer protocol wire format + strategies)
// - The producer (bounded queue + delivery worker) and the group consumer
//
// Architecture Overview:
// =====================
//
// Both clients are driven by the application's own polling loop:
//
// 1. PRODUCER:
//    - enqueue() never blocks; a bounded queue applies backpressure
//    - One delivery worker thread produces batches through the Transport
//    - Delivery reports travel back over a channel and are dispatched inside
//      poll()/flush() on the caller's thread
//
// 2. CONSUMER:
//    - No background threads; group membership, heartbeats, offset resets,
//      auto-commit and fetches all run inside poll()
//    - The rebalance callback runs synchronously from poll()
//
// The TRANSPORT is the seam:
//   Producer / Consumer → [Transport trait] → MemoryCluster (or a network client)

pub mod assignment;
pub mod cluster;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod messages;
pub mod partitioner;
pub mod producer;
pub mod transport;

// Re-export commonly used types for convenience
pub use cluster::{GroupState, MemoryCluster};
pub use consumer::{CommitMode, Consumer, ConsumerState, PollResult, RebalanceCallback};
pub use error::{
    CommitError, ConsumerPollError, DeliveryError, EnqueueError, EnqueueFailure, KafkaError,
    Result, TransportError,
};
pub use messages::{
    ConsumedMessage, DeliveryOutcome, DeliveryReport, MessageId, OutboundMessage, RecordHeader,
    TopicPartition,
};
pub use producer::{DeliveryHandler, Producer};
pub use transport::{OffsetSpec, Transport, TransportResult};
