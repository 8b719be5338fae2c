//! Testing utilities for kafka_core
//!
//! Fixtures shared by the unit tests. Only compiled when running tests.
//!
//! # Organization
//! - `mocks.rs` - `MockTransport` setups for failure-path tests
//! - `helpers.rs` - Clusters, configs, and handlers tuned for fast tests

#![cfg(test)]

pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use helpers::{
    cluster_with_topic, collecting_handler, produce_values, test_consumer_config,
    test_producer_config,
};
pub use mocks::{mock_topic_metadata, mock_transport_with_topic};
