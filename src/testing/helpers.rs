//! Test helper functions
//!
//! Utility functions for creating test fixtures

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{ConsumerConfig, OffsetReset, ProducerConfig};
use crate::kafka::cluster::MemoryCluster;
use crate::kafka::messages::{DeliveryReport, Record, TopicPartition};
use crate::kafka::transport::Transport;

/// A cluster holding one topic
pub fn cluster_with_topic(topic: &str, partitions: i32) -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::new());
    cluster
        .create_topic(topic, partitions)
        .expect("fresh cluster accepts the topic");
    cluster
}

/// Append one record per value to `tp`
///
/// # Returns
/// Offset of the first record
pub fn produce_values(cluster: &MemoryCluster, tp: &TopicPartition, values: &[&str]) -> i64 {
    let records: Vec<Record> = values
        .iter()
        .map(|value| Record {
            key: None,
            value: Some(value.as_bytes().to_vec()),
            headers: vec![],
            timestamp: None,
        })
        .collect();
    cluster.produce(tp, &records).expect("produce to test cluster")
}

/// Producer config with no linger, so tests do not wait on batching
pub fn test_producer_config(max_messages: usize) -> ProducerConfig {
    ProducerConfig {
        queue_max_messages: max_messages,
        linger: Duration::ZERO,
        ..ProducerConfig::default()
    }
}

/// Consumer config with manual commits and short heartbeat/fetch waits
pub fn test_consumer_config(group_id: &str, reset: OffsetReset) -> ConsumerConfig {
    let mut config = ConsumerConfig::new(group_id);
    config.auto_offset_reset = reset;
    config.enable_auto_commit = false;
    config.heartbeat_interval = Duration::from_millis(10);
    config.fetch_wait_max = Duration::from_millis(20);
    config.retry_backoff = Duration::from_millis(10);
    config
}

/// A delivery handler that records every report
///
/// # Returns
/// (shared report list, handler)
pub fn collecting_handler() -> (Arc<Mutex<Vec<DeliveryReport>>>, impl FnMut(DeliveryReport)) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    (reports, move |report| sink.lock().push(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_produce_values_appends_in_order() {
        let cluster = cluster_with_topic("t", 2);
        let tp = TopicPartition::new("t", 1);
        assert_eq!(produce_values(&cluster, &tp, &["a", "b"]), 0);
        assert_eq!(produce_values(&cluster, &tp, &["c"]), 2);
        assert_eq!(cluster.high_watermark(&tp), Some(3));
    }

    #[test]
    fn test_consumer_config_heartbeat_below_session() {
        let config = test_consumer_config("g", OffsetReset::Earliest);
        assert!(config.heartbeat_interval < config.session_timeout);
        assert!(!config.enable_auto_commit);
    }
}
