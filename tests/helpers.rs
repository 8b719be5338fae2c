// Shared fixtures for the integration test suites
//
// Each suite pulls this in with `mod helpers;`, so not every helper is used
// by every suite.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use kafka_core::kafka::messages::Record;
use kafka_core::{
    ConsumedMessage, Consumer, ConsumerConfig, DeliveryReport, MemoryCluster, OffsetReset,
    PollResult, ProducerConfig, TopicPartition, Transport,
};

/// A cluster holding one topic
pub fn cluster_with_topic(topic: &str, partitions: i32) -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.create_topic(topic, partitions).unwrap();
    cluster
}

/// Append one unkeyed record per value directly to the cluster
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
    cluster.produce(tp, &records).unwrap()
}

pub fn producer_config(max_messages: usize) -> ProducerConfig {
    ProducerConfig {
        queue_max_messages: max_messages,
        linger: Duration::ZERO,
        ..ProducerConfig::default()
    }
}

/// Manual commits and short heartbeat/fetch waits
pub fn consumer_config(group_id: &str, reset: OffsetReset) -> ConsumerConfig {
    let mut config = ConsumerConfig::new(group_id);
    config.auto_offset_reset = reset;
    config.enable_auto_commit = false;
    config.heartbeat_interval = Duration::from_millis(10);
    config.fetch_wait_max = Duration::from_millis(20);
    config.retry_backoff = Duration::from_millis(10);
    config
}

/// Delivery handler recording every report
pub fn collecting_handler() -> (Arc<Mutex<Vec<DeliveryReport>>>, impl FnMut(DeliveryReport)) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    (reports, move |report| sink.lock().push(report))
}

/// Poll until `count` messages arrive or `within` elapses, skipping errors
pub fn poll_messages(
    consumer: &mut Consumer,
    count: usize,
    within: Duration,
) -> Vec<ConsumedMessage> {
    let deadline = Instant::now() + within;
    let mut messages = Vec::new();
    while messages.len() < count && Instant::now() < deadline {
        if let PollResult::Message(message) = consumer.poll(Duration::from_millis(50)) {
            messages.push(message);
        }
    }
    messages
}

pub fn value_str(message: &ConsumedMessage) -> String {
    String::from_utf8_lossy(message.value.as_deref().unwrap_or_default()).into_owned()
}
