//! kafka_fuzz_client - drive the producer and consumer from a byte file
//!
//! The input file is read as a byte stream (reads past the end yield 0):
//!
//! ```text
//! value_len: u8        0 = produce nothing, only serve delivery reports
//! value: [u8; value_len]
//! group_len: u8
//! group_id: [u8; group_len]
//! ```
//!
//! Both clients run against an in-process `MemoryCluster`.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=kafka_core=debug kafka_fuzz_client --input fuzz_test_input --topic t
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kafka_core::{
    ConsumerConfig, ConsumedMessage, Consumer, DeliveryReport, EnqueueError, MemoryCluster,
    OffsetReset, OutboundMessage, PollResult, Producer, ProducerConfig,
};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
const QUEUE_FULL_POLL: Duration = Duration::from_secs(1);
const CONSUMER_POLL: Duration = Duration::from_millis(100);
const DEFAULT_GROUP_ID: &str = "kafka_fuzz_group";

/// kafka_fuzz_client - exercise the producer queue and consumer group poller
#[derive(Parser, Debug)]
#[command(name = "kafka_fuzz_client")]
#[command(version, about = "Drive the Kafka producer and consumer from fuzz input")]
struct Args {
    /// File to read fuzz bytes from
    #[arg(long, default_value = "fuzz_test_input")]
    input: PathBuf,

    /// Topic to produce to and consume from
    #[arg(long, default_value = "fuzz")]
    topic: String,

    /// Partitions of the topic
    #[arg(long, default_value = "1")]
    partitions: i32,
}

/// Byte cursor over the fuzz input
struct FuzzInput {
    bytes: Vec<u8>,
    index: usize,
}

impl FuzzInput {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, index: 0 }
    }

    fn read_byte(&mut self) -> u8 {
        match self.bytes.get(self.index) {
            Some(&b) => {
                self.index += 1;
                b
            }
            None => 0,
        }
    }

    fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.read_byte()).collect()
    }
}

fn is_printable(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
}

fn describe(label: &str, bytes: Option<&[u8]>) -> String {
    match bytes {
        Some(b) if is_printable(b) => format!(" {}: {}", label, String::from_utf8_lossy(b)),
        Some(b) => format!(" {}: ({} bytes)", label, b.len()),
        None => format!(" {}: (null)", label),
    }
}

fn on_delivery(report: DeliveryReport) {
    match report.error() {
        Some(err) => println!("% Message delivery failed: {}", err),
        None => println!(
            "% Message delivered ({} bytes, partition {})",
            report.message.value_len(),
            report.partition().unwrap_or(-1)
        ),
    }
}

fn run_producer(cluster: Arc<MemoryCluster>, topic: &str, input: &mut FuzzInput) -> Result<()> {
    let mut producer = Producer::new(ProducerConfig::default(), cluster, on_delivery)
        .context("failed to start producer")?;

    let len = input.read_byte() as usize;
    println!("len = {}", len);
    if len == 0 {
        // Nothing to send; still serve delivery reports
        producer.poll(Duration::ZERO);
    } else {
        let mut message = OutboundMessage::to(topic).with_value(input.read_bytes(len));
        loop {
            match producer.enqueue(message) {
                Ok(id) => {
                    println!("% Enqueued message {} ({} bytes) for topic {}", id, len, topic);
                    break;
                }
                Err(failure) if failure.error == EnqueueError::QueueFull => {
                    // Make room by serving delivery reports, then retry
                    producer.poll(QUEUE_FULL_POLL);
                    message = failure.message;
                }
                Err(failure) => {
                    println!("% Failed to produce to topic {}: {}", topic, failure.error);
                    break;
                }
            }
        }
        producer.poll(Duration::ZERO);
    }

    println!("% Flushing final messages..");
    let residual = producer.close(FLUSH_TIMEOUT);
    if residual > 0 {
        println!("% {} message(s) were not delivered", residual);
    }
    Ok(())
}

fn print_message(message: &ConsumedMessage) {
    println!(
        "Message on {} [{}] at offset {}:",
        message.topic, message.partition, message.offset
    );
    println!("{}", describe("Key", message.key.as_deref()));
    println!("{}", describe("Value", message.value.as_deref()));
}

fn run_consumer(cluster: Arc<MemoryCluster>, topic: &str, input: &mut FuzzInput) -> Result<()> {
    let len = input.read_byte() as usize;
    let group_id = String::from_utf8_lossy(&input.read_bytes(len))
        .trim()
        .to_string();
    let group_id = if group_id.is_empty() {
        DEFAULT_GROUP_ID.to_string()
    } else {
        group_id
    };
    println!("groupid={}", group_id);

    let mut config = ConsumerConfig::new(group_id);
    config.auto_offset_reset = OffsetReset::Earliest;
    let mut consumer = Consumer::new(config, cluster);

    consumer
        .subscribe(&[topic])
        .with_context(|| format!("failed to subscribe to {}", topic))?;
    println!("% Subscribed to 1 topic(s), waiting for rebalance and messages...");

    match consumer.poll(CONSUMER_POLL) {
        PollResult::Message(message) => print_message(&message),
        PollResult::Error(err) => println!("% Consumer error: {}", err),
        PollResult::Timeout => println!("% No message within {:?}", CONSUMER_POLL),
    }

    println!("% Closing consumer");
    if let Err(err) = consumer.close() {
        warn!("Final commit failed: {}", err);
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    info!("Read {} fuzz bytes from {}", bytes.len(), args.input.display());
    let mut input = FuzzInput::new(bytes);

    let cluster = Arc::new(MemoryCluster::new());
    cluster
        .create_topic(&args.topic, args.partitions)
        .with_context(|| format!("failed to create topic {}", args.topic))?;
    println!("topic = {}", args.topic);

    run_producer(Arc::clone(&cluster), &args.topic, &mut input)?;
    run_consumer(cluster, &args.topic, &mut input)?;
    Ok(())
}
