//! Delivery worker
//!
//! One background thread per producer. It takes batches from the shared
//! queue, resolves each message's partition, produces one request per
//! (topic, partition) chunk, and sends one `DeliveryReport` per message over
//! the crossbeam report channel. The worker never invokes application code;
//! reports are dispatched by `Producer::poll` on the caller's thread.
//!
//! Reports for a batch are sent in queue order, so per-partition order is the
//! enqueue order even when some messages of the batch fail early.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, trace, warn};

use super::queue::{ProducerQueue, QueuedMessage};
use crate::kafka::constants::ERROR_UNKNOWN_TOPIC_OR_PARTITION;
use crate::kafka::error::{DeliveryError, TransportError};
use crate::kafka::messages::{DeliveryOutcome, DeliveryReport, OutboundMessage, Record, TopicPartition};
use crate::kafka::partitioner::{choose_partition, PartitionChoice};
use crate::kafka::transport::Transport;

/// Worker tuning taken from `ProducerConfig`
#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub linger: Duration,
    pub batch_num_messages: usize,
    pub message_timeout: Duration,
    pub metadata_max_age: Duration,
}

struct CachedMetadata {
    partition_count: i32,
    fetched_at: Instant,
}

pub(crate) struct DeliveryWorker {
    transport: Arc<dyn Transport>,
    queue: Arc<ProducerQueue>,
    reports: Sender<DeliveryReport>,
    settings: WorkerSettings,
    metadata: HashMap<String, CachedMetadata>,
}

impl DeliveryWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        queue: Arc<ProducerQueue>,
        reports: Sender<DeliveryReport>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            transport,
            queue,
            reports,
            settings,
            metadata: HashMap::new(),
        }
    }

    /// Deliver batches until the queue shuts down
    pub fn run(mut self) {
        debug!("Delivery worker started");
        while let Some(batch) = self
            .queue
            .next_batch(self.settings.linger, self.settings.batch_num_messages)
        {
            self.deliver(batch);
        }
        debug!("Delivery worker stopped");
    }

    fn partition_count(&mut self, topic: &str) -> Result<i32, DeliveryError> {
        if let Some(cached) = self.metadata.get(topic) {
            if cached.fetched_at.elapsed() < self.settings.metadata_max_age {
                return Ok(cached.partition_count);
            }
        }

        match self.transport.metadata(topic) {
            Ok(metadata) if metadata.partition_count > 0 => {
                self.metadata.insert(
                    topic.to_string(),
                    CachedMetadata {
                        partition_count: metadata.partition_count,
                        fetched_at: Instant::now(),
                    },
                );
                Ok(metadata.partition_count)
            }
            Ok(_) => Err(DeliveryError::UnknownTopic(topic.to_string())),
            Err(err) if err.code() == ERROR_UNKNOWN_TOPIC_OR_PARTITION => {
                Err(DeliveryError::UnknownTopic(topic.to_string()))
            }
            Err(err) => Err(DeliveryError::from(err)),
        }
    }

    fn resolve(&mut self, message: &OutboundMessage) -> Result<TopicPartition, DeliveryError> {
        let count = self.partition_count(&message.topic)?;
        match choose_partition(message.key.as_deref(), count, message.partition) {
            PartitionChoice::Partition(p) => Ok(TopicPartition::new(message.topic.clone(), p)),
            PartitionChoice::OutOfRange(partition) => Err(DeliveryError::UnknownPartition {
                topic: message.topic.clone(),
                partition,
            }),
        }
    }

    fn deliver(&mut self, batch: Vec<QueuedMessage>) {
        let now = Instant::now();
        let mut outcomes: Vec<Option<DeliveryOutcome>> = Vec::with_capacity(batch.len());
        let mut by_partition: BTreeMap<TopicPartition, Vec<usize>> = BTreeMap::new();

        for (idx, queued) in batch.iter().enumerate() {
            if now.saturating_duration_since(queued.enqueued_at) >= self.settings.message_timeout {
                outcomes.push(Some(DeliveryOutcome::Failed(DeliveryError::MessageTimedOut)));
                continue;
            }
            match self.resolve(&queued.message) {
                Ok(tp) => {
                    by_partition.entry(tp).or_default().push(idx);
                    outcomes.push(None);
                }
                Err(err) => outcomes.push(Some(DeliveryOutcome::Failed(err))),
            }
        }

        for (tp, indices) in &by_partition {
            for chunk in indices.chunks(self.settings.batch_num_messages.max(1)) {
                let records: Vec<Record> =
                    chunk.iter().map(|&i| batch[i].message.to_record()).collect();

                match self.transport.produce(tp, &records) {
                    Ok(base) => {
                        trace!("Produced {} messages to {} at offset {}", chunk.len(), tp, base);
                        for (n, &i) in chunk.iter().enumerate() {
                            outcomes[i] = Some(DeliveryOutcome::Delivered {
                                partition: tp.partition,
                                offset: base + n as i64,
                            });
                        }
                    }
                    Err(err) => {
                        warn!("Produce of {} messages to {} failed: {}", chunk.len(), tp, err);
                        if err.code() == ERROR_UNKNOWN_TOPIC_OR_PARTITION {
                            self.metadata.remove(&tp.topic);
                        }
                        let failure = DeliveryError::from(err);
                        for &i in chunk {
                            outcomes[i] = Some(DeliveryOutcome::Failed(failure.clone()));
                        }
                    }
                }
            }
        }

        for (queued, outcome) in batch.into_iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| {
                DeliveryOutcome::Failed(DeliveryError::Transport(TransportError::Unavailable(
                    "no produce response".to_string(),
                )))
            });
            if let DeliveryOutcome::Failed(err) = &outcome {
                debug!("Message {} to {} failed: {}", queued.id, queued.message.topic, err);
            }

            let report = DeliveryReport {
                id: queued.id,
                message: queued.message,
                outcome,
                enqueued_at: queued.enqueued_at,
            };
            if self.reports.send(report).is_err() {
                trace!("Report receiver dropped; discarding report");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;
    use mockall::predicate::always;

    use super::*;
    use crate::kafka::constants::ERROR_MESSAGE_TOO_LARGE;
    use crate::kafka::transport::{MockTransport, TopicMetadata};
    use crate::testing::mock_transport_with_topic;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            linger: Duration::ZERO,
            batch_num_messages: 100,
            message_timeout: Duration::from_secs(60),
            metadata_max_age: Duration::from_secs(60),
        }
    }

    fn queued(queue: &ProducerQueue, message: OutboundMessage) -> QueuedMessage {
        queue.try_push(message).unwrap();
        queue.drain_pending().remove(0)
    }

    #[test]
    fn test_batch_failure_fails_every_message() {
        let mut mock = mock_transport_with_topic(1);
        mock.expect_produce()
            .with(always(), always())
            .times(1)
            .returning(|_, _| Err(TransportError::broker(ERROR_MESSAGE_TOO_LARGE)));

        let queue = Arc::new(ProducerQueue::new(10, 1 << 20));
        let (tx, rx) = unbounded();
        let mut worker = DeliveryWorker::new(Arc::new(mock), Arc::clone(&queue), tx, settings());

        let batch = vec![
            queued(&queue, OutboundMessage::to("t").with_value("a")),
            queued(&queue, OutboundMessage::to("t").with_value("b")),
        ];
        worker.deliver(batch);

        let reports: Vec<DeliveryReport> = rx.try_iter().collect();
        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert!(matches!(
                report.error(),
                Some(DeliveryError::BrokerRejected(err)) if err.code() == ERROR_MESSAGE_TOO_LARGE
            ));
        }
    }

    #[test]
    fn test_early_failures_keep_queue_order() {
        let mut mock = mock_transport_with_topic(2);
        mock.expect_produce().returning(|_, records| Ok(10 - records.len() as i64));

        let queue = Arc::new(ProducerQueue::new(10, 1 << 20));
        let (tx, rx) = unbounded();
        let mut worker = DeliveryWorker::new(Arc::new(mock), Arc::clone(&queue), tx, settings());

        let batch = vec![
            queued(&queue, OutboundMessage::to("t").with_partition(0).with_value("a")),
            queued(&queue, OutboundMessage::to("t").with_partition(7).with_value("bad")),
            queued(&queue, OutboundMessage::to("t").with_partition(0).with_value("b")),
        ];
        worker.deliver(batch);

        let reports: Vec<DeliveryReport> = rx.try_iter().collect();
        let ids: Vec<u64> = reports.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(reports[0].offset(), Some(8));
        assert_eq!(
            reports[1].error(),
            Some(&DeliveryError::UnknownPartition {
                topic: "t".to_string(),
                partition: 7
            })
        );
        assert_eq!(reports[2].offset(), Some(9));
    }

    #[test]
    fn test_unknown_topic_reported() {
        let mut mock = MockTransport::new();
        mock.expect_metadata()
            .returning(|_| Err(TransportError::broker(ERROR_UNKNOWN_TOPIC_OR_PARTITION)));
        mock.expect_produce().never();

        let queue = Arc::new(ProducerQueue::new(10, 1 << 20));
        let (tx, rx) = unbounded();
        let mut worker = DeliveryWorker::new(Arc::new(mock), Arc::clone(&queue), tx, settings());
        worker.deliver(vec![queued(&queue, OutboundMessage::to("nope"))]);

        let report = rx.try_recv().unwrap();
        assert_eq!(report.error(), Some(&DeliveryError::UnknownTopic("nope".to_string())));
    }

    #[test]
    fn test_expired_message_not_sent() {
        let mut mock = MockTransport::new();
        mock.expect_metadata().never();
        mock.expect_produce().never();

        let queue = Arc::new(ProducerQueue::new(10, 1 << 20));
        let (tx, rx) = unbounded();
        let mut settings = settings();
        settings.message_timeout = Duration::from_millis(1);
        let mut worker = DeliveryWorker::new(Arc::new(mock), Arc::clone(&queue), tx, settings);

        let message = queued(&queue, OutboundMessage::to("t"));
        std::thread::sleep(Duration::from_millis(10));
        worker.deliver(vec![message]);

        assert_eq!(
            rx.try_recv().unwrap().error(),
            Some(&DeliveryError::MessageTimedOut)
        );
    }

    #[test]
    fn test_metadata_is_cached() {
        let mut mock = MockTransport::new();
        mock.expect_metadata().times(1).returning(|name| {
            Ok(TopicMetadata {
                name: name.to_string(),
                partition_count: 3,
            })
        });
        mock.expect_produce().returning(|_, _| Ok(0));

        let queue = Arc::new(ProducerQueue::new(10, 1 << 20));
        let (tx, rx) = unbounded();
        let mut worker = DeliveryWorker::new(Arc::new(mock), Arc::clone(&queue), tx, settings());
        worker.deliver(vec![queued(&queue, OutboundMessage::to("t").with_key("k"))]);
        worker.deliver(vec![queued(&queue, OutboundMessage::to("t").with_key("k"))]);

        let reports: Vec<DeliveryReport> = rx.try_iter().collect();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].partition(), reports[1].partition());
    }
}
