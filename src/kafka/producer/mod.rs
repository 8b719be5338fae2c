//! Producer Queue Manager
//!
//! `Producer` accepts messages into a bounded queue without blocking, delivers
//! them from a background worker thread, and hands every accepted message back
//! exactly once in a `DeliveryReport`, dispatched to the `DeliveryHandler` from
//! inside `poll`/`flush` on the caller's thread.
//!
//! # Architecture
//!
//! ```text
//! enqueue() ──► ProducerQueue ──► DeliveryWorker ──► Transport::produce
//!                (mutex+condvar)     (thread)              │
//!                                                          ▼
//! poll() ◄── crossbeam report channel ◄── DeliveryReport per message
//!   │
//!   └─► DeliveryHandler::on_delivery
//! ```
//!
//! # Backpressure
//!
//! A message counts against `queue.buffering.max.messages` / `.kbytes` until
//! its report has been dispatched. `enqueue` returns the message inside an
//! `EnqueueFailure` when the queue is full; the caller polls to dispatch
//! reports and retries with the same message (`enqueue_timeout` packages that
//! loop).
//!
//! # Shutdown
//!
//! `close(timeout)` flushes, stops the worker, and reports anything still
//! queued as `DeliveryError::Purged`. Dropping a producer without `close`
//! stops the worker and discards pending messages without invoking the
//! handler.

mod queue;
mod worker;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ProducerConfig};
use crate::kafka::constants::ENQUEUE_RETRY_POLL_MS;
use crate::kafka::error::{DeliveryError, EnqueueError, EnqueueFailure, KafkaError, Result};
use crate::kafka::messages::{
    now_millis, DeliveryOutcome, DeliveryReport, MessageId, OutboundMessage,
};
use crate::kafka::transport::Transport;

use queue::ProducerQueue;
use worker::{DeliveryWorker, WorkerSettings};

/// Receives delivery reports from `Producer::poll`
///
/// Implemented for every `FnMut(DeliveryReport)`, so a closure is usually
/// enough.
pub trait DeliveryHandler {
    fn on_delivery(&mut self, report: DeliveryReport);
}

impl<F> DeliveryHandler for F
where
    F: FnMut(DeliveryReport),
{
    fn on_delivery(&mut self, report: DeliveryReport) {
        self(report)
    }
}

/// Asynchronous producer with a bounded queue
pub struct Producer<H: DeliveryHandler> {
    config: ProducerConfig,
    queue: Arc<ProducerQueue>,
    reports: Receiver<DeliveryReport>,
    handler: H,
    worker: Option<JoinHandle<()>>,
}

impl<H: DeliveryHandler> Producer<H> {
    /// Start a producer and its delivery worker
    pub fn new(config: ProducerConfig, transport: Arc<dyn Transport>, handler: H) -> Result<Self> {
        let queue = Arc::new(ProducerQueue::new(
            config.queue_max_messages,
            config.queue_max_bytes,
        ));
        let (report_tx, report_rx) = unbounded();

        let worker = DeliveryWorker::new(
            transport,
            Arc::clone(&queue),
            report_tx,
            WorkerSettings {
                linger: config.linger,
                batch_num_messages: config.batch_num_messages,
                message_timeout: config.message_timeout,
                metadata_max_age: config.metadata_max_age,
            },
        );
        let handle = std::thread::Builder::new()
            .name(format!("{}-delivery", config.client_id))
            .spawn(move || worker.run())
            .map_err(|e| KafkaError::Internal(format!("failed to spawn delivery worker: {}", e)))?;

        info!(
            "Producer {} started (queue bound {} messages / {} bytes)",
            config.client_id, config.queue_max_messages, config.queue_max_bytes
        );

        Ok(Self {
            config,
            queue,
            reports: report_rx,
            handler,
            worker: Some(handle),
        })
    }

    /// Parse `config` and start a producer
    pub fn from_client_config(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        handler: H,
    ) -> Result<Self> {
        Self::new(ProducerConfig::from_client_config(config)?, transport, handler)
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Accept a message for asynchronous delivery without blocking
    ///
    /// # Errors
    /// The message is handed back inside `EnqueueFailure`:
    /// - `QueueFull`: the bound is reached; `poll` and retry
    /// - `InvalidMessage`: empty topic, negative partition, or value over `message.max.bytes`
    /// - `Closed`: the producer has been closed
    pub fn enqueue(&self, mut message: OutboundMessage) -> std::result::Result<MessageId, EnqueueFailure> {
        if let Err(error) = self.validate(&message) {
            return Err(EnqueueFailure { error, message });
        }
        if message.timestamp.is_none() {
            message.timestamp = Some(now_millis());
        }
        self.queue.try_push(message)
    }

    /// Enqueue, polling for up to `timeout` while the queue is full
    ///
    /// Only `QueueFull` is retried; every other refusal returns at once.
    pub fn enqueue_timeout(
        &mut self,
        message: OutboundMessage,
        timeout: Duration,
    ) -> std::result::Result<MessageId, EnqueueFailure> {
        let deadline = Instant::now() + timeout;
        let mut message = message;
        loop {
            match self.enqueue(message) {
                Err(failure) if failure.error == EnqueueError::QueueFull => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(failure);
                    }
                    self.poll(remaining.min(Duration::from_millis(ENQUEUE_RETRY_POLL_MS)));
                    message = failure.message;
                }
                other => return other,
            }
        }
    }

    fn validate(&self, message: &OutboundMessage) -> std::result::Result<(), EnqueueError> {
        if self.queue.is_shut_down() {
            return Err(EnqueueError::Closed);
        }
        if message.topic.is_empty() {
            return Err(EnqueueError::InvalidMessage("topic must not be empty".to_string()));
        }
        if let Some(partition) = message.partition {
            if partition < 0 {
                return Err(EnqueueError::InvalidMessage(format!(
                    "partition {} is negative",
                    partition
                )));
            }
        }
        if message.value_len() > self.config.message_max_bytes {
            return Err(EnqueueError::InvalidMessage(format!(
                "value of {} bytes exceeds message.max.bytes ({})",
                message.value_len(),
                self.config.message_max_bytes
            )));
        }
        Ok(())
    }

    /// Dispatch completed delivery reports to the handler
    ///
    /// Waits up to `timeout` for the first report (zero returns immediately),
    /// then dispatches every report already available.
    ///
    /// # Returns
    /// Number of reports dispatched
    pub fn poll(&mut self, timeout: Duration) -> usize {
        let first = if timeout.is_zero() {
            self.reports.try_recv().ok()
        } else {
            match self.reports.recv_timeout(timeout) {
                Ok(report) => Some(report),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            }
        };

        let Some(first) = first else {
            return 0;
        };
        let mut dispatched = 0;
        let mut next = Some(first);
        while let Some(report) = next {
            self.dispatch(report);
            dispatched += 1;
            next = self.reports.try_recv().ok();
        }
        dispatched
    }

    fn dispatch(&mut self, report: DeliveryReport) {
        // Free the slot first so the handler may enqueue again
        self.queue.release(report.message.size());
        self.handler.on_delivery(report);
    }

    /// Wait until every outstanding message has been reported, or `timeout`
    ///
    /// Linger is bypassed while flushing.
    ///
    /// # Returns
    /// Number of messages still outstanding (0 when fully drained)
    pub fn flush(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        self.queue.begin_flush();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.poll(remaining.min(Duration::from_millis(ENQUEUE_RETRY_POLL_MS)));
            if self.queue.outstanding() == 0 || Instant::now() >= deadline {
                break;
            }
        }
        self.queue.end_flush();

        let residual = self.queue.outstanding();
        if residual > 0 {
            debug!("Flush timed out with {} messages outstanding", residual);
        }
        residual
    }

    /// Messages accepted but not yet reported through `poll`
    pub fn outstanding_count(&self) -> usize {
        self.queue.outstanding()
    }

    /// Flush, stop the worker, and purge what could not be delivered
    ///
    /// Every accepted message is reported before this returns: delivered,
    /// failed, or `Purged`. Further enqueues fail with `Closed`.
    ///
    /// # Returns
    /// Number of messages that were not delivered within `timeout`
    pub fn close(&mut self, timeout: Duration) -> usize {
        if self.worker.is_none() {
            return 0;
        }

        let residual = self.flush(timeout);
        self.stop_worker();

        // Reports the worker sent before stopping
        self.poll(Duration::ZERO);

        let purged = self.queue.drain_pending();
        if !purged.is_empty() {
            warn!("Purging {} undelivered messages on close", purged.len());
        }
        for queued in purged {
            self.dispatch(DeliveryReport {
                id: queued.id,
                message: queued.message,
                outcome: DeliveryOutcome::Failed(DeliveryError::Purged),
                enqueued_at: queued.enqueued_at,
            });
        }

        info!("Producer {} closed ({} undelivered)", self.config.client_id, residual);
        residual
    }

    fn stop_worker(&mut self) {
        self.queue.shutdown();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Delivery worker panicked");
            }
        }
    }
}

impl<H: DeliveryHandler> Drop for Producer<H> {
    fn drop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.stop_worker();
        let discarded = self.queue.outstanding();
        if discarded > 0 {
            warn!(
                "Producer {} dropped without close; discarding {} messages without delivery reports",
                self.config.client_id, discarded
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::messages::TopicPartition;
    use crate::testing::{cluster_with_topic, collecting_handler, test_producer_config};

    #[test]
    fn test_enqueue_rejects_invalid_messages() {
        let mut config = test_producer_config(10);
        config.message_max_bytes = 4;
        let producer =
            Producer::new(config, cluster_with_topic("t", 1), |_: DeliveryReport| {}).unwrap();

        let failure = producer.enqueue(OutboundMessage::to("")).unwrap_err();
        assert!(matches!(failure.error, EnqueueError::InvalidMessage(_)));

        let failure = producer
            .enqueue(OutboundMessage::to("t").with_value("too long"))
            .unwrap_err();
        assert!(matches!(failure.error, EnqueueError::InvalidMessage(_)));
        assert_eq!(failure.message.value_len(), 8);

        let failure = producer
            .enqueue(OutboundMessage::to("t").with_partition(-2))
            .unwrap_err();
        assert!(matches!(failure.error, EnqueueError::InvalidMessage(_)));
        assert_eq!(producer.outstanding_count(), 0);
    }

    #[test]
    fn test_reports_in_enqueue_order() {
        let cluster = cluster_with_topic("t", 1);
        let (reports, handler) = collecting_handler();
        let mut producer =
            Producer::new(test_producer_config(100), cluster.clone(), handler).unwrap();

        for value in ["a", "b", "c"] {
            producer
                .enqueue(OutboundMessage::to("t").with_partition(0).with_value(value))
                .unwrap();
        }
        assert_eq!(producer.outstanding_count(), 3);
        assert_eq!(producer.flush(Duration::from_secs(5)), 0);

        let reports = reports.lock();
        let values: Vec<&[u8]> = reports
            .iter()
            .map(|r| r.message.value.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(values, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
        let offsets: Vec<Option<i64>> = reports.iter().map(DeliveryReport::offset).collect();
        assert_eq!(offsets, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(cluster.high_watermark(&TopicPartition::new("t", 0)), Some(3));
    }

    #[test]
    fn test_close_rejects_further_enqueues() {
        let (reports, handler) = collecting_handler();
        let mut producer =
            Producer::new(test_producer_config(10), cluster_with_topic("t", 1), handler).unwrap();
        producer.enqueue(OutboundMessage::to("t").with_value("x")).unwrap();

        assert_eq!(producer.close(Duration::from_secs(5)), 0);
        assert_eq!(reports.lock().len(), 1);

        let failure = producer.enqueue(OutboundMessage::to("t")).unwrap_err();
        assert_eq!(failure.error, EnqueueError::Closed);
        assert_eq!(producer.close(Duration::ZERO), 0);
    }

    #[test]
    fn test_close_purges_undeliverable_backlog() {
        let (reports, handler) = collecting_handler();
        let config = ProducerConfig {
            linger: Duration::from_secs(600),
            ..ProducerConfig::default()
        };
        let mut producer = Producer::new(config, cluster_with_topic("t", 1), handler).unwrap();
        producer.enqueue(OutboundMessage::to("t").with_value("x")).unwrap();

        // Zero timeout: the flush cannot wait for the worker
        producer.close(Duration::ZERO);

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            reports[0].error(),
            None | Some(DeliveryError::Purged)
        ));
        assert_eq!(producer.outstanding_count(), 0);
    }

    #[test]
    fn test_opaque_returned_in_report() {
        let (reports, handler) = collecting_handler();
        let mut producer =
            Producer::new(test_producer_config(10), cluster_with_topic("t", 1), handler).unwrap();
        producer
            .enqueue(OutboundMessage::to("t").with_opaque(String::from("order-17")))
            .unwrap();
        producer.flush(Duration::from_secs(5));

        let reports = reports.lock();
        assert_eq!(
            reports[0].message.opaque_ref::<String>().map(String::as_str),
            Some("order-17")
        );
    }
}
