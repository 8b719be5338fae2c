//! Fetch buffering for the consumer
//!
//! Records returned by a fetch are buffered per partition and handed out one
//! at a time, rotating across partitions so a busy partition cannot starve the
//! others. A partition is only fetched again once its buffer is empty.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::offsets::OffsetTable;
use crate::kafka::constants::ERROR_OFFSET_OUT_OF_RANGE;
use crate::kafka::error::ConsumerPollError;
use crate::kafka::messages::{ConsumedMessage, TopicPartition};
use crate::kafka::transport::{FetchRequest, FetchedRecord, Transport};

#[derive(Debug, Default)]
pub(crate) struct Fetcher {
    buffers: BTreeMap<TopicPartition, VecDeque<FetchedRecord>>,
    /// Index into `buffers` of the partition served next
    cursor: usize,
    retry_at: Option<Instant>,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, partitions: &[TopicPartition]) {
        for tp in partitions {
            self.buffers.entry(tp.clone()).or_default();
        }
    }

    /// Drop every buffer (on revocation)
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.cursor = 0;
        self.retry_at = None;
    }

    /// Next buffered record, rotating across partitions
    ///
    /// Records below the partition's position are discarded, so yielded
    /// offsets strictly increase.
    pub fn next_message(&mut self, offsets: &mut OffsetTable) -> Option<ConsumedMessage> {
        let count = self.buffers.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let Some((tp, buffer)) = self.buffers.iter_mut().nth(index) else {
                continue;
            };
            let Some(position) = offsets.position(tp) else {
                buffer.clear();
                continue;
            };

            while let Some(record) = buffer.pop_front() {
                if record.offset < position {
                    trace!("Skipping {} offset {} below position {}", tp, record.offset, position);
                    continue;
                }
                let tp = tp.clone();
                offsets.advance(&tp, record.offset);
                self.cursor = index + 1;
                return Some(ConsumedMessage {
                    topic: tp.topic,
                    partition: tp.partition,
                    offset: record.offset,
                    key: record.key,
                    value: record.value,
                    headers: record.headers,
                    timestamp: record.timestamp,
                });
            }
        }
        None
    }

    /// Partitions ready for another fetch: position known, buffer drained
    fn fetch_targets(&self, offsets: &OffsetTable) -> Vec<(TopicPartition, i64)> {
        offsets
            .fetchable()
            .filter(|(tp, _)| self.buffers.get(*tp).is_some_and(VecDeque::is_empty))
            .map(|(tp, offset)| (tp.clone(), offset))
            .collect()
    }

    /// Whether `fetch` would send a request right now
    pub fn can_fetch(&self, offsets: &OffsetTable, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| now >= at) && !self.fetch_targets(offsets).is_empty()
    }

    /// When a failed fetch may be retried, if it is backing off
    pub fn next_retry(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Fetch every drained partition, long-polling up to `max_wait`
    ///
    /// OFFSET_OUT_OF_RANGE marks the partition for a reset; other partition
    /// errors and request failures are reported and retried after `backoff`.
    pub fn fetch(
        &mut self,
        transport: &dyn Transport,
        offsets: &mut OffsetTable,
        max_wait: Duration,
        max_bytes: usize,
        backoff: Duration,
        errors: &mut Vec<ConsumerPollError>,
    ) {
        let targets = self.fetch_targets(offsets);
        if targets.is_empty() {
            return;
        }

        let request = FetchRequest {
            partitions: targets,
            max_wait,
            max_bytes,
        };
        let response = match transport.fetch(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!("Fetch of {} partitions failed: {}", request.partitions.len(), err);
                errors.extend(request.partitions.into_iter().map(|(partition, _)| {
                    ConsumerPollError::Fetch {
                        partition,
                        source: err.clone(),
                    }
                }));
                self.retry_at = Some(Instant::now() + backoff);
                return;
            }
        };

        let mut failed = false;
        for data in response {
            if let Some(err) = data.error {
                if err.code() == ERROR_OFFSET_OUT_OF_RANGE {
                    debug!(
                        "{} position out of range (log {}..{}), resetting",
                        data.partition, data.log_start_offset, data.high_watermark
                    );
                    offsets.reset(&data.partition);
                } else {
                    failed = true;
                    errors.push(ConsumerPollError::Fetch {
                        partition: data.partition,
                        source: err,
                    });
                }
                continue;
            }

            let Some(position) = offsets.position(&data.partition) else {
                continue;
            };
            if let Some(buffer) = self.buffers.get_mut(&data.partition) {
                buffer.extend(data.records.into_iter().filter(|r| r.offset >= position));
            }
        }
        self.retry_at = failed.then(|| Instant::now() + backoff);
    }

    /// Records buffered but not yet yielded
    pub fn buffered(&self) -> usize {
        self.buffers.values().map(VecDeque::len).sum()
    }
}
