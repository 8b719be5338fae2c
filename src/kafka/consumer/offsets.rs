//! Per-partition offset bookkeeping for the consumer
//!
//! Tracks, for every assigned partition, the fetch position (next offset to
//! read), the last committed offset, and the offset to commit next. Positions
//! that are not known yet wait in `unresolved` until `resolve` looks them up.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::OffsetReset;
use crate::kafka::error::ConsumerPollError;
use crate::kafka::messages::TopicPartition;
use crate::kafka::transport::{OffsetSpec, Transport};

/// How an unknown position gets its starting value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// Committed offset if one exists, else the reset policy
    Committed,
    /// Reset policy only (after OFFSET_OUT_OF_RANGE)
    Reset,
}

#[derive(Debug, Default)]
pub(crate) struct OffsetTable {
    positions: BTreeMap<TopicPartition, i64>,
    unresolved: BTreeMap<TopicPartition, Resolution>,
    /// Last known committed offset per partition
    committed: HashMap<TopicPartition, i64>,
    /// Last yielded offset + 1, for partitions that yielded messages
    consumed: BTreeMap<TopicPartition, i64>,
    retry_at: Option<Instant>,
}

impl From<OffsetReset> for OffsetSpec {
    fn from(reset: OffsetReset) -> Self {
        match reset {
            OffsetReset::Earliest => OffsetSpec::Earliest,
            OffsetReset::Latest => OffsetSpec::Latest,
        }
    }
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking newly assigned partitions; positions are looked up lazily
    pub fn assign(&mut self, partitions: &[TopicPartition]) {
        for tp in partitions {
            self.positions.remove(tp);
            self.unresolved.insert(tp.clone(), Resolution::Committed);
        }
        self.retry_at = None;
    }

    /// Forget every position, keeping only committed offsets
    pub fn revoke_all(&mut self) {
        self.positions.clear();
        self.unresolved.clear();
        self.consumed.clear();
        self.retry_at = None;
    }

    pub fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.positions.get(tp).copied()
    }

    /// Partitions with a known position, in fetch order
    pub fn fetchable(&self) -> impl Iterator<Item = (&TopicPartition, i64)> {
        self.positions.iter().map(|(tp, offset)| (tp, *offset))
    }

    pub fn has_unresolved(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// Record that the message at `offset` was handed to the application
    pub fn advance(&mut self, tp: &TopicPartition, offset: i64) {
        self.positions.insert(tp.clone(), offset + 1);
        self.consumed.insert(tp.clone(), offset + 1);
    }

    /// The position fell outside the log; apply the reset policy again
    pub fn reset(&mut self, tp: &TopicPartition) {
        if self.positions.remove(tp).is_some() {
            self.unresolved.insert(tp.clone(), Resolution::Reset);
        }
    }

    /// Look up starting positions for unresolved partitions
    ///
    /// Partitions whose lookup fails stay unresolved and are retried after
    /// `backoff`.
    pub fn resolve(
        &mut self,
        transport: &dyn Transport,
        group_id: &str,
        policy: OffsetReset,
        now: Instant,
        backoff: Duration,
        errors: &mut Vec<ConsumerPollError>,
    ) {
        if self.unresolved.is_empty() || self.retry_at.is_some_and(|at| now < at) {
            return;
        }

        let wants_committed: Vec<TopicPartition> = self
            .unresolved
            .iter()
            .filter(|(_, how)| **how == Resolution::Committed)
            .map(|(tp, _)| tp.clone())
            .collect();
        let committed = if wants_committed.is_empty() {
            HashMap::new()
        } else {
            match transport.fetch_committed(group_id, &wants_committed) {
                Ok(committed) => committed,
                Err(err) => {
                    warn!("Fetching committed offsets for {} failed: {}", group_id, err);
                    errors.push(ConsumerPollError::Group(err));
                    self.retry_at = Some(now + backoff);
                    return;
                }
            }
        };

        let pending = std::mem::take(&mut self.unresolved);
        for (tp, how) in pending {
            if let Some(&offset) = committed.get(&tp) {
                debug!("{} starts at committed offset {}", tp, offset);
                self.committed.insert(tp.clone(), offset);
                self.positions.insert(tp, offset);
                continue;
            }

            match transport.list_offset(&tp, policy.into()) {
                Ok(offset) => {
                    debug!("{} starts at {} offset {} ({:?})", tp, policy.as_str(), offset, how);
                    self.positions.insert(tp, offset);
                }
                Err(err) => {
                    warn!("Offset reset for {} failed: {}", tp, err);
                    errors.push(ConsumerPollError::OffsetReset {
                        partition: tp.clone(),
                        source: err,
                    });
                    self.unresolved.insert(tp, how);
                }
            }
        }
        self.retry_at = if self.unresolved.is_empty() {
            None
        } else {
            Some(now + backoff)
        };
    }

    /// Consumed offsets that differ from what was last committed
    pub fn uncommitted(&self) -> Vec<(TopicPartition, i64)> {
        self.consumed
            .iter()
            .filter(|(tp, offset)| self.committed.get(*tp) != Some(*offset))
            .map(|(tp, offset)| (tp.clone(), *offset))
            .collect()
    }

    pub fn mark_committed(&mut self, offsets: &[(TopicPartition, i64)]) {
        for (tp, offset) in offsets {
            self.committed.insert(tp.clone(), *offset);
        }
    }

    pub fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        self.committed.get(tp).copied()
    }
}
