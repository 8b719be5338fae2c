//! Consumer Group Poller
//!
//! `Consumer` owns a subscription, takes part in group rebalances, tracks a
//! fetch position per assigned partition, and exposes a single bounded
//! `poll` that yields a message, an informational error, or a timeout.
//!
//! All work happens inside `poll` on the caller's thread: membership steps
//! (join, sync, heartbeat), offset resolution, auto-commit, and long-poll
//! fetches. The rebalance callback runs synchronously from there as well.
//!
//! # States
//!
//! ```text
//! Unsubscribed ─subscribe─► Joining ─assigned─► Stable ─rebalance─► Rebalancing ─assigned─► Stable
//!       ▲                                          │                                          │
//!       └──────────── unsubscribe ─────────────────┴──────────────────────────────────────────┘
//!                     close (any state) ─► Closed
//! ```
//!
//! Revocation is eager: on every rebalance the whole assignment is revoked
//! (after an auto-commit) before the member rejoins.

mod fetcher;
mod membership;
mod offsets;

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ConsumerConfig};
use crate::kafka::error::{CommitError, ConsumerPollError, KafkaError, Result};
use crate::kafka::messages::{ConsumedMessage, TopicPartition};
use crate::kafka::transport::{OffsetCommitRequest, Transport};

use fetcher::Fetcher;
use membership::{GroupMembership, MembershipEvent};
use offsets::OffsetTable;

/// Lifecycle state of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// No subscription
    Unsubscribed,
    /// Subscribed, waiting for the first assignment
    Joining,
    /// Assignment held; fetching
    Stable,
    /// Assignment revoked; rejoining the group
    Rebalancing,
    /// Closed; every further operation fails
    Closed,
}

/// Outcome of one `Consumer::poll`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Message(ConsumedMessage),
    /// Informational; keep polling unless `is_fatal`
    Error(ConsumerPollError),
    Timeout,
}

/// Whether `Consumer::commit` waits for the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Commit before returning
    Sync,
    /// Commit at the start of the next `poll`; failures surface there
    Async,
}

/// Called with `(assigned, revoked)` partitions when the assignment changes
pub type RebalanceCallback = Box<dyn FnMut(&[TopicPartition], &[TopicPartition]) + Send>;

/// Group consumer
pub struct Consumer {
    config: ConsumerConfig,
    transport: Arc<dyn Transport>,
    state: ConsumerState,
    subscription: BTreeSet<String>,
    assignment: Vec<TopicPartition>,
    membership: GroupMembership,
    offsets: OffsetTable,
    fetcher: Fetcher,
    errors: VecDeque<ConsumerPollError>,
    pending_commit: Option<Vec<(TopicPartition, i64)>>,
    next_auto_commit: Instant,
    rebalance_callback: Option<RebalanceCallback>,
}

impl Consumer {
    pub fn new(config: ConsumerConfig, transport: Arc<dyn Transport>) -> Self {
        let membership = GroupMembership::new(&config, Arc::clone(&transport));
        let next_auto_commit = Instant::now() + config.auto_commit_interval;
        info!(
            "Consumer {} created for group {}",
            config.client_id, config.group_id
        );

        Self {
            config,
            transport,
            state: ConsumerState::Unsubscribed,
            subscription: BTreeSet::new(),
            assignment: Vec::new(),
            membership,
            offsets: OffsetTable::new(),
            fetcher: Fetcher::new(),
            errors: VecDeque::new(),
            pending_commit: None,
            next_auto_commit,
            rebalance_callback: None,
        }
    }

    /// Parse `config` and create a consumer
    pub fn from_client_config(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self::new(ConsumerConfig::from_client_config(config)?, transport))
    }

    pub fn set_rebalance_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&[TopicPartition], &[TopicPartition]) + Send + 'static,
    {
        self.rebalance_callback = Some(Box::new(callback));
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Partitions currently owned, sorted
    pub fn assignment(&self) -> &[TopicPartition] {
        &self.assignment
    }

    pub fn subscription(&self) -> Vec<String> {
        self.subscription.iter().cloned().collect()
    }

    /// Next offset `poll` will yield for `tp`, once known
    pub fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.offsets.position(tp)
    }

    /// Committed offset for `tp`, as stored by the coordinator
    pub fn committed(&self, tp: &TopicPartition) -> Result<Option<i64>> {
        if self.state == ConsumerState::Closed {
            return Err(KafkaError::Closed);
        }
        let committed = self
            .transport
            .fetch_committed(&self.config.group_id, std::slice::from_ref(tp))?;
        Ok(committed.get(tp).copied())
    }

    /// Replace the subscription and rejoin the group
    ///
    /// Unchanged subscriptions are a no-op; an empty list unsubscribes.
    pub fn subscribe<S: AsRef<str>>(&mut self, topics: &[S]) -> Result<()> {
        if self.state == ConsumerState::Closed {
            return Err(KafkaError::Closed);
        }
        if topics.iter().any(|t| t.as_ref().trim().is_empty()) {
            return Err(KafkaError::InvalidArgument(
                "topic names must not be empty".to_string(),
            ));
        }
        if topics.is_empty() {
            self.unsubscribe();
            return Ok(());
        }

        let topics: BTreeSet<String> = topics.iter().map(|t| t.as_ref().to_string()).collect();
        if topics == self.subscription && self.state != ConsumerState::Unsubscribed {
            debug!("Subscription unchanged: {:?}", topics);
            return Ok(());
        }

        info!("Subscribing to {:?}", topics);
        self.subscription = topics;
        self.revoke();
        self.state = if self.membership.has_generation() {
            ConsumerState::Rebalancing
        } else {
            ConsumerState::Joining
        };
        self.membership.start_join();
        Ok(())
    }

    /// Revoke the assignment and leave the group
    pub fn unsubscribe(&mut self) {
        if matches!(
            self.state,
            ConsumerState::Unsubscribed | ConsumerState::Closed
        ) {
            return;
        }
        info!("Unsubscribing from {:?}", self.subscription);
        self.revoke();
        self.membership.leave();
        self.subscription.clear();
        self.state = ConsumerState::Unsubscribed;
    }

    /// Wait up to `timeout` for the next message
    ///
    /// Group membership, offset resolution, auto-commit, and fetching all run
    /// from here. Errors are informational: the consumer keeps recovering.
    /// A zero timeout performs due work and one non-blocking fetch, then
    /// returns whatever is available without waiting.
    pub fn poll(&mut self, timeout: Duration) -> PollResult {
        if self.state == ConsumerState::Closed {
            return PollResult::Error(ConsumerPollError::Closed);
        }
        let deadline = Instant::now() + timeout;

        if let Some(offsets) = self.pending_commit.take() {
            if let Err(err) = self.send_commit(&offsets) {
                return PollResult::Error(ConsumerPollError::Commit(err));
            }
        }

        let mut fetched = false;
        loop {
            let now = Instant::now();
            self.maintain(now);

            if let Some(err) = self.errors.pop_front() {
                return PollResult::Error(err);
            }
            if let Some(message) = self.fetcher.next_message(&mut self.offsets) {
                return PollResult::Message(message);
            }

            let now = Instant::now();
            let can_fetch =
                self.state == ConsumerState::Stable && self.fetcher.can_fetch(&self.offsets, now);
            if now >= deadline {
                if fetched || !can_fetch {
                    return PollResult::Timeout;
                }
                // Expired before any fetch (zero timeout): take what is already available
                self.fetch(Duration::ZERO);
                fetched = true;
                continue;
            }
            let mut wait = deadline - now;
            if let Some(at) = self.next_deadline() {
                wait = wait.min(at.saturating_duration_since(now));
            }

            if can_fetch {
                self.fetch(wait.min(self.config.fetch_wait_max));
                fetched = true;
            } else if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }

    fn fetch(&mut self, max_wait: Duration) {
        let mut errors = Vec::new();
        self.fetcher.fetch(
            self.transport.as_ref(),
            &mut self.offsets,
            max_wait,
            self.config.fetch_max_bytes,
            self.config.retry_backoff,
            &mut errors,
        );
        self.errors.extend(errors);
    }

    /// Earliest instant at which `maintain` has scheduled work
    fn next_deadline(&self) -> Option<Instant> {
        let mut next = self.membership.next_deadline();
        if self.config.enable_auto_commit && self.state == ConsumerState::Stable {
            next = Some(next.map_or(self.next_auto_commit, |n| n.min(self.next_auto_commit)));
        }
        if self.state == ConsumerState::Stable {
            if let Some(retry) = self.fetcher.next_retry() {
                next = Some(next.map_or(retry, |n| n.min(retry)));
            }
        }
        if self.offsets.has_unresolved() {
            // Unresolved positions are retried on the backoff schedule
            let retry = Instant::now() + self.config.retry_backoff;
            next = Some(next.map_or(retry, |n| n.min(retry)));
        }
        next
    }

    /// Run every piece of due background work
    fn maintain(&mut self, now: Instant) {
        if self.state == ConsumerState::Unsubscribed {
            return;
        }

        let mut errors = Vec::new();
        match self.membership.step(&self.subscription, now, &mut errors) {
            MembershipEvent::None => {}
            MembershipEvent::Assigned(partitions) => self.assign(partitions),
            MembershipEvent::RebalanceRequired => {
                self.revoke();
                self.state = ConsumerState::Rebalancing;
                self.membership.start_join();
            }
        }
        self.errors.extend(errors);

        if self.state != ConsumerState::Stable {
            return;
        }

        let mut errors = Vec::new();
        self.offsets.resolve(
            self.transport.as_ref(),
            &self.config.group_id,
            self.config.auto_offset_reset,
            now,
            self.config.retry_backoff,
            &mut errors,
        );
        self.errors.extend(errors);

        if self.config.enable_auto_commit && now >= self.next_auto_commit {
            self.next_auto_commit = now + self.config.auto_commit_interval;
            self.auto_commit();
        }
    }

    fn assign(&mut self, partitions: Vec<TopicPartition>) {
        info!("Assigned {} partitions: {:?}", partitions.len(), partitions);
        self.offsets.assign(&partitions);
        self.fetcher.assign(&partitions);
        self.assignment = partitions;
        self.state = ConsumerState::Stable;

        if let Some(callback) = self.rebalance_callback.as_mut() {
            callback(&self.assignment, &[]);
        }
    }

    /// Give up the whole assignment, committing first when auto-commit is on
    fn revoke(&mut self) {
        if let Some(offsets) = self.pending_commit.take() {
            if let Err(err) = self.send_commit(&offsets) {
                self.errors.push_back(ConsumerPollError::Commit(err));
            }
        }
        if self.state != ConsumerState::Stable {
            return;
        }
        if self.config.enable_auto_commit {
            self.auto_commit();
        }

        let revoked = std::mem::take(&mut self.assignment);
        info!("Revoking {} partitions", revoked.len());
        self.offsets.revoke_all();
        self.fetcher.clear();

        if let Some(callback) = self.rebalance_callback.as_mut() {
            callback(&[], &revoked);
        }
    }

    fn auto_commit(&mut self) {
        let offsets = self.offsets.uncommitted();
        if offsets.is_empty() {
            return;
        }
        if let Err(err) = self.send_commit(&offsets) {
            self.errors.push_back(ConsumerPollError::Commit(err));
        }
    }

    /// Persist consumed positions
    ///
    /// `None` commits the offset after the last message yielded on every
    /// partition that made progress. A failed commit never rewinds what was
    /// already yielded.
    ///
    /// # Errors
    /// - `NoOffset`: nothing to commit
    /// - `Rejected`: the coordinator refused the commit (`Sync` only)
    /// - `Closed`: the consumer has been closed
    pub fn commit(
        &mut self,
        offsets: Option<&[(TopicPartition, i64)]>,
        mode: CommitMode,
    ) -> std::result::Result<(), CommitError> {
        if self.state == ConsumerState::Closed {
            return Err(CommitError::Closed);
        }
        let offsets = match offsets {
            Some(offsets) => offsets.to_vec(),
            None => self.offsets.uncommitted(),
        };
        if offsets.is_empty() {
            return Err(CommitError::NoOffset);
        }

        match mode {
            CommitMode::Sync => self.send_commit(&offsets),
            CommitMode::Async => {
                let pending = self.pending_commit.get_or_insert_with(Vec::new);
                for (tp, offset) in offsets {
                    match pending.iter_mut().find(|(p, _)| *p == tp) {
                        Some(entry) => entry.1 = offset,
                        None => pending.push((tp, offset)),
                    }
                }
                Ok(())
            }
        }
    }

    fn send_commit(&mut self, offsets: &[(TopicPartition, i64)]) -> std::result::Result<(), CommitError> {
        let (member_id, generation_id) = self.membership.commit_identity();
        let request = OffsetCommitRequest {
            group_id: self.config.group_id.clone(),
            member_id,
            generation_id,
            offsets: offsets.to_vec(),
        };

        match self.transport.commit_offsets(&request) {
            Ok(()) => {
                debug!("Committed {} offsets for group {}", offsets.len(), self.config.group_id);
                self.offsets.mark_committed(offsets);
                Ok(())
            }
            Err(err) => {
                warn!("Offset commit for group {} failed: {}", self.config.group_id, err);
                Err(CommitError::Rejected(err))
            }
        }
    }

    /// Commit, revoke, leave the group, and stop
    ///
    /// Later polls return `Error(Closed)`. Calling `close` twice is a no-op.
    ///
    /// # Errors
    /// The final commit failed; the consumer is closed regardless.
    pub fn close(&mut self) -> std::result::Result<(), CommitError> {
        if self.state == ConsumerState::Closed {
            return Ok(());
        }

        let mut result = Ok(());
        if let Some(offsets) = self.pending_commit.take() {
            result = self.send_commit(&offsets);
        }
        let offsets = self.offsets.uncommitted();
        if !offsets.is_empty() {
            result = result.and(self.send_commit(&offsets));
        }

        // Commit already done above; revoke without committing again
        let auto_commit = std::mem::replace(&mut self.config.enable_auto_commit, false);
        self.revoke();
        self.config.enable_auto_commit = auto_commit;

        self.membership.leave();
        self.subscription.clear();
        self.errors.clear();
        self.state = ConsumerState::Closed;
        info!("Consumer {} closed", self.config.client_id);
        result
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("Final commit on drop failed: {}", err);
        }
    }
}
