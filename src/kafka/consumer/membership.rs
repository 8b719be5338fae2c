//! Client side of the group membership protocol
//!
//! Drives JoinGroup → (leader assigns) → SyncGroup → heartbeats without ever
//! blocking: every call to `step` performs at most one round of requests and
//! schedules the next one. The consumer calls it from inside `poll`.
//!
//! ```text
//!            start_join
//! Idle ──────────────────► Join ──Joined──► Sync ──assignment──► Stable
//!                           ▲ │ Pending       │ None (leader not done)   │
//!                           │ └─retry─┘       └──retry──┘                │
//!                           └──── REBALANCE_IN_PROGRESS / ILLEGAL_GENERATION
//!                                 UNKNOWN_MEMBER_ID (member id reset)
//!                                 leader saw partition counts change
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ConsumerConfig;
use crate::kafka::assignment::{compute_assignments, MemberAssignment, MemberSubscription};
use crate::kafka::constants::{
    ERROR_ILLEGAL_GENERATION, ERROR_REBALANCE_IN_PROGRESS, ERROR_UNKNOWN_MEMBER_ID,
    ERROR_UNKNOWN_TOPIC_OR_PARTITION, GROUP_PENDING_RETRY_MS, NO_GENERATION,
};
use crate::kafka::error::{ConsumerPollError, TransportError};
use crate::kafka::messages::TopicPartition;
use crate::kafka::transport::{
    GroupGeneration, JoinGroupRequest, JoinGroupResponse, SyncGroupRequest, Transport,
};

#[derive(Debug)]
enum Phase {
    /// Not a member, and not trying to become one
    Idle,
    Join {
        retry_at: Instant,
    },
    Sync {
        generation: GroupGeneration,
        /// Computed once by the leader, resent on retries
        assignments: Vec<(String, Vec<u8>)>,
        retry_at: Instant,
    },
    Stable {
        next_heartbeat: Instant,
    },
}

/// What the consumer must do after a membership step
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MembershipEvent {
    None,
    /// A generation completed; these partitions are now owned
    Assigned(Vec<TopicPartition>),
    /// The current assignment must be revoked before rejoining
    RebalanceRequired,
}

pub(crate) struct GroupMembership {
    transport: Arc<dyn Transport>,
    group_id: String,
    client_id: String,
    session_timeout: Duration,
    heartbeat_interval: Duration,
    retry_backoff: Duration,
    strategies: Vec<String>,
    metadata_refresh_interval: Duration,

    member_id: Option<String>,
    /// Last generation this member synced into
    generation: Option<GroupGeneration>,
    phase: Phase,

    /// Partition counts the leader assigned from (0 for missing topics), re-checked periodically
    leader_topics: BTreeMap<String, i32>,
    next_metadata_check: Instant,
}

impl GroupMembership {
    pub fn new(config: &ConsumerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            group_id: config.group_id.clone(),
            client_id: config.client_id.clone(),
            session_timeout: config.session_timeout,
            heartbeat_interval: config.heartbeat_interval,
            retry_backoff: config.retry_backoff,
            strategies: config.assignment_strategies.clone(),
            metadata_refresh_interval: config.metadata_refresh_interval,
            member_id: None,
            generation: None,
            phase: Phase::Idle,
            leader_topics: BTreeMap::new(),
            next_metadata_check: Instant::now(),
        }
    }

    pub fn member_id(&self) -> Option<&str> {
        self.member_id.as_deref()
    }

    pub fn generation_id(&self) -> Option<i32> {
        self.generation.as_ref().map(|g| g.generation_id)
    }

    pub fn is_stable(&self) -> bool {
        matches!(self.phase, Phase::Stable { .. })
    }

    /// Whether this member has been part of a completed generation
    pub fn has_generation(&self) -> bool {
        self.generation.is_some()
    }

    /// Member id and generation to stamp on offset commits
    pub fn commit_identity(&self) -> (Option<String>, i32) {
        match (&self.member_id, &self.generation) {
            (Some(member_id), Some(generation)) => {
                (Some(member_id.clone()), generation.generation_id)
            }
            _ => (None, NO_GENERATION),
        }
    }

    /// Join (or rejoin) at the next step
    pub fn start_join(&mut self) {
        self.phase = Phase::Join {
            retry_at: Instant::now(),
        };
    }

    /// When `step` next has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Join { retry_at } | Phase::Sync { retry_at, .. } => Some(*retry_at),
            Phase::Stable { next_heartbeat } => Some(*next_heartbeat),
        }
    }

    /// Perform whatever membership work is due at `now`
    pub fn step(
        &mut self,
        topics: &BTreeSet<String>,
        now: Instant,
        errors: &mut Vec<ConsumerPollError>,
    ) -> MembershipEvent {
        match &self.phase {
            Phase::Idle => MembershipEvent::None,
            Phase::Join { retry_at } if now >= *retry_at => self.join(topics, now, errors),
            Phase::Sync { retry_at, .. } if now >= *retry_at => self.sync(now, errors),
            Phase::Stable { next_heartbeat } => {
                if now >= *next_heartbeat {
                    let event = self.heartbeat(now, errors);
                    if event != MembershipEvent::None {
                        return event;
                    }
                }
                self.check_leader_metadata(now, errors)
            }
            Phase::Join { .. } | Phase::Sync { .. } => MembershipEvent::None,
        }
    }

    fn join(
        &mut self,
        topics: &BTreeSet<String>,
        now: Instant,
        errors: &mut Vec<ConsumerPollError>,
    ) -> MembershipEvent {
        let metadata = MemberSubscription::new(topics.iter().cloned().collect()).encode();
        let request = JoinGroupRequest {
            group_id: self.group_id.clone(),
            member_id: self.member_id.clone(),
            client_id: self.client_id.clone(),
            session_timeout: self.session_timeout,
            protocols: self
                .strategies
                .iter()
                .map(|name| (name.clone(), metadata.clone()))
                .collect(),
        };

        match self.transport.join_group(&request) {
            Ok(JoinGroupResponse::Pending { member_id }) => {
                debug!("Group {}: waiting for other members to rejoin", self.group_id);
                self.member_id = Some(member_id);
                self.phase = Phase::Join {
                    retry_at: now + Duration::from_millis(GROUP_PENDING_RETRY_MS),
                };
            }
            Ok(JoinGroupResponse::Joined(generation)) => {
                info!(
                    "Group {}: joined generation {} as {} (leader: {}, protocol: {})",
                    self.group_id,
                    generation.generation_id,
                    generation.member_id,
                    generation.is_leader(),
                    generation.protocol_name
                );
                self.member_id = Some(generation.member_id.clone());

                let assignments = if generation.is_leader() {
                    match self.assign_as_leader(&generation, topics, errors) {
                        Some(assignments) => assignments,
                        None => {
                            self.phase = Phase::Join {
                                retry_at: now + self.retry_backoff,
                            };
                            return MembershipEvent::None;
                        }
                    }
                } else {
                    Vec::new()
                };
                self.phase = Phase::Sync {
                    generation,
                    assignments,
                    retry_at: now,
                };
                // The leader's sync completes the generation; try it right away
                return self.sync(now, errors);
            }
            Err(err) => self.handle_group_error("JoinGroup", err, now, errors),
        }
        MembershipEvent::None
    }

    /// Compute every member's assignment from the subscriptions in the JoinGroup response
    fn assign_as_leader(
        &mut self,
        generation: &GroupGeneration,
        own_topics: &BTreeSet<String>,
        errors: &mut Vec<ConsumerPollError>,
    ) -> Option<Vec<(String, Vec<u8>)>> {
        let mut group_topics = BTreeSet::new();
        for (member_id, metadata) in &generation.members {
            match MemberSubscription::parse(metadata) {
                Ok(subscription) => group_topics.extend(subscription.topics),
                Err(e) => warn!("Ignoring subscription of {}: {}", member_id, e),
            }
        }

        let topic_partitions = self.partition_counts(&group_topics, own_topics, errors);
        match compute_assignments(&generation.protocol_name, &generation.members, &topic_partitions)
        {
            Ok(assignments) => {
                debug!(
                    "Group {}: leader assigned {} topics across {} members",
                    self.group_id,
                    topic_partitions.len(),
                    assignments.len()
                );
                // Missing topics stay tracked at 0 so their creation triggers a rebalance
                self.leader_topics = group_topics
                    .into_iter()
                    .map(|topic| {
                        let count = topic_partitions.get(&topic).copied().unwrap_or(0);
                        (topic, count)
                    })
                    .collect();
                self.next_metadata_check = Instant::now() + self.metadata_refresh_interval;
                Some(assignments)
            }
            Err(e) => {
                warn!("Group {}: assignment failed: {}", self.group_id, e);
                None
            }
        }
    }

    /// Partition count of every topic that exists; missing topics are skipped
    fn partition_counts(
        &self,
        topics: &BTreeSet<String>,
        own_topics: &BTreeSet<String>,
        errors: &mut Vec<ConsumerPollError>,
    ) -> BTreeMap<String, i32> {
        let mut counts = BTreeMap::new();
        for topic in topics {
            match self.transport.metadata(topic) {
                Ok(metadata) if metadata.partition_count > 0 => {
                    counts.insert(topic.clone(), metadata.partition_count);
                }
                Ok(_) => {}
                Err(err) if err.code() == ERROR_UNKNOWN_TOPIC_OR_PARTITION => {
                    if own_topics.contains(topic) {
                        errors.push(ConsumerPollError::UnknownTopic(topic.clone()));
                    }
                }
                Err(err) => {
                    warn!("Metadata for {} failed: {}", topic, err);
                    errors.push(ConsumerPollError::Group(err));
                }
            }
        }
        counts
    }

    fn sync(&mut self, now: Instant, errors: &mut Vec<ConsumerPollError>) -> MembershipEvent {
        let Phase::Sync {
            generation,
            assignments,
            ..
        } = &self.phase
        else {
            return MembershipEvent::None;
        };

        let request = SyncGroupRequest {
            group_id: self.group_id.clone(),
            member_id: generation.member_id.clone(),
            generation_id: generation.generation_id,
            assignments: assignments.clone(),
        };

        match self.transport.sync_group(&request) {
            Ok(None) => {
                if let Phase::Sync { retry_at, .. } = &mut self.phase {
                    *retry_at = now + Duration::from_millis(GROUP_PENDING_RETRY_MS);
                }
                MembershipEvent::None
            }
            Ok(Some(bytes)) => {
                let assignment = if bytes.is_empty() {
                    MemberAssignment::new()
                } else {
                    match MemberAssignment::parse(&bytes) {
                        Ok(assignment) => assignment,
                        Err(e) => {
                            warn!("Group {}: undecodable assignment: {}", self.group_id, e);
                            MemberAssignment::new()
                        }
                    }
                };

                let phase = std::mem::replace(
                    &mut self.phase,
                    Phase::Stable {
                        next_heartbeat: now + self.heartbeat_interval,
                    },
                );
                if let Phase::Sync { generation, .. } = phase {
                    info!(
                        "Group {}: generation {} stable with {} partitions",
                        self.group_id,
                        generation.generation_id,
                        assignment.partition_count()
                    );
                    self.generation = Some(generation);
                }
                MembershipEvent::Assigned(assignment.partitions())
            }
            Err(err) => {
                self.handle_group_error("SyncGroup", err, now, errors);
                MembershipEvent::None
            }
        }
    }

    fn heartbeat(&mut self, now: Instant, errors: &mut Vec<ConsumerPollError>) -> MembershipEvent {
        let (Some(member_id), Some(generation)) = (&self.member_id, &self.generation) else {
            self.start_join();
            return MembershipEvent::RebalanceRequired;
        };

        let result = self
            .transport
            .heartbeat(&self.group_id, member_id, generation.generation_id);
        self.phase = Phase::Stable {
            next_heartbeat: now + self.heartbeat_interval,
        };

        match result {
            Ok(()) => MembershipEvent::None,
            Err(err) => match err.code() {
                ERROR_REBALANCE_IN_PROGRESS | ERROR_ILLEGAL_GENERATION => {
                    info!("Group {}: rebalance signalled by heartbeat", self.group_id);
                    MembershipEvent::RebalanceRequired
                }
                ERROR_UNKNOWN_MEMBER_ID => {
                    info!("Group {}: member id no longer known, rejoining", self.group_id);
                    self.member_id = None;
                    MembershipEvent::RebalanceRequired
                }
                _ => {
                    warn!("Group {}: heartbeat failed: {}", self.group_id, err);
                    errors.push(ConsumerPollError::Group(err));
                    MembershipEvent::None
                }
            },
        }
    }

    /// Leader only: rejoin when partition counts changed since the last assignment
    fn check_leader_metadata(
        &mut self,
        now: Instant,
        errors: &mut Vec<ConsumerPollError>,
    ) -> MembershipEvent {
        let is_leader = self.generation.as_ref().is_some_and(GroupGeneration::is_leader);
        if !is_leader || now < self.next_metadata_check {
            return MembershipEvent::None;
        }
        self.next_metadata_check = now + self.metadata_refresh_interval;

        let topics: BTreeSet<String> = self.leader_topics.keys().cloned().collect();
        let mut ignored = Vec::new();
        let counts = self.partition_counts(&topics, &BTreeSet::new(), &mut ignored);
        errors.extend(ignored);

        let changed = counts
            .iter()
            .any(|(topic, count)| self.leader_topics.get(topic) != Some(count));
        if changed {
            info!(
                "Group {}: partition counts changed, rebalancing",
                self.group_id
            );
            return MembershipEvent::RebalanceRequired;
        }
        MembershipEvent::None
    }

    fn handle_group_error(
        &mut self,
        request: &str,
        err: TransportError,
        now: Instant,
        errors: &mut Vec<ConsumerPollError>,
    ) {
        match err.code() {
            ERROR_UNKNOWN_MEMBER_ID => {
                debug!("Group {}: {} with unknown member id, resetting", self.group_id, request);
                self.member_id = None;
                self.phase = Phase::Join { retry_at: now };
            }
            ERROR_REBALANCE_IN_PROGRESS | ERROR_ILLEGAL_GENERATION => {
                debug!("Group {}: {} raced a rebalance, rejoining", self.group_id, request);
                self.phase = Phase::Join { retry_at: now };
            }
            _ => {
                warn!("Group {}: {} failed: {}", self.group_id, request, err);
                errors.push(ConsumerPollError::Group(err));
                self.phase = Phase::Join {
                    retry_at: now + self.retry_backoff,
                };
            }
        }
    }

    /// Leave the group, forgetting member id and generation
    pub fn leave(&mut self) {
        if let Some(member_id) = self.member_id.take() {
            match self.transport.leave_group(&self.group_id, &member_id) {
                Ok(()) => info!("Group {}: {} left", self.group_id, member_id),
                Err(e) => warn!("Group {}: leave failed: {}", self.group_id, e),
            }
        }
        self.generation = None;
        self.leader_topics.clear();
        self.phase = Phase::Idle;
    }
}
