//! Consumer Group Coordinator
//!
//! Broker-side group membership for `MemoryCluster`. Membership lives in
//! memory and is rebuilt from JoinGroup requests; committed offsets are kept
//! per group alongside it.
//!
//! # State Machine
//!
//! ```text
//! Empty → PreparingRebalance → CompletingRebalance → Stable
//!              ↑                                        │
//!              └──── join / leave / expiry / change ────┘
//! ```
//!
//! - **Empty**: No members in the group
//! - **PreparingRebalance**: Waiting for every known member to rejoin
//! - **CompletingRebalance**: Generation bumped; waiting for the leader's SyncGroup
//! - **Stable**: Assignments distributed
//!
//! # Non-blocking joins
//!
//! A real coordinator parks JoinGroup requests until every member has rejoined.
//! Here a join that cannot complete yet answers `Pending` and the client simply
//! joins again; SyncGroup answers `None` until the leader has assigned. Both
//! sides therefore stay driven by the consumer's own `poll` loop.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::kafka::assignment::select_common_strategy;
use crate::kafka::constants::{
    ERROR_ILLEGAL_GENERATION, ERROR_INCONSISTENT_GROUP_PROTOCOL, ERROR_REBALANCE_IN_PROGRESS,
    ERROR_UNKNOWN_MEMBER_ID, NO_GENERATION,
};
use crate::kafka::error::TransportError;
use crate::kafka::messages::TopicPartition;
use crate::kafka::transport::{
    GroupGeneration, JoinGroupRequest, JoinGroupResponse, OffsetCommitRequest, SyncGroupRequest,
    TransportResult,
};

/// Consumer group member information
#[derive(Debug, Clone)]
pub struct GroupMember {
    /// Unique member ID ("{client_id}-{uuid}")
    pub member_id: String,
    pub client_id: String,
    /// Removed if no request arrives within this window
    pub session_timeout: Duration,
    /// Vec<(strategy_name, subscription_metadata)>
    pub protocols: Vec<(String, Vec<u8>)>,
    /// Assignment from the leader's SyncGroup in the current generation
    pub assignment: Option<Vec<u8>>,
    pub last_seen: Instant,
    /// Rejoined since the last rebalance started
    pub joined: bool,
}

impl GroupMember {
    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.session_timeout
    }

    fn metadata_for(&self, protocol: &str) -> Vec<u8> {
        self.protocols
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(protocol))
            .map(|(_, metadata)| metadata.clone())
            .unwrap_or_default()
    }
}

/// Consumer group state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Empty,
    PreparingRebalance,
    CompletingRebalance,
    Stable,
}

/// Consumer group metadata and state
#[derive(Debug, Clone)]
pub struct ConsumerGroup {
    pub group_id: String,
    /// Increments every time a join phase completes
    pub generation_id: i32,
    /// Strategy selected for the current generation
    pub protocol_name: Option<String>,
    /// Leader computes assignments for the whole group
    pub leader: Option<String>,
    /// Members keyed by member_id (ordered, so leader fallback is deterministic)
    pub members: BTreeMap<String, GroupMember>,
    pub state: GroupState,
    /// Committed offsets (next offset to consume)
    pub offsets: HashMap<TopicPartition, i64>,
}

impl ConsumerGroup {
    fn new(group_id: String) -> Self {
        Self {
            group_id,
            generation_id: 0,
            protocol_name: None,
            leader: None,
            members: BTreeMap::new(),
            state: GroupState::Empty,
            offsets: HashMap::new(),
        }
    }

    /// Every member must rejoin; assignments of the old generation are void
    fn prepare_rebalance(&mut self, reason: &str) {
        for member in self.members.values_mut() {
            member.joined = false;
            member.assignment = None;
        }
        self.state = GroupState::PreparingRebalance;
        info!(
            "Group {} preparing rebalance after generation {} ({})",
            self.group_id, self.generation_id, reason
        );
    }

    fn remove_member(&mut self, member_id: &str, reason: &str) -> bool {
        if self.members.remove(member_id).is_none() {
            return false;
        }
        if self.leader.as_deref() == Some(member_id) {
            self.leader = None;
        }

        if self.members.is_empty() {
            self.state = GroupState::Empty;
            self.protocol_name = None;
            debug!("Group {} is now empty", self.group_id);
        } else {
            self.prepare_rebalance(reason);
        }
        true
    }

    /// Drop members whose session expired
    fn expire_members(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .members
            .values()
            .filter(|m| m.is_timed_out(now))
            .map(|m| m.member_id.clone())
            .collect();
        for member_id in expired {
            info!("Group {}: session of {} expired", self.group_id, member_id);
            self.remove_member(&member_id, "member session expired");
        }
    }

    /// Finish the join phase once every member has rejoined
    fn try_complete_join(&mut self) -> TransportResult<()> {
        if self.state != GroupState::PreparingRebalance
            || self.members.values().any(|m| !m.joined)
        {
            return Ok(());
        }

        let protocol =
            select_common_strategy(self.members.values().map(|m| m.protocols.as_slice()))
                .ok_or_else(|| TransportError::broker(ERROR_INCONSISTENT_GROUP_PROTOCOL))?;

        let leader_present = self
            .leader
            .as_ref()
            .is_some_and(|l| self.members.contains_key(l));
        if !leader_present {
            self.leader = self.members.keys().next().cloned();
        }

        self.generation_id += 1;
        self.protocol_name = Some(protocol);
        self.state = GroupState::CompletingRebalance;
        info!(
            "Group {} completed join phase: generation {}, {} members, protocol {:?}",
            self.group_id,
            self.generation_id,
            self.members.len(),
            self.protocol_name
        );
        Ok(())
    }

    fn generation_for(&self, member_id: &str) -> GroupGeneration {
        let protocol_name = self.protocol_name.clone().unwrap_or_default();
        let leader_id = self.leader.clone().unwrap_or_default();
        let members = if leader_id == member_id {
            self.members
                .values()
                .map(|m| (m.member_id.clone(), m.metadata_for(&protocol_name)))
                .collect()
        } else {
            Vec::new()
        };

        GroupGeneration {
            member_id: member_id.to_string(),
            generation_id: self.generation_id,
            leader_id,
            protocol_name,
            members,
        }
    }

    fn join(&mut self, request: &JoinGroupRequest, now: Instant) -> TransportResult<JoinGroupResponse> {
        if request.protocols.is_empty() {
            return Err(TransportError::broker(ERROR_INCONSISTENT_GROUP_PROTOCOL));
        }

        let member_id = match &request.member_id {
            Some(id) if self.members.contains_key(id) => id.clone(),
            Some(id) => {
                debug!("JoinGroup from unknown member {} in group {}", id, self.group_id);
                return Err(TransportError::broker(ERROR_UNKNOWN_MEMBER_ID));
            }
            None => {
                // A newcomer must share at least one strategy with the group
                let existing = self.members.values().map(|m| m.protocols.as_slice());
                let candidate = std::iter::once(request.protocols.as_slice()).chain(existing);
                if select_common_strategy(candidate).is_none() {
                    return Err(TransportError::broker(ERROR_INCONSISTENT_GROUP_PROTOCOL));
                }

                let member_id = generate_member_id(&request.client_id);
                self.prepare_rebalance("new member joined");
                self.members.insert(
                    member_id.clone(),
                    GroupMember {
                        member_id: member_id.clone(),
                        client_id: request.client_id.clone(),
                        session_timeout: request.session_timeout,
                        protocols: request.protocols.clone(),
                        assignment: None,
                        last_seen: now,
                        joined: true,
                    },
                );
                member_id
            }
        };

        debug!(
            "JoinGroup: group_id={}, member_id={}, state={:?}",
            self.group_id, member_id, self.state
        );

        let is_leader = self.leader.as_deref() == Some(member_id.as_str());
        let state = self.state;
        if let Some(member) = self.members.get_mut(&member_id) {
            member.last_seen = now;
            member.session_timeout = request.session_timeout;
            let changed = member.protocols != request.protocols;
            member.protocols = request.protocols.clone();

            match state {
                GroupState::CompletingRebalance | GroupState::Stable if member.joined && !changed => {
                    if state == GroupState::Stable && is_leader {
                        // Leader rejoin requests a fresh assignment (e.g. partition count change)
                        self.prepare_rebalance("leader rejoined");
                    } else {
                        return Ok(JoinGroupResponse::Joined(self.generation_for(&member_id)));
                    }
                }
                GroupState::CompletingRebalance | GroupState::Stable => {
                    self.prepare_rebalance("member metadata changed");
                }
                GroupState::PreparingRebalance | GroupState::Empty => {}
            }
        }

        if let Some(member) = self.members.get_mut(&member_id) {
            member.joined = true;
        }
        self.try_complete_join()?;

        match self.state {
            GroupState::CompletingRebalance | GroupState::Stable => {
                Ok(JoinGroupResponse::Joined(self.generation_for(&member_id)))
            }
            _ => Ok(JoinGroupResponse::Pending { member_id }),
        }
    }

    fn sync(&mut self, request: &SyncGroupRequest, now: Instant) -> TransportResult<Option<Vec<u8>>> {
        let is_leader = self.leader.as_deref() == Some(request.member_id.as_str());
        let state = self.state;
        let generation_id = self.generation_id;

        let member = self
            .members
            .get_mut(&request.member_id)
            .ok_or_else(|| TransportError::broker(ERROR_UNKNOWN_MEMBER_ID))?;
        member.last_seen = now;

        if state == GroupState::PreparingRebalance {
            return Err(TransportError::broker(ERROR_REBALANCE_IN_PROGRESS));
        }
        if generation_id != request.generation_id {
            return Err(TransportError::broker(ERROR_ILLEGAL_GENERATION));
        }

        if is_leader && state == GroupState::CompletingRebalance {
            for member in self.members.values_mut() {
                member.assignment = Some(
                    request
                        .assignments
                        .iter()
                        .find(|(id, _)| *id == member.member_id)
                        .map(|(_, bytes)| bytes.clone())
                        .unwrap_or_default(),
                );
            }
            self.state = GroupState::Stable;
            info!(
                "Group {} stable at generation {} with {} members",
                self.group_id,
                self.generation_id,
                self.members.len()
            );
        }

        if self.state != GroupState::Stable {
            return Ok(None);
        }
        Ok(self
            .members
            .get(&request.member_id)
            .map(|m| m.assignment.clone().unwrap_or_default()))
    }

    fn heartbeat(&mut self, member_id: &str, generation_id: i32, now: Instant) -> TransportResult<()> {
        let member = self
            .members
            .get_mut(member_id)
            .ok_or_else(|| TransportError::broker(ERROR_UNKNOWN_MEMBER_ID))?;
        member.last_seen = now;

        if self.state == GroupState::PreparingRebalance {
            return Err(TransportError::broker(ERROR_REBALANCE_IN_PROGRESS));
        }
        if self.generation_id != generation_id {
            return Err(TransportError::broker(ERROR_ILLEGAL_GENERATION));
        }
        Ok(())
    }

    fn validate_commit(&self, request: &OffsetCommitRequest) -> TransportResult<()> {
        match &request.member_id {
            None if request.generation_id == NO_GENERATION => {
                if self.members.is_empty() {
                    Ok(())
                } else {
                    Err(TransportError::broker(ERROR_UNKNOWN_MEMBER_ID))
                }
            }
            None => Err(TransportError::broker(ERROR_UNKNOWN_MEMBER_ID)),
            Some(member_id) => {
                if !self.members.contains_key(member_id) {
                    return Err(TransportError::broker(ERROR_UNKNOWN_MEMBER_ID));
                }
                if self.generation_id != request.generation_id {
                    return Err(TransportError::broker(ERROR_ILLEGAL_GENERATION));
                }
                Ok(())
            }
        }
    }
}

/// Thread-safe consumer group coordinator
///
/// Every operation first expires members whose session lapsed, so a consumer
/// that vanished without leaving is eventually removed and the group rebalances.
pub struct GroupCoordinator {
    groups: RwLock<HashMap<String, ConsumerGroup>>,
}

impl GroupCoordinator {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Handle JoinGroup
    pub fn join_group(&self, request: &JoinGroupRequest) -> TransportResult<JoinGroupResponse> {
        let now = Instant::now();
        let mut groups = self.groups.write();
        let group = groups
            .entry(request.group_id.clone())
            .or_insert_with(|| ConsumerGroup::new(request.group_id.clone()));
        group.expire_members(now);
        group.join(request, now)
    }

    /// Handle SyncGroup
    ///
    /// The leader's call stores assignments for every member; members missing
    /// from the leader's list get an empty assignment.
    pub fn sync_group(&self, request: &SyncGroupRequest) -> TransportResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(&request.group_id)
            .ok_or_else(|| TransportError::broker(ERROR_UNKNOWN_MEMBER_ID))?;
        group.expire_members(now);
        group.sync(request, now)
    }

    /// Handle Heartbeat
    pub fn heartbeat(&self, group_id: &str, member_id: &str, generation_id: i32) -> TransportResult<()> {
        let now = Instant::now();
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| TransportError::broker(ERROR_UNKNOWN_MEMBER_ID))?;
        group.expire_members(now);
        group.heartbeat(member_id, generation_id, now)
    }

    /// Handle LeaveGroup; remaining members rebalance
    pub fn leave_group(&self, group_id: &str, member_id: &str) -> TransportResult<()> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| TransportError::broker(ERROR_UNKNOWN_MEMBER_ID))?;

        debug!("LeaveGroup: group_id={}, member_id={}", group_id, member_id);
        if group.remove_member(member_id, "member left") {
            Ok(())
        } else {
            Err(TransportError::broker(ERROR_UNKNOWN_MEMBER_ID))
        }
    }

    /// Handle OffsetCommit
    ///
    /// Commits from outside a generation (`member_id: None`, generation -1)
    /// are only accepted while the group has no members.
    pub fn commit_offsets(&self, request: &OffsetCommitRequest) -> TransportResult<()> {
        let now = Instant::now();
        let mut groups = self.groups.write();
        let group = groups
            .entry(request.group_id.clone())
            .or_insert_with(|| ConsumerGroup::new(request.group_id.clone()));
        group.expire_members(now);
        group.validate_commit(request)?;

        for (tp, offset) in &request.offsets {
            group.offsets.insert(tp.clone(), *offset);
        }
        debug!(
            "Group {} committed {} offsets",
            request.group_id,
            request.offsets.len()
        );
        Ok(())
    }

    /// Handle OffsetFetch
    pub fn fetch_committed(
        &self,
        group_id: &str,
        partitions: &[TopicPartition],
    ) -> HashMap<TopicPartition, i64> {
        let groups = self.groups.read();
        let Some(group) = groups.get(group_id) else {
            return HashMap::new();
        };
        partitions
            .iter()
            .filter_map(|tp| group.offsets.get(tp).map(|o| (tp.clone(), *o)))
            .collect()
    }

    /// Snapshot of a group for inspection
    pub fn group(&self, group_id: &str) -> Option<ConsumerGroup> {
        self.groups.read().get(group_id).cloned()
    }
}

impl Default for GroupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a unique member ID for a consumer
///
/// Format: {client_id}-{uuid}
fn generate_member_id(client_id: &str) -> String {
    format!("{}-{}", client_id, Uuid::new_v4())
}
