//! In-process Kafka cluster
//!
//! `MemoryCluster` implements `Transport` entirely in memory: topics are
//! vectors of append-only partition logs, and a `GroupCoordinator` handles
//! consumer groups and committed offsets. It stands in for a broker in tests
//! and in the fuzz client.
//!
//! # Long polling
//!
//! Fetches that find no data wait on a condition variable until a produce
//! appends to the log or `max_wait` elapses. A produce wakes every waiting
//! fetch; each re-checks its own partitions.
//!
//! # Fault injection
//!
//! - `set_unavailable(true)` fails every request with `TransportError::Unavailable`
//! - `reject_next_produce(topic, code)` fails the next produce to `topic` with `code`
//! - `truncate_before(tp, offset)` advances the log start offset (simulated retention)

pub mod coordinator;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace};

use crate::kafka::constants::{
    ERROR_INVALID_PARTITIONS, ERROR_OFFSET_OUT_OF_RANGE, ERROR_TOPIC_ALREADY_EXISTS,
    ERROR_UNKNOWN_TOPIC_OR_PARTITION,
};
use crate::kafka::error::TransportError;
use crate::kafka::messages::{now_millis, Record, TopicPartition};
use crate::kafka::transport::{
    FetchRequest, FetchedRecord, JoinGroupRequest, JoinGroupResponse, OffsetCommitRequest,
    OffsetSpec, PartitionData, SyncGroupRequest, TopicMetadata, Transport, TransportResult,
};

pub use coordinator::{ConsumerGroup, GroupCoordinator, GroupMember, GroupState};

/// One partition's log
#[derive(Debug, Default)]
struct PartitionLog {
    /// Offset of the first retained record
    log_start: i64,
    records: VecDeque<FetchedRecord>,
}

impl PartitionLog {
    fn high_watermark(&self) -> i64 {
        self.log_start + self.records.len() as i64
    }

    fn append(&mut self, records: &[Record]) -> i64 {
        let base = self.high_watermark();
        let now = now_millis();
        for (i, record) in records.iter().enumerate() {
            self.records.push_back(FetchedRecord {
                offset: base + i as i64,
                key: record.key.clone(),
                value: record.value.clone(),
                headers: record.headers.clone(),
                timestamp: record.timestamp.unwrap_or(now),
            });
        }
        base
    }

    /// Records from `offset` on, limited by `budget` bytes (always at least one)
    fn read(&self, offset: i64, budget: &mut usize, allow_oversized: bool) -> Vec<FetchedRecord> {
        let skip = (offset - self.log_start).max(0) as usize;
        let mut out = Vec::new();
        for record in self.records.iter().skip(skip) {
            let size = record.size();
            if size > *budget && !(allow_oversized && out.is_empty()) {
                break;
            }
            *budget = budget.saturating_sub(size);
            out.push(record.clone());
        }
        out
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    topics: HashMap<String, Vec<PartitionLog>>,
    /// topic -> error code for the next produce
    rejected_produce: HashMap<String, i16>,
}

impl ClusterState {
    fn partition(&self, tp: &TopicPartition) -> TransportResult<&PartitionLog> {
        self.topics
            .get(&tp.topic)
            .and_then(|logs| usize::try_from(tp.partition).ok().and_then(|p| logs.get(p)))
            .ok_or_else(|| TransportError::broker(ERROR_UNKNOWN_TOPIC_OR_PARTITION))
    }

    fn partition_mut(&mut self, tp: &TopicPartition) -> TransportResult<&mut PartitionLog> {
        self.topics
            .get_mut(&tp.topic)
            .and_then(|logs| usize::try_from(tp.partition).ok().and_then(|p| logs.get_mut(p)))
            .ok_or_else(|| TransportError::broker(ERROR_UNKNOWN_TOPIC_OR_PARTITION))
    }
}

/// In-memory broker implementing `Transport`
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
    /// Signalled on every successful produce
    data_arrived: Condvar,
    coordinator: GroupCoordinator,
    unavailable: AtomicBool,
    /// Partition count for auto-created topics; None disables auto-creation
    auto_create_partitions: Option<i32>,
}

impl MemoryCluster {
    /// An empty cluster without topic auto-creation
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
            data_arrived: Condvar::new(),
            coordinator: GroupCoordinator::new(),
            unavailable: AtomicBool::new(false),
            auto_create_partitions: None,
        }
    }

    /// Create unknown topics on first metadata request with `partitions` partitions
    pub fn with_auto_create_topics(mut self, partitions: i32) -> Self {
        self.auto_create_partitions = Some(partitions.max(1));
        self
    }

    pub fn create_topic(&self, name: &str, partitions: i32) -> TransportResult<()> {
        if partitions <= 0 {
            return Err(TransportError::broker(ERROR_INVALID_PARTITIONS));
        }
        let mut state = self.state.lock();
        if state.topics.contains_key(name) {
            return Err(TransportError::broker(ERROR_TOPIC_ALREADY_EXISTS));
        }
        state.topics.insert(
            name.to_string(),
            (0..partitions).map(|_| PartitionLog::default()).collect(),
        );
        info!("Created topic {} with {} partitions", name, partitions);
        Ok(())
    }

    /// Grow a topic to `partitions` partitions
    pub fn add_partitions(&self, name: &str, partitions: i32) -> TransportResult<()> {
        let mut state = self.state.lock();
        let logs = state
            .topics
            .get_mut(name)
            .ok_or_else(|| TransportError::broker(ERROR_UNKNOWN_TOPIC_OR_PARTITION))?;
        let total = usize::try_from(partitions)
            .ok()
            .filter(|&n| n > logs.len())
            .ok_or_else(|| TransportError::broker(ERROR_INVALID_PARTITIONS))?;
        logs.resize_with(total, PartitionLog::default);
        info!("Topic {} now has {} partitions", name, partitions);
        Ok(())
    }

    /// Drop records below `offset`, as retention would
    pub fn truncate_before(&self, tp: &TopicPartition, offset: i64) -> TransportResult<()> {
        let mut state = self.state.lock();
        let log = state.partition_mut(tp)?;
        let target = offset.min(log.high_watermark());
        while log.log_start < target {
            log.records.pop_front();
            log.log_start += 1;
        }
        debug!("Truncated {} before offset {}", tp, log.log_start);
        Ok(())
    }

    /// Fail (or stop failing) every request with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
        // Let long-polling fetches observe the change
        self.data_arrived.notify_all();
    }

    /// Fail the next produce to `topic` with broker error `code`
    pub fn reject_next_produce(&self, topic: &str, code: i16) {
        self.state.lock().rejected_produce.insert(topic.to_string(), code);
    }

    // ===== Inspection =====

    pub fn high_watermark(&self, tp: &TopicPartition) -> Option<i64> {
        self.state.lock().partition(tp).ok().map(PartitionLog::high_watermark)
    }

    /// All retained records of a partition
    pub fn records(&self, tp: &TopicPartition) -> Vec<FetchedRecord> {
        self.state
            .lock()
            .partition(tp)
            .map(|log| log.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn committed_offset(&self, group_id: &str, tp: &TopicPartition) -> Option<i64> {
        self.coordinator
            .fetch_committed(group_id, std::slice::from_ref(tp))
            .get(tp)
            .copied()
    }

    pub fn group_state(&self, group_id: &str) -> Option<GroupState> {
        self.coordinator.group(group_id).map(|g| g.state)
    }

    /// Member ids of a group, sorted
    pub fn group_members(&self, group_id: &str) -> Vec<String> {
        self.coordinator
            .group(group_id)
            .map(|g| g.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> TransportResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(TransportError::Unavailable("cluster marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn collect_fetch(state: &ClusterState, request: &FetchRequest) -> Vec<PartitionData> {
        let mut budget = request.max_bytes;
        let mut first = true;
        request
            .partitions
            .iter()
            .map(|(tp, offset)| match state.partition(tp) {
                Err(err) => PartitionData {
                    partition: tp.clone(),
                    error: Some(err),
                    high_watermark: -1,
                    log_start_offset: -1,
                    records: Vec::new(),
                },
                Ok(log) => {
                    let hwm = log.high_watermark();
                    let (error, records) = if *offset < log.log_start || *offset > hwm {
                        (Some(TransportError::broker(ERROR_OFFSET_OUT_OF_RANGE)), Vec::new())
                    } else {
                        let records = log.read(*offset, &mut budget, first);
                        if !records.is_empty() {
                            first = false;
                        }
                        (None, records)
                    };
                    PartitionData {
                        partition: tp.clone(),
                        error,
                        high_watermark: hwm,
                        log_start_offset: log.log_start,
                        records,
                    }
                }
            })
            .collect()
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryCluster {
    fn metadata(&self, topic: &str) -> TransportResult<TopicMetadata> {
        self.check_available()?;
        let mut state = self.state.lock();
        if !state.topics.contains_key(topic) {
            let Some(partitions) = self.auto_create_partitions else {
                return Err(TransportError::broker(ERROR_UNKNOWN_TOPIC_OR_PARTITION));
            };
            state.topics.insert(
                topic.to_string(),
                (0..partitions).map(|_| PartitionLog::default()).collect(),
            );
            info!("Auto-created topic {} with {} partitions", topic, partitions);
        }

        let partition_count = state.topics.get(topic).map_or(0, |logs| logs.len() as i32);
        Ok(TopicMetadata {
            name: topic.to_string(),
            partition_count,
        })
    }

    fn produce(&self, partition: &TopicPartition, records: &[Record]) -> TransportResult<i64> {
        self.check_available()?;
        let mut state = self.state.lock();
        if let Some(code) = state.rejected_produce.remove(&partition.topic) {
            debug!("Rejecting produce to {} with injected error {}", partition, code);
            return Err(TransportError::broker(code));
        }

        let base = state.partition_mut(partition)?.append(records);
        drop(state);

        trace!("Appended {} records to {} at offset {}", records.len(), partition, base);
        self.data_arrived.notify_all();
        Ok(base)
    }

    fn fetch(&self, request: &FetchRequest) -> TransportResult<Vec<PartitionData>> {
        let deadline = Instant::now() + request.max_wait;
        let mut state = self.state.lock();
        loop {
            self.check_available()?;
            let response = Self::collect_fetch(&state, request);
            let ready = response
                .iter()
                .any(|p| p.error.is_some() || !p.records.is_empty());
            if ready || request.partitions.is_empty() {
                return Ok(response);
            }
            if self.data_arrived.wait_until(&mut state, deadline).timed_out() {
                return Ok(Self::collect_fetch(&state, request));
            }
        }
    }

    fn list_offset(&self, partition: &TopicPartition, spec: OffsetSpec) -> TransportResult<i64> {
        self.check_available()?;
        let state = self.state.lock();
        let log = state.partition(partition)?;
        Ok(match spec {
            OffsetSpec::Earliest => log.log_start,
            OffsetSpec::Latest => log.high_watermark(),
        })
    }

    fn join_group(&self, request: &JoinGroupRequest) -> TransportResult<JoinGroupResponse> {
        self.check_available()?;
        self.coordinator.join_group(request)
    }

    fn sync_group(&self, request: &SyncGroupRequest) -> TransportResult<Option<Vec<u8>>> {
        self.check_available()?;
        self.coordinator.sync_group(request)
    }

    fn heartbeat(&self, group_id: &str, member_id: &str, generation_id: i32) -> TransportResult<()> {
        self.check_available()?;
        self.coordinator.heartbeat(group_id, member_id, generation_id)
    }

    fn leave_group(&self, group_id: &str, member_id: &str) -> TransportResult<()> {
        self.check_available()?;
        self.coordinator.leave_group(group_id, member_id)
    }

    fn commit_offsets(&self, request: &OffsetCommitRequest) -> TransportResult<()> {
        self.check_available()?;
        self.coordinator.commit_offsets(request)
    }

    fn fetch_committed(
        &self,
        group_id: &str,
        partitions: &[TopicPartition],
    ) -> TransportResult<HashMap<TopicPartition, i64>> {
        self.check_available()?;
        Ok(self.coordinator.fetch_committed(group_id, partitions))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::kafka::constants::ERROR_MESSAGE_TOO_LARGE;

    fn record(value: &str) -> Record {
        Record {
            key: None,
            value: Some(value.as_bytes().to_vec()),
            headers: vec![],
            timestamp: None,
        }
    }

    fn fetch_request(tp: &TopicPartition, offset: i64, wait_ms: u64) -> FetchRequest {
        FetchRequest {
            partitions: vec![(tp.clone(), offset)],
            max_wait: Duration::from_millis(wait_ms),
            max_bytes: 1024 * 1024,
        }
    }

    #[test]
    fn test_produce_assigns_consecutive_offsets() {
        let cluster = MemoryCluster::new();
        cluster.create_topic("t", 2).unwrap();
        let tp = TopicPartition::new("t", 1);

        assert_eq!(cluster.produce(&tp, &[record("a"), record("b")]).unwrap(), 0);
        assert_eq!(cluster.produce(&tp, &[record("c")]).unwrap(), 2);
        assert_eq!(cluster.high_watermark(&tp), Some(3));
        assert_eq!(cluster.high_watermark(&TopicPartition::new("t", 0)), Some(0));

        let values: Vec<_> = cluster
            .records(&tp)
            .into_iter()
            .map(|r| (r.offset, r.value.unwrap()))
            .collect();
        assert_eq!(
            values,
            vec![(0, b"a".to_vec()), (1, b"b".to_vec()), (2, b"c".to_vec())]
        );
    }

    #[test]
    fn test_metadata_unknown_topic() {
        let cluster = MemoryCluster::new();
        let err = cluster.metadata("missing").unwrap_err();
        assert_eq!(err.code(), ERROR_UNKNOWN_TOPIC_OR_PARTITION);

        let cluster = MemoryCluster::new().with_auto_create_topics(3);
        assert_eq!(cluster.metadata("fresh").unwrap().partition_count, 3);
    }

    #[test]
    fn test_create_topic_validation() {
        let cluster = MemoryCluster::new();
        cluster.create_topic("t", 1).unwrap();
        assert_eq!(
            cluster.create_topic("t", 1).unwrap_err().code(),
            ERROR_TOPIC_ALREADY_EXISTS
        );
        assert_eq!(
            cluster.create_topic("u", 0).unwrap_err().code(),
            ERROR_INVALID_PARTITIONS
        );
        cluster.add_partitions("t", 4).unwrap();
        assert_eq!(cluster.metadata("t").unwrap().partition_count, 4);
    }

    #[test]
    fn test_add_partitions_rejects_shrinking_and_negative() {
        let cluster = MemoryCluster::new();
        cluster.create_topic("t", 2).unwrap();
        for total in [-1, 0, 2] {
            assert_eq!(
                cluster.add_partitions("t", total).unwrap_err().code(),
                ERROR_INVALID_PARTITIONS
            );
        }
        assert_eq!(cluster.metadata("t").unwrap().partition_count, 2);
    }

    #[test]
    fn test_fetch_returns_from_offset() {
        let cluster = MemoryCluster::new();
        cluster.create_topic("t", 1).unwrap();
        let tp = TopicPartition::new("t", 0);
        cluster
            .produce(&tp, &[record("a"), record("b"), record("c")])
            .unwrap();

        let response = cluster.fetch(&fetch_request(&tp, 1, 0)).unwrap();
        assert_eq!(response.len(), 1);
        let offsets: Vec<i64> = response[0].records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![1, 2]);
        assert_eq!(response[0].high_watermark, 3);
    }

    #[test]
    fn test_fetch_respects_max_bytes_but_returns_one() {
        let cluster = MemoryCluster::new();
        cluster.create_topic("t", 1).unwrap();
        let tp = TopicPartition::new("t", 0);
        cluster
            .produce(&tp, &[record("aaaa"), record("bbbb")])
            .unwrap();

        let mut request = fetch_request(&tp, 0, 0);
        request.max_bytes = 1;
        let response = cluster.fetch(&request).unwrap();
        assert_eq!(response[0].records.len(), 1);
    }

    #[test]
    fn test_fetch_out_of_range() {
        let cluster = MemoryCluster::new();
        cluster.create_topic("t", 1).unwrap();
        let tp = TopicPartition::new("t", 0);
        cluster.produce(&tp, &[record("a"), record("b")]).unwrap();
        cluster.truncate_before(&tp, 1).unwrap();

        assert_eq!(cluster.list_offset(&tp, OffsetSpec::Earliest).unwrap(), 1);
        assert_eq!(cluster.list_offset(&tp, OffsetSpec::Latest).unwrap(), 2);

        let response = cluster.fetch(&fetch_request(&tp, 0, 0)).unwrap();
        assert_eq!(
            response[0].error.as_ref().map(TransportError::code),
            Some(ERROR_OFFSET_OUT_OF_RANGE)
        );
        let response = cluster.fetch(&fetch_request(&tp, 5, 0)).unwrap();
        assert!(response[0].error.is_some());
    }

    #[test]
    fn test_fetch_long_poll_times_out() {
        let cluster = MemoryCluster::new();
        cluster.create_topic("t", 1).unwrap();
        let tp = TopicPartition::new("t", 0);

        let start = Instant::now();
        let response = cluster.fetch(&fetch_request(&tp, 0, 50)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(45));
        assert!(response[0].records.is_empty());
        assert!(response[0].error.is_none());
    }

    #[test]
    fn test_fetch_long_poll_wakes_on_produce() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.create_topic("t", 1).unwrap();
        let tp = TopicPartition::new("t", 0);

        let producer = {
            let cluster = Arc::clone(&cluster);
            let tp = tp.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                cluster.produce(&tp, &[record("late")]).unwrap();
            })
        };

        let start = Instant::now();
        let response = cluster.fetch(&fetch_request(&tp, 0, 5_000)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(response[0].records.len(), 1);
        producer.join().unwrap();
    }

    #[test]
    fn test_fault_injection() {
        let cluster = MemoryCluster::new();
        cluster.create_topic("t", 1).unwrap();
        let tp = TopicPartition::new("t", 0);

        cluster.reject_next_produce("t", ERROR_MESSAGE_TOO_LARGE);
        assert_eq!(
            cluster.produce(&tp, &[record("x")]).unwrap_err().code(),
            ERROR_MESSAGE_TOO_LARGE
        );
        assert_eq!(cluster.produce(&tp, &[record("x")]).unwrap(), 0);

        cluster.set_unavailable(true);
        assert!(matches!(
            cluster.metadata("t"),
            Err(TransportError::Unavailable(_))
        ));
        cluster.set_unavailable(false);
        assert!(cluster.metadata("t").is_ok());
    }

    #[test]
    fn test_produce_unknown_partition() {
        let cluster = MemoryCluster::new();
        cluster.create_topic("t", 1).unwrap();
        let err = cluster
            .produce(&TopicPartition::new("t", 3), &[record("x")])
            .unwrap_err();
        assert_eq!(err.code(), ERROR_UNKNOWN_TOPIC_OR_PARTITION);
    }
}
