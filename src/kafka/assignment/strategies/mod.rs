//! Assignment Strategy Module
//!
//! Defines the `AssignmentStrategy` trait and the two built-in strategies.
//!
//! # Strategy Selection
//!
//! Consumers advertise their strategies (in `partition.assignment.strategy`
//! order) in JoinGroup. The coordinator picks one that every member supports
//! using `select_common_strategy()`, preferring roundrobin over range.

pub mod range;
pub mod roundrobin;

use std::collections::{BTreeMap, BTreeSet};

use super::member_assignment::MemberAssignment;
use super::subscription::MemberSubscription;
use crate::kafka::constants::{STRATEGY_RANGE, STRATEGY_ROUNDROBIN};

pub use range::RangeStrategy;
pub use roundrobin::RoundRobinStrategy;

/// Input for partition assignment computation
#[derive(Debug, Clone, Default)]
pub struct AssignmentInput {
    /// member_id -> parsed subscription (ordered by member id)
    pub subscriptions: BTreeMap<String, MemberSubscription>,

    /// topic -> partition count, for every topic the leader found metadata for
    pub topic_partitions: BTreeMap<String, i32>,
}

impl AssignmentInput {
    pub fn new(
        subscriptions: BTreeMap<String, MemberSubscription>,
        topic_partitions: BTreeMap<String, i32>,
    ) -> Self {
        Self {
            subscriptions,
            topic_partitions,
        }
    }

    /// Members subscribed to `topic`, sorted by member id
    pub fn members_for_topic(&self, topic: &str) -> Vec<&str> {
        self.subscriptions
            .iter()
            .filter(|(_, sub)| sub.includes(topic))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// An output map with an empty assignment for every member
    pub(crate) fn empty_output(&self) -> AssignmentOutput {
        self.subscriptions
            .keys()
            .map(|id| (id.clone(), MemberAssignment::new()))
            .collect()
    }
}

/// member_id -> MemberAssignment
pub type AssignmentOutput = BTreeMap<String, MemberAssignment>;

/// A partition assignment algorithm
///
/// Implementations must be deterministic: every member of a group may become
/// leader, and the same input must yield the same assignment.
pub trait AssignmentStrategy: Send + Sync {
    /// Protocol name advertised in JoinGroup
    fn name(&self) -> &'static str;

    /// Compute assignments for every member in `input`
    ///
    /// Every member appears in the output, possibly with no partitions, and
    /// every partition of a subscribed topic goes to exactly one subscriber.
    fn assign(&self, input: &AssignmentInput) -> AssignmentOutput;
}

/// Create an assignment strategy by name (case-insensitive)
pub fn create_strategy(name: &str) -> Option<Box<dyn AssignmentStrategy>> {
    match name.to_lowercase().as_str() {
        STRATEGY_RANGE => Some(Box::new(RangeStrategy)),
        STRATEGY_ROUNDROBIN => Some(Box::new(RoundRobinStrategy)),
        _ => None,
    }
}

fn strategy_priority(name: &str) -> i32 {
    match name {
        STRATEGY_ROUNDROBIN => 2,
        STRATEGY_RANGE => 1,
        _ => 0,
    }
}

/// Select a strategy supported by every member
///
/// # Arguments
/// * `member_protocols` - Each member's (strategy_name, metadata) list
///
/// # Returns
/// The highest-priority common strategy (lowercased), or None when the
/// members share none or there are no members
pub fn select_common_strategy<'a>(
    member_protocols: impl IntoIterator<Item = &'a [(String, Vec<u8>)]>,
) -> Option<String> {
    let mut common: Option<BTreeSet<String>> = None;
    for protocols in member_protocols {
        let names: BTreeSet<String> = protocols.iter().map(|(n, _)| n.to_lowercase()).collect();
        common = Some(match common {
            None => names,
            Some(acc) => acc.intersection(&names).cloned().collect(),
        });
    }

    // BTreeSet order breaks priority ties deterministically
    common?
        .into_iter()
        .rev()
        .max_by_key(|name| strategy_priority(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocols(names: &[&str]) -> Vec<(String, Vec<u8>)> {
        names.iter().map(|n| (n.to_string(), vec![])).collect()
    }

    #[test]
    fn test_create_strategy_by_name() {
        assert_eq!(create_strategy("range").unwrap().name(), "range");
        assert_eq!(create_strategy("RoundRobin").unwrap().name(), "roundrobin");
        assert!(create_strategy("cooperative-sticky").is_none());
    }

    #[test]
    fn test_select_prefers_roundrobin() {
        let a = protocols(&["range", "roundrobin"]);
        let b = protocols(&["roundrobin", "range"]);
        let selected = select_common_strategy([a.as_slice(), b.as_slice()]);
        assert_eq!(selected.as_deref(), Some("roundrobin"));
    }

    #[test]
    fn test_select_falls_back_to_shared_strategy() {
        let a = protocols(&["range", "roundrobin"]);
        let b = protocols(&["range"]);
        let selected = select_common_strategy([a.as_slice(), b.as_slice()]);
        assert_eq!(selected.as_deref(), Some("range"));
    }

    #[test]
    fn test_select_no_common_strategy() {
        let a = protocols(&["range"]);
        let b = protocols(&["roundrobin"]);
        assert!(select_common_strategy([a.as_slice(), b.as_slice()]).is_none());
    }

    #[test]
    fn test_select_with_no_members() {
        let none: Vec<&[(String, Vec<u8>)]> = Vec::new();
        assert!(select_common_strategy(none).is_none());
    }

    #[test]
    fn test_members_for_topic_sorted() {
        let mut subscriptions = BTreeMap::new();
        subscriptions.insert("m-2".to_string(), MemberSubscription::new(vec!["a".into()]));
        subscriptions.insert(
            "m-1".to_string(),
            MemberSubscription::new(vec!["a".into(), "b".into()]),
        );
        let input = AssignmentInput::new(subscriptions, BTreeMap::new());

        assert_eq!(input.members_for_topic("a"), vec!["m-1", "m-2"]);
        assert_eq!(input.members_for_topic("b"), vec!["m-1"]);
        assert!(input.members_for_topic("c").is_empty());
    }
}
