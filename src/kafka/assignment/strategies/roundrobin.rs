//! RoundRobin Assignment Strategy
//!
//! All partitions of all subscribed topics, sorted by (topic, partition), are
//! dealt to the members one at a time. A partition skips members that do not
//! subscribe to its topic, and the dealer position carries over between topics
//! so small topics do not always land on the same member.
//!
//! # Example
//!
//! Topics A (3 partitions) and B (2), two members subscribed to both:
//! - member 1: A-0, A-2, B-1
//! - member 2: A-1, B-0

use super::{AssignmentInput, AssignmentOutput, AssignmentStrategy};
use crate::kafka::constants::STRATEGY_ROUNDROBIN;

/// RoundRobin partition assignment strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinStrategy;

impl AssignmentStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        STRATEGY_ROUNDROBIN
    }

    fn assign(&self, input: &AssignmentInput) -> AssignmentOutput {
        let mut result = input.empty_output();
        let members: Vec<&String> = input.subscriptions.keys().collect();
        if members.is_empty() {
            return result;
        }

        let mut cursor = 0usize;
        for (topic, &partition_count) in &input.topic_partitions {
            for partition in 0..partition_count.max(0) {
                // Advance to the next member subscribed to this topic
                let mut chosen = None;
                for step in 0..members.len() {
                    let idx = (cursor + step) % members.len();
                    let subscribed = input
                        .subscriptions
                        .get(members[idx])
                        .is_some_and(|sub| sub.includes(topic));
                    if subscribed {
                        chosen = Some(idx);
                        break;
                    }
                }

                let Some(idx) = chosen else {
                    break;
                };
                if let Some(assignment) = result.get_mut(members[idx]) {
                    assignment.add(topic, partition);
                }
                cursor = idx + 1;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::kafka::assignment::MemberSubscription;

    fn make_input(members: &[(&str, &[&str])], topics: &[(&str, i32)]) -> AssignmentInput {
        let subscriptions = members
            .iter()
            .map(|(id, subs)| {
                (
                    id.to_string(),
                    MemberSubscription::new(subs.iter().map(|s| s.to_string()).collect()),
                )
            })
            .collect();
        let topic_partitions: BTreeMap<String, i32> =
            topics.iter().map(|(t, n)| (t.to_string(), *n)).collect();
        AssignmentInput::new(subscriptions, topic_partitions)
    }

    #[test]
    fn test_deals_across_topics() {
        let input = make_input(
            &[("m-1", &["A", "B"]), ("m-2", &["A", "B"])],
            &[("A", 3), ("B", 2)],
        );
        let result = RoundRobinStrategy.assign(&input);

        assert_eq!(result["m-1"].topic_partitions["A"], vec![0, 2]);
        assert_eq!(result["m-1"].topic_partitions["B"], vec![1]);
        assert_eq!(result["m-2"].topic_partitions["A"], vec![1]);
        assert_eq!(result["m-2"].topic_partitions["B"], vec![0]);
    }

    #[test]
    fn test_skips_unsubscribed_members() {
        let input = make_input(&[("a", &["x"]), ("b", &["y"])], &[("x", 3), ("y", 1)]);
        let result = RoundRobinStrategy.assign(&input);

        assert_eq!(result["a"].topic_partitions["x"], vec![0, 1, 2]);
        assert_eq!(result["b"].topic_partitions["y"], vec![0]);
    }

    #[test]
    fn test_topic_without_subscribers_is_ignored() {
        let input = make_input(&[("a", &["x"])], &[("x", 1), ("orphan", 4)]);
        let result = RoundRobinStrategy.assign(&input);

        assert_eq!(result["a"].partition_count(), 1);
    }
}
