//! Range Assignment Strategy
//!
//! For each topic independently, the subscribers (sorted by member id) each
//! receive a contiguous block of partitions. With `P` partitions and `C`
//! subscribers, every subscriber gets `P / C` partitions and the first
//! `P % C` get one extra.
//!
//! # Example
//!
//! 7 partitions, 3 consumers: `[0, 1, 2]`, `[3, 4]`, `[5, 6]`

use super::{AssignmentInput, AssignmentOutput, AssignmentStrategy};
use crate::kafka::constants::STRATEGY_RANGE;

/// Range partition assignment strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeStrategy;

impl AssignmentStrategy for RangeStrategy {
    fn name(&self) -> &'static str {
        STRATEGY_RANGE
    }

    fn assign(&self, input: &AssignmentInput) -> AssignmentOutput {
        let mut result = input.empty_output();

        for (topic, &partition_count) in &input.topic_partitions {
            let members = input.members_for_topic(topic);
            if members.is_empty() || partition_count <= 0 {
                continue;
            }

            let per_member = partition_count / members.len() as i32;
            let extra = partition_count % members.len() as i32;

            let mut next = 0;
            for (idx, member_id) in members.iter().enumerate() {
                let take = per_member + i32::from((idx as i32) < extra);
                if take == 0 {
                    continue;
                }
                if let Some(assignment) = result.get_mut(*member_id) {
                    for partition in next..next + take {
                        assignment.add(topic, partition);
                    }
                }
                next += take;
            }
        }

        result
    }
}
