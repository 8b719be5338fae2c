// Property-based tests using proptest
//
// These generate random inputs to check invariants that hold for every
// input: partitioner range, assignment coverage, queue bounds, and
// per-partition delivery order.

mod helpers;

#[cfg(test)]
mod property_tests {
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    use proptest::prelude::*;

    use kafka_core::kafka::assignment::{compute_assignments, MemberAssignment, MemberSubscription};
    use kafka_core::kafka::partitioner::{choose_partition, hash_partition, PartitionChoice};
    use kafka_core::{EnqueueError, MessageId, OutboundMessage, Producer, ProducerConfig};

    use crate::helpers::{cluster_with_topic, collecting_handler, producer_config};

    proptest! {
        #[test]
        fn test_hash_partition_in_range(key in prop::collection::vec(any::<u8>(), 0..64), count in 1i32..1000) {
            let partition = hash_partition(&key, count);
            prop_assert!((0..count).contains(&partition));
            // Deterministic for the same key
            prop_assert_eq!(partition, hash_partition(&key, count));
        }

        #[test]
        fn test_explicit_partition_checked(partition in -5i32..50, count in 1i32..40) {
            let choice = choose_partition(None, count, Some(partition));
            if (0..count).contains(&partition) {
                prop_assert_eq!(choice, PartitionChoice::Partition(partition));
            } else {
                prop_assert_eq!(choice, PartitionChoice::OutOfRange(partition));
            }
        }

        #[test]
        fn test_unkeyed_partition_in_range(count in 1i32..100) {
            match choose_partition(None, count, None) {
                PartitionChoice::Partition(p) => prop_assert!((0..count).contains(&p)),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }

        #[test]
        fn test_assignment_covers_each_partition_once(
            members in 1usize..6,
            partitions in 1i32..24,
            roundrobin in any::<bool>(),
        ) {
            let strategy = if roundrobin { "roundrobin" } else { "range" };
            let metadata = MemberSubscription::new(vec!["t".to_string()]).encode();
            let group: Vec<(String, Vec<u8>)> = (0..members)
                .map(|i| (format!("member-{}", i), metadata.clone()))
                .collect();
            let counts = BTreeMap::from([("t".to_string(), partitions)]);

            let result = compute_assignments(strategy, &group, &counts).unwrap();
            prop_assert_eq!(result.len(), members);

            let mut owners: HashMap<i32, usize> = HashMap::new();
            let mut sizes = Vec::new();
            for (_, bytes) in &result {
                let assignment = MemberAssignment::parse(bytes).unwrap();
                sizes.push(assignment.partition_count());
                for tp in assignment.partitions() {
                    *owners.entry(tp.partition).or_insert(0) += 1;
                }
            }
            prop_assert_eq!(owners.len(), partitions as usize);
            prop_assert!(owners.values().all(|&n| n == 1));
            // Single topic: both strategies balance to within one partition
            let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
            prop_assert!(max - min <= 1);
        }
    }

    proptest! {
        // Each case starts a delivery worker thread
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_queue_bound_enforced(bound in 1usize..20, attempts in 0usize..40) {
            let cluster = cluster_with_topic("t", 1);
            let (reports, handler) = collecting_handler();
            let config = ProducerConfig {
                queue_max_messages: bound,
                linger: Duration::from_secs(600),
                ..ProducerConfig::default()
            };
            let mut producer = Producer::new(config, cluster, handler).unwrap();

            let mut accepted = 0;
            for _ in 0..attempts {
                match producer.enqueue(OutboundMessage::to("t").with_value("v")) {
                    Ok(_) => accepted += 1,
                    Err(failure) => prop_assert_eq!(failure.error, EnqueueError::QueueFull),
                }
            }
            prop_assert_eq!(accepted, attempts.min(bound));
            prop_assert_eq!(producer.outstanding_count(), accepted);

            producer.close(Duration::ZERO);
            prop_assert_eq!(reports.lock().len(), accepted);
            prop_assert_eq!(producer.outstanding_count(), 0);
        }

        #[test]
        fn test_partition_order_preserved(targets in prop::collection::vec(0i32..3, 1..40)) {
            let cluster = cluster_with_topic("t", 3);
            let (reports, handler) = collecting_handler();
            let mut producer = Producer::new(producer_config(100), cluster, handler).unwrap();

            for (i, partition) in targets.iter().enumerate() {
                producer
                    .enqueue(OutboundMessage::to("t").with_partition(*partition).with_value(i.to_string()))
                    .unwrap();
            }
            prop_assert_eq!(producer.flush(Duration::from_secs(10)), 0);

            // Per partition, reports arrive in enqueue order with consecutive offsets
            let reports = reports.lock();
            let mut last: HashMap<i32, (MessageId, i64)> = HashMap::new();
            for report in reports.iter() {
                let partition = report.partition().unwrap();
                let offset = report.offset().unwrap();
                let value: usize = String::from_utf8_lossy(report.message.value.as_deref().unwrap())
                    .parse()
                    .unwrap();
                prop_assert_eq!(targets[value], partition);
                match last.insert(partition, (report.id, offset)) {
                    Some((previous_id, previous_offset)) => {
                        prop_assert!(previous_id < report.id);
                        prop_assert_eq!(offset, previous_offset + 1);
                    }
                    None => {
                        prop_assert_eq!(offset, 0);
                    }
                }
            }
            prop_assert_eq!(reports.len(), targets.len());
        }
    }
}
