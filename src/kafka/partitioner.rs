//! Kafka-compatible partitioner
//!
//! Chooses the destination partition for a message the application did not
//! pin to a partition. Keyed messages use the `murmur2` crate with
//! `KAFKA_SEED`, matching the Java client's default partitioner, so the same
//! key lands on the same partition as it would from any other Kafka client.

use murmur2::{murmur2, KAFKA_SEED};
use rand::Rng;

/// Outcome of partition selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionChoice {
    /// Usable partition index
    Partition(i32),
    /// The explicit partition is not within `0..partition_count`
    OutOfRange(i32),
}

/// Compute the target partition for a record.
///
/// # Arguments
/// * `key` - Optional message key (if Some, used for hash-based routing)
/// * `partition_count` - Number of partitions for the topic (must be > 0)
/// * `explicit` - Application-specified partition, if any
///
/// # Behavior
/// - Explicit partition: passed through when in range
/// - Keyed: `toPositive(murmur2(key)) % partition_count`
/// - Neither: uniformly random partition
pub fn choose_partition(
    key: Option<&[u8]>,
    partition_count: i32,
    explicit: Option<i32>,
) -> PartitionChoice {
    debug_assert!(partition_count > 0, "partition_count must be positive");

    if let Some(partition) = explicit {
        return if (0..partition_count).contains(&partition) {
            PartitionChoice::Partition(partition)
        } else {
            PartitionChoice::OutOfRange(partition)
        };
    }

    match key {
        Some(k) => PartitionChoice::Partition(hash_partition(k, partition_count)),
        None => PartitionChoice::Partition(rand::thread_rng().gen_range(0..partition_count)),
    }
}

/// Partition for a key under Kafka's default hashing
pub fn hash_partition(key: &[u8], partition_count: i32) -> i32 {
    let hash = murmur2(key, KAFKA_SEED);
    // Mask the sign bit the way Utils.toPositive does
    ((hash & 0x7fff_ffff) as i32) % partition_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_partition_passes_through() {
        assert_eq!(
            choose_partition(Some(b"key"), 10, Some(5)),
            PartitionChoice::Partition(5)
        );
        assert_eq!(choose_partition(None, 10, Some(0)), PartitionChoice::Partition(0));
    }

    #[test]
    fn test_explicit_partition_out_of_range() {
        assert_eq!(choose_partition(None, 3, Some(3)), PartitionChoice::OutOfRange(3));
        assert_eq!(choose_partition(None, 3, Some(-1)), PartitionChoice::OutOfRange(-1));
    }

    #[test]
    fn test_key_based_routing_is_deterministic() {
        let first = choose_partition(Some(b"test-key"), 10, None);
        for _ in 0..10 {
            assert_eq!(choose_partition(Some(b"test-key"), 10, None), first);
        }
        match first {
            PartitionChoice::Partition(p) => assert!((0..10).contains(&p)),
            other => panic!("unexpected choice {:?}", other),
        }
    }

    #[test]
    fn test_null_key_stays_in_range() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            match choose_partition(None, 10, None) {
                PartitionChoice::Partition(p) => {
                    assert!((0..10).contains(&p));
                    seen.insert(p);
                }
                other => panic!("unexpected choice {:?}", other),
            }
        }
        assert!(seen.len() >= 3, "null keys should spread, saw {:?}", seen);
    }

    #[test]
    fn test_single_partition_topic() {
        assert_eq!(hash_partition(b"key1", 1), 0);
        assert_eq!(hash_partition(b"key2", 1), 0);
        assert_eq!(choose_partition(None, 1, None), PartitionChoice::Partition(0));
    }

    #[test]
    fn test_key_distribution_is_reasonably_uniform() {
        let mut counts = [0u32; 10];
        for i in 0..10_000 {
            let key = format!("unique-key-{}", i);
            counts[hash_partition(key.as_bytes(), 10) as usize] += 1;
        }
        for (i, &count) in counts.iter().enumerate() {
            assert!(
                (500..=1500).contains(&count),
                "Partition {} got {} messages, expected ~1000",
                i,
                count
            );
        }
    }
}
