//! `MockTransport` setups
//!
//! These let tests script transport failures that `MemoryCluster` cannot
//! produce on demand.

use crate::kafka::transport::{MockTransport, TopicMetadata};

/// Answer every metadata request with `partitions` partitions
pub fn mock_topic_metadata(mock: &mut MockTransport, partitions: i32) {
    mock.expect_metadata().returning(move |name| {
        Ok(TopicMetadata {
            name: name.to_string(),
            partition_count: partitions,
        })
    });
}

/// A mock transport that knows every topic, with `partitions` partitions each
pub fn mock_transport_with_topic(partitions: i32) -> MockTransport {
    let mut mock = MockTransport::new();
    mock_topic_metadata(&mut mock, partitions);
    mock
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::transport::Transport;

    #[test]
    fn test_mock_metadata_for_any_topic() {
        let mock = mock_transport_with_topic(4);
        assert_eq!(mock.metadata("a").unwrap().partition_count, 4);
        assert_eq!(mock.metadata("b").unwrap().name, "b");
    }
}
