use rdkafka::mocking::MockCluster;
use rdkafka::producer::DefaultProducerContext;

use crate::config::{ConsumerConfig, KafkaConfig};

/// Start an in-process librdkafka mock cluster with one broker, along with a
/// config pointing at it.
pub fn create_mock_kafka() -> (MockCluster<'static, DefaultProducerContext>, KafkaConfig) {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");
    let config = mock_kafka_config(&cluster);
    (cluster, config)
}

pub fn mock_kafka_config(cluster: &MockCluster<'static, DefaultProducerContext>) -> KafkaConfig {
    KafkaConfig {
        kafka_hosts: cluster.bootstrap_servers(),
        kafka_client_id: "kafka-stats-test".to_string(),
        kafka_statistics_interval_ms: 100,
        kafka_producer_linger_ms: 0,
        kafka_producer_queue_mib: 50,
        kafka_message_timeout_ms: 5000,
        kafka_compression_codec: "none".to_string(),
        kafka_tls: false,
    }
}

pub fn test_consumer_config(group: &str) -> ConsumerConfig {
    ConsumerConfig {
        kafka_consumer_group: group.to_string(),
        kafka_consumer_offset_reset: "earliest".to_string(),
        kafka_consumer_auto_commit: true,
        kafka_consumer_auto_commit_interval_ms: 100,
        kafka_consumer_session_timeout_ms: 6000,
    }
}
