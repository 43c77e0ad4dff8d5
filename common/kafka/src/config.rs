use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    pub kafka_hosts: String,

    #[envconfig(default = "kafka-stats-demo")]
    pub kafka_client_id: String,

    #[envconfig(default = "10000")]
    pub kafka_statistics_interval_ms: u32, // How often librdkafka emits a statistics snapshot

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,

    // A group with no committed offset starts from the oldest retained message
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Offsets are only committed once stored after processing: auto offset
    // /storing/ is always disabled, auto /committing/ is left to librdkafka.
    #[envconfig(default = "true")]
    pub kafka_consumer_auto_commit: bool,

    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    #[envconfig(default = "6000")]
    pub kafka_consumer_session_timeout_ms: u32,
}

impl KafkaConfig {
    /// Settings shared by every client built from this config: producer,
    /// consumer and admin.
    pub fn client_config(&self) -> rdkafka::ClientConfig {
        let mut client_config = rdkafka::ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("client.id", &self.kafka_client_id)
            .set(
                "statistics.interval.ms",
                self.kafka_statistics_interval_ms.to_string(),
            );

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        client_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn kafka_hosts_is_required() {
        let result = KafkaConfig::init_from_hashmap(&env(&[]));
        assert!(result.is_err());
    }

    #[test]
    fn defaults_are_applied() {
        let config = KafkaConfig::init_from_hashmap(&env(&[("KAFKA_HOSTS", "kafka:9092")]))
            .expect("failed to load config");

        assert_eq!(config.kafka_hosts, "kafka:9092");
        assert_eq!(config.kafka_statistics_interval_ms, 10000);
        assert_eq!(config.kafka_compression_codec, "none");
        assert!(!config.kafka_tls);

        let client_config = config.client_config();
        assert_eq!(client_config.get("bootstrap.servers"), Some("kafka:9092"));
        assert_eq!(client_config.get("statistics.interval.ms"), Some("10000"));
        assert_eq!(client_config.get("security.protocol"), None);
    }

    #[test]
    fn tls_sets_security_protocol() {
        let config = KafkaConfig::init_from_hashmap(&env(&[
            ("KAFKA_HOSTS", "kafka:9093"),
            ("KAFKA_TLS", "true"),
        ]))
        .expect("failed to load config");

        let client_config = config.client_config();
        assert_eq!(client_config.get("security.protocol"), Some("ssl"));
    }

    #[test]
    fn consumer_group_is_required() {
        assert!(ConsumerConfig::init_from_hashmap(&env(&[])).is_err());

        let config =
            ConsumerConfig::init_from_hashmap(&env(&[("KAFKA_CONSUMER_GROUP", "demo-group")]))
                .expect("failed to load config");
        assert_eq!(config.kafka_consumer_offset_reset, "earliest");
        assert!(config.kafka_consumer_auto_commit);
    }
}
