use std::str::FromStr;
use std::time;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    pub kafka_topic: String,

    pub stats_collector_url: String,

    #[envconfig(default = "5000")]
    pub stats_request_timeout_ms: EnvMsDuration,

    #[envconfig(default = "both")]
    pub mode: RunMode,

    #[envconfig(default = "true")]
    pub provision_topic: bool,

    #[envconfig(default = "1")]
    pub topic_partitions: i32,

    #[envconfig(default = "1")]
    pub topic_replication_factor: i32,

    #[envconfig(default = "10000")]
    pub provision_timeout_ms: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub producer_message_count: u64,

    #[envconfig(default = "500")]
    pub producer_send_interval_ms: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub producer_flush_timeout_ms: EnvMsDuration,

    // Give freshly started brokers time to come up
    #[envconfig(default = "0")]
    pub startup_delay_ms: EnvMsDuration,
}

/// Which of the two loops this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Both,
    Producer,
    Consumer,
}

impl RunMode {
    pub fn runs_producer(&self) -> bool {
        matches!(self, RunMode::Both | RunMode::Producer)
    }

    pub fn runs_consumer(&self) -> bool {
        matches!(self, RunMode::Both | RunMode::Consumer)
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a valid mode, expected one of: both, producer, consumer")]
pub struct ParseRunModeError(String);

impl FromStr for RunMode {
    type Err = ParseRunModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "both" => Ok(RunMode::Both),
            "producer" => Ok(RunMode::Producer),
            "consumer" => Ok(RunMode::Consumer),
            _ => Err(ParseRunModeError(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn required() -> HashMap<String, String> {
        [
            ("KAFKA_HOSTS", "kafka:9092"),
            ("KAFKA_TOPIC", "demo"),
            ("STATS_COLLECTOR_URL", "http://collector:8080/"),
            ("KAFKA_CONSUMER_GROUP", "demo-group"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn loads_with_required_values_only() {
        let config = Config::init_from_hashmap(&required()).expect("failed to load config");

        assert_eq!(config.kafka.kafka_hosts, "kafka:9092");
        assert_eq!(config.kafka_topic, "demo");
        assert_eq!(config.consumer.kafka_consumer_group, "demo-group");
        assert_eq!(config.mode, RunMode::Both);
        assert_eq!(config.producer_message_count, 1000);
        assert_eq!(
            config.producer_send_interval_ms.0,
            time::Duration::from_millis(500)
        );
        assert_eq!(
            config.producer_flush_timeout_ms.0,
            time::Duration::from_secs(10)
        );
        assert!(config.provision_topic);
    }

    #[test]
    fn each_required_value_is_enforced() {
        for missing in [
            "KAFKA_HOSTS",
            "KAFKA_TOPIC",
            "STATS_COLLECTOR_URL",
            "KAFKA_CONSUMER_GROUP",
        ] {
            let mut env = required();
            env.remove(missing);
            assert!(
                Config::init_from_hashmap(&env).is_err(),
                "{missing} should be required"
            );
        }
    }

    #[test]
    fn parse_run_mode() {
        assert_eq!("producer".parse::<RunMode>(), Ok(RunMode::Producer));
        assert_eq!(" Consumer ".parse::<RunMode>(), Ok(RunMode::Consumer));
        assert!("all".parse::<RunMode>().is_err());

        assert!(RunMode::Both.runs_producer() && RunMode::Both.runs_consumer());
        assert!(!RunMode::Producer.runs_consumer());
        assert!(!RunMode::Consumer.runs_producer());
    }

    #[test]
    fn parse_ms_duration() {
        assert_eq!(
            "250".parse::<EnvMsDuration>().unwrap().0,
            time::Duration::from_millis(250)
        );
        assert!("-1".parse::<EnvMsDuration>().is_err());
        assert!("soon".parse::<EnvMsDuration>().is_err());
    }
}
