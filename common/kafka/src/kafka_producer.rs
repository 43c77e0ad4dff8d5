use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientContext;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

const METADATA_PING_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn create_kafka_producer<C>(
    config: &KafkaConfig,
    context: C,
) -> Result<FutureProducer<C>, KafkaError>
where
    C: ClientContext + 'static,
{
    let mut client_config = config.client_config();
    client_config
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    debug!("rdkafka producer configuration: {:?}", client_config);
    let api: FutureProducer<C> = client_config.create_with_context(context)?;

    // "Ping" the Kafka brokers by requesting metadata
    match api.client().fetch_metadata(None, METADATA_PING_TIMEOUT) {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StatsContext;
    use crate::test::{create_mock_kafka, mock_kafka_config};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn producer_statistics_reach_the_context_handler() {
        let (cluster, config) = create_mock_kafka();
        let snapshots = Arc::new(AtomicUsize::new(0));
        let seen = snapshots.clone();
        let context = StatsContext::new("producer", move |_: &[u8]| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let producer = create_kafka_producer(&config, context)
            .await
            .expect("failed to create producer");

        // The mock config emits statistics every 100ms, served by the
        // producer's own polling thread
        let started = std::time::Instant::now();
        while snapshots.load(Ordering::SeqCst) == 0 && started.elapsed() < Duration::from_secs(10)
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(snapshots.load(Ordering::SeqCst) > 0);
        drop(producer);
        drop(cluster);
    }

    #[tokio::test]
    async fn unreachable_brokers_fail_creation() {
        let (cluster, _) = create_mock_kafka();
        let mut config = mock_kafka_config(&cluster);
        // Nothing listens on the discard port
        config.kafka_hosts = "127.0.0.1:9".to_owned();
        config.kafka_message_timeout_ms = 1000;

        let context = StatsContext::new("producer", |_: &[u8]| {});
        let result = tokio::time::timeout(
            Duration::from_secs(30),
            create_kafka_producer(&config, context),
        )
        .await
        .expect("metadata ping should be bounded");
        assert!(result.is_err());
    }
}
