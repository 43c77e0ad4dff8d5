use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::ClientContext;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const QUEUE_FULL_BACKOFF: Duration = Duration::from_secs(1);

/// A synthetic message, owned by the loop until it is handed to rdkafka.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoMessage {
    pub key: Option<String>,
    pub value: String,
    pub headers: BTreeMap<String, String>,
}

impl DemoMessage {
    pub fn synthetic(index: u64) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "myTestHeader".to_owned(),
            "header values are binary".to_owned(),
        );

        DemoMessage {
            key: None,
            value: format!("Producer example, message #{index}"),
            headers,
        }
    }

    fn owned_headers(&self) -> OwnedHeaders {
        self.headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key,
                    value: Some(value),
                })
            })
    }
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub message_count: u64,
    pub send_interval: Duration,
    pub flush_timeout: Duration,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            message_count: 1000,
            send_interval: Duration::from_millis(500),
            flush_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProduceSummary {
    /// Messages handed to rdkafka or dropped trying, always the configured count
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Delivery reports still outstanding when the flush deadline passed
    pub pending: u64,
    pub flushed: bool,
}

enum Delivery {
    Delivered,
    Failed,
}

/// Produce `settings.message_count` synthetic messages to `topic`, one every
/// `send_interval`, then flush. A failed message never stops the batch.
pub async fn produce_batch<C>(
    producer: &FutureProducer<C>,
    topic: &str,
    settings: &ProducerSettings,
) -> ProduceSummary
where
    C: ClientContext + 'static,
{
    let mut summary = ProduceSummary::default();
    let mut acks = JoinSet::new();

    info!(
        "producing {} messages to {}",
        settings.message_count, topic
    );
    for index in 0..settings.message_count {
        let message = DemoMessage::synthetic(index);
        summary.attempted += 1;

        match enqueue(producer, topic, &message).await {
            Ok(delivery) => {
                acks.spawn(await_delivery(index, delivery));
            }
            Err(e) => {
                error!("failed to produce message #{}: {}", index, e);
                summary.failed += 1;
            }
        }

        if index + 1 < settings.message_count {
            tokio::time::sleep(settings.send_interval).await;
        }
    }

    let deadline = Instant::now() + settings.flush_timeout;
    summary.flushed = flush(producer, settings.flush_timeout).await;

    // Whatever is still unacknowledged after the flush only gets what is left
    // of the flush budget
    let remaining = deadline.saturating_duration_since(Instant::now());
    let drained = tokio::time::timeout(remaining, async {
        while let Some(result) = acks.join_next().await {
            match result {
                Ok(Delivery::Delivered) => summary.delivered += 1,
                Ok(Delivery::Failed) => summary.failed += 1,
                Err(e) => {
                    error!("join error while waiting on delivery report: {:?}", e);
                    summary.failed += 1;
                }
            }
        }
    })
    .await;
    if drained.is_err() {
        summary.pending = acks.len() as u64;
        warn!(
            "gave up waiting on {} outstanding delivery report(s)",
            summary.pending
        );
        acks.abort_all();
    }

    info!(
        "finished producing to {}: {} attempted, {} delivered, {} failed, {} pending",
        topic, summary.attempted, summary.delivered, summary.failed, summary.pending
    );
    summary
}

/// Hand one message to rdkafka. A full local queue is the only condition
/// retried: wait for deliveries to drain it, then resubmit.
async fn enqueue<C>(
    producer: &FutureProducer<C>,
    topic: &str,
    message: &DemoMessage,
) -> Result<DeliveryFuture, KafkaError>
where
    C: ClientContext + 'static,
{
    let mut record = FutureRecord::to(topic)
        .payload(message.value.as_str())
        .headers(message.owned_headers());
    if let Some(key) = &message.key {
        record = record.key(key.as_str());
    }

    loop {
        match producer.send_result(record) {
            Ok(delivery) => return Ok(delivery),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                warn!(
                    "producer queue is full ({} messages in flight), waiting",
                    producer.in_flight_count()
                );
                tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                record = returned;
            }
            Err((e, _)) => return Err(e),
        }
    }
}

async fn await_delivery(index: u64, delivery: DeliveryFuture) -> Delivery {
    match delivery.await {
        Ok(Ok((partition, offset))) => {
            info!(
                "delivered message #{} to partition {} at offset {}",
                index, partition, offset
            );
            Delivery::Delivered
        }
        Ok(Err((e, _))) => {
            error!("delivery failed for message #{}: {}", index, e);
            Delivery::Failed
        }
        Err(_) => {
            // The producer was dropped before reporting
            error!("delivery report for message #{} was cancelled", index);
            Delivery::Failed
        }
    }
}

async fn flush<C>(producer: &FutureProducer<C>, timeout: Duration) -> bool
where
    C: ClientContext + 'static,
{
    let producer = producer.clone();
    let result = tokio::task::spawn_blocking(move || producer.flush(timeout)).await;
    match result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("failed to flush outstanding messages: {}", e);
            false
        }
        Err(e) => {
            error!("flush task failed: {:?}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::Headers;

    #[test]
    fn synthetic_messages_are_numbered() {
        let first = DemoMessage::synthetic(0);
        let later = DemoMessage::synthetic(41);

        assert_eq!(first.value, "Producer example, message #0");
        assert_eq!(later.value, "Producer example, message #41");
        assert_eq!(first.key, None);
        assert_eq!(
            first.headers.get("myTestHeader").map(String::as_str),
            Some("header values are binary")
        );
    }

    #[test]
    fn headers_are_carried_over() {
        let message = DemoMessage::synthetic(1);
        let headers = message.owned_headers();

        assert_eq!(headers.count(), 1);
        let header = headers.get(0);
        assert_eq!(header.key, "myTestHeader");
        assert_eq!(header.value, Some(&b"header values are binary"[..]));
    }

    #[test]
    fn default_settings() {
        let settings = ProducerSettings::default();
        assert_eq!(settings.message_count, 1000);
        assert_eq!(settings.flush_timeout, Duration::from_secs(10));
    }
}
