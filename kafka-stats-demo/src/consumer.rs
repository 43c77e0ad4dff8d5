use common_kafka::config::{ConsumerConfig, KafkaConfig};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::message::{Headers, OwnedMessage};
use rdkafka::Message;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Subscribing,
    Polling,
    Closing,
    Closed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub received: u64,
    pub poll_errors: u64,
}

/// Polls a single topic until cancelled, storing the offset of every
/// message once it has been logged.
pub struct ConsumerLoop<C: ConsumerContext + 'static> {
    consumer: SingleTopicConsumer<C>,
    state: watch::Sender<ConsumerState>,
    received: watch::Sender<u64>,
}

impl<C: ConsumerContext + 'static> ConsumerLoop<C> {
    pub fn subscribe(
        kafka: &KafkaConfig,
        consumer: &ConsumerConfig,
        topic: &str,
        context: C,
    ) -> Result<Self, KafkaError> {
        let (state, _) = watch::channel(ConsumerState::Subscribing);
        let (received, _) = watch::channel(0);
        let kafka_group = consumer.kafka_consumer_group.clone();
        let consumer = SingleTopicConsumer::new(kafka, consumer, topic, context)?;
        info!(
            "subscribed to {} as part of group {}",
            consumer.topic(),
            kafka_group
        );

        Ok(Self {
            consumer,
            state,
            received,
        })
    }

    /// Follow the loop through its states. Only the latest state is kept.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Running count of messages handed to the loop.
    pub fn received(&self) -> watch::Receiver<u64> {
        self.received.subscribe()
    }

    pub async fn run(self, cancel: CancellationToken) -> ConsumeSummary {
        let mut summary = ConsumeSummary::default();
        self.set_state(ConsumerState::Polling);

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.consumer.recv() => polled,
            };

            let (message, offset) = match polled {
                Ok(polled) => polled,
                Err(e) => {
                    // Transient, librdkafka keeps retrying underneath us
                    error!("error while consuming from {}: {}", self.consumer.topic(), e);
                    summary.poll_errors += 1;
                    continue;
                }
            };

            log_message(&message);
            if let Err(e) = offset.store() {
                warn!("failed to store offset: {}", e);
            }
            summary.received += 1;
            self.received.send_replace(summary.received);
        }

        self.set_state(ConsumerState::Closing);
        info!(
            "closing consumer of {} after {} message(s)",
            self.consumer.topic(),
            summary.received
        );

        let ConsumerLoop { consumer, state, .. } = self;
        let closed = tokio::task::spawn_blocking(move || {
            if let Err(e) = consumer.commit_stored() {
                warn!("failed to commit stored offsets on close: {}", e);
            }
            consumer.close()
        })
        .await;
        match closed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("failed to close consumer: {}", e),
            Err(e) => error!("consumer close task failed: {:?}", e),
        }

        state.send_replace(ConsumerState::Closed);
        info!("consumer closed");
        summary
    }

    fn set_state(&self, next: ConsumerState) {
        self.state.send_replace(next);
    }
}

fn log_message(message: &OwnedMessage) {
    let key = message
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_default();
    let value = message
        .payload()
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default();
    let headers: Vec<String> = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| {
                    format!(
                        "{}={}",
                        h.key,
                        h.value
                            .map(|v| String::from_utf8_lossy(v).into_owned())
                            .unwrap_or_default()
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    info!(
        "consumed message from {}[{}]@{}: key={:?} value={:?} headers=[{}]",
        message.topic(),
        message.partition(),
        message.offset(),
        key,
        value,
        headers.join(", ")
    );
}
