use std::sync::{Arc, Weak};

use rdkafka::{
    consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    message::OwnedMessage,
    Message,
};
use tracing::debug;

use crate::config::{ConsumerConfig, KafkaConfig};

pub struct SingleTopicConsumer<C: ConsumerContext + 'static> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: ConsumerContext + 'static> {
    consumer: StreamConsumer<C>,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

#[derive(Debug, thiserror::Error)]
pub enum CloseErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer still shared by {0} other handle(s)")]
    StillShared(usize),
}

impl<C: ConsumerContext + 'static> SingleTopicConsumer<C> {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        topic: &str,
        context: C,
    ) -> Result<Self, KafkaError> {
        let mut client_config = common_config.client_config();
        client_config
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "enable.auto.commit",
                consumer_config.kafka_consumer_auto_commit.to_string(),
            )
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            )
            .set(
                "session.timeout.ms",
                consumer_config.kafka_consumer_session_timeout_ms.to_string(),
            )
            .set("enable.partition.eof", "false");

        // Offsets are stored explicitly once a message has been processed
        client_config.set("enable.auto.offset.store", "false");

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer<C> = client_config.create_with_context(context)?;
        consumer.subscribe(&[topic])?;

        let inner = Inner {
            consumer,
            topic: topic.to_owned(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Wait for the next message. The returned `Offset` must be stored once
    /// the message is processed for the group to move past it.
    pub async fn recv(&self) -> Result<(OwnedMessage, Offset<C>), KafkaError> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        Ok((message.detach(), offset))
    }

    /// Synchronously commit everything stored so far. Having nothing to commit
    /// is not an error.
    pub fn commit_stored(&self) -> Result<(), KafkaError> {
        match self.inner.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => Ok(()),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Leave the group and release the client. Blocks until librdkafka has
    /// closed the consumer, so call it off the async runtime.
    pub fn close(self) -> Result<(), CloseErr> {
        let inner = Arc::try_unwrap(self.inner)
            .map_err(|shared| CloseErr::StillShared(Arc::strong_count(&shared) - 1))?;
        inner.consumer.unsubscribe();
        drop(inner);
        Ok(())
    }
}

impl<C: ConsumerContext + 'static> Clone for SingleTopicConsumer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub struct Offset<C: ConsumerContext + 'static> {
    handle: Weak<Inner<C>>,
    partition: i32,
    offset: i64,
}

impl<C: ConsumerContext + 'static> Offset<C> {
    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }
}
