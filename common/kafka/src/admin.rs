use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{ClientContext, DefaultClientContext};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

/// Name and layout of a topic to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    name: String,
    partitions: i32,
    replication_factor: i32,
}

impl TopicDescriptor {
    pub fn new(
        name: impl Into<String>,
        partitions: i32,
        replication_factor: i32,
    ) -> Result<Self, ProvisionError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ProvisionError::InvalidDescriptor(
                "topic name must not be empty".to_owned(),
            ));
        }
        if partitions < 1 {
            return Err(ProvisionError::InvalidDescriptor(format!(
                "partition count must be at least 1, got {partitions}"
            )));
        }
        if replication_factor < 1 {
            return Err(ProvisionError::InvalidDescriptor(format!(
                "replication factor must be at least 1, got {replication_factor}"
            )));
        }

        Ok(TopicDescriptor {
            name,
            partitions,
            replication_factor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partitions(&self) -> i32 {
        self.partitions
    }

    pub fn replication_factor(&self) -> i32 {
        self.replication_factor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("invalid topic descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("failed to fetch cluster metadata: {0}")]
    Metadata(KafkaError),
    #[error("create topics request failed: {0}")]
    Request(KafkaError),
    #[error("broker rejected topic {topic}: {code}")]
    Rejected {
        topic: String,
        code: RDKafkaErrorCode,
    },
}

/// The two admin operations topic provisioning needs.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Names of all topics known to the cluster.
    async fn topic_names(&self, timeout: Duration) -> Result<Vec<String>, KafkaError>;

    async fn create_topic(
        &self,
        topic: &TopicDescriptor,
        timeout: Duration,
    ) -> Result<(), ProvisionError>;
}

#[async_trait]
impl<C: ClientContext + 'static> TopicAdmin for AdminClient<C> {
    async fn topic_names(&self, timeout: Duration) -> Result<Vec<String>, KafkaError> {
        let metadata = self.inner().fetch_metadata(None, timeout)?;
        Ok(metadata
            .topics()
            .iter()
            .map(|t| t.name().to_owned())
            .collect())
    }

    async fn create_topic(
        &self,
        topic: &TopicDescriptor,
        timeout: Duration,
    ) -> Result<(), ProvisionError> {
        let new_topic = NewTopic::new(
            topic.name(),
            topic.partitions(),
            TopicReplication::Fixed(topic.replication_factor()),
        );
        // Bound both the broker-side operation and the client-side wait
        let opts = AdminOptions::new()
            .operation_timeout(Some(timeout))
            .request_timeout(Some(timeout));

        let results = self
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(ProvisionError::Request)?;

        for result in results {
            if let Err((name, code)) = result {
                return Err(ProvisionError::Rejected { topic: name, code });
            }
        }
        Ok(())
    }
}

pub fn create_admin_client(
    config: &KafkaConfig,
) -> Result<AdminClient<DefaultClientContext>, KafkaError> {
    let client_config = config.client_config();
    debug!("rdkafka admin configuration: {:?}", client_config);
    client_config.create()
}

/// Make sure `topic` exists, creating it if the cluster metadata doesn't list
/// it. Safe to call repeatedly: an existing topic is never recreated.
pub async fn ensure_topic<A>(
    admin: &A,
    topic: &TopicDescriptor,
    timeout: Duration,
) -> Result<Provisioned, ProvisionError>
where
    A: TopicAdmin + ?Sized,
{
    let names = admin
        .topic_names(timeout)
        .await
        .map_err(ProvisionError::Metadata)?;

    if names.iter().any(|name| name == topic.name()) {
        info!("topic {} already exists", topic.name());
        return Ok(Provisioned::AlreadyExists);
    }

    info!(
        "creating topic {} with {} partition(s), replication factor {}",
        topic.name(),
        topic.partitions(),
        topic.replication_factor()
    );
    match admin.create_topic(topic, timeout).await {
        Ok(()) => {
            info!("created topic {}", topic.name());
            Ok(Provisioned::Created)
        }
        // Lost a race with another client creating the same topic
        Err(ProvisionError::Rejected {
            code: RDKafkaErrorCode::TopicAlreadyExists,
            ..
        }) => {
            info!("topic {} was created concurrently", topic.name());
            Ok(Provisioned::AlreadyExists)
        }
        Err(e) => {
            error!("failed to create topic {}: {}", topic.name(), e);
            Err(e)
        }
    }
}
