use anyhow::{Context, Result};
use common_kafka::admin::{create_admin_client, ensure_topic, TopicDescriptor};
use common_kafka::context::StatsContext;
use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use kafka_stats_demo::config::Config;
use kafka_stats_demo::consumer::ConsumerLoop;
use kafka_stats_demo::forwarder::StatsForwarder;
use kafka_stats_demo::producer::{produce_batch, ProducerSettings};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn shutdown() {
    let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("failed to register SIGTERM handler: {}", e);
            return std::future::pending().await;
        }
    };
    let mut interrupt = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
        Ok(interrupt) => interrupt,
        Err(e) => {
            error!("failed to register SIGINT handler: {}", e);
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

async fn provision(config: &Config) -> Result<()> {
    let topic = TopicDescriptor::new(
        config.kafka_topic.clone(),
        config.topic_partitions,
        config.topic_replication_factor,
    )?;
    let admin = create_admin_client(&config.kafka).context("failed to create admin client")?;

    let provisioned = ensure_topic(&admin, &topic, config.provision_timeout_ms.0).await?;
    info!("topic {} is ready ({:?})", topic.name(), provisioned);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::init_from_env().context("invalid configuration")?;
    info!(
        "starting in {:?} mode against {} (topic {})",
        config.mode, config.kafka.kafka_hosts, config.kafka_topic
    );

    if !config.startup_delay_ms.0.is_zero() {
        info!("waiting {:?} for the brokers", config.startup_delay_ms.0);
        tokio::time::sleep(config.startup_delay_ms.0).await;
    }

    let forwarder = StatsForwarder::new(
        &config.stats_collector_url,
        config.stats_request_timeout_ms.0,
    )
    .context("failed to set up statistics forwarding")?;
    info!("forwarding statistics to {}", forwarder.collector_url());

    if config.provision_topic {
        // The loops still run: the topic may exist already or be auto-created
        if let Err(e) = provision(&config).await {
            warn!("topic provisioning failed, continuing anyway: {:#}", e);
        }
    }

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    if config.mode.runs_consumer() {
        let consumer = ConsumerLoop::subscribe(
            &config.kafka,
            &config.consumer,
            &config.kafka_topic,
            StatsContext::new("consumer", forwarder.clone()),
        )
        .context("failed to create consumer")?;
        let token = cancel.clone();
        tasks.spawn(async move {
            let summary = consumer.run(token).await;
            info!("consumer finished: {:?}", summary);
        });
    }

    if config.mode.runs_producer() {
        let producer = create_kafka_producer(
            &config.kafka,
            StatsContext::new("producer", forwarder.clone()),
        )
        .await
        .context("failed to create producer")?;
        let settings = ProducerSettings {
            message_count: config.producer_message_count,
            send_interval: config.producer_send_interval_ms.0,
            flush_timeout: config.producer_flush_timeout_ms.0,
        };
        let topic = config.kafka_topic.clone();
        let token = cancel.clone();
        tasks.spawn(async move {
            tokio::select! {
                summary = produce_batch(&producer, &topic, &settings) => {
                    info!("producer finished: {:?}", summary);
                }
                _ = token.cancelled() => {
                    warn!("producer interrupted before finishing its batch");
                }
            }
        });
    }

    tokio::select! {
        _ = shutdown() => {}
        _ = async { while tasks.join_next().await.is_some() {} } => {
            info!("all work finished");
        }
    }

    cancel.cancel();
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("task failed: {:?}", e);
        }
    }

    Ok(())
}
