use rdkafka::client::ClientContext;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::TopicPartitionList;
use tracing::{debug, error, info, warn};

/// Receives the raw statistics document librdkafka emits every
/// `statistics.interval.ms`.
///
/// Called from whichever thread is serving the client's callbacks, so
/// implementations must return quickly: a slow handler stalls delivery
/// reports and consumer polling.
pub trait StatsHandler: Send + Sync + 'static {
    fn on_stats(&self, raw: &[u8]);
}

impl<F> StatsHandler for F
where
    F: Fn(&[u8]) + Send + Sync + 'static,
{
    fn on_stats(&self, raw: &[u8]) {
        self(raw)
    }
}

/// Client context shared by the producer and the consumer: hands statistics
/// to a `StatsHandler` and logs client errors, rebalances and commits.
pub struct StatsContext<H> {
    role: &'static str,
    handler: H,
}

impl<H: StatsHandler> StatsContext<H> {
    pub fn new(role: &'static str, handler: H) -> Self {
        StatsContext { role, handler }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }
}

impl<H: StatsHandler> ClientContext for StatsContext<H> {
    // Overriding the raw hook skips rdkafka's typed `Statistics` parsing, so
    // fields it doesn't model are forwarded untouched.
    fn stats_raw(&self, statistics: &[u8]) {
        debug!(
            role = self.role,
            bytes = statistics.len(),
            "received statistics snapshot"
        );
        self.handler.on_stats(statistics);
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!(role = self.role, "librdkafka error: {}: {}", error, reason);
    }
}

impl<H: StatsHandler> ConsumerContext for StatsContext<H> {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                info!(role = self.role, "revoking partitions: {}", describe(partitions))
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(e) => error!(role = self.role, "rebalance error: {}", e),
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Rebalance::Assign(partitions) = rebalance {
            info!(role = self.role, "assigned partitions: {}", describe(partitions));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(role = self.role, "committed offsets: {}", describe(offsets)),
            // Nothing stored since the last commit
            Err(KafkaError::ConsumerCommit(rdkafka::error::RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => warn!(role = self.role, "failed to commit offsets: {}", e),
        }
    }
}

fn describe(partitions: &TopicPartitionList) -> String {
    let described: Vec<String> = partitions
        .elements()
        .iter()
        .map(|e| format!("{}[{}]@{:?}", e.topic(), e.partition(), e.offset()))
        .collect();
    if described.is_empty() {
        "none".to_owned()
    } else {
        described.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn raw_statistics_reach_the_handler_untouched() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let context = StatsContext::new("producer", move |raw: &[u8]| {
            sink.lock().unwrap().push(raw.to_vec());
        });

        let raw = br#"{"name":"rdkafka#producer-1","unknown_field":{"x":1}}"#;
        context.stats_raw(raw);
        context.stats_raw(b"not json at all");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], raw.to_vec());
        assert_eq!(seen[1], b"not json at all".to_vec());
        assert_eq!(context.role(), "producer");
    }

    #[test]
    fn describe_partition_lists() {
        let mut tpl = TopicPartitionList::new();
        assert_eq!(describe(&tpl), "none");

        tpl.add_partition("events", 0);
        tpl.add_partition("events", 3);
        let described = describe(&tpl);
        assert!(described.contains("events[0]"));
        assert!(described.contains("events[3]"));
    }
}
