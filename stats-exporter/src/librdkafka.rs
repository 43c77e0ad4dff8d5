//! Maps librdkafka statistics documents onto Prometheus metrics.
//!
//! See https://github.com/confluentinc/librdkafka/blob/master/STATISTICS.md for
//! the document layout. Only the fields listed in the tables below are
//! exported; anything else in a snapshot is ignored.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};

pub const PREFIX: &str = "librdkafka_";

const BROKERS: &str = "brokers_";
const TOPICS: &str = "topics_";
const PARTITIONS: &str = "topics_partitions_";
const CONSUMER_GROUPS: &str = "consumergroups_";
const EOS: &str = "eos_";

const ROOT_LABELS: &[&str] = &["client_id", "name", "type"];
const BROKER_LABELS: &[&str] = &["nodeid", "nodename", "source", "state"];
const PARTITION_LABELS: &[&str] = &["partition", "broker", "leader"];
const CONSUMER_GROUP_LABELS: &[&str] = &["state", "join_state", "rebalance_reason"];
const EOS_LABELS: &[&str] = &["idemp_state", "txn_state"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Gauge,
    Counter,
    /// Rolling window object, exported as one gauge per entry in `WINDOW_STATS`
    Window,
}

struct Field {
    name: &'static str,
    kind: Kind,
    help: &'static str,
}

const fn gauge(name: &'static str, help: &'static str) -> Field {
    Field {
        name,
        kind: Kind::Gauge,
        help,
    }
}

const fn counter(name: &'static str, help: &'static str) -> Field {
    Field {
        name,
        kind: Kind::Counter,
        help,
    }
}

const fn window(name: &'static str, help: &'static str) -> Field {
    Field {
        name,
        kind: Kind::Window,
        help,
    }
}

const WINDOW_STATS: &[(&str, &str)] = &[
    ("min", "Smallest value"),
    ("max", "Largest value"),
    ("avg", "Average value"),
    ("sum", "Sum of values"),
    ("cnt", "Number of values sampled"),
    ("stddev", "Standard deviation (based on histogram)"),
    ("hdrsize", "Memory size of Hdr Histogram"),
    ("p50", "50th percentile"),
    ("p75", "75th percentile"),
    ("p90", "90th percentile"),
    ("p95", "95th percentile"),
    ("p99", "99th percentile"),
    ("p99_99", "99.99th percentile"),
    ("outofrange", "Values skipped due to out of histogram range"),
];

const ROOT_FIELDS: &[Field] = &[
    gauge("msg_cnt", "Current number of messages in producer queues"),
    gauge("msg_size", "Current total size of messages in producer queues"),
    gauge("msg_max", "Threshold: maximum number of messages allowed on the producer queues"),
    gauge("msg_size_max", "Threshold: maximum total size of messages allowed on the producer queues"),
    gauge("replyq", "Number of ops waiting in queue for application to serve"),
    gauge("metadata_cache_cnt", "Number of topics in the metadata cache"),
    counter("tx", "Total number of requests sent to brokers"),
    counter("tx_bytes", "Total number of bytes transmitted to brokers"),
    counter("rx", "Total number of responses received from brokers"),
    counter("rx_bytes", "Total number of bytes received from brokers"),
    counter("txmsgs", "Total number of messages transmitted (produced) to brokers"),
    counter("txmsg_bytes", "Total number of message bytes transmitted to brokers"),
    counter("rxmsgs", "Total number of messages consumed from brokers"),
    counter("rxmsg_bytes", "Total number of message bytes received from brokers"),
];

const BROKER_FIELDS: &[Field] = &[
    gauge("stateage", "Time since last broker state change (microseconds)"),
    gauge("outbuf_cnt", "Number of requests awaiting transmission to broker"),
    gauge("outbuf_msg_cnt", "Number of messages awaiting transmission to broker"),
    gauge("waitresp_cnt", "Number of requests in-flight to broker awaiting response"),
    gauge("waitresp_msg_cnt", "Number of messages in-flight to broker awaiting response"),
    gauge("txidle", "Microseconds since last socket send"),
    gauge("rxidle", "Microseconds since last socket receive"),
    counter("tx", "Total number of requests sent"),
    counter("txbytes", "Total number of bytes sent"),
    counter("txretries", "Total number of request retries"),
    counter("txerrs", "Total number of transmission errors"),
    counter("req_timeouts", "Total number of requests timed out"),
    counter("rx", "Total number of responses received"),
    counter("rxbytes", "Total number of bytes received"),
    counter("rxerrs", "Total number of receive errors"),
    counter("connects", "Number of connection attempts"),
    counter("disconnects", "Number of disconnects"),
    window("int_latency", "Internal producer queue latency in microseconds"),
    window("outbuf_latency", "Internal request queue latency in microseconds"),
    window("rtt", "Broker round-trip time in microseconds"),
    window("throttle", "Broker throttling time in milliseconds"),
];

const TOPIC_FIELDS: &[Field] = &[
    gauge("age", "Age of client's topic object (milliseconds)"),
    gauge("metadata_age", "Age of metadata from broker for this topic (milliseconds)"),
    window("batchsize", "Batch sizes in bytes"),
    window("batchcnt", "Batch message counts"),
];

const PARTITION_FIELDS: &[Field] = &[
    gauge("msgq_cnt", "Number of messages waiting to be produced in first-level queue"),
    gauge("msgq_bytes", "Number of bytes in msgq_cnt"),
    gauge("xmit_msgq_cnt", "Number of messages ready to be produced in transmit queue"),
    gauge("xmit_msgq_bytes", "Number of bytes in xmit_msgq"),
    gauge("fetchq_cnt", "Number of pre-fetched messages in fetch queue"),
    gauge("fetchq_size", "Bytes in fetchq"),
    gauge("query_offset", "Current/Last logical offset query"),
    gauge("next_offset", "Next offset to fetch"),
    gauge("app_offset", "Offset of last message passed to application + 1"),
    gauge("stored_offset", "Offset to be committed"),
    gauge("stored_leader_epoch", "Partition leader epoch of stored offset"),
    gauge("committed_offset", "Last committed offset"),
    gauge("committed_leader_epoch", "Partition leader epoch of committed offset"),
    gauge("eof_offset", "Last PARTITION_EOF signaled offset"),
    gauge("lo_offset", "Partition's low watermark offset on broker"),
    gauge("hi_offset", "Partition's high watermark offset on broker"),
    gauge("ls_offset", "Partition's last stable offset on broker"),
    gauge("consumer_lag", "Difference between (hi_offset or ls_offset) and committed_offset"),
    gauge("consumer_lag_stored", "Difference between (hi_offset or ls_offset) and stored_offset"),
    gauge("leader_epoch", "Last known partition leader epoch, or -1 if unknown"),
    gauge("msgs_inflight", "Current number of messages in-flight to/from broker"),
    gauge("next_ack_seq", "Next expected acked sequence (idempotent producer)"),
    gauge("next_err_seq", "Next expected errored sequence (idempotent producer)"),
    counter("txmsgs", "Total number of messages transmitted (produced)"),
    counter("txbytes", "Total number of bytes transmitted for txmsgs"),
    counter("rxmsgs", "Total number of messages consumed"),
    counter("rxbytes", "Total number of bytes received for rxmsgs"),
    counter("msgs", "Total number of messages received (consumer) or produced (producer)"),
    counter("rx_ver_drops", "Dropped outdated messages"),
    counter("acked_msgid", "Last acked internal message id (idempotent producer)"),
];

const CONSUMER_GROUP_FIELDS: &[Field] = &[
    gauge("stateage", "Time elapsed since last state change (milliseconds)"),
    gauge("rebalance_age", "Time elapsed since last rebalance (milliseconds)"),
    gauge("assignment_size", "Current assignment's partition count"),
    counter("rebalance_cnt", "Total number of rebalances"),
];

const EOS_FIELDS: &[Field] = &[
    gauge("idemp_stateage", "Time elapsed since last idemp_state change (milliseconds)"),
    gauge("txn_stateage", "Time elapsed since last txn_state change (milliseconds)"),
    gauge("producer_id", "The currently assigned Producer ID (or -1)"),
    gauge("producer_epoch", "The current epoch (or -1)"),
    counter("epoch_cnt", "The number of Producer ID assignments since start"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Gauge,
    Counter,
}

/// One labelled value read out of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub kind: SampleKind,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

pub type Labels = Vec<(&'static str, String)>;

/// Flatten a statistics snapshot into samples, one per exported field found.
pub fn flatten(stats: &Map<String, Value>) -> Vec<Sample> {
    let mut samples = Vec::new();
    let root = labels(Vec::new(), stats, ROOT_LABELS);
    collect(&mut samples, "", ROOT_FIELDS, stats, &root);

    for broker in objects(stats.get("brokers")) {
        let mut broker_labels = root.clone();
        broker_labels.push(("broker", label_value(broker.get("name"))));
        let broker_labels = labels(broker_labels, broker, BROKER_LABELS);
        collect(&mut samples, BROKERS, BROKER_FIELDS, broker, &broker_labels);
    }

    for topic in objects(stats.get("topics")) {
        let topic_labels = labels(root.clone(), topic, &["topic"]);
        collect(&mut samples, TOPICS, TOPIC_FIELDS, topic, &topic_labels);

        for partition in objects(topic.get("partitions")) {
            let partition_labels = labels(topic_labels.clone(), partition, PARTITION_LABELS);
            collect(
                &mut samples,
                PARTITIONS,
                PARTITION_FIELDS,
                partition,
                &partition_labels,
            );
        }
    }

    if let Some(Value::Object(cgrp)) = stats.get("cgrp") {
        let cgrp_labels = labels(root.clone(), cgrp, CONSUMER_GROUP_LABELS);
        collect(
            &mut samples,
            CONSUMER_GROUPS,
            CONSUMER_GROUP_FIELDS,
            cgrp,
            &cgrp_labels,
        );
    }

    if let Some(Value::Object(eos)) = stats.get("eos") {
        let eos_labels = labels(root.clone(), eos, EOS_LABELS);
        collect(&mut samples, EOS, EOS_FIELDS, eos, &eos_labels);
    }

    samples
}

/// Hands samples to the installed `metrics` recorder.
///
/// librdkafka reports counters as running totals that restart from zero with
/// the client, so each series remembers the last total it saw and only the
/// positive difference is added to the exported counter.
#[derive(Default)]
pub struct StatsRecorder {
    last_totals: Mutex<HashMap<(String, Labels), f64>>,
}

impl StatsRecorder {
    pub fn record(&self, samples: &[Sample]) {
        let mut last_totals = self
            .last_totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for sample in samples {
            match sample.kind {
                SampleKind::Gauge => {
                    metrics::gauge!(sample.name.clone(), sample.labels.as_slice())
                        .set(sample.value)
                }
                SampleKind::Counter => {
                    let series = (sample.name.clone(), sample.labels.clone());
                    let previous = last_totals.insert(series, sample.value);
                    let delta = sample.value - previous.unwrap_or(0.0);
                    if delta > 0.0 {
                        metrics::counter!(sample.name.clone(), sample.labels.as_slice())
                            .increment(delta as u64);
                    }
                }
            }
        }
    }
}

/// Register help text for every exported metric.
pub fn describe_metrics() {
    let sections: [(&str, &[Field]); 6] = [
        ("", ROOT_FIELDS),
        (BROKERS, BROKER_FIELDS),
        (TOPICS, TOPIC_FIELDS),
        (PARTITIONS, PARTITION_FIELDS),
        (CONSUMER_GROUPS, CONSUMER_GROUP_FIELDS),
        (EOS, EOS_FIELDS),
    ];

    for (section, fields) in sections {
        for field in fields {
            let name = metric_name(section, field.name);
            match field.kind {
                Kind::Gauge => metrics::describe_gauge!(name, field.help),
                Kind::Counter => metrics::describe_counter!(name, field.help),
                Kind::Window => {
                    for (sub, help) in WINDOW_STATS {
                        metrics::describe_gauge!(
                            format!("{name}_{sub}"),
                            format!("{}: {}", field.help, help)
                        );
                    }
                }
            }
        }
    }
}

fn metric_name(section: &str, field: &str) -> String {
    format!("{PREFIX}{section}{field}")
}

fn collect(
    samples: &mut Vec<Sample>,
    section: &str,
    fields: &[Field],
    object: &Map<String, Value>,
    labels: &Labels,
) {
    for field in fields {
        let Some(value) = object.get(field.name) else {
            continue;
        };
        let name = metric_name(section, field.name);

        match field.kind {
            Kind::Gauge | Kind::Counter => {
                if let Some(value) = value.as_f64() {
                    let kind = if field.kind == Kind::Counter {
                        SampleKind::Counter
                    } else {
                        SampleKind::Gauge
                    };
                    samples.push(Sample {
                        name,
                        kind,
                        labels: labels.clone(),
                        value,
                    });
                }
            }
            Kind::Window => {
                let Value::Object(window) = value else {
                    continue;
                };
                for (sub, _) in WINDOW_STATS {
                    if let Some(value) = window.get(*sub).and_then(Value::as_f64) {
                        samples.push(Sample {
                            name: format!("{name}_{sub}"),
                            kind: SampleKind::Gauge,
                            labels: labels.clone(),
                            value,
                        });
                    }
                }
            }
        }
    }
}

/// Extend `base` with the values of `keys` read from `object`. Missing
/// labels are kept as empty strings so every series has the same label set.
fn labels(mut base: Labels, object: &Map<String, Value>, keys: &[&'static str]) -> Labels {
    for &key in keys {
        base.push((key, label_value(object.get(key))));
    }
    base
}

fn label_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn objects(section: Option<&Value>) -> impl Iterator<Item = &Map<String, Value>> {
    section
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|entries| entries.values())
        .filter_map(Value::as_object)
}
