pub mod admin;
pub mod config;
pub mod context;
pub mod kafka_consumer;
pub mod kafka_producer;
pub mod test;
