pub mod config;
pub mod consumer;
pub mod forwarder;
pub mod producer;
