//! Pub/sub telemetry ingestion: decode CPU/memory samples, track latency,
//! and forward them in batches to a time-series sink.

pub mod batch;
pub mod codec;
pub mod config;
pub mod health;
pub mod ingest;
pub mod latency;
pub mod loadgen;
pub mod pool;
pub mod server;
pub mod sink;
pub mod transport;
