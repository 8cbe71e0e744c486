//! Pub/sub message sources and sinks.
//!
//! The ingestion loop only needs a blocking `recv` returning raw payloads; the
//! load generator only needs `publish`. Both are traits so the pipeline can be
//! driven by the in-process channel in tests and by Redis in production.

pub mod channel;
pub mod redis;

use std::future::Future;

use bytes::Bytes;
use thiserror::Error;

pub use self::channel::{channel, ChannelPublisher, ChannelTransport};
pub use self::redis::{RedisPublisher, RedisTransport};

/// Errors from the pub/sub transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The subscription stream ended unexpectedly.
    #[error("subscription to {0:?} ended")]
    Disconnected(String),

    /// Publishing on a closed channel.
    #[error("channel closed")]
    Closed,

    /// Error reported by the Redis client.
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Source of raw message payloads.
pub trait Transport: Send {
    /// Returns the transport's name for logging.
    fn name(&self) -> &str;

    /// Waits for the next payload.
    ///
    /// `Ok(None)` means the source was closed gracefully; an error is a hard
    /// failure that ends ingestion.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;

    /// Ends the subscription; no further payloads are accepted.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Destination for raw message payloads.
pub trait Publisher: Send + Sync {
    /// Publishes one payload to the configured channel.
    fn publish(&self, payload: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Normalizes a broker address to a `redis://` URL.
///
/// Plain `host:port` (the deployment convention) gets the scheme prefixed;
/// anything with a scheme is passed through.
pub fn redis_url(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("redis://{address}")
    }
}
