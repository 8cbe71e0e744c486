use std::pin::Pin;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, Msg};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::info;

use super::{redis_url, Publisher, Transport, TransportError};

type MessageStream = Pin<Box<dyn Stream<Item = Msg> + Send>>;

/// Subscription to a single Redis pub/sub channel.
pub struct RedisTransport {
    channel: String,
    messages: MessageStream,
}

impl RedisTransport {
    /// Connects to `address` and subscribes to `channel`.
    pub async fn connect(address: &str, channel: &str) -> Result<Self, TransportError> {
        let client = Client::open(redis_url(address))?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        info!(address, channel, "subscribed to pub/sub channel");

        Ok(Self {
            channel: channel.to_string(),
            messages: pubsub.into_on_message().boxed(),
        })
    }
}

impl Transport for RedisTransport {
    fn name(&self) -> &str {
        "redis"
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.messages.next().await {
            Some(msg) => Ok(Some(Bytes::copy_from_slice(msg.get_payload_bytes()))),
            None => Err(TransportError::Disconnected(self.channel.clone())),
        }
    }

    async fn close(&mut self) {
        // Dropping the stream drops the pub/sub connection.
        self.messages = futures_util::stream::empty().boxed();
        info!(channel = %self.channel, "unsubscribed from pub/sub channel");
    }
}

/// Publishes payloads to a Redis pub/sub channel.
///
/// Clones share one multiplexed connection.
#[derive(Clone)]
pub struct RedisPublisher {
    channel: String,
    conn: MultiplexedConnection,
}

impl RedisPublisher {
    /// Connects to `address` for publishing on `channel`.
    pub async fn connect(address: &str, channel: &str) -> Result<Self, TransportError> {
        let client = Client::open(redis_url(address))?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            channel: channel.to_string(),
            conn,
        })
    }
}

impl Publisher for RedisPublisher {
    async fn publish(&self, payload: Bytes) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(&self.channel, &payload[..]).await?;
        Ok(())
    }
}
