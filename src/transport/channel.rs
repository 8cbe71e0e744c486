use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Publisher, Transport, TransportError};

/// Creates an in-process transport and its publisher, buffering up to
/// `capacity` payloads.
pub fn channel(capacity: usize) -> (ChannelPublisher, ChannelTransport) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelPublisher { tx }, ChannelTransport { rx })
}

/// Receiving half of the in-process transport.
///
/// Dropping every [`ChannelPublisher`] closes it gracefully.
#[derive(Debug)]
pub struct ChannelTransport {
    rx: mpsc::Receiver<Bytes>,
}

impl Transport for ChannelTransport {
    fn name(&self) -> &str {
        "channel"
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

/// Sending half of the in-process transport.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Bytes>,
}

impl Publisher for ChannelPublisher {
    async fn publish(&self, payload: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_payloads_arrive_in_order() {
        let (publisher, mut transport) = channel(4);
        publisher.publish(Bytes::from_static(b"a")).await.expect("publish");
        publisher.publish(Bytes::from_static(b"b")).await.expect("publish");

        assert_eq!(transport.recv().await.expect("recv").as_deref(), Some(&b"a"[..]));
        assert_eq!(transport.recv().await.expect("recv").as_deref(), Some(&b"b"[..]));
    }

    #[tokio::test]
    async fn test_sender_drop_closes_gracefully() {
        let (publisher, mut transport) = channel(1);
        drop(publisher);
        assert!(transport.recv().await.expect("recv").is_none());
    }

    #[tokio::test]
    async fn test_close_rejects_publishers() {
        let (publisher, mut transport) = channel(1);
        transport.close().await;
        assert!(publisher.publish(Bytes::from_static(b"x")).await.is_err());
        assert!(transport.recv().await.expect("recv").is_none());
    }

    #[tokio::test]
    async fn test_publish_after_receiver_drop() {
        let (publisher, transport) = channel(1);
        drop(transport);
        let err = publisher
            .publish(Bytes::from_static(b"x"))
            .await
            .expect_err("closed");
        assert!(matches!(err, TransportError::Closed));
    }
}
