pub mod influx;
pub mod line;

use std::future::Future;

use thiserror::Error;

use crate::batch::Batch;

pub use self::influx::InfluxForwarder;

/// Errors returned when a batch cannot be delivered.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// The request never produced a response (connect, timeout, TLS...).
    #[error("sink transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The sink answered with a non-success status.
    #[error("sink rejected batch with status {0}")]
    Rejected(u16),

    /// The request body could not be encoded.
    #[error("encoding batch: {0}")]
    Encode(#[from] std::io::Error),
}

impl ForwardError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Rejected(_) => "rejected",
            Self::Encode(_) => "encode",
        }
    }
}

/// Delivers batches to a time-series store.
///
/// A forward is a single attempt: the caller drops the batch on error.
pub trait Forwarder: Send {
    /// Returns the forwarder's name for logging.
    fn name(&self) -> &str;

    /// Deliver one batch. Entries are written in order.
    fn forward(
        &mut self,
        batch: &Batch,
    ) -> impl Future<Output = Result<(), ForwardError>> + Send;
}
