//! The single-consumer ingestion loop.
//!
//! Each iteration receives one payload, decodes it, feeds the latency
//! windows, appends to the batch and, when the batch fills, forwards it
//! synchronously before the next receive. The loop owns every piece of
//! mutable state it touches, so batch order is arrival order.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch::{Batch, BatchAccumulator, BatchEntry};
use crate::codec::{Decoder, WireFormat};
use crate::config::IngestConfig;
use crate::health::HealthMetrics;
use crate::latency::LatencyTracker;
use crate::sink::Forwarder;
use crate::transport::{Transport, TransportError};

/// Errors that end the ingestion loop.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// Loop sizing and shutdown behaviour.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub window_size: usize,
    pub flush_on_shutdown: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestOptions {
    fn from(cfg: &IngestConfig) -> Self {
        Self {
            batch_size: cfg.batch_size,
            window_size: cfg.window_size,
            flush_on_shutdown: cfg.flush_on_shutdown,
        }
    }
}

/// Counters accumulated over one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub received: u64,
    pub decoded: u64,
    pub decode_errors: u64,
    pub batches_forwarded: u64,
    pub entries_forwarded: u64,
    pub forward_errors: u64,
    pub summaries: u64,
}

/// Drives transport, codec, latency tracker, accumulator and forwarder.
pub struct IngestLoop<T: Transport, F: Forwarder> {
    transport: T,
    forwarder: F,
    decoder: Decoder,
    batch: BatchAccumulator,
    latency: LatencyTracker,
    health: Option<Arc<HealthMetrics>>,
    flush_on_shutdown: bool,
    report: IngestReport,
}

impl<T: Transport, F: Forwarder> IngestLoop<T, F> {
    /// Creates a loop over an already-subscribed transport.
    pub fn new(transport: T, forwarder: F, opts: IngestOptions) -> Self {
        Self {
            transport,
            forwarder,
            decoder: Decoder::new(),
            batch: BatchAccumulator::new(opts.batch_size),
            latency: LatencyTracker::new(opts.window_size),
            health: None,
            flush_on_shutdown: opts.flush_on_shutdown,
            report: IngestReport::default(),
        }
    }

    /// Attaches health metrics updated as the loop runs.
    pub fn with_health(mut self, health: Arc<HealthMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    /// Runs until cancellation, graceful transport closure, or a transport
    /// hard error.
    ///
    /// The pending partial batch is forwarded on every exit path when
    /// `flush_on_shutdown` is set; a transport error is returned after that
    /// flush.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<IngestReport, IngestError> {
        info!(
            transport = self.transport.name(),
            forwarder = self.forwarder.name(),
            batch_size = self.batch.capacity(),
            window_size = self.latency.internal().capacity(),
            "ingestion loop started",
        );

        let result = self.receive_until(&cancel).await;

        self.transport.close().await;

        if self.flush_on_shutdown {
            if let Some(batch) = self.batch.flush_pending() {
                info!(entries = batch.len(), "flushing partial batch");
                self.forward(batch).await;
            }
        }

        match result {
            Ok(()) => {
                info!(
                    received = self.report.received,
                    decode_errors = self.report.decode_errors,
                    batches_forwarded = self.report.batches_forwarded,
                    forward_errors = self.report.forward_errors,
                    "ingestion loop stopped",
                );
                Ok(self.report)
            }
            Err(e) => {
                error!(error = %e, "ingestion loop terminated");
                Err(e)
            }
        }
    }

    async fn receive_until(&mut self, cancel: &CancellationToken) -> Result<(), IngestError> {
        loop {
            let payload = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("ingestion cancelled");
                    return Ok(());
                }
                res = self.transport.recv() => res?,
            };

            let Some(payload) = payload else {
                info!("transport closed");
                return Ok(());
            };

            self.process(&payload).await;
        }
    }

    /// Handles one raw payload: decode, track, batch, maybe forward.
    pub async fn process(&mut self, payload: &[u8]) {
        let received_at = Instant::now();
        self.report.received += 1;
        if let Some(h) = &self.health {
            h.messages_received.inc();
        }

        let record = match self.decoder.decode(payload) {
            Ok(record) => record,
            Err(e) => {
                self.report.decode_errors += 1;
                if let Some(h) = &self.health {
                    h.decode_errors.inc();
                }
                warn!(
                    error = %e,
                    format = WireFormat::detect(payload).as_str(),
                    len = payload.len(),
                    "dropping undecodable payload",
                );
                return;
            }
        };
        self.report.decoded += 1;
        if let Some(h) = &self.health {
            h.records_decoded.inc();
        }

        let full = self.batch.append(BatchEntry::from(&record));

        self.latency.record_internal(received_at, Instant::now());
        if record.has_send_time() {
            self.latency
                .record_end_to_end(record.sent_at_nanos, SystemTime::now());
        }

        if let Some(batch) = full {
            self.forward(batch).await;
        }

        if let Some(summaries) = self.latency.maybe_summarize() {
            self.report.summaries += 1;
            if let Some(h) = &self.health {
                h.observe_summaries(&summaries);
            }
        }
    }

    /// Forwards one batch. Failures are logged and the batch is dropped.
    async fn forward(&mut self, batch: Batch) {
        let started = Instant::now();
        let result = self.forwarder.forward(&batch).await;
        let elapsed = started.elapsed();

        if let Some(h) = &self.health {
            h.observe_forward(batch.len(), elapsed, result.as_ref().map(|_| ()));
        }

        match result {
            Ok(()) => {
                self.report.batches_forwarded += 1;
                self.report.entries_forwarded += batch.len() as u64;
            }
            Err(e) => {
                self.report.forward_errors += 1;
                warn!(
                    forwarder = self.forwarder.name(),
                    entries = batch.len(),
                    error = %e,
                    "dropping batch after failed forward",
                );
            }
        }

        self.batch.recycle(batch);
    }

    pub fn report(&self) -> IngestReport {
        self.report
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    /// Entries waiting in the live batch.
    pub fn pending(&self) -> usize {
        self.batch.pending()
    }

    pub fn forwarder(&self) -> &F {
        &self.forwarder
    }

    pub fn into_parts(self) -> (T, F) {
        (self.transport, self.forwarder)
    }
}
