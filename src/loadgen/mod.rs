//! Synthetic load generator publishing records as fast as the transport
//! accepts them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::{encode_binary, encode_text, Record};
use crate::transport::Publisher;

/// Back-off after a failed publish.
const PUBLISH_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Wire format used for generated payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PayloadFormat {
    /// Fixed 32-byte little-endian layout.
    Binary,
    /// JSON text document.
    Json,
}

/// Load generator settings.
#[derive(Debug, Clone)]
pub struct LoadGenConfig {
    pub workers: usize,
    pub duration: Duration,
    pub format: PayloadFormat,
    pub progress_interval: Duration,
}

impl Default for LoadGenConfig {
    fn default() -> Self {
        Self {
            workers: 32,
            duration: Duration::from_secs(60),
            format: PayloadFormat::Binary,
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// Builds one record stamped with the current time and random usage values
/// (cpu in [20, 80), mem in [10, 80)).
pub fn synthetic_record() -> Record {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);

    Record {
        observed_at: since_epoch.as_secs() as i64,
        cpu_usage: 20.0 + 60.0 * rand::random::<f64>(),
        mem_usage: 10.0 + 70.0 * rand::random::<f64>(),
        sent_at_nanos: i64::try_from(since_epoch.as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Encodes a record in the requested wire format.
pub fn encode_payload(record: &Record, format: PayloadFormat) -> Result<Bytes> {
    match format {
        PayloadFormat::Binary => Ok(Bytes::copy_from_slice(&encode_binary(record))),
        PayloadFormat::Json => encode_text(record)
            .map(Bytes::from)
            .context("encoding JSON payload"),
    }
}

/// Publishes synthetic records from `cfg.workers` concurrent tasks until
/// `cfg.duration` elapses or `cancel` fires. Returns the total sent.
pub async fn run_load<P>(publisher: P, cfg: &LoadGenConfig, cancel: CancellationToken) -> Result<u64>
where
    P: Publisher + Clone + 'static,
{
    info!(
        workers = cfg.workers,
        duration = %humantime::format_duration(cfg.duration),
        format = ?cfg.format,
        "starting load generator",
    );

    let stop = cancel.child_token();
    let sent = Arc::new(AtomicU64::new(0));
    let mut workers = JoinSet::new();

    for id in 0..cfg.workers.max(1) {
        let publisher = publisher.clone();
        let stop = stop.clone();
        let sent = Arc::clone(&sent);
        let format = cfg.format;

        workers.spawn(async move { publish_loop(id, publisher, format, stop, sent).await });
    }
    drop(publisher);

    let deadline = tokio::time::sleep(cfg.duration);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(cfg.progress_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                info!("load generator cancelled");
                break;
            }
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                info!(total_sent = sent.load(Ordering::Relaxed), "progress");
            }
        }
    }
    stop.cancel();

    while let Some(res) = workers.join_next().await {
        res.context("publisher task panicked")??;
    }

    let total = sent.load(Ordering::Relaxed);
    info!(total_sent = total, "load generator finished");

    Ok(total)
}

async fn publish_loop<P: Publisher>(
    id: usize,
    publisher: P,
    format: PayloadFormat,
    stop: CancellationToken,
    sent: Arc<AtomicU64>,
) -> Result<()> {
    while !stop.is_cancelled() {
        let payload = encode_payload(&synthetic_record(), format)?;

        let result = tokio::select! {
            biased;

            _ = stop.cancelled() => break,
            res = publisher.publish(payload) => res,
        };

        match result {
            Ok(()) => {
                sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(worker = id, error = %e, "publish failed");
                tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
            }
        }
    }

    Ok(())
}
