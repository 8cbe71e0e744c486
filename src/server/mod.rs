use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::health::HealthMetrics;
use crate::ingest::{IngestError, IngestLoop, IngestOptions, IngestReport};
use crate::sink::InfluxForwarder;
use crate::transport::RedisTransport;

/// Server wires the health endpoint, transport, forwarder and ingestion loop.
pub struct Server {
    cfg: Config,
    health: Arc<HealthMetrics>,
    task: Option<JoinHandle<Result<IngestReport, IngestError>>>,
    cancel: CancellationToken,
}

impl Server {
    /// Creates a new Server, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            task: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that ends ingestion gracefully when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start all components and begin ingestion in a background task.
    pub async fn start(&mut self) -> Result<()> {
        // 1. Health server first so probes respond while connecting.
        if self.cfg.health.enabled {
            self.health
                .start()
                .await
                .context("starting health metrics server")?;
        }

        // 2. Subscribe before the loop starts.
        let transport =
            RedisTransport::connect(&self.cfg.transport.address, &self.cfg.transport.channel)
                .await
                .with_context(|| {
                    format!(
                        "subscribing to {:?} on {}",
                        self.cfg.transport.channel, self.cfg.transport.address
                    )
                })?;

        // 3. Sink.
        let forwarder = InfluxForwarder::new(
            &self.cfg.sink,
            self.cfg.ingest.batch_size,
            self.cfg.ingest.buffer_pool_size,
        )
        .context("creating sink forwarder")?;

        info!(
            url = %forwarder.write_url(),
            compression = %self.cfg.sink.compression,
            "sink forwarder ready",
        );

        // 4. Ingestion loop.
        let mut ingest = IngestLoop::new(
            transport,
            forwarder,
            IngestOptions::from(&self.cfg.ingest),
        )
        .with_health(Arc::clone(&self.health));

        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move { ingest.run(cancel).await }));

        info!("server fully started");

        Ok(())
    }

    /// Waits for the ingestion loop to finish.
    ///
    /// Returns an error if the loop ended on a transport failure.
    pub async fn wait(&mut self) -> Result<IngestReport> {
        let task = self.task.take().context("server not started")?;
        let report = task.await.context("ingestion task panicked")??;
        Ok(report)
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<Option<IngestReport>> {
        self.cancel.cancel();

        let report = if self.task.is_some() {
            match self.wait().await {
                Ok(report) => Some(report),
                Err(e) => {
                    error!(error = %e, "ingestion ended with error");
                    None
                }
            }
        } else {
            None
        };

        self.health.stop();

        Ok(report)
    }
}
