use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use sentinel::config::Config;
use sentinel::loadgen::{self, LoadGenConfig, PayloadFormat};
use sentinel::server::Server;
use sentinel::transport::RedisPublisher;

/// Pub/sub telemetry ingestion server.
#[derive(Parser)]
#[command(name = "sentinel", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults plus environment
    /// overrides apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion server (default).
    Serve,

    /// Publish synthetic records to the pub/sub channel.
    Bench {
        /// Number of concurrent publisher tasks.
        #[arg(long, default_value_t = 32)]
        workers: usize,

        /// How long to run (e.g. 30s, 5m).
        #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
        duration: Duration,

        /// Broker address.
        #[arg(long, default_value = "localhost:6379")]
        address: String,

        /// Pub/sub channel.
        #[arg(long, default_value = "metrics")]
        channel: String,

        /// Payload wire format.
        #[arg(long, value_enum, default_value_t = PayloadFormat::Binary)]
        format: PayloadFormat,
    },

    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("sentinel {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    match cli.command {
        Some(Command::Bench {
            workers,
            duration,
            address,
            channel,
            format,
        }) => {
            let cfg = LoadGenConfig {
                workers,
                duration,
                format,
                ..Default::default()
            };
            rt.block_on(bench(cfg, address, channel))
        }
        _ => {
            let cfg = match &cli.config {
                Some(path) => Config::load(path)
                    .with_context(|| format!("loading config from {}", path.display()))?,
                None => Config::from_env().context("loading config from environment")?,
            };

            tracing::info!(
                version = version::RELEASE,
                commit = version::git_commit(),
                "starting sentinel",
            );

            rt.block_on(serve(cfg))
        }
    }
}

/// Cancels `cancel` on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        cancel.cancel();
    });
}

async fn serve(cfg: Config) -> Result<()> {
    let mut server = Server::new(cfg)?;
    spawn_signal_handler(server.cancel_token());

    server.start().await?;

    // Returns on signal (graceful) or transport failure (error).
    let result = server.wait().await;

    server.stop().await?;

    let report = result?;
    tracing::info!(
        received = report.received,
        batches_forwarded = report.batches_forwarded,
        "sentinel stopped",
    );

    Ok(())
}

async fn bench(cfg: LoadGenConfig, address: String, channel: String) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let publisher = RedisPublisher::connect(&address, &channel)
        .await
        .with_context(|| format!("connecting publisher to {address}"))?;

    let total = loadgen::run_load(publisher, &cfg, cancel).await?;
    println!("load generator finished, total messages sent: {total}");

    Ok(())
}
