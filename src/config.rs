use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the sentinel server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Pub/sub transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Time-series sink configuration.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Ingestion loop tuning.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Pub/sub transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Broker address, either "host:port" or a redis:// URL.
    /// Default: "localhost:6379".
    #[serde(default = "default_transport_address")]
    pub address: String,

    /// Channel to subscribe to. Default: "metrics".
    #[serde(default = "default_transport_channel")]
    pub channel: String,
}

/// Time-series sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Base URL of the time-series database (e.g., "http://localhost:8086").
    #[serde(default)]
    pub url: String,

    /// Organization the bucket belongs to.
    #[serde(default)]
    pub org: String,

    /// Destination bucket.
    #[serde(default)]
    pub bucket: String,

    /// API token sent as `Authorization: Token <token>`.
    #[serde(default)]
    pub token: String,

    /// Line protocol measurement name. Default: "system_stats".
    #[serde(default = "default_measurement")]
    pub measurement: String,

    /// Per-request timeout. Default: 10s.
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Request body compression: "none" or "gzip". Default: "none".
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Enable HTTP keep-alive connections. Default: true.
    #[serde(default = "default_true")]
    pub keep_alive: bool,
}

/// Ingestion loop tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Entries per forwarded batch. Default: 256.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Samples per latency window. Default: 1000.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Forward the partial batch when the loop exits. Default: true.
    #[serde(default = "default_true")]
    pub flush_on_shutdown: bool,

    /// Serialization buffers retained by the sink. Default: 2.
    #[serde(default = "default_buffer_pool_size")]
    pub buffer_pool_size: usize,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Serve /metrics and /healthz. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_transport_address() -> String {
    "localhost:6379".to_string()
}

fn default_transport_channel() -> String {
    "metrics".to_string()
}

fn default_measurement() -> String {
    "system_stats".to_string()
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    crate::batch::DEFAULT_BATCH_SIZE
}

fn default_window_size() -> usize {
    1000
}

fn default_buffer_pool_size() -> usize {
    2
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            sink: SinkConfig::default(),
            ingest: IngestConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: default_transport_address(),
            channel: default_transport_channel(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            org: String::new(),
            bucket: String::new(),
            token: String::new(),
            measurement: default_measurement(),
            timeout: default_sink_timeout(),
            compression: default_compression(),
            keep_alive: true,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            window_size: default_window_size(),
            flush_on_shutdown: true,
            buffer_pool_size: default_buffer_pool_size(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file, apply environment overrides and
    /// validate the result.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let mut cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;

        Ok(cfg)
    }

    /// Build configuration from defaults and environment variables only.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Override fields from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override fields from `lookup`. Unset or empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("REDIS_ADDR") {
            self.transport.address = v;
        }
        if let Some(v) = get("REDIS_CHANNEL") {
            self.transport.channel = v;
        }
        if let Some(v) = get("INFLUX_URL") {
            self.sink.url = v;
        }
        if let Some(v) = get("INFLUX_TOKEN") {
            self.sink.token = v;
        }
        if let Some(v) = get("INFLUX_ORG") {
            self.sink.org = v;
        }
        if let Some(v) = get("INFLUX_BUCKET") {
            self.sink.bucket = v;
        }
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.transport.address.is_empty() {
            bail!("transport.address is required");
        }
        if self.transport.channel.is_empty() {
            bail!("transport.channel is required");
        }

        if self.sink.url.is_empty() {
            bail!("sink.url is required (or set INFLUX_URL)");
        }
        if self.sink.org.is_empty() {
            bail!("sink.org is required (or set INFLUX_ORG)");
        }
        if self.sink.bucket.is_empty() {
            bail!("sink.bucket is required (or set INFLUX_BUCKET)");
        }
        if self.sink.measurement.is_empty() {
            bail!("sink.measurement must not be empty");
        }
        if self.sink.timeout.is_zero() {
            bail!("sink.timeout must be positive");
        }

        let compression = &self.sink.compression;
        match compression.as_str() {
            "none" | "gzip" => {}
            _ => bail!("invalid compression type: {compression}"),
        }

        if self.ingest.batch_size == 0 {
            bail!("ingest.batch_size must be positive");
        }
        if self.ingest.window_size == 0 {
            bail!("ingest.window_size must be positive");
        }
        if self.ingest.buffer_pool_size == 0 {
            bail!("ingest.buffer_pool_size must be positive");
        }

        if self.health.enabled && self.health.addr.is_empty() {
            bail!("health.addr is required when enabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn valid_config() -> Config {
        Config {
            sink: SinkConfig {
                url: "http://localhost:8086".to_string(),
                org: "acme".to_string(),
                bucket: "metrics".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.transport.address, "localhost:6379");
        assert_eq!(cfg.transport.channel, "metrics");
        assert_eq!(cfg.sink.measurement, "system_stats");
        assert_eq!(cfg.sink.timeout, Duration::from_secs(10));
        assert_eq!(cfg.sink.compression, "none");
        assert!(cfg.sink.keep_alive);
        assert_eq!(cfg.ingest.batch_size, 256);
        assert_eq!(cfg.ingest.window_size, 1000);
        assert!(cfg.ingest.flush_on_shutdown);
        assert_eq!(cfg.ingest.buffer_pool_size, 2);
        assert!(cfg.health.enabled);
        assert_eq!(cfg.health.addr, ":9090");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_sink_target() {
        let err = Config::default().validate().expect_err("missing url");
        assert!(err.to_string().contains("sink.url"));

        let mut cfg = valid_config();
        cfg.sink.bucket.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut cfg = valid_config();
        cfg.ingest.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.ingest.window_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.ingest.buffer_pool_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.sink.timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_compression() {
        let mut cfg = valid_config();
        cfg.sink.compression = "gzip".to_string();
        assert!(cfg.validate().is_ok());

        cfg.sink.compression = "zstd".to_string();
        let err = cfg.validate().expect_err("unsupported compression");
        assert!(err.to_string().contains("zstd"));
    }

    #[test]
    fn test_validate_transport() {
        let mut cfg = valid_config();
        cfg.transport.channel.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REDIS_ADDR", "redis.internal:6380"),
            ("REDIS_CHANNEL", "stats"),
            ("INFLUX_URL", "http://influx:8086"),
            ("INFLUX_TOKEN", "secret"),
            ("INFLUX_ORG", "my org"),
            ("INFLUX_BUCKET", "b1"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.transport.address, "redis.internal:6380");
        assert_eq!(cfg.transport.channel, "stats");
        assert_eq!(cfg.sink.url, "http://influx:8086");
        assert_eq!(cfg.sink.token, "secret");
        assert_eq!(cfg.sink.org, "my org");
        assert_eq!(cfg.sink.bucket, "b1");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let mut cfg = valid_config();
        cfg.apply_overrides(|k| (k == "INFLUX_URL").then(String::new));
        assert_eq!(cfg.sink.url, "http://localhost:8086");
    }

    #[test]
    fn test_parse_yaml_partial() {
        let yaml = r#"
transport:
  channel: telemetry
sink:
  url: http://localhost:8086
  org: acme
  bucket: metrics
  timeout: 2s
  compression: gzip
ingest:
  batch_size: 64
health:
  enabled: false
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("parse yaml");
        assert_eq!(cfg.transport.address, "localhost:6379");
        assert_eq!(cfg.transport.channel, "telemetry");
        assert_eq!(cfg.sink.timeout, Duration::from_secs(2));
        assert_eq!(cfg.sink.compression, "gzip");
        assert_eq!(cfg.ingest.batch_size, 64);
        assert_eq!(cfg.ingest.window_size, 1000);
        assert!(!cfg.health.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "ingest:\n  batch_size: 512\nsink:\n  url: http://db:8086\n  org: o\n  bucket: b\n"
        )
        .expect("write config");

        let cfg = Config::load(file.path()).expect("load config");
        assert_eq!(cfg.ingest.batch_size, 512);
        assert_eq!(cfg.sink.measurement, "system_stats");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/sentinel.yaml")).expect_err("missing");
        assert!(err.to_string().contains("reading config file"));
    }
}
