use std::io::Write;

use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Url;

use crate::batch::Batch;
use crate::config::SinkConfig;
use crate::pool::Pool;

use super::line::{self, APPROX_LINE_LEN};
use super::{ForwardError, Forwarder};

/// Content type of line protocol request bodies.
pub const LINE_PROTOCOL_CONTENT_TYPE: &str = "application/vnd.influxdb.lineprotocol";

/// Forwards batches to an InfluxDB v2 compatible write endpoint.
pub struct InfluxForwarder {
    client: reqwest::Client,
    write_url: Url,
    authorization: String,
    measurement: String,
    gzip: bool,
    buffers: Pool<BytesMut>,
    compressed: Pool<BytesMut>,
    buffer_capacity: usize,
}

impl InfluxForwarder {
    /// Builds a forwarder from sink configuration.
    ///
    /// `batch_size` sizes the pooled serialization buffers; `pool_size` is
    /// how many of them (and of the gzip output buffers) are retained between
    /// requests.
    pub fn new(cfg: &SinkConfig, batch_size: usize, pool_size: usize) -> Result<Self> {
        let write_url = write_url(&cfg.url, &cfg.org, &cfg.bucket)?;

        let mut client_builder = reqwest::Client::builder().timeout(cfg.timeout);
        if !cfg.keep_alive {
            client_builder = client_builder.pool_max_idle_per_host(0);
        }
        let client = client_builder.build().context("building HTTP client")?;

        let buffer_capacity = batch_size.max(1) * (APPROX_LINE_LEN + cfg.measurement.len());

        Ok(Self {
            client,
            write_url,
            authorization: format!("Token {}", cfg.token),
            measurement: cfg.measurement.clone(),
            gzip: cfg.compression == "gzip",
            buffers: Pool::new(pool_size, move || BytesMut::with_capacity(buffer_capacity)),
            compressed: Pool::new(pool_size, move || {
                BytesMut::with_capacity(buffer_capacity / 4)
            }),
            buffer_capacity,
        })
    }

    /// The fully-qualified write URL, including query parameters.
    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    /// Serialization buffer pool, exposed for monitoring.
    pub fn buffer_pool(&self) -> &Pool<BytesMut> {
        &self.buffers
    }

    /// Gzip output buffer pool, exposed for monitoring.
    pub fn compressed_pool(&self) -> &Pool<BytesMut> {
        &self.compressed
    }

    async fn send(&self, batch: &Batch) -> Result<(), ForwardError> {
        let mut buf = self.buffers.acquire();
        line::write_batch(&mut buf, &self.measurement, batch.entries());
        let raw_len = buf.len();

        let mut zbuf = self.gzip.then(|| self.compressed.acquire());
        let body = match zbuf.as_mut() {
            Some(z) => {
                compress_gzip(&buf, z)?;
                z.split().freeze()
            }
            None => buf.split().freeze(),
        };

        let mut request = self
            .client
            .post(self.write_url.clone())
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, LINE_PROTOCOL_CONTENT_TYPE)
            .body(body);

        if self.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        let result = request.send().await;

        // Reclaims the split-off allocations once the body has been dropped.
        buf.clear();
        buf.reserve(self.buffer_capacity);
        if let Some(z) = zbuf.as_mut() {
            z.clear();
            z.reserve(self.buffer_capacity / 4);
        }

        let resp = result.map_err(|e| ForwardError::Transport(Box::new(e)))?;

        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;

        if !status.is_success() {
            return Err(ForwardError::Rejected(status.as_u16()));
        }

        tracing::debug!(
            entries = batch.len(),
            bytes = raw_len,
            "forwarded batch",
        );

        Ok(())
    }
}

impl Forwarder for InfluxForwarder {
    fn name(&self) -> &str {
        "influx"
    }

    async fn forward(&mut self, batch: &Batch) -> Result<(), ForwardError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.send(batch).await
    }
}

/// Builds `<base>/api/v2/write?org=..&bucket=..&precision=ns`.
pub fn write_url(base: &str, org: &str, bucket: &str) -> Result<Url> {
    let base = base.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/api/v2/write"))
        .with_context(|| format!("invalid sink url {base:?}"))?;

    url.query_pairs_mut()
        .append_pair("org", org)
        .append_pair("bucket", bucket)
        .append_pair("precision", "ns");

    Ok(url)
}

/// Gzips `data` into `out`, appending after any existing contents.
fn compress_gzip(data: &[u8], out: &mut BytesMut) -> std::io::Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut encoder = GzEncoder::new(out.writer(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn test_write_url() {
        let url = write_url("http://localhost:8086", "acme", "metrics").expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8086/api/v2/write?org=acme&bucket=metrics&precision=ns"
        );
    }

    #[test]
    fn test_write_url_escapes_and_trims() {
        let url = write_url("http://db:8086/", "my org", "a&b").expect("url");
        assert_eq!(url.path(), "/api/v2/write");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("org".to_string(), "my org".to_string()),
                ("bucket".to_string(), "a&b".to_string()),
                ("precision".to_string(), "ns".to_string()),
            ]
        );
    }

    #[test]
    fn test_write_url_invalid_base() {
        assert!(write_url("not a url", "o", "b").is_err());
    }

    #[test]
    fn test_compress_gzip_roundtrip() {
        let data = b"system_stats cpu=1.000000,mem=2.000000 1000000000\n";
        let mut compressed = BytesMut::new();
        compress_gzip(data, &mut compressed).expect("gzip compress");

        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).expect("gzip decompress");
        assert_eq!(out, data);
    }

    #[test]
    fn test_new_from_config() {
        let cfg = SinkConfig {
            url: "http://localhost:8086".to_string(),
            org: "o".to_string(),
            bucket: "b".to_string(),
            token: "t".to_string(),
            compression: "gzip".to_string(),
            ..Default::default()
        };
        let fwd = InfluxForwarder::new(&cfg, 256, 2).expect("forwarder");
        assert_eq!(fwd.name(), "influx");
        assert!(fwd.gzip);
        assert_eq!(fwd.authorization, "Token t");
        assert_eq!(fwd.buffer_pool().available(), 2);
        assert_eq!(fwd.compressed_pool().available(), 2);
    }
}
