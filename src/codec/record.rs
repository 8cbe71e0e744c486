use serde::{Deserialize, Deserializer, Serialize};

use crate::pool::Reset;

/// Size in bytes of the fixed binary layout.
pub const BINARY_LEN: usize = 32;

/// One decoded telemetry sample.
///
/// `observed_at` and `sent_at_nanos` come from independent clocks. A zero
/// `sent_at_nanos` means the producer did not stamp the message and no
/// end-to-end latency can be computed for it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Record {
    /// Sample time, seconds since the Unix epoch.
    pub observed_at: i64,
    /// CPU usage percentage.
    pub cpu_usage: f64,
    /// Memory usage percentage.
    pub mem_usage: f64,
    /// Producer send time, nanoseconds since the Unix epoch (0 = absent).
    pub sent_at_nanos: i64,
}

impl Record {
    /// Returns true if the producer stamped a send time.
    #[inline]
    pub fn has_send_time(&self) -> bool {
        self.sent_at_nanos != 0
    }
}

/// Encoding a payload was decoded under.
///
/// Chosen purely by payload length: exactly [`BINARY_LEN`] bytes is binary,
/// anything else is text. A 32-byte JSON document is therefore misread as
/// binary; producers must never emit one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Binary,
    Text,
}

impl WireFormat {
    /// Detects the wire format of a raw payload.
    #[inline]
    pub fn detect(raw: &[u8]) -> Self {
        if raw.len() == BINARY_LEN {
            Self::Binary
        } else {
            Self::Text
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Text => "text",
        }
    }
}

/// JSON document shape of the text wire format.
///
/// Reused across decodes through a [`crate::pool::Pool`]; every field is
/// overwritten on each decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    pub timestamp: i64,
    pub cpu_usage: f64,
    pub mem_usage: f64,
    /// Absent or `null` both mean "not stamped".
    #[serde(default, deserialize_with = "null_as_zero")]
    pub send_time_unix_nano: i64,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Reset for TextRecord {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

impl From<&TextRecord> for Record {
    fn from(t: &TextRecord) -> Self {
        Self {
            observed_at: t.timestamp,
            cpu_usage: t.cpu_usage,
            mem_usage: t.mem_usage,
            sent_at_nanos: t.send_time_unix_nano,
        }
    }
}

impl From<&Record> for TextRecord {
    fn from(r: &Record) -> Self {
        Self {
            timestamp: r.observed_at,
            cpu_usage: r.cpu_usage,
            mem_usage: r.mem_usage,
            send_time_unix_nano: r.sent_at_nanos,
        }
    }
}
