//! Payload decoding for both wire formats.
//!
//! The binary path is a fixed-offset little-endian read with no allocation.
//! The text path parses a JSON document into a pooled [`TextRecord`].

use serde::Deserialize;
use thiserror::Error;

use crate::pool::Pool;

use super::record::{Record, TextRecord, WireFormat, BINARY_LEN};

/// Errors that can occur during payload decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed text payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A decoded record tagged with the wire format it arrived in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    Binary(Record),
    Text(Record),
}

impl Decoded {
    pub fn format(&self) -> WireFormat {
        match self {
            Self::Binary(_) => WireFormat::Binary,
            Self::Text(_) => WireFormat::Text,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            Self::Binary(r) | Self::Text(r) => r,
        }
    }
}

/// Stateless-by-contract payload decoder holding the text scratch pool.
pub struct Decoder {
    scratch: Pool<TextRecord>,
}

impl Decoder {
    /// Creates a decoder with a single pooled text scratch object.
    pub fn new() -> Self {
        Self::with_pool_size(1)
    }

    /// Creates a decoder whose scratch pool retains `size` objects.
    pub fn with_pool_size(size: usize) -> Self {
        Self {
            scratch: Pool::new(size, TextRecord::default),
        }
    }

    /// Decodes a raw payload into a [`Record`].
    #[inline]
    pub fn decode(&self, raw: &[u8]) -> Result<Record, DecodeError> {
        self.decode_tagged(raw).map(Decoded::into_record)
    }

    /// Decodes a raw payload, reporting which wire format was used.
    pub fn decode_tagged(&self, raw: &[u8]) -> Result<Decoded, DecodeError> {
        match <&[u8; BINARY_LEN]>::try_from(raw) {
            Ok(fixed) => Ok(Decoded::Binary(decode_binary(fixed))),
            Err(_) => self.decode_text(raw).map(Decoded::Text),
        }
    }

    fn decode_text(&self, raw: &[u8]) -> Result<Record, DecodeError> {
        let mut scratch = self.scratch.acquire();

        let mut de = serde_json::Deserializer::from_slice(raw);
        *scratch = TextRecord::deserialize(&mut de)?;
        de.end()?;

        Ok(Record::from(&*scratch))
    }

    /// The text scratch pool, exposed for monitoring.
    pub fn scratch_pool(&self) -> &Pool<TextRecord> {
        &self.scratch
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes the fixed 32-byte little-endian layout.
///
/// Offsets: 0 observed_at (u64 as i64), 8 cpu_usage (f64 bits),
/// 16 mem_usage (f64 bits), 24 sent_at_nanos (u64 as i64).
#[inline]
pub fn decode_binary(data: &[u8; BINARY_LEN]) -> Record {
    Record {
        observed_at: read_u64_le(data, 0) as i64,
        cpu_usage: f64::from_bits(read_u64_le(data, 8)),
        mem_usage: f64::from_bits(read_u64_le(data, 16)),
        sent_at_nanos: read_u64_le(data, 24) as i64,
    }
}

/// Encodes a record into the fixed 32-byte little-endian layout.
#[inline]
pub fn encode_binary(record: &Record) -> [u8; BINARY_LEN] {
    let mut buf = [0u8; BINARY_LEN];
    write_u64_le(&mut buf, 0, record.observed_at as u64);
    write_u64_le(&mut buf, 8, record.cpu_usage.to_bits());
    write_u64_le(&mut buf, 16, record.mem_usage.to_bits());
    write_u64_le(&mut buf, 24, record.sent_at_nanos as u64);
    buf
}

/// Encodes a record as a text (JSON) payload.
pub fn encode_text(record: &Record) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&TextRecord::from(record))
}

#[inline(always)]
fn read_u64_le(data: &[u8; BINARY_LEN], offset: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(word)
}

#[inline(always)]
fn write_u64_le(data: &mut [u8; BINARY_LEN], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
