//! Line protocol serialization.
//!
//! One line per entry, in batch order:
//! `<measurement> cpu=<f>,mem=<f> <observed_at * 1e9>\n`
//! with floats at six decimals and the timestamp in nanoseconds.

use std::fmt::Write;

use bytes::BytesMut;

use crate::batch::BatchEntry;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Rough upper bound for one line, used to pre-size buffers.
pub const APPROX_LINE_LEN: usize = 64;

/// Converts a seconds timestamp to nanoseconds, saturating at the i64 bounds.
#[inline]
pub fn seconds_to_nanos(seconds: i64) -> i64 {
    seconds.saturating_mul(NANOS_PER_SEC)
}

/// Appends one line per entry to `buf`.
pub fn write_batch(buf: &mut BytesMut, measurement: &str, entries: &[BatchEntry]) {
    buf.reserve(entries.len() * (APPROX_LINE_LEN + measurement.len()));
    for e in entries {
        write_entry(buf, measurement, e);
    }
}

#[inline]
fn write_entry(buf: &mut BytesMut, measurement: &str, e: &BatchEntry) {
    // Writing into BytesMut cannot fail.
    let _ = writeln!(
        buf,
        "{measurement} cpu={:.6},mem={:.6} {}",
        e.cpu_usage,
        e.mem_usage,
        seconds_to_nanos(e.observed_at),
    );
}
