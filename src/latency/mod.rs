//! Rolling latency windows with nearest-rank percentile summaries.
//!
//! Two windows are kept: end-to-end (producer send to consumer completion)
//! and internal (receive to batch append). Both are summarized and cleared
//! together whenever the internal window fills.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::info;

/// Percentiles reported for every window.
pub const REPORTED_PERCENTILES: [f64; 3] = [0.50, 0.90, 0.99];

/// Identifies one of the two latency windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    EndToEnd,
    Internal,
}

impl WindowKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EndToEnd => "e2e",
            Self::Internal => "internal",
        }
    }

    const fn log_tag(self) -> &'static str {
        match self {
            Self::EndToEnd => "E2E_LATENCY_STATS",
            Self::Internal => "INTERNAL_LATENCY_STATS",
        }
    }
}

/// Bounded append-only sequence of duration samples.
#[derive(Debug)]
pub struct SampleWindow {
    samples: Vec<Duration>,
    capacity: usize,
}

impl SampleWindow {
    /// Creates a window bounded at `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends one sample. Returns false if the window is already full.
    #[inline]
    pub fn push(&mut self, sample: Duration) -> bool {
        if self.samples.len() >= self.capacity {
            return false;
        }
        self.samples.push(sample);
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Percentile summary of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub kind: WindowKind,
    pub count: usize,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    /// Summarizes an ascending-sorted slice of samples.
    pub fn from_sorted(kind: WindowKind, sorted: &[Duration]) -> Self {
        Self {
            kind,
            count: sorted.len(),
            p50: percentile(sorted, REPORTED_PERCENTILES[0]),
            p90: percentile(sorted, REPORTED_PERCENTILES[1]),
            p99: percentile(sorted, REPORTED_PERCENTILES[2]),
        }
    }

    fn log(&self) {
        info!(
            window = self.kind.as_str(),
            count = self.count,
            p50_us = self.p50.as_micros() as u64,
            p90_us = self.p90.as_micros() as u64,
            p99_us = self.p99.as_micros() as u64,
            "{}",
            self.kind.log_tag(),
        );
    }
}

/// Both summaries produced by one rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSummaries {
    pub end_to_end: LatencySummary,
    pub internal: LatencySummary,
}

/// Nearest-rank percentile of an ascending-sorted slice.
///
/// Index is `ceil(p * n) - 1`, clamped to `[0, n - 1]`. An empty slice
/// yields zero.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let n = sorted.len();
    if n == 0 {
        return Duration::ZERO;
    }

    let rank = (p * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    sorted.get(idx).copied().unwrap_or(Duration::ZERO)
}

/// Converts signed nanoseconds since the epoch to a `SystemTime`.
pub fn time_from_nanos(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}

/// Tracks end-to-end and internal latency windows.
///
/// Owned by a single ingestion loop; no interior synchronization.
#[derive(Debug)]
pub struct LatencyTracker {
    end_to_end: SampleWindow,
    internal: SampleWindow,
    sort_scratch: Vec<Duration>,
}

impl LatencyTracker {
    /// Creates a tracker whose windows hold `window_size` samples each.
    pub fn new(window_size: usize) -> Self {
        let end_to_end = SampleWindow::new(window_size);
        let internal = SampleWindow::new(window_size);
        let sort_scratch = Vec::with_capacity(internal.capacity());
        Self {
            end_to_end,
            internal,
            sort_scratch,
        }
    }

    /// Records latency from a producer send time to `received_at`.
    ///
    /// A producer clock ahead of ours yields a zero sample.
    pub fn record_end_to_end(&mut self, sent_at_nanos: i64, received_at: SystemTime) {
        let sent_at = time_from_nanos(sent_at_nanos);
        let elapsed = received_at
            .duration_since(sent_at)
            .unwrap_or(Duration::ZERO);
        self.end_to_end.push(elapsed);
    }

    /// Records in-process latency between two monotonic instants.
    pub fn record_internal(&mut self, started_at: Instant, finished_at: Instant) {
        self.internal
            .push(finished_at.saturating_duration_since(started_at));
    }

    /// Summarizes and clears both windows once the internal window is full.
    ///
    /// Summaries are logged; the return value is for callers that also
    /// export them.
    pub fn maybe_summarize(&mut self) -> Option<WindowSummaries> {
        if !self.internal.is_full() {
            return None;
        }

        let end_to_end = self.summarize(WindowKind::EndToEnd);
        let internal = self.summarize(WindowKind::Internal);

        end_to_end.log();
        internal.log();

        self.end_to_end.clear();
        self.internal.clear();

        Some(WindowSummaries {
            end_to_end,
            internal,
        })
    }

    fn summarize(&mut self, kind: WindowKind) -> LatencySummary {
        let window = match kind {
            WindowKind::EndToEnd => &self.end_to_end,
            WindowKind::Internal => &self.internal,
        };

        self.sort_scratch.clear();
        self.sort_scratch.extend_from_slice(window.samples());
        self.sort_scratch.sort_unstable();

        LatencySummary::from_sorted(kind, &self.sort_scratch)
    }

    pub fn end_to_end(&self) -> &SampleWindow {
        &self.end_to_end
    }

    pub fn internal(&self) -> &SampleWindow {
        &self.internal
    }
}
