use crate::codec::Record;

/// Default number of entries per batch.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Minimal per-record tuple forwarded to the sink.
///
/// The producer send time is consumed by the latency tracker before the
/// entry is built and is not carried into the batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchEntry {
    pub observed_at: i64,
    pub cpu_usage: f64,
    pub mem_usage: f64,
}

impl From<&Record> for BatchEntry {
    #[inline]
    fn from(r: &Record) -> Self {
        Self {
            observed_at: r.observed_at,
            cpu_usage: r.cpu_usage,
            mem_usage: r.mem_usage,
        }
    }
}

/// An ordered, detached group of entries in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    entries: Vec<BatchEntry>,
}

impl Batch {
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<BatchEntry>> for Batch {
    fn from(entries: Vec<BatchEntry>) -> Self {
        Self { entries }
    }
}

/// Collects entries into fixed-capacity batches.
///
/// The live buffer never exceeds `capacity`; it is handed out whole the
/// moment it fills. Forwarded batches can be given back with
/// [`BatchAccumulator::recycle`] so steady-state appends do not allocate.
#[derive(Debug)]
pub struct BatchAccumulator {
    live: Vec<BatchEntry>,
    spare: Option<Vec<BatchEntry>>,
    capacity: usize,
}

impl BatchAccumulator {
    /// Creates an accumulator producing batches of `capacity` entries
    /// (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            live: Vec::with_capacity(capacity),
            spare: None,
            capacity,
        }
    }

    /// Appends an entry, returning the full batch once `capacity` is reached.
    #[inline]
    pub fn append(&mut self, entry: BatchEntry) -> Option<Batch> {
        self.live.push(entry);
        if self.live.len() >= self.capacity {
            return Some(self.take_live());
        }
        None
    }

    /// Returns any non-empty partial batch and resets the live buffer.
    pub fn flush_pending(&mut self) -> Option<Batch> {
        if self.live.is_empty() {
            return None;
        }
        Some(self.take_live())
    }

    /// Hands a forwarded batch's storage back for reuse.
    pub fn recycle(&mut self, batch: Batch) {
        let mut entries = batch.entries;
        if entries.capacity() < self.capacity {
            return;
        }
        entries.clear();
        self.spare = Some(entries);
    }

    fn take_live(&mut self) -> Batch {
        let next = self
            .spare
            .take()
            .unwrap_or_else(|| Vec::with_capacity(self.capacity));
        Batch {
            entries: std::mem::replace(&mut self.live, next),
        }
    }

    /// Number of entries waiting in the live buffer.
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
