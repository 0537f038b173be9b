// src/progress.rs

//! Transfer progress aggregation
//!
//! Downloads report every chunk they write. Logging each one would flood the
//! output, so the aggregator folds chunk events into summaries and only
//! emits one when the current file has advanced by at least a tenth of its
//! size since the last summary, or when it completes.
//!
//! The aggregator is plain state owned by the executor of one region pass:
//! a fresh one is created per region, sized from the transfer plan.

use tracing::debug;

/// Share of a file's size that must be written between two summaries
const EMIT_FRACTION: u64 = 10;

/// A chunk of a file was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Item being transferred
    pub name: String,
    /// Declared size of the item (0 when unknown)
    pub size: u64,
    /// Bytes written for this item so far
    pub written: u64,
}

/// Emitted summary of batch progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSummary {
    pub name: String,
    pub file_written: u64,
    pub file_size: u64,
    /// Bytes written across the batch
    pub total_written: u64,
    /// Planned bytes across the batch
    pub total_size: u64,
    pub items_done: usize,
    pub items_total: usize,
}

impl ProgressSummary {
    /// Percentage of the current file, when its size is known
    pub fn file_percent(&self) -> Option<u64> {
        (self.file_size > 0).then(|| self.file_written.min(self.file_size) * 100 / self.file_size)
    }
}

/// Folds chunk events into rate-limited summaries
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    total_size: u64,
    items_total: usize,
    items_done: usize,
    /// Bytes of finished items
    finished_bytes: u64,
    current: Option<String>,
    current_written: u64,
    last_emitted: u64,
}

impl ProgressAggregator {
    /// New aggregator for a batch of `items_total` items worth `total_size` bytes
    pub fn new(items_total: usize, total_size: u64) -> Self {
        Self {
            total_size,
            items_total,
            ..Default::default()
        }
    }

    /// Record a write event; returns a summary when one is due
    pub fn record(&mut self, event: &ProgressEvent) -> Option<ProgressSummary> {
        if self.current.as_deref() != Some(event.name.as_str()) {
            self.current = Some(event.name.clone());
            self.current_written = 0;
            self.last_emitted = 0;
        }
        self.current_written = event.written;

        let advanced = event.written.saturating_sub(self.last_emitted);
        let due = if event.size == 0 {
            false
        } else {
            advanced * EMIT_FRACTION >= event.size || (event.written >= event.size && advanced > 0)
        };
        if !due {
            return None;
        }
        self.last_emitted = event.written;

        let summary = ProgressSummary {
            name: event.name.clone(),
            file_written: event.written,
            file_size: event.size,
            total_written: self.total_written(),
            total_size: self.total_size,
            items_done: self.items_done,
            items_total: self.items_total,
        };
        debug!(
            "{}: {}% ({}/{} bytes), batch {}/{} bytes, {}/{} items",
            summary.name,
            summary.file_percent().unwrap_or(0),
            summary.file_written,
            summary.file_size,
            summary.total_written,
            summary.total_size,
            summary.items_done,
            summary.items_total
        );
        Some(summary)
    }

    /// Mark the current item complete
    pub fn finish_item(&mut self) {
        if self.current.take().is_some() {
            self.finished_bytes += self.current_written;
        }
        self.current_written = 0;
        self.last_emitted = 0;
        self.items_done += 1;
    }

    pub fn total_written(&self) -> u64 {
        self.finished_bytes + self.current_written
    }

    pub fn items_done(&self) -> usize {
        self.items_done
    }

    pub fn items_total(&self) -> usize {
        self.items_total
    }
}
