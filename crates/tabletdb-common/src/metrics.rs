//! Metrics and observability for TabletDB
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]

use metrics::{counter, gauge, histogram};
use std::time::Instant;

// ============================================================================
// Storage Metrics
// ============================================================================

/// Record a committed row write fanned out to `dimensions` column families
pub fn record_rows_written(tid: u32, dimensions: usize, bytes: u64) {
    counter!("tabletdb_rows_written_total", "tid" => tid.to_string()).increment(1);
    counter!("tabletdb_index_entries_written_total", "tid" => tid.to_string())
        .increment(dimensions as u64);
    counter!("tabletdb_storage_bytes_written_total").increment(bytes);
}

/// Record a write rejected before any I/O
pub fn record_write_rejected(tid: u32) {
    counter!("tabletdb_writes_rejected_total", "tid" => tid.to_string()).increment(1);
}

/// Record a point lookup
pub fn record_row_read(hit: bool, bytes: u64) {
    let result = if hit { "hit" } else { "miss" };
    counter!("tabletdb_rows_read_total", "result" => result).increment(1);
    counter!("tabletdb_storage_bytes_read_total").increment(bytes);
}

/// Record a single-dimension delete
pub fn record_row_deleted(tid: u32) {
    counter!("tabletdb_rows_deleted_total", "tid" => tid.to_string()).increment(1);
}

/// Record entries visited by a finished traversal
pub fn record_traverse(count: u64) {
    counter!("tabletdb_traverse_entries_total").increment(count);
    histogram!("tabletdb_traverse_length").record(count as f64);
}

/// Update the number of snapshots pinned by open traversals
pub fn set_active_snapshots(tid: u32, count: usize) {
    gauge!("tabletdb_active_snapshots", "tid" => tid.to_string()).set(count as f64);
}

/// Record a version compaction pass
pub fn record_compaction(removed: u64, duration_ms: u64) {
    counter!("tabletdb_compaction_total").increment(1);
    counter!("tabletdb_compaction_entries_removed_total").increment(removed);
    histogram!("tabletdb_compaction_duration_ms").record(duration_ms as f64);
}

// ============================================================================
// Catalog Metrics
// ============================================================================

/// Update the number of table handlers registered in the catalog
pub fn set_catalog_tables(count: usize) {
    gauge!("tabletdb_catalog_tables").set(count as f64);
}

/// Timer guard recording a storage operation latency on drop
pub struct LatencyTimer {
    start: Instant,
    operation: &'static str,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    #[must_use]
    pub fn elapsed_us(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1_000_000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!("tabletdb_storage_operation_duration_us", "operation" => self.operation)
            .record(self.elapsed_us());
    }
}
