//! Multi-index relational table on one embedded store

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use sled::transaction::{ConflictableTransactionResult, TransactionError, TransactionResult};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info, warn};

use tabletdb_common::config::StorageConfig;
use tabletdb_common::error::{Error, Result, StorageError};
use tabletdb_common::metrics::{self, LatencyTimer};
use tabletdb_common::types::{
    CompressType, Dimension, DimensionMapping, PartitionId, StorageMode, TableId, TableMeta,
    TableMode,
};

use crate::compaction;
use crate::encoding::{self, Version};
use crate::options::{TierOptions, TierTemplates};
use crate::snapshot::SnapshotTracker;
use crate::traverse::TraverseIterator;

/// Open store and its column family handles
struct Store {
    db: Db,
    /// Index 0 is the default family; index `slot + 1` holds dimension `slot`
    column_families: Vec<Tree>,
}

/// Relational table storing each row once per declared index dimension.
///
/// Every dimension is a column family keyed by that dimension's key and
/// valued by the full row. Writes fan out to all dimensions of a row in one
/// atomic batch; deletes touch a single dimension only, so removing a row from
/// every index takes one [`delete`](Self::delete) per dimension.
pub struct RelationalTable {
    meta: TableMeta,
    db_root_path: PathBuf,
    templates: Arc<TierTemplates>,
    sync_write: bool,
    mapping: DimensionMapping,
    store: Option<Store>,
    snapshots: Arc<SnapshotTracker>,
    commit_lock: Mutex<()>,
    is_leader: AtomicBool,
}

impl RelationalTable {
    /// Create an uninitialized table; call [`init`](Self::init) before use.
    pub fn new(meta: TableMeta, db_root_path: impl Into<PathBuf>, templates: Arc<TierTemplates>) -> Self {
        let is_leader = meta.mode == TableMode::Leader;
        let snapshots = Arc::new(SnapshotTracker::for_table(meta.tid));
        Self {
            meta,
            db_root_path: db_root_path.into(),
            templates,
            sync_write: false,
            mapping: DimensionMapping::default(),
            store: None,
            snapshots,
            commit_lock: Mutex::new(()),
            is_leader: AtomicBool::new(is_leader),
        }
    }

    /// Create a table under the configured root using the process-wide tier templates
    pub fn from_config(meta: TableMeta, config: &StorageConfig) -> Self {
        Self::new(meta, &config.db_root_path, TierTemplates::global(config))
            .with_sync_write(config.sync_write)
    }

    /// Flush the store after every successful mutation
    #[must_use]
    pub fn with_sync_write(mut self, sync_write: bool) -> Self {
        self.sync_write = sync_write;
        self
    }

    /// Derive the dimension mapping and open the store with one column family per dimension.
    ///
    /// Not idempotent: fails if this table, or any earlier one with the same
    /// `(tid, pid)`, already initialized a store in the table directory.
    pub fn init(&mut self) -> Result<()> {
        let path = self.path();
        if self.store.is_some() || holds_store(&path)? {
            warn!(
                tid = self.id(),
                pid = self.pid(),
                path = %path.display(),
                "Table already initialized"
            );
            return Err(StorageError::AlreadyInitialized(path.display().to_string()).into());
        }

        let mapping = self.meta.dimension_mapping();
        for (name, slot) in mapping.iter() {
            debug!(tid = self.id(), pid = self.pid(), name, slot, "Add column family");
        }

        fs::create_dir_all(&path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to create table directory");
            e
        })?;

        let db = self
            .tier()
            .store_config(&path, self.meta.compress_type)
            .open()
            .map_err(|e| {
                warn!(tid = self.id(), pid = self.pid(), error = %e, "Store open failed");
                StorageError::Backend(e.to_string())
            })?;

        let mut column_families = Vec::with_capacity(mapping.len() + 1);
        column_families.push(Tree::clone(&db));
        for (name, _) in mapping.iter() {
            let family = db
                .open_tree(family_name(name))
                .map_err(|e| StorageError::Backend(format!("open column family {}: {}", name, e)))?;
            column_families.push(family);
        }

        info!(
            tid = self.id(),
            pid = self.pid(),
            dimensions = mapping.len(),
            path = %path.display(),
            "Opened table store"
        );

        self.mapping = mapping;
        self.store = Some(Store { db, column_families });
        Ok(())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Write a row under its primary key only, into the first dimension
    pub fn put(&self, pk: &[u8], row: &[u8]) -> Result<()> {
        let _timer = LatencyTimer::new("put");
        let family = self.family(0)?;

        self.commit(|sequence| {
            family
                .insert(encoding::encode_key(pk, sequence), encoding::encode_put(row))
                .map(|_| ())
                .map_err(|e| {
                    debug!(tid = self.id(), pid = self.pid(), error = %e, "Put failed");
                    StorageError::WriteFailed(e.to_string())
                })
        })?;

        metrics::record_rows_written(self.id(), 1, row.len() as u64);
        Ok(())
    }

    /// Write a row under every `(key, slot)` dimension in one atomic batch.
    ///
    /// Any out-of-range slot rejects the whole write before anything is
    /// persisted.
    pub fn put_dimensions(&self, row: &[u8], dimensions: &[Dimension]) -> Result<()> {
        let _timer = LatencyTimer::new("put_dimensions");
        let store = self.store()?;

        if let Some(rejected) = dimensions.iter().find(|d| d.idx >= self.idx_cnt()) {
            warn!(
                tid = self.id(),
                pid = self.pid(),
                idx = rejected.idx,
                key = %String::from_utf8_lossy(&rejected.key),
                "Failed putting key to dimension"
            );
            metrics::record_write_rejected(self.id());
            return Err(self.out_of_range(rejected.idx));
        }

        let value = encoding::encode_put(row);
        let families = &store.column_families[1..];

        self.commit(|sequence| {
            let entries: Vec<(usize, Vec<u8>)> = dimensions
                .iter()
                .map(|d| (d.idx as usize, encoding::encode_key(&d.key, sequence)))
                .collect();

            let result: TransactionResult<(), ()> =
                families.transaction(|trees| -> ConflictableTransactionResult<(), ()> {
                    for (slot, key) in &entries {
                        trees[*slot].insert(key.as_slice(), value.as_slice())?;
                    }
                    Ok(())
                });

            result.map_err(|e| {
                let message = match e {
                    TransactionError::Abort(()) => "batch aborted".to_string(),
                    TransactionError::Storage(e) => e.to_string(),
                };
                debug!(tid = self.id(), pid = self.pid(), error = %message, "Put failed");
                StorageError::WriteFailed(message)
            })
        })?;

        metrics::record_rows_written(self.id(), dimensions.len(), row.len() as u64);
        Ok(())
    }

    /// Remove `pk` from one dimension. Other dimensions of the row are untouched.
    pub fn delete(&self, pk: &[u8], idx: u32) -> Result<()> {
        let _timer = LatencyTimer::new("delete");
        let family = self.family(idx)?;

        self.commit(|sequence| {
            family
                .insert(encoding::encode_key(pk, sequence), encoding::encode_delete())
                .map(|_| ())
                .map_err(|e| {
                    debug!(tid = self.id(), pid = self.pid(), error = %e, "Delete failed");
                    StorageError::WriteFailed(e.to_string())
                })
        })?;

        metrics::record_row_deleted(self.id());
        Ok(())
    }

    /// Run `write` with the next sequence and publish it once the write committed.
    ///
    /// The lock only orders publication: a snapshot never sees a sequence
    /// whose write is still in flight.
    fn commit<F>(&self, write: F) -> Result<u64>
    where
        F: FnOnce(u64) -> std::result::Result<(), StorageError>,
    {
        let sequence = {
            let _guard = self.commit_lock.lock();
            let sequence = self.snapshots.last_sequence() + 1;
            write(sequence)?;
            self.snapshots.publish(sequence);
            sequence
        };

        if self.sync_write {
            self.flush()?;
        }
        Ok(sequence)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Point lookup of `pk` in dimension `idx`
    pub fn get(&self, idx: u32, pk: &[u8]) -> Result<Option<Vec<u8>>> {
        let _timer = LatencyTimer::new("get");
        let family = self.family(idx)?;
        let snapshot = self.snapshots.acquire();

        let value = read_visible(family, pk, snapshot.sequence())?;
        metrics::record_row_read(value.is_some(), value.as_ref().map_or(0, |v| v.len() as u64));
        Ok(value)
    }

    /// Open a cursor over dimension `idx` pinned to the current snapshot
    pub fn new_traverse(&self, idx: u32) -> Result<TraverseIterator> {
        let family = self.family(idx)?;
        let snapshot = self.snapshots.acquire();
        Ok(TraverseIterator::new(
            family.clone(),
            snapshot,
            self.tier().readahead_entries(),
        ))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Remove versions that no open snapshot or later read can observe.
    ///
    /// Returns the number of physical entries removed.
    pub fn compact(&self) -> Result<u64> {
        let store = self.store()?;
        let started = Instant::now();
        let watermark = self.snapshots.watermark();

        let removed = compaction::compact_families(
            &store.column_families[1..],
            watermark,
            self.tier().compaction_threads(),
        )?;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            tid = self.id(),
            pid = self.pid(),
            watermark,
            removed,
            elapsed_ms,
            "Compacted table versions"
        );
        metrics::record_compaction(removed, elapsed_ms);
        Ok(removed)
    }

    /// Flush buffered writes to disk
    pub fn flush(&self) -> Result<()> {
        self.store()?
            .db
            .flush()
            .map(|_| ())
            .map_err(|e| StorageError::WriteFailed(format!("flush: {}", e)).into())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn id(&self) -> TableId {
        self.meta.tid
    }

    pub fn pid(&self) -> PartitionId {
        self.meta.pid
    }

    pub fn table_meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.meta.storage_mode
    }

    pub fn compress_type(&self) -> CompressType {
        self.meta.compress_type
    }

    /// Dimension mapping; empty until [`init`](Self::init) succeeded
    pub fn dimensions(&self) -> &DimensionMapping {
        &self.mapping
    }

    /// Number of dimensions
    pub fn idx_cnt(&self) -> u32 {
        u32::try_from(self.mapping.len()).unwrap_or(u32::MAX)
    }

    /// Operation counter: number of successful mutations so far
    pub fn offset(&self) -> u64 {
        self.snapshots.last_sequence()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    pub fn set_leader(&self, is_leader: bool) {
        self.is_leader.store(is_leader, Ordering::Relaxed);
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_some()
    }

    /// Snapshots pinned by open traversals and in-flight reads
    pub fn active_snapshots(&self) -> usize {
        self.snapshots.active_count()
    }

    /// Bytes used by the store on disk
    pub fn disk_used(&self) -> Result<u64> {
        self.store()?
            .db
            .size_on_disk()
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    /// Table directory, `<db_root_path>/<tid>_<pid>/data`
    pub fn path(&self) -> PathBuf {
        self.db_root_path
            .join(format!("{}_{}", self.meta.tid, self.meta.pid))
            .join("data")
    }

    // ========================================================================
    // Internal Helpers
    // ========================================================================

    fn tier(&self) -> &TierOptions {
        self.templates.for_mode(self.meta.storage_mode)
    }

    fn store(&self) -> Result<&Store> {
        self.store
            .as_ref()
            .ok_or(Error::Storage(StorageError::NotInitialized))
    }

    fn family(&self, idx: u32) -> Result<&Tree> {
        let store = self.store()?;
        if idx >= self.idx_cnt() {
            warn!(
                tid = self.id(),
                pid = self.pid(),
                idx,
                idx_cnt = self.idx_cnt(),
                "Dimension index greater than dimension count"
            );
            return Err(self.out_of_range(idx));
        }
        Ok(&store.column_families[idx as usize + 1])
    }

    fn out_of_range(&self, idx: u32) -> Error {
        StorageError::DimensionOutOfRange {
            idx,
            count: self.idx_cnt(),
        }
        .into()
    }
}

impl Drop for RelationalTable {
    fn drop(&mut self) {
        if let Some(Store { db, column_families }) = self.store.take() {
            if let Err(e) = db.flush() {
                warn!(tid = self.id(), pid = self.pid(), error = %e, "Flush on close failed");
            }
            drop(column_families);
            drop(db);
            info!(tid = self.id(), pid = self.pid(), "Closed table store");
        }
    }
}

/// Tree name of a dimension's column family, kept apart from sled's own trees
fn family_name(dimension: &str) -> String {
    format!("cf_{}", dimension)
}

/// Whether `path` already holds files of a store
fn holds_store(path: &Path) -> Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Newest version of `pk` at or below `sequence`, if it is not a tombstone
fn read_visible(family: &Tree, pk: &[u8], sequence: u64) -> Result<Option<Vec<u8>>> {
    for entry in family.scan_prefix(encoding::escape(pk)) {
        let (raw_key, raw_value) = entry.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        let (_, version) = encoding::split_key(&raw_key)?;
        if version > sequence {
            continue;
        }
        return match encoding::decode_value(&raw_value)? {
            Version::Put(row) => Ok(Some(row.to_vec())),
            Version::Delete => Ok(None),
        };
    }
    Ok(None)
}
