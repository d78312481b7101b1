//! Table, partition and segment handlers
//!
//! A [`TableHandler`] adapts the partitions of one logical table to the query
//! engine. [`PartitionHandler`] narrows it to one named index and
//! [`SegmentHandler`] to one key of that index. Each step is a pure
//! construction; storage is touched only when an iterator is opened.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use tabletdb_common::error::{CatalogError, Result};
use tabletdb_common::types::{PartitionId, TableId, TableMeta};
use tabletdb_storage::{RelationalTable, TraverseIterator};

use crate::iterator::{EmptyRowIterator, FullTableIterator, MergedRowIterator, MergedWindowIterator};
use crate::vm::{ColumnDef, ColumnType, IndexHint, IndexSt, OrderType, Row, RowIterator, Schema, Types, WindowIterator};

/// Read capabilities shared by every handler
pub trait DataHandler: Send + Sync {
    fn schema(&self) -> &Schema;

    fn name(&self) -> &str;

    fn database(&self) -> &str;

    fn types(&self) -> &Types;

    fn index(&self) -> &IndexHint;

    fn order_type(&self) -> OrderType;

    /// Rows reachable through this handler. The iterator may be unpositioned.
    fn get_iterator(&self) -> Result<Box<dyn RowIterator>>;

    /// Number of rows, by walking the iterator
    fn get_count(&self) -> Result<u64> {
        let mut it = self.get_iterator()?;
        it.seek_to_first();
        let mut count = 0;
        while it.valid() {
            count += 1;
            it.next();
        }
        Ok(count)
    }

    /// Row at `pos` in iteration order, or the empty row past the end
    fn at(&self, pos: u64) -> Result<Row> {
        let mut it = self.get_iterator()?;
        it.seek_to_first();
        for _ in 0..pos {
            if !it.valid() {
                break;
            }
            it.next();
        }
        Ok(if it.valid() { it.value() } else { Row::default() })
    }

    fn handler_type_name(&self) -> &'static str;
}

/// Schema and index metadata derived once per logical table
#[derive(Debug)]
struct TableInfo {
    meta: TableMeta,
    schema: Schema,
    types: Types,
    index_hint: IndexHint,
}

impl TableInfo {
    fn new(meta: TableMeta) -> Result<Self> {
        let mut schema = Schema::with_capacity(meta.column_desc.len());
        let mut types = Types::with_capacity(meta.column_desc.len());

        for (idx, column) in (0u32..).zip(&meta.column_desc) {
            let column_type = ColumnType {
                data_type: column.data_type,
                idx,
            };
            if types.insert(column.name.clone(), column_type).is_some() {
                return Err(CatalogError::InvalidSchema(format!(
                    "duplicate column {} in table {}",
                    column.name, meta.name
                ))
                .into());
            }
            schema.push(ColumnDef {
                name: column.name.clone(),
                data_type: column.data_type,
            });
        }

        let index_hint = meta
            .dimension_mapping()
            .iter()
            .map(|(name, slot)| {
                let keys = if types.contains_key(name) {
                    vec![name.to_string()]
                } else {
                    Vec::new()
                };
                let index = IndexSt {
                    name: name.to_string(),
                    slot,
                    keys,
                };
                (name.to_string(), index)
            })
            .collect();

        Ok(Self {
            meta,
            schema,
            types,
            index_hint,
        })
    }
}

/// One logical table and the partitions of it hosted on this node.
///
/// Immutable: adding or removing a partition yields a new handler sharing the
/// same table info, so handlers already handed out keep their partition set.
#[derive(Clone)]
pub struct TableHandler {
    info: Arc<TableInfo>,
    partitions: BTreeMap<PartitionId, Arc<RelationalTable>>,
}

impl TableHandler {
    /// Build a handler with no partitions.
    ///
    /// Fails if two columns share a name.
    pub fn new(meta: TableMeta) -> Result<Self> {
        let info = TableInfo::new(meta)?;
        debug!(
            db = %info.meta.db,
            table = %info.meta.name,
            tid = info.meta.tid,
            columns = info.schema.len(),
            indexes = info.index_hint.len(),
            "Built table handler"
        );
        Ok(Self {
            info: Arc::new(info),
            partitions: BTreeMap::new(),
        })
    }

    /// Copy of this handler that also serves `table`
    pub fn with_partition(&self, table: Arc<RelationalTable>) -> Result<Self> {
        let pid = table.pid();
        if self.partitions.contains_key(&pid) {
            return Err(CatalogError::PartitionExists {
                db: self.info.meta.db.clone(),
                table: self.info.meta.name.clone(),
                pid,
            }
            .into());
        }
        let mut partitions = self.partitions.clone();
        partitions.insert(pid, table);
        Ok(Self {
            info: Arc::clone(&self.info),
            partitions,
        })
    }

    /// Copy of this handler without partition `pid`, or `None` if it is not served
    pub fn without_partition(&self, pid: PartitionId) -> Option<Self> {
        if !self.partitions.contains_key(&pid) {
            return None;
        }
        let mut partitions = self.partitions.clone();
        partitions.remove(&pid);
        Some(Self {
            info: Arc::clone(&self.info),
            partitions,
        })
    }

    pub fn tid(&self) -> TableId {
        self.info.meta.tid
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition(&self, pid: PartitionId) -> Option<&Arc<RelationalTable>> {
        self.partitions.get(&pid)
    }

    /// Ordinal of a column
    pub fn get_column_index(&self, column: &str) -> Option<u32> {
        self.info.types.get(column).map(|column_type| column_type.idx)
    }

    /// Window iterator over the named index across all partitions, or
    /// `None` for an unknown index
    pub fn get_window_iterator(&self, index_name: &str) -> Result<Option<Box<dyn WindowIterator>>> {
        let Some(index) = self.info.index_hint.get(index_name) else {
            debug!(table = %self.info.meta.name, index = index_name, "Index not found");
            return Ok(None);
        };
        let window = MergedWindowIterator::new(self.cursors(index.slot)?);
        Ok(Some(Box::new(window)))
    }

    /// Partition handler for a named index, or `None` for an unknown index
    pub fn get_partition(self: &Arc<Self>, index_name: &str) -> Option<Arc<PartitionHandler>> {
        let index = self.info.index_hint.get(index_name)?;
        Some(Arc::new(PartitionHandler {
            table: Arc::clone(self),
            index: index.clone(),
        }))
    }

    fn cursors(&self, slot: u32) -> Result<Vec<TraverseIterator>> {
        self.partitions
            .values()
            .map(|table| table.new_traverse(slot))
            .collect()
    }
}

impl DataHandler for TableHandler {
    fn schema(&self) -> &Schema {
        &self.info.schema
    }

    fn name(&self) -> &str {
        &self.info.meta.name
    }

    fn database(&self) -> &str {
        &self.info.meta.db
    }

    fn types(&self) -> &Types {
        &self.info.types
    }

    fn index(&self) -> &IndexHint {
        &self.info.index_hint
    }

    fn order_type(&self) -> OrderType {
        OrderType::NoOrder
    }

    /// Rows of the first index, partition by partition in pid order
    fn get_iterator(&self) -> Result<Box<dyn RowIterator>> {
        Ok(Box::new(FullTableIterator::new(self.cursors(0)?)))
    }

    fn handler_type_name(&self) -> &'static str {
        "TabletTableHandler"
    }
}

/// Rows of one table reachable through one named index
pub struct PartitionHandler {
    table: Arc<TableHandler>,
    index: IndexSt,
}

impl PartitionHandler {
    pub fn index_name(&self) -> &str {
        &self.index.name
    }

    pub fn table(&self) -> &Arc<TableHandler> {
        &self.table
    }

    pub fn get_window_iterator(&self) -> Result<Box<dyn WindowIterator>> {
        debug!(index = %self.index.name, "Get window iterator");
        Ok(Box::new(self.window()?))
    }

    /// Segment of this index under `key`; performs no I/O
    pub fn get_segment(self: &Arc<Self>, key: impl Into<Vec<u8>>) -> Arc<SegmentHandler> {
        Arc::new(SegmentHandler {
            partition: Arc::clone(self),
            key: key.into(),
        })
    }

    fn window(&self) -> Result<MergedWindowIterator> {
        Ok(MergedWindowIterator::new(self.table.cursors(self.index.slot)?))
    }
}

impl DataHandler for PartitionHandler {
    fn schema(&self) -> &Schema {
        self.table.schema()
    }

    fn name(&self) -> &str {
        self.table.name()
    }

    fn database(&self) -> &str {
        self.table.database()
    }

    fn types(&self) -> &Types {
        self.table.types()
    }

    fn index(&self) -> &IndexHint {
        self.table.index()
    }

    fn order_type(&self) -> OrderType {
        OrderType::Desc
    }

    /// Every row of the index in key order
    fn get_iterator(&self) -> Result<Box<dyn RowIterator>> {
        Ok(Box::new(MergedRowIterator::new(self.window()?)))
    }

    /// Number of distinct keys in the index
    fn get_count(&self) -> Result<u64> {
        let mut window = self.get_window_iterator()?;
        window.seek_to_first();
        let mut count = 0;
        while window.valid() {
            count += 1;
            window.next();
        }
        Ok(count)
    }

    fn handler_type_name(&self) -> &'static str {
        "TabletPartitionHandler"
    }
}

/// Rows of one index stored under exactly one key
pub struct SegmentHandler {
    partition: Arc<PartitionHandler>,
    key: Vec<u8>,
}

impl SegmentHandler {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn partition(&self) -> &Arc<PartitionHandler> {
        &self.partition
    }

    /// Segments have no window iterator
    pub fn get_window_iterator(&self) -> Option<Box<dyn WindowIterator>> {
        None
    }
}

impl DataHandler for SegmentHandler {
    fn schema(&self) -> &Schema {
        self.partition.schema()
    }

    fn name(&self) -> &str {
        self.partition.name()
    }

    fn database(&self) -> &str {
        self.partition.database()
    }

    fn types(&self) -> &Types {
        self.partition.types()
    }

    fn index(&self) -> &IndexHint {
        self.partition.index()
    }

    fn order_type(&self) -> OrderType {
        self.partition.order_type()
    }

    /// Rows under the key, or an invalid iterator when the key is absent
    fn get_iterator(&self) -> Result<Box<dyn RowIterator>> {
        let mut window = self.partition.get_window_iterator()?;
        debug!(key = %String::from_utf8_lossy(&self.key), "Seek to key");
        window.seek(&self.key);
        if window.valid() && window.key().as_bytes() == self.key.as_slice() {
            Ok(window.value())
        } else {
            Ok(Box::new(EmptyRowIterator))
        }
    }

    fn handler_type_name(&self) -> &'static str {
        "TabletSegmentHandler"
    }
}
