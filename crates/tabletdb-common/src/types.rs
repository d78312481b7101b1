//! Common type definitions for TabletDB

use serde::{Deserialize, Serialize};

/// Table identifier
pub type TableId = u32;

/// Partition identifier within a table
pub type PartitionId = u32;

/// Name of the dimension synthesized for tables that declare no index
pub const DEFAULT_DIMENSION: &str = "idx0";

// ============================================================================
// Table Metadata
// ============================================================================

/// Storage tier of a table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Ssd,
    Hdd,
}

/// Compression setting of a table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressType {
    #[default]
    NoCompress,
    Snappy,
}

/// Replication role of a table partition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    #[default]
    Leader,
    Follower,
}

/// Column data types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Date,
    Timestamp,
    Varchar,
    String,
}

/// Column descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDesc {
    /// Column name
    pub name: String,
    /// Column type
    pub data_type: DataType,
    /// Whether a dimension is declared on this column
    #[serde(default)]
    pub is_index: bool,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_index: false,
        }
    }

    pub fn index(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_index: true,
        }
    }
}

/// Immutable descriptor supplied at table creation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableMeta {
    /// Table name
    pub name: String,
    /// Owning database
    #[serde(default)]
    pub db: String,
    /// Table id
    pub tid: TableId,
    /// Partition id
    pub pid: PartitionId,
    /// Storage tier
    #[serde(default)]
    pub storage_mode: StorageMode,
    /// Ordered column descriptors
    #[serde(default)]
    pub column_desc: Vec<ColumnDesc>,
    /// Legacy dimension names, used only when no column is index-flagged
    #[serde(default)]
    pub dimensions: Vec<String>,
    /// Compression setting
    #[serde(default)]
    pub compress_type: CompressType,
    /// Leader or follower
    #[serde(default)]
    pub mode: TableMode,
}

impl TableMeta {
    pub fn new(db: impl Into<String>, name: impl Into<String>, tid: TableId, pid: PartitionId) -> Self {
        Self {
            name: name.into(),
            db: db.into(),
            tid,
            pid,
            storage_mode: StorageMode::default(),
            column_desc: Vec::new(),
            dimensions: Vec::new(),
            compress_type: CompressType::default(),
            mode: TableMode::default(),
        }
    }

    pub fn with_column(mut self, column: ColumnDesc) -> Self {
        self.column_desc.push(column);
        self
    }

    pub fn with_dimension(mut self, name: impl Into<String>) -> Self {
        self.dimensions.push(name.into());
        self
    }

    pub fn with_storage_mode(mut self, storage_mode: StorageMode) -> Self {
        self.storage_mode = storage_mode;
        self
    }

    pub fn with_compress_type(mut self, compress_type: CompressType) -> Self {
        self.compress_type = compress_type;
        self
    }

    pub fn with_mode(mut self, mode: TableMode) -> Self {
        self.mode = mode;
        self
    }

    /// Same table descriptor for another partition
    #[must_use]
    pub fn for_partition(&self, pid: PartitionId) -> Self {
        let mut meta = self.clone();
        meta.pid = pid;
        meta
    }

    /// Derive the dimension mapping.
    ///
    /// Index-flagged columns win, in declaration order. Without any, the
    /// legacy dimension list is used. If neither yields a dimension a single
    /// [`DEFAULT_DIMENSION`] is synthesized. Duplicate names keep their first
    /// slot.
    pub fn dimension_mapping(&self) -> DimensionMapping {
        let mut mapping = DimensionMapping::default();
        let indexed: Vec<&str> = self
            .column_desc
            .iter()
            .filter(|column| column.is_index)
            .map(|column| column.name.as_str())
            .collect();

        if indexed.is_empty() {
            for name in &self.dimensions {
                mapping.push(name);
            }
        } else {
            for name in indexed {
                mapping.push(name);
            }
        }

        if mapping.is_empty() {
            mapping.push(DEFAULT_DIMENSION);
        }
        mapping
    }
}

// ============================================================================
// Dimensions
// ============================================================================

/// Ordered mapping from dimension name to zero-based slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionMapping {
    names: Vec<String>,
}

impl DimensionMapping {
    fn push(&mut self, name: &str) {
        if !self.names.iter().any(|existing| existing == name) {
            self.names.push(name.to_string());
        }
    }

    /// Number of dimensions
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Slot of a dimension by name
    pub fn slot(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .position(|existing| existing == name)
            .and_then(|slot| u32::try_from(slot).ok())
    }

    /// Dimension name at a slot
    pub fn name(&self, slot: u32) -> Option<&str> {
        self.names.get(slot as usize).map(String::as_str)
    }

    /// `(name, slot)` pairs in slot order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.names
            .iter()
            .zip(0u32..)
            .map(|(name, slot)| (name.as_str(), slot))
    }
}

/// One `(key, slot)` target of a fan-out write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub key: Vec<u8>,
    pub idx: u32,
}

impl Dimension {
    pub fn new(key: impl Into<Vec<u8>>, idx: u32) -> Self {
        Self {
            key: key.into(),
            idx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_from_index_columns() {
        let meta = TableMeta::new("db", "t", 1, 0)
            .with_column(ColumnDesc::index("a", DataType::String))
            .with_column(ColumnDesc::new("v", DataType::Double))
            .with_column(ColumnDesc::index("b", DataType::BigInt))
            .with_dimension("legacy");

        let mapping = meta.dimension_mapping();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.slot("a"), Some(0));
        assert_eq!(mapping.slot("b"), Some(1));
        assert_eq!(mapping.slot("legacy"), None);
    }

    #[test]
    fn test_mapping_from_legacy_dimensions() {
        let meta = TableMeta::new("db", "t", 1, 0)
            .with_column(ColumnDesc::new("card", DataType::String))
            .with_dimension("card")
            .with_dimension("mcc");

        let mapping = meta.dimension_mapping();
        assert_eq!(mapping.iter().collect::<Vec<_>>(), vec![("card", 0), ("mcc", 1)]);
    }

    #[test]
    fn test_mapping_synthesizes_default() {
        let meta = TableMeta::new("db", "t", 1, 0).with_column(ColumnDesc::new("v", DataType::Int));

        let mapping = meta.dimension_mapping();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.name(0), Some(DEFAULT_DIMENSION));
    }

    #[test]
    fn test_meta_deserializes_with_defaults() {
        let meta: TableMeta = serde_json::from_str(
            r#"{"name": "t1", "tid": 7, "pid": 2,
                "column_desc": [{"name": "k", "data_type": "string", "is_index": true}],
                "storage_mode": "hdd"}"#,
        )
        .unwrap();

        assert_eq!(meta.storage_mode, StorageMode::Hdd);
        assert_eq!(meta.mode, TableMode::Leader);
        assert_eq!(meta.compress_type, CompressType::NoCompress);
        assert_eq!(meta.dimension_mapping().slot("k"), Some(0));
    }
}
