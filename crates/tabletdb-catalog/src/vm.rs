//! Types shared with the query engine

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use tabletdb_common::types::DataType;

/// Encoded row. Never interpreted by storage or the catalog.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Row(Bytes);

impl Row {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The empty row, returned when a position or key has no row
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row({:?})", self.0)
    }
}

impl AsRef<[u8]> for Row {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Row {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static str> for Row {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

/// One column of a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
}

/// Ordered column list
pub type Schema = Vec<ColumnDef>;

/// Type and ordinal of a named column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    pub data_type: DataType,
    pub idx: u32,
}

/// Column name to type and ordinal
pub type Types = HashMap<String, ColumnType>;

/// A declared index: its name, storage slot and key columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSt {
    pub name: String,
    pub slot: u32,
    pub keys: Vec<String>,
}

/// Index name to index description
pub type IndexHint = BTreeMap<String, IndexSt>;

/// Iteration order a handler reports to the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Asc,
    Desc,
    NoOrder,
}

/// Registered database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Forward cursor over rows.
///
/// A new iterator may be unpositioned; call [`seek_to_first`](Self::seek_to_first)
/// or [`seek`](Self::seek) before reading. `key` and `value` return the empty
/// row when the iterator is not valid.
pub trait RowIterator: Send {
    fn valid(&self) -> bool;

    fn next(&mut self);

    /// Position at the first row whose key is >= `key`
    fn seek(&mut self, key: &[u8]);

    fn seek_to_first(&mut self);

    fn key(&self) -> Row;

    fn value(&self) -> Row;
}

/// Cursor over keys, each yielding the group of rows stored under it
pub trait WindowIterator: Send {
    /// Position at the first key >= `key`
    fn seek(&mut self, key: &[u8]);

    fn seek_to_first(&mut self);

    fn valid(&self) -> bool;

    fn next(&mut self);

    fn key(&self) -> Row;

    /// Rows under the current key, positioned at the first of them
    fn value(&self) -> Box<dyn RowIterator>;
}
