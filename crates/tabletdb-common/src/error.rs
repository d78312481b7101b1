//! Error types for TabletDB
//!
//! Provides a unified error type hierarchy for the storage node.

use thiserror::Error;

/// Result type alias using TabletDB's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for TabletDB
#[derive(Error, Debug)]
pub enum Error {
    // Storage Errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // Catalog Errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// A dimension or slot index outside `[0, count)`. Raised before any I/O.
    #[error("Dimension index {idx} out of range, table has {count} dimensions")]
    DimensionOutOfRange { idx: u32, count: u32 },

    /// The table directory already holds an initialized store.
    #[error("Table already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("Table not initialized")]
    NotInitialized,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Compaction failed: {0}")]
    CompactionFailed(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),
}

/// Catalog-related errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database already exists: {0}")]
    DatabaseExists(String),

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Table not found: {db}.{table}")]
    TableNotFound { db: String, table: String },

    #[error("Partition {pid} of table {db}.{table} already registered")]
    PartitionExists { db: String, table: String, pid: u32 },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}
