//! TabletDB Catalog
//!
//! Exposes tables stored on this node to the query engine:
//! - [`TabletCatalog`]: registry of databases and table handlers
//! - [`TableHandler`] → [`PartitionHandler`] → [`SegmentHandler`]: table,
//!   named-index and single-key views over the hosted partitions
//! - Row and window iterators backed by snapshot traversals

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod catalog;
pub mod handler;
pub mod iterator;
pub mod vm;

pub use catalog::TabletCatalog;
pub use handler::{DataHandler, PartitionHandler, SegmentHandler, TableHandler};
pub use vm::{Database, OrderType, Row, RowIterator, WindowIterator};
