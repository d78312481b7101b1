//! TabletDB Storage Engine
//!
//! Relational row storage on an embedded log-structured store:
//! - One column family per declared index dimension, plus a default family
//! - Atomic fan-out writes of a row into every dimension it is indexed under
//! - Snapshot-consistent traversal of a single dimension
//! - Tier-specific (SSD/HDD) option templates shared by every table of a tier
//!
//! The store keeps every mutation as a sequence-numbered version so that a
//! traversal pinned to a sequence observes exactly the rows committed before
//! it, regardless of concurrent writers. Versions no reader can observe are
//! reclaimed by [`RelationalTable::compact`].

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod compaction;
mod encoding;
mod options;
mod snapshot;
mod table;
mod traverse;

pub use options::{TierOptions, TierTemplates};
pub use snapshot::{SnapshotGuard, SnapshotTracker};
pub use table::RelationalTable;
pub use traverse::TraverseIterator;
