use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use tabletdb_common::error::{CatalogError, Result};
use tabletdb_common::metrics;
use tabletdb_common::types::{PartitionId, TableMeta};
use tabletdb_storage::RelationalTable;

use crate::handler::TableHandler;
use crate::vm::Database;

/// Registry of the databases and table handlers hosted on this node.
///
/// Mutations are serialized by one lock held only for the mutation. Lookups
/// never take it and return shared handlers; a handler handed out keeps its
/// partitions even after the catalog entry is replaced or removed.
#[derive(Default)]
pub struct TabletCatalog {
    mutation: Mutex<()>,
    databases: DashMap<String, Arc<Database>>,
    tables: DashMap<(String, String), Arc<TableHandler>>,
}

impl TabletCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&self) -> Result<()> {
        info!("Tablet catalog initialized");
        Ok(())
    }

    pub fn add_db(&self, db: Database) -> Result<()> {
        let _guard = self.mutation.lock();
        if self.databases.contains_key(&db.name) {
            warn!(db = %db.name, "Database already exists");
            return Err(CatalogError::DatabaseExists(db.name).into());
        }
        info!(db = %db.name, "Added database");
        self.databases.insert(db.name.clone(), Arc::new(db));
        Ok(())
    }

    /// Serve `table` as a partition of the logical table described by `meta`.
    ///
    /// Registers the database if needed. Fails if the partition is already
    /// served or the schema is invalid.
    pub fn add_table(&self, meta: &TableMeta, table: Arc<RelationalTable>) -> Result<()> {
        let _guard = self.mutation.lock();
        let key = (meta.db.clone(), meta.name.clone());
        let pid = table.pid();

        let handler = match self.tables.get(&key) {
            Some(existing) => existing.with_partition(table)?,
            None => TableHandler::new(meta.clone())?.with_partition(table)?,
        };

        self.databases
            .entry(meta.db.clone())
            .or_insert_with(|| Arc::new(Database::new(meta.db.clone())));
        self.tables.insert(key, Arc::new(handler));
        metrics::set_catalog_tables(self.tables.len());

        info!(db = %meta.db, table = %meta.name, tid = meta.tid, pid, "Added table partition");
        Ok(())
    }

    /// Stop serving partition `pid`; the table entry goes away with its last partition
    pub fn delete_table(&self, db: &str, name: &str, pid: PartitionId) -> Result<()> {
        let _guard = self.mutation.lock();
        let key = (db.to_string(), name.to_string());
        let not_found = || CatalogError::TableNotFound {
            db: db.to_string(),
            table: name.to_string(),
        };

        let remaining = self
            .tables
            .get(&key)
            .ok_or_else(not_found)?
            .without_partition(pid)
            .ok_or_else(not_found)?;

        if remaining.partition_count() == 0 {
            self.tables.remove(&key);
        } else {
            self.tables.insert(key, Arc::new(remaining));
        }
        metrics::set_catalog_tables(self.tables.len());

        info!(db, table = name, pid, "Deleted table partition");
        Ok(())
    }

    /// Remove a database and every table registered under it
    pub fn delete_db(&self, db: &str) -> Result<()> {
        let _guard = self.mutation.lock();
        if self.databases.remove(db).is_none() {
            return Err(CatalogError::DatabaseNotFound(db.to_string()).into());
        }
        self.tables.retain(|(table_db, _), _| table_db != db);
        metrics::set_catalog_tables(self.tables.len());

        info!(db, "Deleted database");
        Ok(())
    }

    pub fn get_database(&self, db: &str) -> Option<Arc<Database>> {
        self.databases.get(db).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_table(&self, db: &str, name: &str) -> Option<Arc<TableHandler>> {
        self.tables
            .get(&(db.to_string(), name.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Whether the catalog can serve index lookups; always true
    pub fn index_support(&self) -> bool {
        true
    }

    /// Names of the tables registered under `db`, sorted
    pub fn list_tables(&self, db: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .iter()
            .filter(|entry| entry.key().0 == db)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        names
    }
}
