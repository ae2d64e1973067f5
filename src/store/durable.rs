//! Durable instance partition backed by redb.
//!
//! Only mutable instance data is persisted: one bincode-encoded
//! [`RecipeRecord`] per recipe, keyed by its derived identifier. The base
//! schema and its static individuals are code, not data, so a fresh graph is
//! always rebuilt as schema + replayed records on startup.
//!
//! Every committed mutation writes through before the job reports success,
//! so a crash after commit never loses an acknowledged write.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::{PartitionError, PartitionResult};
use crate::recipe::RecipeRecord;

const RECIPES: TableDefinition<&str, &[u8]> = TableDefinition::new("recipes");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_SEQ: &str = "next_seq";

fn redb_err(err: impl std::fmt::Display) -> PartitionError {
    PartitionError::Redb {
        message: err.to_string(),
    }
}

/// Write-through store of recipe records.
#[derive(Debug)]
pub struct InstancePartition {
    db: Database,
}

impl InstancePartition {
    /// Open (or create) the partition under `data_dir`.
    pub fn open(data_dir: &Path) -> PartitionResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|source| PartitionError::Io { source })?;
        let path = data_dir.join("larder.redb");
        let db = Database::create(&path).map_err(redb_err)?;

        // Create tables up front so later reads never hit a missing table.
        let txn = db.begin_write().map_err(redb_err)?;
        {
            txn.open_table(RECIPES).map_err(redb_err)?;
            txn.open_table(META).map_err(redb_err)?;
        }
        txn.commit().map_err(redb_err)?;

        debug!(path = %path.display(), "opened instance partition");
        Ok(Self { db })
    }

    /// Persist (insert or replace) a recipe record.
    pub fn put(&self, record: &RecipeRecord) -> PartitionResult<()> {
        let bytes = bincode::serialize(record).map_err(|e| PartitionError::Serialization {
            message: e.to_string(),
        })?;
        let txn = self.db.begin_write().map_err(redb_err)?;
        {
            let mut table = txn.open_table(RECIPES).map_err(redb_err)?;
            table
                .insert(record.id.as_str(), bytes.as_slice())
                .map_err(redb_err)?;
        }
        txn.commit().map_err(redb_err)?;
        Ok(())
    }

    /// Remove a record. Returns `false` if it was not present.
    pub fn remove(&self, id: &str) -> PartitionResult<bool> {
        let txn = self.db.begin_write().map_err(redb_err)?;
        let removed;
        {
            let mut table = txn.open_table(RECIPES).map_err(redb_err)?;
            // The access guard borrows `table`; drop it before the table.
            let prior = table.remove(id).map_err(redb_err)?;
            removed = prior.is_some();
        }
        txn.commit().map_err(redb_err)?;
        Ok(removed)
    }

    /// Load every persisted record, sorted by creation sequence.
    pub fn load_all(&self) -> PartitionResult<Vec<RecipeRecord>> {
        let txn = self.db.begin_read().map_err(redb_err)?;
        let table = txn.open_table(RECIPES).map_err(redb_err)?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(redb_err)? {
            let (_, value) = entry.map_err(redb_err)?;
            let record: RecipeRecord =
                bincode::deserialize(value.value()).map_err(|e| PartitionError::Serialization {
                    message: e.to_string(),
                })?;
            records.push(record);
        }
        records.sort_by_key(|r| r.seq);
        debug!(count = records.len(), "loaded recipe records");
        Ok(records)
    }

    /// Allocate the next creation sequence number. Monotonic across restarts.
    pub fn next_seq(&self) -> PartitionResult<u64> {
        let txn = self.db.begin_write().map_err(redb_err)?;
        let seq = {
            let mut table = txn.open_table(META).map_err(redb_err)?;
            let current = table
                .get(NEXT_SEQ)
                .map_err(redb_err)?
                .map(|v| v.value())
                .unwrap_or(0);
            table.insert(NEXT_SEQ, current + 1).map_err(redb_err)?;
            current
        };
        txn.commit().map_err(redb_err)?;
        Ok(seq)
    }
}
