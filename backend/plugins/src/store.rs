//! SQLite persistence backend for the plugin registry.
//!
//! One row per plugin, the full record as a JSON column. Upserts preserve the
//! original rowid, so `load_all` in rowid order reproduces insertion order
//! across process restarts.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use persona_core::PluginRecord;

pub struct RegistryStore {
    conn: Connection,
}

impl RegistryStore {
    /// Open or create the registry database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open registry database")?;
        let store = Self { conn };
        store.init_schema()?;
        info!(path = %path, "Plugin registry store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS plugins (
                name TEXT PRIMARY KEY,
                record TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Insert or update a plugin record. The write is durable when this
    /// returns: rusqlite runs each statement in its own committed
    /// transaction.
    pub fn upsert(&self, record: &PluginRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO plugins (name, record) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET record = excluded.record",
            params![record.name, json],
        )?;
        Ok(())
    }

    /// Remove a plugin record. Removing an absent name is a no-op.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM plugins WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// Load all records in insertion (rowid) order. A row whose JSON no
    /// longer decodes is skipped with a warning rather than taking the whole
    /// registry down.
    pub fn load_all(&self) -> Result<Vec<PluginRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT record FROM plugins ORDER BY rowid ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            let json = row?;
            match serde_json::from_str(&json) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping undecodable plugin record row"),
            }
        }
        Ok(records)
    }

    /// Count stored records.
    pub fn count(&self) -> Result<usize> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM plugins", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona_core::PluginStatus;
    use std::collections::BTreeSet;

    fn record(name: &str) -> PluginRecord {
        PluginRecord::new(name, "1.0.0", BTreeSet::new())
    }

    #[test]
    fn upsert_preserves_insertion_order() {
        let store = RegistryStore::in_memory().unwrap();
        store.upsert(&record("renderer")).unwrap();
        store.upsert(&record("lipsync")).unwrap();
        store.upsert(&record("voice")).unwrap();

        // Updating an existing row must not move it to the end.
        let mut renderer = record("renderer");
        renderer.version = "2.0.0".into();
        store.upsert(&renderer).unwrap();

        let names: Vec<String> = store
            .load_all()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["renderer", "lipsync", "voice"]);
    }

    #[test]
    fn delete_then_count() {
        let store = RegistryStore::in_memory().unwrap();
        store.upsert(&record("voice")).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        store.delete("voice").unwrap();
        assert_eq!(store.count().unwrap(), 0);
        // Deleting an absent row is not an error.
        store.delete("voice").unwrap();
    }

    #[test]
    fn undecodable_rows_are_skipped_not_fatal() {
        let store = RegistryStore::in_memory().unwrap();
        store.upsert(&record("voice")).unwrap();
        store
            .conn
            .execute(
                "INSERT INTO plugins (name, record) VALUES ('junk', 'not json')",
                [],
            )
            .unwrap();

        let names: Vec<String> = store
            .load_all()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["voice"]);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let path = path.to_str().unwrap();

        {
            let store = RegistryStore::open(path).unwrap();
            let mut rec = record("voice");
            rec.status = PluginStatus::Active;
            store.upsert(&rec).unwrap();
        }

        let store = RegistryStore::open(path).unwrap();
        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "voice");
        assert_eq!(records[0].status, PluginStatus::Active);
    }
}
