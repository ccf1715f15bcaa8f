mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use rusqlite::{Connection, TransactionBehavior};

use crate::error::{ChadoError, Result};
use crate::models::Table;

/// Handle on one Chado store.
///
/// All access goes through a single connection. Imports take it for the
/// duration of one transaction, so two imports in one process never
/// interleave.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        schema::run_migrations(&conn)
    }

    /// Runs `f` inside one immediate transaction.
    ///
    /// Commits when `f` succeeds. Any error, including a panic unwinding
    /// through `f`, drops the transaction and rolls it back.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    pub fn row_count(&self, table: Table) -> Result<i64> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ChadoError::LockPoisoned)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

/// `<data_dir>/chado-io/chado.db`
pub fn default_path() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "chado-io")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("chado.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_transaction_leaves_no_rows() {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();

        let result: Result<()> = db.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO organism (abbreviation, genus, species) VALUES ('Pf', 'Plasmodium', 'falciparum')",
                [],
            )?;
            Err(ChadoError::Cancelled)
        });

        assert!(matches!(result, Err(ChadoError::Cancelled)));
        assert_eq!(db.row_count(Table::Organism).unwrap(), 0);
    }

    #[test]
    fn file_database_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chado.db");

        let db = Database::open(path.clone()).unwrap();
        db.migrate().unwrap();

        assert!(path.exists());
    }
}
