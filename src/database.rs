use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::error::MediaMergeError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage session handed to every component that touches the database.
///
/// Opened once at startup by the CLI and closed at shutdown. There is no global
/// connection: anything that needs the database takes a `&Database` (reads) or
/// `&mut Database` (transactions) in its constructor.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, MediaMergeError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        info!("Database opened at: {}", path.display());

        Ok(Database {
            conn,
            path: path.to_owned(),
        })
    }

    pub fn close(self) -> Result<(), MediaMergeError> {
        let path = self.path;
        self.conn.close().map_err(|(_, e)| MediaMergeError::DatabaseError(e))?;
        debug!("Database closed: {}", path.display());
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin a write transaction that takes the database write lock up front, so a
    /// concurrent invocation waits instead of interleaving with this one.
    pub fn immediate_transaction(&mut self) -> Result<Transaction<'_>, MediaMergeError> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(MediaMergeError::transaction("begin"))
    }

    pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
        Self::schema_object_exists(conn, "table", table)
    }

    pub fn index_exists(conn: &Connection, index: &str) -> Result<bool, rusqlite::Error> {
        Self::schema_object_exists(conn, "index", index)
    }

    fn schema_object_exists(
        conn: &Connection,
        object_type: &str,
        name: &str,
    ) -> Result<bool, rusqlite::Error> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = ? AND name = ?",
                [object_type, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Row count of `table`. The name must be one of the crate's own table constants.
    pub fn count_rows(conn: &Connection, table: &str) -> Result<i64, rusqlite::Error> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_close_and_schema_probes() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("app.db");
        let db = Database::open(&db_path).unwrap();
        assert_eq!(db.path(), db_path.as_path());

        db.conn()
            .execute_batch("CREATE TABLE t (id INTEGER); CREATE INDEX idx_t ON t (id);")
            .unwrap();
        assert!(Database::table_exists(db.conn(), "t").unwrap());
        assert!(!Database::table_exists(db.conn(), "missing").unwrap());
        assert!(Database::index_exists(db.conn(), "idx_t").unwrap());
        assert_eq!(Database::count_rows(db.conn(), "t").unwrap(), 0);

        db.close().unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_immediate_transaction_rolls_back_on_drop() {
        let dir = TempDir::new().unwrap();
        let mut db = Database::open(&dir.path().join("app.db")).unwrap();
        db.conn().execute_batch("CREATE TABLE t (id INTEGER)").unwrap();

        {
            let tx = db.immediate_transaction().unwrap();
            tx.execute("INSERT INTO t (id) VALUES (1)", []).unwrap();
        }

        assert_eq!(Database::count_rows(db.conn(), "t").unwrap(), 0);
    }
}
