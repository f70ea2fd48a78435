use log::{debug, warn};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::database::Database;
use crate::schema::{CREATE_LEDGER_SQL, LEDGER_TABLE};
use crate::utils::Utils;

/// The one migration this crate knows how to perform.
pub const MEDIA_UNIFICATION: &str = "media_unification_2024";

/// Independent flag recording that the file phase finished without failures.
pub const MEDIA_FILES: &str = "media_unification_2024_files";

#[derive(Clone, Debug, PartialEq)]
#[allow(dead_code)]
pub struct LedgerEntry {
    pub id: i64,
    pub name: String,
    pub completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One row per named migration with a Completed flag.
///
/// All functions take a `&Connection` so they can run inside the caller's
/// transaction (a `Transaction` derefs to `Connection`).
pub struct MigrationLedger;

impl MigrationLedger {
    pub fn ensure_table(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(CREATE_LEDGER_SQL)
    }

    /// Read an entry. A missing ledger table reads as a missing entry.
    pub fn get(conn: &Connection, name: &str) -> Result<Option<LedgerEntry>, rusqlite::Error> {
        if !Database::table_exists(conn, LEDGER_TABLE)? {
            return Ok(None);
        }

        conn.query_row(
            "SELECT id, name, completed, created_at, updated_at FROM migrations WHERE name = ?",
            [name],
            |row| {
                Ok(LedgerEntry {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    completed: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()
    }

    pub fn is_completed(conn: &Connection, name: &str) -> Result<bool, rusqlite::Error> {
        Ok(Self::get(conn, name)?.is_some_and(|entry| entry.completed))
    }

    /// Record `name` as completed.
    ///
    /// Insert first; if the name already exists (a previous or concurrent run wrote
    /// it), re-read the entry and only update it if it is not yet completed.
    pub fn mark_completed(conn: &Connection, name: &str) -> Result<(), rusqlite::Error> {
        Self::ensure_table(conn)?;
        let now = Utils::now_secs();

        let inserted = conn.execute(
            "INSERT INTO migrations (name, completed, created_at, updated_at) VALUES (?, 1, ?, ?)",
            params![name, now, now],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                match Self::get(conn, name)? {
                    Some(entry) if entry.completed => {
                        warn!(
                            "Ledger entry '{}' was already completed by another run",
                            name
                        );
                        Ok(())
                    }
                    _ => {
                        debug!("Ledger entry '{}' exists but is incomplete; marking completed", name);
                        conn.execute(
                            "UPDATE migrations SET completed = 1, updated_at = ? WHERE name = ?",
                            params![now, name],
                        )?;
                        Ok(())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Delete an entry. Returns whether a row was removed.
    pub fn remove(conn: &Connection, name: &str) -> Result<bool, rusqlite::Error> {
        if !Database::table_exists(conn, LEDGER_TABLE)? {
            return Ok(false);
        }
        let removed = conn.execute("DELETE FROM migrations WHERE name = ?", [name])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("app.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_missing_table_reads_as_absent() {
        let (_dir, db) = open();
        assert_eq!(MigrationLedger::get(db.conn(), MEDIA_UNIFICATION).unwrap(), None);
        assert!(!MigrationLedger::is_completed(db.conn(), MEDIA_UNIFICATION).unwrap());
        assert!(!MigrationLedger::remove(db.conn(), MEDIA_UNIFICATION).unwrap());
    }

    #[test]
    fn test_mark_completed_twice_keeps_one_row() {
        let (_dir, db) = open();
        MigrationLedger::mark_completed(db.conn(), MEDIA_UNIFICATION).unwrap();
        MigrationLedger::mark_completed(db.conn(), MEDIA_UNIFICATION).unwrap();

        let entry = MigrationLedger::get(db.conn(), MEDIA_UNIFICATION).unwrap().unwrap();
        assert!(entry.completed);
        assert_eq!(entry.name, MEDIA_UNIFICATION);
        assert_eq!(Database::count_rows(db.conn(), "migrations").unwrap(), 1);
    }

    #[test]
    fn test_conflict_on_incomplete_entry_is_resolved_by_update() {
        let (_dir, db) = open();
        MigrationLedger::ensure_table(db.conn()).unwrap();
        db.conn()
            .execute(
                "INSERT INTO migrations (name, completed, created_at, updated_at) VALUES (?, 0, 1, 1)",
                [MEDIA_UNIFICATION],
            )
            .unwrap();
        assert!(!MigrationLedger::is_completed(db.conn(), MEDIA_UNIFICATION).unwrap());

        MigrationLedger::mark_completed(db.conn(), MEDIA_UNIFICATION).unwrap();

        let entry = MigrationLedger::get(db.conn(), MEDIA_UNIFICATION).unwrap().unwrap();
        assert!(entry.completed);
        assert_eq!(entry.created_at, 1);
        assert!(entry.updated_at > 1);
    }

    #[test]
    fn test_entries_are_independent() {
        let (_dir, db) = open();
        MigrationLedger::mark_completed(db.conn(), MEDIA_UNIFICATION).unwrap();
        assert!(!MigrationLedger::is_completed(db.conn(), MEDIA_FILES).unwrap());

        assert!(MigrationLedger::remove(db.conn(), MEDIA_UNIFICATION).unwrap());
        assert!(!MigrationLedger::remove(db.conn(), MEDIA_UNIFICATION).unwrap());
    }
}
