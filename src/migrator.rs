use log::{debug, info, warn, Level};
use logging_timer::timer;
use rusqlite::{params, Connection};

use crate::database::Database;
use crate::error::MediaMergeError;
use crate::files::{FileMigrator, FileReport};
use crate::ledger::{MigrationLedger, MEDIA_FILES, MEDIA_UNIFICATION};
use crate::media::{LegacyRecord, MediaType, UnifiedRecord};
use crate::schema::{
    CREATE_UNIFIED_TABLE_SQL, CREATE_UNIFIED_UNIQUE_INDEX_SQL, DROP_UNIFIED_TABLE_SQL,
    UNIFIED_UNIQUE_INDEX,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// The ledger already recorded this migration; no records were written.
    pub already_completed: bool,
    pub images: usize,
    pub documents: usize,
    /// Result of the file phase, if one ran.
    pub files: Option<FileReport>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RollbackSummary {
    /// False when there was no completed migration to reverse.
    pub rolled_back: bool,
    pub files: Option<FileReport>,
}

/// Moves legacy image and document rows into the unified `media` table.
///
/// The database phase of `run` and `rollback` is one immediate transaction: either
/// every row lands together with the ledger entry, or nothing does. The file phase
/// runs afterwards, outside the transaction, and its failure is only a warning.
pub struct SchemaMigrator<'a> {
    db: &'a mut Database,
    files: Option<&'a FileMigrator>,
}

impl<'a> SchemaMigrator<'a> {
    pub fn new(db: &'a mut Database) -> Self {
        SchemaMigrator { db, files: None }
    }

    pub fn with_file_migrator(mut self, files: &'a FileMigrator) -> Self {
        self.files = Some(files);
        self
    }

    pub fn run(&mut self) -> Result<RunSummary, MediaMergeError> {
        let _tmr = timer!(Level::Debug; "SchemaMigrator::run");
        let tx = self.db.immediate_transaction()?;

        if MigrationLedger::is_completed(&tx, MEDIA_UNIFICATION)
            .map_err(MediaMergeError::transaction("read ledger"))?
        {
            drop(tx);
            info!("Migration '{}' already completed; nothing to do", MEDIA_UNIFICATION);

            let mut summary = RunSummary {
                already_completed: true,
                ..Default::default()
            };
            if !MigrationLedger::is_completed(self.db.conn(), MEDIA_FILES)? {
                info!("File phase was never recorded as finished; resuming it");
                summary.files = self.run_file_phase();
            }
            return Ok(summary);
        }

        Self::ensure_unified_schema(&tx)
            .map_err(MediaMergeError::transaction("create unified schema"))?;

        let images = Self::copy_records(&tx, MediaType::Image)?;
        let documents = Self::copy_records(&tx, MediaType::Document)?;

        MigrationLedger::mark_completed(&tx, MEDIA_UNIFICATION)
            .map_err(MediaMergeError::transaction("write ledger"))?;

        tx.commit().map_err(MediaMergeError::transaction("commit"))?;
        info!(
            "Migration '{}' committed: {} image(s), {} document(s)",
            MEDIA_UNIFICATION, images, documents
        );

        let files = self.run_file_phase();

        Ok(RunSummary {
            already_completed: false,
            images,
            documents,
            files,
        })
    }

    pub fn rollback(&mut self) -> Result<RollbackSummary, MediaMergeError> {
        let _tmr = timer!(Level::Debug; "SchemaMigrator::rollback");
        let tx = self.db.immediate_transaction()?;

        if !MigrationLedger::is_completed(&tx, MEDIA_UNIFICATION)
            .map_err(MediaMergeError::transaction("read ledger"))?
        {
            info!("Migration '{}' is not recorded as completed; nothing to roll back", MEDIA_UNIFICATION);
            return Ok(RollbackSummary::default());
        }

        tx.execute_batch(DROP_UNIFIED_TABLE_SQL)
            .map_err(MediaMergeError::transaction("drop unified table"))?;
        for name in [MEDIA_UNIFICATION, MEDIA_FILES] {
            MigrationLedger::remove(&tx, name)
                .map_err(MediaMergeError::transaction("delete ledger entry"))?;
        }

        tx.commit().map_err(MediaMergeError::transaction("commit"))?;
        info!("Migration '{}' rolled back", MEDIA_UNIFICATION);

        let files = match self.files {
            None => None,
            Some(files) => match files.rollback() {
                Ok(report) => {
                    if !report.is_clean() {
                        warn!(
                            "{} file(s) could not be restored to legacy directories",
                            report.failed + report.conflicts
                        );
                    }
                    Some(report)
                }
                Err(e) => {
                    warn!("File rollback failed: {}. The database rollback stands.", e);
                    None
                }
            },
        };

        Ok(RollbackSummary {
            rolled_back: true,
            files,
        })
    }

    /// Create the unified table if absent, then its `(file_name, media_type)` unique
    /// index. Rows that would violate the index are collapsed to the lowest id first.
    pub fn ensure_unified_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(CREATE_UNIFIED_TABLE_SQL)?;

        if !Database::index_exists(conn, UNIFIED_UNIQUE_INDEX)? {
            let removed = Self::dedupe_unified(conn)?;
            if removed > 0 {
                warn!("Removed {} duplicate unified row(s) before creating unique index", removed);
            }
            conn.execute_batch(CREATE_UNIFIED_UNIQUE_INDEX_SQL)?;
        }

        Ok(())
    }

    fn dedupe_unified(conn: &Connection) -> Result<usize, rusqlite::Error> {
        let mut stmt = conn.prepare(
            "SELECT file_name, media_type, COUNT(*), MIN(id)
            FROM media
            GROUP BY file_name, media_type
            HAVING COUNT(*) > 1",
        )?;
        let groups = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut removed = 0;
        for (file_name, media_type, count, keep_id) in groups {
            warn!(
                "Unified table has {} rows for ({}, {}); keeping id {}",
                count, file_name, media_type, keep_id
            );
            removed += conn.execute(
                "DELETE FROM media WHERE file_name = ? AND media_type = ? AND id != ?",
                params![file_name, media_type, keep_id],
            )?;
        }

        Ok(removed)
    }

    fn copy_records(conn: &Connection, media_type: MediaType) -> Result<usize, MediaMergeError> {
        let stage = match media_type {
            MediaType::Image => "copy image records",
            MediaType::Document => "copy document records",
        };

        let mut count = 0;
        LegacyRecord::for_each(conn, media_type, |legacy| {
            UnifiedRecord::from_legacy(&legacy, media_type)
                .insert(conn)
                .map_err(MediaMergeError::transaction(stage))?;
            count += 1;
            Ok(())
        })
        .map_err(|e| match e {
            MediaMergeError::DatabaseError(source) => MediaMergeError::Transaction { stage, source },
            other => other,
        })?;

        debug!("Copied {} {} record(s)", count, media_type);
        Ok(count)
    }

    /// Run the attached file migrator and record the files flag if it finished clean.
    fn run_file_phase(&mut self) -> Option<FileReport> {
        let Some(files) = self.files else {
            debug!("No file migrator attached; skipping file phase");
            return None;
        };

        match files.run() {
            Ok(report) if report.is_clean() => {
                if let Err(e) = MigrationLedger::mark_completed(self.db.conn(), MEDIA_FILES) {
                    warn!("Files copied but the '{}' flag could not be written: {}", MEDIA_FILES, e);
                }
                Some(report)
            }
            Ok(report) => {
                warn!(
                    "{} file(s) failed to copy and {} conflicted; '{}' left unset",
                    report.failed, report.conflicts, MEDIA_FILES
                );
                Some(report)
            }
            Err(e) => {
                warn!("File migration failed: {}. The database migration stands.", e);
                None
            }
        }
    }
}
