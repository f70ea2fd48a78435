use std::collections::BTreeMap;
use std::fmt;

use log::{info, warn, Level};
use logging_timer::timer;
use rusqlite::Connection;
use strum::{EnumIter, IntoEnumIterator};

use crate::database::Database;
use crate::error::MediaMergeError;
use crate::ledger::{MigrationLedger, MEDIA_FILES, MEDIA_UNIFICATION};
use crate::media::MediaType;
use crate::schema::{DOCUMENT_TABLE, IMAGE_TABLE, UNIFIED_TABLE};

/// Details listed per category before the rest are summarized as a count.
const MAX_DETAILS: usize = 10;

#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MismatchCategory {
    MissingTable,
    CountMismatch,
    MissingMigratedRecord,
    ChecksumMismatch,
    OrphanRecord,
    UnknownType,
    LedgerIncomplete,
}

impl MismatchCategory {
    pub fn label(&self) -> &'static str {
        match self {
            MismatchCategory::MissingTable => "missing table",
            MismatchCategory::CountMismatch => "record count mismatch",
            MismatchCategory::MissingMigratedRecord => "missing migrated record",
            MismatchCategory::ChecksumMismatch => "checksum mismatch",
            MismatchCategory::OrphanRecord => "orphan unified record",
            MismatchCategory::UnknownType => "unknown media type",
            MismatchCategory::LedgerIncomplete => "ledger incomplete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub category: MismatchCategory,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditReport {
    pub mismatches: Vec<Mismatch>,
}

impl AuditReport {
    pub fn is_success(&self) -> bool {
        self.mismatches.is_empty()
    }

    #[allow(dead_code)]
    pub fn count(&self, category: MismatchCategory) -> usize {
        self.mismatches
            .iter()
            .filter(|m| m.category == category)
            .count()
    }

    pub fn by_category(&self) -> BTreeMap<MismatchCategory, Vec<&Mismatch>> {
        let mut grouped: BTreeMap<MismatchCategory, Vec<&Mismatch>> = BTreeMap::new();
        for mismatch in &self.mismatches {
            grouped.entry(mismatch.category).or_default().push(mismatch);
        }
        grouped
    }

    /// One line: total and per-category counts, e.g.
    /// `2 mismatch(es): record count mismatch 1, missing migrated record 1`.
    pub fn summary(&self) -> String {
        let counts: Vec<String> = self
            .by_category()
            .iter()
            .map(|(category, items)| format!("{} {}", category.label(), items.len()))
            .collect();
        format!("{} mismatch(es): {}", self.mismatches.len(), counts.join(", "))
    }

    fn push(&mut self, category: MismatchCategory, detail: String) {
        self.mismatches.push(Mismatch { category, detail });
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            return writeln!(f, "All checks passed");
        }

        let grouped = self.by_category();
        for category in MismatchCategory::iter() {
            let Some(items) = grouped.get(&category) else {
                writeln!(f, "  {:<24} ok", category.label())?;
                continue;
            };
            writeln!(f, "  {:<24} {}", category.label(), items.len())?;
            for item in items.iter().take(MAX_DETAILS) {
                writeln!(f, "      - {}", item.detail)?;
            }
            if items.len() > MAX_DETAILS {
                writeln!(f, "      ... and {} more", items.len() - MAX_DETAILS)?;
            }
        }
        Ok(())
    }
}

/// Read-only post-migration checks. Every check runs; mismatches are collected
/// rather than returned at the first failure.
pub struct VerificationAuditor<'a> {
    db: &'a Database,
}

impl<'a> VerificationAuditor<'a> {
    pub fn new(db: &'a Database) -> Self {
        VerificationAuditor { db }
    }

    /// Run every check and return the collected report. Errors only on database failure.
    pub fn audit(&self) -> Result<AuditReport, MediaMergeError> {
        let _tmr = timer!(Level::Debug; "VerificationAuditor::audit");
        let conn = self.db.conn();
        let mut report = AuditReport::default();

        let unified_exists = Self::check_table(conn, UNIFIED_TABLE, &mut report)?;
        let images_exist = Self::check_table(conn, IMAGE_TABLE, &mut report)?;
        let documents_exist = Self::check_table(conn, DOCUMENT_TABLE, &mut report)?;

        if unified_exists && images_exist && documents_exist {
            Self::check_counts(conn, &mut report)?;
        }

        for (media_type, legacy_exists) in [
            (MediaType::Image, images_exist),
            (MediaType::Document, documents_exist),
        ] {
            if unified_exists && legacy_exists {
                Self::check_migrated(conn, media_type, &mut report)?;
                Self::check_orphans(conn, media_type, &mut report)?;
            }
        }

        if unified_exists {
            Self::check_types(conn, &mut report)?;
        }

        if !MigrationLedger::is_completed(conn, MEDIA_UNIFICATION)? {
            report.push(
                MismatchCategory::LedgerIncomplete,
                format!("ledger entry '{}' is missing or not completed", MEDIA_UNIFICATION),
            );
        }

        if report.is_success() {
            info!("Verification passed");
        } else {
            warn!("Verification found {} mismatch(es)", report.mismatches.len());
        }
        Ok(report)
    }

    /// Like `audit`, but any mismatch becomes a `VerificationMismatch` error.
    pub fn check(&self) -> Result<AuditReport, MediaMergeError> {
        let report = self.audit()?;
        if report.is_success() {
            Ok(report)
        } else {
            Err(MediaMergeError::VerificationMismatch(format!(
                "{}\n{}",
                report.summary(),
                report
            )))
        }
    }

    /// Whether readers may switch to the unified layout: records and files both
    /// recorded as migrated, and a full audit passes.
    pub fn cutover_ready(&self) -> Result<bool, MediaMergeError> {
        let conn = self.db.conn();
        if !MigrationLedger::is_completed(conn, MEDIA_UNIFICATION)?
            || !MigrationLedger::is_completed(conn, MEDIA_FILES)?
        {
            return Ok(false);
        }
        Ok(self.audit()?.is_success())
    }

    fn check_table(
        conn: &Connection,
        table: &str,
        report: &mut AuditReport,
    ) -> Result<bool, MediaMergeError> {
        let exists = Database::table_exists(conn, table)?;
        if !exists {
            report.push(MismatchCategory::MissingTable, format!("table '{}' does not exist", table));
        }
        Ok(exists)
    }

    fn check_counts(conn: &Connection, report: &mut AuditReport) -> Result<(), MediaMergeError> {
        let unified = Database::count_rows(conn, UNIFIED_TABLE)?;
        let images = Database::count_rows(conn, IMAGE_TABLE)?;
        let documents = Database::count_rows(conn, DOCUMENT_TABLE)?;

        if unified != images + documents {
            report.push(
                MismatchCategory::CountMismatch,
                format!(
                    "unified has {} row(s), legacy has {} image(s) + {} document(s) = {}",
                    unified,
                    images,
                    documents,
                    images + documents
                ),
            );
        }
        Ok(())
    }

    /// Every legacy record must have a unified twin with the same name, type and checksum.
    fn check_migrated(
        conn: &Connection,
        media_type: MediaType,
        report: &mut AuditReport,
    ) -> Result<(), MediaMergeError> {
        let sql = format!(
            "SELECT l.file_name, l.checksum, m.checksum
            FROM {} l
            LEFT JOIN media m ON m.file_name = l.file_name AND m.media_type = ?1
            WHERE m.id IS NULL OR m.checksum IS NOT l.checksum
            ORDER BY l.file_name",
            media_type.legacy_table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([media_type.as_ref()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        for row in rows {
            let (file_name, legacy_checksum, unified_checksum) = row?;
            match unified_checksum {
                None => report.push(
                    MismatchCategory::MissingMigratedRecord,
                    format!("{} '{}' has no unified record", media_type, file_name),
                ),
                Some(unified_checksum) => report.push(
                    MismatchCategory::ChecksumMismatch,
                    format!(
                        "{} '{}': legacy {} vs unified {}",
                        media_type, file_name, legacy_checksum, unified_checksum
                    ),
                ),
            }
        }
        Ok(())
    }

    /// Every unified record of a known type must trace back to a legacy record.
    fn check_orphans(
        conn: &Connection,
        media_type: MediaType,
        report: &mut AuditReport,
    ) -> Result<(), MediaMergeError> {
        let sql = format!(
            "SELECT m.file_name
            FROM media m
            WHERE m.media_type = ?1
              AND NOT EXISTS (SELECT 1 FROM {} l WHERE l.file_name = m.file_name)
            ORDER BY m.file_name",
            media_type.legacy_table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([media_type.as_ref()], |row| row.get::<_, String>(0))?;

        for row in rows {
            report.push(
                MismatchCategory::OrphanRecord,
                format!("unified {} '{}' has no legacy record", media_type, row?),
            );
        }
        Ok(())
    }

    fn check_types(conn: &Connection, report: &mut AuditReport) -> Result<(), MediaMergeError> {
        let mut stmt = conn.prepare(
            "SELECT file_name, media_type FROM media
            WHERE media_type NOT IN ('image', 'document')
            ORDER BY file_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (file_name, media_type) = row?;
            report.push(
                MismatchCategory::UnknownType,
                format!("unified '{}' has type '{}'", file_name, media_type),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::SchemaMigrator;
    use crate::test_support;
    use pretty_assertions::assert_eq;

    fn migrated(images: &[&str], documents: &[&str]) -> (tempfile::TempDir, Database) {
        let (dir, mut db) = test_support::seeded_db(images, documents);
        SchemaMigrator::new(&mut db).run().unwrap();
        (dir, db)
    }

    #[test]
    fn test_clean_migration_passes() {
        let (_dir, db) = migrated(&["a.png", "b.png", "c.png"], &["d.pdf", "e.pdf"]);
        let report = VerificationAuditor::new(&db).check().unwrap();
        assert!(report.is_success());
        assert_eq!(report.to_string(), "All checks passed\n");
    }

    #[test]
    fn test_deleted_unified_row_is_one_missing_record() {
        let (_dir, db) = migrated(&["a.png", "b.png", "c.png"], &["d.pdf", "e.pdf"]);
        db.conn()
            .execute("DELETE FROM media WHERE file_name = 'b.png'", [])
            .unwrap();

        let report = VerificationAuditor::new(&db).audit().unwrap();

        assert!(!report.is_success());
        assert_eq!(report.count(MismatchCategory::MissingMigratedRecord), 1);
        assert_eq!(report.count(MismatchCategory::MissingTable), 0);
        assert_eq!(report.count(MismatchCategory::ChecksumMismatch), 0);
        assert_eq!(report.count(MismatchCategory::OrphanRecord), 0);
        assert_eq!(report.count(MismatchCategory::UnknownType), 0);
        assert_eq!(report.count(MismatchCategory::LedgerIncomplete), 0);
        // Conservation necessarily fails as well
        assert_eq!(report.count(MismatchCategory::CountMismatch), 1);

        assert_eq!(
            report.summary(),
            "2 mismatch(es): record count mismatch 1, missing migrated record 1"
        );

        let err = VerificationAuditor::new(&db).check().unwrap_err();
        let MediaMergeError::VerificationMismatch(summary) = err else {
            panic!("expected VerificationMismatch");
        };
        assert!(summary.contains("image 'b.png' has no unified record"));
        assert!(summary.contains("missing migrated record"));
    }

    #[test]
    fn test_collects_every_category_without_short_circuit() {
        let (_dir, db) = migrated(&["a.png", "b.png"], &["c.pdf"]);
        db.conn()
            .execute_batch(
                "UPDATE media SET checksum = 'tampered' WHERE file_name = 'a.png';
                INSERT INTO media (file_name, checksum, media_type, created_at, updated_at)
                    VALUES ('stray.png', 'x', 'image', 1, 1),
                           ('clip.mp4', 'y', 'video', 1, 1);
                DELETE FROM migrations;",
            )
            .unwrap();

        let report = VerificationAuditor::new(&db).audit().unwrap();

        assert_eq!(report.count(MismatchCategory::ChecksumMismatch), 1);
        assert_eq!(report.count(MismatchCategory::OrphanRecord), 1);
        assert_eq!(report.count(MismatchCategory::UnknownType), 1);
        assert_eq!(report.count(MismatchCategory::CountMismatch), 1);
        assert_eq!(report.count(MismatchCategory::LedgerIncomplete), 1);
        assert_eq!(report.count(MismatchCategory::MissingMigratedRecord), 0);
        assert_eq!(report.by_category().len(), 5);
    }

    #[test]
    fn test_missing_tables_are_reported_not_errors() {
        let (_dir, db) = test_support::seeded_db(&["a.png"], &[]);
        db.conn().execute_batch("DROP TABLE documents").unwrap();

        let report = VerificationAuditor::new(&db).audit().unwrap();

        assert_eq!(report.count(MismatchCategory::MissingTable), 2);
        assert_eq!(report.count(MismatchCategory::LedgerIncomplete), 1);
        assert_eq!(report.count(MismatchCategory::CountMismatch), 0);
        let rendered = report.to_string();
        assert!(rendered.contains("table 'media' does not exist"));
        assert!(rendered.contains("table 'documents' does not exist"));
    }

    #[test]
    fn test_display_truncates_long_categories() {
        let mut report = AuditReport::default();
        for i in 0..(MAX_DETAILS + 3) {
            report.push(MismatchCategory::OrphanRecord, format!("orphan {}", i));
        }
        let rendered = report.to_string();
        assert!(rendered.contains("orphan unified record    13"));
        assert!(rendered.contains("... and 3 more"));
        assert!(!rendered.contains("orphan 12"));
    }

    #[test]
    fn test_cutover_requires_files_flag() {
        let (_dir, db) = migrated(&["a.png"], &[]);
        let auditor = VerificationAuditor::new(&db);
        assert!(!auditor.cutover_ready().unwrap());

        MigrationLedger::mark_completed(db.conn(), MEDIA_FILES).unwrap();
        assert!(auditor.cutover_ready().unwrap());

        db.conn().execute("DELETE FROM media", []).unwrap();
        assert!(!auditor.cutover_ready().unwrap());
    }
}
