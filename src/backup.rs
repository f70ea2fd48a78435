use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags};

use crate::config::PathsConfig;
use crate::error::MediaMergeError;
use crate::utils::Utils;

pub const BACKUP_PREFIX: &str = "db_backup_";
const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

#[derive(Clone, Debug, PartialEq)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub size: u64,
    /// Parsed from the file name; `None` if the stamp is unreadable.
    pub created: Option<NaiveDateTime>,
}

/// Full-file copies of the live database.
///
/// A backup is only ever handed back to a caller after it has been checked:
/// its digest matches the source and it opens and answers a trivial query.
/// That check is a sanity check; it says nothing about schema completeness.
pub struct BackupManager {
    backup_dir: PathBuf,
    candidates: Vec<PathBuf>,
}

impl BackupManager {
    /// `candidates` are the places the live database may be, searched in order.
    pub fn new(backup_dir: PathBuf, candidates: Vec<PathBuf>) -> Self {
        BackupManager {
            backup_dir,
            candidates,
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(paths.backup_dir.clone(), paths.database_candidates())
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn locate_database(&self) -> Result<PathBuf, MediaMergeError> {
        self.candidates
            .iter()
            .find(|candidate| candidate.is_file())
            .cloned()
            .ok_or_else(|| {
                let searched: Vec<String> = self
                    .candidates
                    .iter()
                    .map(|c| c.display().to_string())
                    .collect();
                MediaMergeError::Configuration(format!(
                    "Database file not found (searched: {})",
                    searched.join(", ")
                ))
            })
    }

    pub fn create_backup(&self) -> Result<PathBuf, MediaMergeError> {
        let source = self.locate_database()?;
        self.backup_file(&source)
    }

    /// Replace the live database with the contents of `backup_path`.
    ///
    /// The backup is verified first. A safety backup of the current database is
    /// attempted, but failing to make one does not stop the restore.
    pub fn restore_backup(&self, backup_path: &Path) -> Result<(), MediaMergeError> {
        if !backup_path.is_file() {
            return Err(MediaMergeError::Configuration(format!(
                "Backup '{}' does not exist",
                backup_path.display()
            )));
        }
        self.verify_backup(backup_path)?;

        let live = match self.locate_database() {
            Ok(live) => {
                match self.backup_file(&live) {
                    Ok(safety) => info!("Safety backup of current database: {}", safety.display()),
                    Err(e) => warn!("Could not create safety backup before restore: {}", e),
                }
                live
            }
            Err(e) => {
                let target = self.candidates.first().cloned().ok_or(e)?;
                warn!(
                    "No live database found; restoring to {}",
                    target.display()
                );
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(MediaMergeError::file_io(parent))?;
                }
                target
            }
        };

        Self::remove_sidecars(&live);
        fs::copy(backup_path, &live).map_err(MediaMergeError::file_io(&live))?;
        info!("Restored {} from {}", live.display(), backup_path.display());

        Ok(())
    }

    /// Backups in the backup directory, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, MediaMergeError> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stamp) = name.strip_prefix(BACKUP_PREFIX) else {
                continue;
            };
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let created = stamp
                .get(..15)
                .and_then(|s| NaiveDateTime::parse_from_str(s, STAMP_FORMAT).ok());
            backups.push(BackupInfo {
                path: entry.path(),
                size: metadata.len(),
                created,
            });
        }

        backups.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.path.cmp(&a.path)));
        Ok(backups)
    }

    pub fn delete_backup(&self, backup_path: &Path) -> Result<(), MediaMergeError> {
        let invalid = || {
            MediaMergeError::Configuration(format!(
                "'{}' is not a backup in {}",
                backup_path.display(),
                self.backup_dir.display()
            ))
        };

        let canonical = dunce::canonicalize(backup_path).map_err(|_| invalid())?;
        let backup_dir = dunce::canonicalize(&self.backup_dir).map_err(|_| invalid())?;
        let is_named_backup = canonical
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with(BACKUP_PREFIX));

        if canonical.parent() != Some(backup_dir.as_path()) || !is_named_backup || !canonical.is_file() {
            return Err(invalid());
        }

        fs::remove_file(&canonical).map_err(MediaMergeError::file_io(&canonical))?;
        info!("Deleted backup {}", canonical.display());
        Ok(())
    }

    /// Open the file read-only and run a trivial query against it.
    pub fn verify_backup(&self, backup_path: &Path) -> Result<(), MediaMergeError> {
        Self::check_opens(backup_path).map_err(|reason| MediaMergeError::BackupIntegrity {
            path: backup_path.to_owned(),
            reason,
        })
    }

    fn backup_file(&self, source: &Path) -> Result<PathBuf, MediaMergeError> {
        fs::create_dir_all(&self.backup_dir).map_err(MediaMergeError::file_io(&self.backup_dir))?;
        let dest = self.next_backup_path();

        if let Err(e) = fs::copy(source, &dest) {
            Self::discard(&dest);
            return Err(MediaMergeError::FileIo {
                path: dest,
                source: e,
            });
        }

        let checked = Self::check_digests(source, &dest).and_then(|()| Self::check_opens(&dest));
        if let Err(reason) = checked {
            Self::discard(&dest);
            return Err(MediaMergeError::BackupIntegrity { path: dest, reason });
        }

        info!("Created backup {} of {}", dest.display(), source.display());
        Ok(dest)
    }

    /// `db_backup_<stamp>`, with `-N` appended if that name is already taken.
    fn next_backup_path(&self) -> PathBuf {
        let base = format!("{}{}", BACKUP_PREFIX, Utils::file_stamp());
        let mut candidate = self.backup_dir.join(&base);
        let mut n = 1;
        while candidate.exists() {
            candidate = self.backup_dir.join(format!("{}-{}", base, n));
            n += 1;
        }
        candidate
    }

    fn check_digests(source: &Path, copy: &Path) -> Result<(), String> {
        let source_digest = Utils::sha256_file(source).map_err(|e| format!("reading source: {}", e))?;
        let copy_digest = Utils::sha256_file(copy).map_err(|e| format!("reading copy: {}", e))?;
        if source_digest != copy_digest {
            return Err(format!(
                "digest mismatch (source {}, copy {})",
                source_digest, copy_digest
            ));
        }
        debug!("Backup digest {}", copy_digest);
        Ok(())
    }

    fn check_opens(path: &Path) -> Result<(), String> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| format!("cannot open: {}", e))?;
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| format!("query failed: {}", e))?;
        Ok(())
    }

    fn discard(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if path.exists() {
                warn!("Could not remove unverified backup {}: {}", path.display(), e);
            }
        }
    }

    /// Journal files left beside the live database would be replayed onto the restored
    /// copy, so they go first.
    fn remove_sidecars(live: &Path) {
        for suffix in SIDECAR_SUFFIXES {
            let mut name = live.as_os_str().to_owned();
            name.push(suffix);
            let sidecar = PathBuf::from(name);
            if sidecar.exists() {
                match fs::remove_file(&sidecar) {
                    Ok(()) => warn!("Removed stale {}", sidecar.display()),
                    Err(e) => warn!("Could not remove {}: {}", sidecar.display(), e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::media::MediaType;
    use crate::test_support;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> BackupManager {
        BackupManager::new(
            dir.path().join("backups"),
            vec![dir.path().join("app.db")],
        )
    }

    fn seeded(images: &[&str], documents: &[&str]) -> TempDir {
        let (dir, db) = test_support::seeded_db(images, documents);
        db.close().unwrap();
        dir
    }

    #[test]
    fn test_create_backup_is_named_and_verified() {
        let dir = seeded(&["a.png"], &["b.pdf"]);
        let bm = manager(&dir);

        let path = bm.create_backup().unwrap();

        assert_eq!(path.parent().unwrap(), bm.backup_dir());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(BACKUP_PREFIX));
        assert_eq!(
            fs::read(&path).unwrap(),
            fs::read(dir.path().join("app.db")).unwrap()
        );
        bm.verify_backup(&path).unwrap();
    }

    #[test]
    fn test_backup_of_empty_database_passes_integrity_check() {
        let dir = seeded(&[], &[]);
        let bm = manager(&dir);
        let path = bm.create_backup().unwrap();
        bm.verify_backup(&path).unwrap();
    }

    #[test]
    fn test_missing_database_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = manager(&dir).create_backup().unwrap_err();
        assert!(matches!(err, MediaMergeError::Configuration(_)));
    }

    #[test]
    fn test_unverifiable_copy_is_discarded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.db"), vec![0x42u8; 4096]).unwrap();
        let bm = manager(&dir);

        let err = bm.create_backup().unwrap_err();

        assert!(matches!(err, MediaMergeError::BackupIntegrity { .. }));
        assert!(test_support::file_names(bm.backup_dir()).is_empty());
    }

    #[test]
    fn test_backups_in_same_second_get_distinct_names() {
        let dir = seeded(&["a.png"], &[]);
        let bm = manager(&dir);
        let first = bm.create_backup().unwrap();
        let second = bm.create_backup().unwrap();
        assert_ne!(first, second);
        assert_eq!(bm.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_backup_round_trip_restores_query_results() {
        let dir = seeded(&["a.png", "b.png"], &["c.pdf"]);
        let bm = manager(&dir);
        let db_path = dir.path().join("app.db");

        let db = Database::open(&db_path).unwrap();
        let images_before = test_support::legacy_rows(&db, MediaType::Image);
        let documents_before = test_support::legacy_rows(&db, MediaType::Document);
        db.close().unwrap();

        let backup = bm.create_backup().unwrap();

        let db = Database::open(&db_path).unwrap();
        db.conn().execute("DELETE FROM images", []).unwrap();
        db.close().unwrap();

        bm.restore_backup(&backup).unwrap();

        let db = Database::open(&db_path).unwrap();
        assert_eq!(test_support::legacy_rows(&db, MediaType::Image), images_before);
        assert_eq!(test_support::legacy_rows(&db, MediaType::Document), documents_before);
        // The pre-restore state was kept as a safety backup
        assert_eq!(bm.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_restore_refuses_corrupt_backup() {
        let dir = seeded(&["a.png"], &[]);
        let bm = manager(&dir);
        fs::create_dir_all(bm.backup_dir()).unwrap();
        let bogus = bm.backup_dir().join("db_backup_20240101-000000");
        fs::write(&bogus, vec![0x13u8; 4096]).unwrap();
        let live_before = fs::read(dir.path().join("app.db")).unwrap();

        let err = bm.restore_backup(&bogus).unwrap_err();

        assert!(matches!(err, MediaMergeError::BackupIntegrity { .. }));
        assert_eq!(fs::read(dir.path().join("app.db")).unwrap(), live_before);
    }

    #[test]
    fn test_restore_without_live_database_writes_primary_path() {
        let source = seeded(&["a.png"], &[]);
        let backup = manager(&source).create_backup().unwrap();

        let target = TempDir::new().unwrap();
        let bm = BackupManager::new(
            target.path().join("backups"),
            vec![target.path().join("data").join("app.db")],
        );
        bm.restore_backup(&backup).unwrap();

        let db = Database::open(&target.path().join("data").join("app.db")).unwrap();
        assert_eq!(test_support::legacy_rows(&db, MediaType::Image).len(), 1);
    }

    #[test]
    fn test_list_newest_first_and_delete() {
        let dir = seeded(&[], &[]);
        let bm = manager(&dir);
        fs::create_dir_all(bm.backup_dir()).unwrap();
        let live = dir.path().join("app.db");
        for stamp in ["20240101-000000", "20240301-120000", "20240201-060000"] {
            fs::copy(&live, bm.backup_dir().join(format!("{}{}", BACKUP_PREFIX, stamp))).unwrap();
        }
        fs::write(bm.backup_dir().join("notes.txt"), b"ignored").unwrap();

        let listed = bm.list_backups().unwrap();
        let names: Vec<String> = listed
            .iter()
            .map(|b| b.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "db_backup_20240301-120000",
                "db_backup_20240201-060000",
                "db_backup_20240101-000000",
            ]
        );
        assert!(listed.iter().all(|b| b.size > 0 && b.created.is_some()));

        bm.delete_backup(&listed[0].path).unwrap();
        assert_eq!(bm.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_rejects_paths_outside_backup_dir() {
        let dir = seeded(&[], &[]);
        let bm = manager(&dir);
        fs::create_dir_all(bm.backup_dir()).unwrap();
        fs::write(bm.backup_dir().join("notes.txt"), b"keep").unwrap();

        let live = dir.path().join("app.db");
        assert!(matches!(
            bm.delete_backup(&live).unwrap_err(),
            MediaMergeError::Configuration(_)
        ));
        assert!(matches!(
            bm.delete_backup(&bm.backup_dir().join("notes.txt")).unwrap_err(),
            MediaMergeError::Configuration(_)
        ));
        assert!(live.exists());
    }

    #[test]
    #[serial]
    fn test_locate_falls_back_to_working_directory() {
        let dir = seeded(&[], &[]);
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let mut paths = crate::config::Config::default_for(&dir.path().join("missing")).paths;
        paths.backup_dir = dir.path().join("backups");
        let located = BackupManager::from_config(&paths).locate_database();

        std::env::set_current_dir(original).unwrap();
        assert_eq!(
            dunce::canonicalize(located.unwrap()).unwrap(),
            dunce::canonicalize(dir.path().join("app.db")).unwrap()
        );
    }
}
