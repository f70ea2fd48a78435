use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn, Level};
use logging_timer::timer;
use mime_guess::mime;
use once_cell::sync::Lazy;

use crate::config::PathsConfig;
use crate::error::MediaMergeError;
use crate::media::MediaType;
use crate::utils::Utils;

const TEMP_PREFIX: &str = ".mediamerge-";
const TEMP_SUFFIX: &str = ".partial";

static DOCUMENT_MIME_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "application/pdf",
        "application/rtf",
        "application/msword",
        "application/vnd.ms-excel",
        "application/vnd.ms-powerpoint",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "application/vnd.oasis.opendocument.text",
        "application/vnd.oasis.opendocument.spreadsheet",
        "application/vnd.oasis.opendocument.presentation",
    ])
});

/// The three directories the file phase moves between.
#[derive(Clone, Debug, PartialEq)]
pub struct FileLayout {
    pub image_dir: PathBuf,
    pub document_dir: PathBuf,
    pub unified_dir: PathBuf,
}

impl FileLayout {
    pub fn from_config(paths: &PathsConfig) -> Self {
        FileLayout {
            image_dir: paths.image_dir.clone(),
            document_dir: paths.document_dir.clone(),
            unified_dir: paths.unified_dir.clone(),
        }
    }

    pub fn legacy_dir(&self, media_type: MediaType) -> &Path {
        match media_type {
            MediaType::Image => &self.image_dir,
            MediaType::Document => &self.document_dir,
        }
    }
}

/// Tally of one file-phase operation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FileReport {
    pub scanned: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unsupported: usize,
    /// Destination names already taken by different content. Nothing is overwritten
    /// or, during cleanup, deleted.
    pub conflicts: usize,
    pub removed: usize,
}

impl FileReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.conflicts == 0
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CopyOutcome {
    Copied,
    /// The destination already holds identical bytes.
    Skipped,
    /// The destination holds something else under the same name.
    Conflict,
}

/// Moves files between the legacy per-type directories and the unified directory.
///
/// Not transactional: every operation is skip-if-exists, so an interrupted run is
/// finished by running it again. Per-file failures are logged and counted, never
/// fatal. Only failing to prepare or list a directory returns an error.
pub struct FileMigrator {
    layout: FileLayout,
    progress_interval: usize,
}

impl FileMigrator {
    pub fn new(layout: FileLayout, progress_interval: usize) -> Self {
        FileMigrator {
            layout,
            progress_interval: progress_interval.max(1),
        }
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    /// Copy every legacy file into the unified directory, never overwriting.
    pub fn run(&self) -> Result<FileReport, MediaMergeError> {
        let _tmr = timer!(Level::Debug; "FileMigrator::run");
        let unified_dir = &self.layout.unified_dir;
        fs::create_dir_all(unified_dir).map_err(MediaMergeError::file_io(unified_dir))?;

        let mut report = FileReport::default();
        for media_type in [MediaType::Image, MediaType::Document] {
            let source_dir = self.layout.legacy_dir(media_type);
            let files = list_regular_files(source_dir, false)?;
            info!(
                "Copying {} {} file(s) from {} to {}",
                files.len(),
                media_type,
                source_dir.display(),
                unified_dir.display()
            );
            self.copy_batch(&files, &format!("{} files", media_type), &mut report, |_| {
                Some(unified_dir.as_path())
            });
        }

        info!(
            "File migration finished: {} copied, {} skipped, {} conflicts, {} failed",
            report.copied, report.skipped, report.conflicts, report.failed
        );
        Ok(report)
    }

    /// Copy files from the unified directory back into the legacy directory of their
    /// type. Files whose type cannot be resolved are skipped.
    pub fn rollback(&self) -> Result<FileReport, MediaMergeError> {
        let _tmr = timer!(Level::Debug; "FileMigrator::rollback");
        for dir in [&self.layout.image_dir, &self.layout.document_dir] {
            fs::create_dir_all(dir).map_err(MediaMergeError::file_io(dir))?;
        }

        let files = list_regular_files(&self.layout.unified_dir, true)?;
        info!(
            "Restoring {} file(s) from {}",
            files.len(),
            self.layout.unified_dir.display()
        );

        let mut report = FileReport::default();
        self.copy_batch(&files, "rollback", &mut report, |path| {
            classify(path).map(|media_type| self.layout.legacy_dir(media_type))
        });

        info!(
            "File rollback finished: {} copied, {} skipped, {} unsupported, {} conflicts, {} failed",
            report.copied, report.skipped, report.unsupported, report.conflicts, report.failed
        );
        Ok(report)
    }

    /// Delete the legacy files that have a byte-identical copy in the unified
    /// directory. Anything without one is kept and counted as a conflict.
    /// Irreversible; never called by `run` or `rollback`.
    pub fn cleanup_legacy_files(&self) -> Result<FileReport, MediaMergeError> {
        let mut report = FileReport::default();

        for media_type in [MediaType::Image, MediaType::Document] {
            let dir = self.layout.legacy_dir(media_type);
            for path in list_regular_files(dir, false)? {
                report.scanned += 1;

                match self.has_unified_twin(&path) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(
                            "Keeping {}: no identical copy in {}",
                            path.display(),
                            self.layout.unified_dir.display()
                        );
                        report.conflicts += 1;
                        continue;
                    }
                    Err(e) => {
                        error!("{}", e);
                        report.failed += 1;
                        continue;
                    }
                }

                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!("Removed legacy file {}", path.display());
                        report.removed += 1;
                    }
                    Err(e) => {
                        error!("Failed to remove legacy file {}: {}", path.display(), e);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "Legacy cleanup finished: {} removed, {} kept, {} failed",
            report.removed, report.conflicts, report.failed
        );
        Ok(report)
    }

    fn has_unified_twin(&self, legacy: &Path) -> Result<bool, MediaMergeError> {
        let Some(file_name) = legacy.file_name() else {
            return Ok(false);
        };
        let twin = self.layout.unified_dir.join(file_name);
        if !twin.is_file() {
            return Ok(false);
        }
        same_content(legacy, &twin)
    }

    fn copy_batch<'a, F>(&'a self, files: &[PathBuf], label: &str, report: &mut FileReport, target: F)
    where
        F: Fn(&Path) -> Option<&'a Path>,
    {
        let total = files.len();

        for (i, source) in files.iter().enumerate() {
            report.scanned += 1;

            match target(source) {
                None => {
                    warn!("Skipping {}: unsupported file type", source.display());
                    report.unsupported += 1;
                }
                Some(dest_dir) => match copy_no_clobber(source, dest_dir) {
                    Ok(CopyOutcome::Copied) => report.copied += 1,
                    Ok(CopyOutcome::Skipped) => {
                        warn!(
                            "Skipping {}: already present in {}",
                            source.display(),
                            dest_dir.display()
                        );
                        report.skipped += 1;
                    }
                    Ok(CopyOutcome::Conflict) => {
                        error!(
                            "Not copying {}: {} already holds a different file of that name",
                            source.display(),
                            dest_dir.display()
                        );
                        report.conflicts += 1;
                    }
                    Err(e) => {
                        error!("{}", e);
                        report.failed += 1;
                    }
                },
            }

            let done = i + 1;
            if done % self.progress_interval == 0 && done < total {
                info!("{}: {}/{} processed", label, done, total);
            }
        }
    }
}

/// Resolve a file's media type from its extension.
pub fn classify(path: &Path) -> Option<MediaType> {
    let guessed = mime_guess::from_path(path).first()?;

    if guessed.type_() == mime::IMAGE {
        Some(MediaType::Image)
    } else if guessed.type_() == mime::TEXT || DOCUMENT_MIME_TYPES.contains(guessed.essence_str()) {
        Some(MediaType::Document)
    } else {
        None
    }
}

fn temporary_name(file_name: &OsStr) -> OsString {
    let mut name = OsString::from(TEMP_PREFIX);
    name.push(file_name);
    name.push(TEMP_SUFFIX);
    name
}

fn is_temporary(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// Byte equality, checked by length and then SHA-256.
fn same_content(a: &Path, b: &Path) -> Result<bool, MediaMergeError> {
    let len_a = fs::metadata(a).map_err(MediaMergeError::file_io(a))?.len();
    let len_b = fs::metadata(b).map_err(MediaMergeError::file_io(b))?.len();
    if len_a != len_b {
        return Ok(false);
    }
    let digest_a = Utils::sha256_file(a).map_err(MediaMergeError::file_io(a))?;
    let digest_b = Utils::sha256_file(b).map_err(MediaMergeError::file_io(b))?;
    Ok(digest_a == digest_b)
}

/// Regular files directly inside `dir`, sorted by name. A missing directory reads
/// as empty. `skip_temporaries` leaves out our own in-flight copies and is only
/// set for directories this crate writes into.
fn list_regular_files(dir: &Path, skip_temporaries: bool) -> Result<Vec<PathBuf>, MediaMergeError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Directory {} does not exist; treating it as empty", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(MediaMergeError::FileIo { path: dir.to_owned(), source: e }),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(MediaMergeError::file_io(dir))?;
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!("Cannot stat {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if !file_type.is_file() {
            continue;
        }
        if skip_temporaries && is_temporary(&entry.file_name().to_string_lossy()) {
            continue;
        }
        files.push(entry.path());
    }

    files.sort();
    Ok(files)
}

/// Copy `source` into `dest_dir` under the same name unless that name is taken.
///
/// The bytes land in a hidden temporary first and are published with a hard link,
/// which refuses to replace an existing file. The final name therefore only ever
/// refers to a complete copy. A taken name is a skip only if it holds the same
/// bytes as `source`.
fn copy_no_clobber(source: &Path, dest_dir: &Path) -> Result<CopyOutcome, MediaMergeError> {
    let file_name = source.file_name().ok_or_else(|| {
        MediaMergeError::Error(format!("'{}' has no file name", source.display()))
    })?;
    let dest = dest_dir.join(file_name);

    let existing = |dest: &Path| -> Result<CopyOutcome, MediaMergeError> {
        if dest.is_file() && same_content(source, dest)? {
            Ok(CopyOutcome::Skipped)
        } else {
            Ok(CopyOutcome::Conflict)
        }
    };

    if fs::symlink_metadata(&dest).is_ok() {
        return existing(dest.as_path());
    }

    let partial = dest_dir.join(temporary_name(file_name));

    let publish = || -> Result<CopyOutcome, MediaMergeError> {
        fs::copy(source, &partial).map_err(MediaMergeError::file_io(source))?;
        let permissions = fs::metadata(source)
            .map_err(MediaMergeError::file_io(source))?
            .permissions();
        fs::set_permissions(&partial, permissions).map_err(MediaMergeError::file_io(&partial))?;

        match fs::hard_link(&partial, &dest) {
            Ok(()) => Ok(CopyOutcome::Copied),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => existing(dest.as_path()),
            Err(e) => {
                // Filesystems without hard links: fall back to rename
                debug!("Hard link to {} failed ({}); renaming", dest.display(), e);
                if fs::symlink_metadata(&dest).is_ok() {
                    return existing(dest.as_path());
                }
                fs::rename(&partial, &dest).map_err(MediaMergeError::file_io(&dest))?;
                Ok(CopyOutcome::Copied)
            }
        }
    };

    let outcome = publish();

    if let Err(e) = fs::remove_file(&partial) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Could not remove temporary file {}: {}", partial.display(), e);
        }
    }

    outcome
}
