use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::{debug, info, warn};

use crate::audit::VerificationAuditor;
use crate::backup::BackupManager;
use crate::config::Config;
use crate::database::Database;
use crate::error::MediaMergeError;
use crate::files::{FileLayout, FileMigrator, FileReport};
use crate::ledger::{LedgerEntry, MigrationLedger, MEDIA_FILES, MEDIA_UNIFICATION};
use crate::logging;
use crate::migrator::SchemaMigrator;
use crate::utils::Utils;

#[derive(Parser)]
#[command(
    name = "mediamerge",
    version,
    about = "mediamerge: consolidate legacy image and document stores into one media store"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the data directory)
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Move legacy image and document records into the unified table, then their files
    Migrate {
        /// Reverse the migration instead of running it
        #[arg(long = "rollback", default_value_t = false)]
        rollback: bool,

        /// Do not back up the database first
        #[arg(long = "skip-backup", default_value_t = false)]
        skip_backup: bool,
    },

    /// Copy files between the legacy directories and the unified directory
    Files {
        /// Copy unified files back into the legacy directories
        #[arg(long = "rollback", conflicts_with = "cleanup", default_value_t = false)]
        rollback: bool,

        /// Delete all legacy files (irreversible; requires a passing verification)
        #[arg(long = "cleanup", default_value_t = false)]
        cleanup: bool,
    },

    /// Check that the migrated data matches the legacy data
    Verify,

    /// Show migration flags and whether readers can switch to the unified layout
    Status,

    /// Create, list, restore or delete database backups
    Backup {
        #[command(subcommand)]
        action: BackupCommand,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum BackupCommand {
    /// Copy and verify the live database
    Create,
    /// List backups, newest first
    List,
    /// Replace the live database with a verified backup
    Restore {
        /// Path of the backup file
        path: PathBuf,
    },
    /// Delete a backup
    Delete {
        /// Path of the backup file
        path: PathBuf,
    },
}

/// Prints `[n/m] label... OK` or `FAILED: <reason>` around each step.
struct Steps {
    current: usize,
    total: usize,
}

impl Steps {
    fn new(total: usize) -> Self {
        Steps { current: 0, total }
    }

    fn run<T, F>(&mut self, label: &str, step: F) -> Result<T, MediaMergeError>
    where
        F: FnOnce() -> Result<T, MediaMergeError>,
    {
        self.current += 1;
        print!("[{}/{}] {}... ", self.current, self.total, label);
        let _ = io::stdout().flush();
        info!("Step {}/{}: {}", self.current, self.total, label);

        let start = Instant::now();
        let result = step();
        let elapsed = Utils::format_elapsed(start.elapsed());
        match &result {
            Ok(_) => println!("OK ({})", elapsed),
            Err(e) => println!("FAILED: {} ({})", Self::headline(e), elapsed),
        }
        result
    }

    /// First line of an error. Multi-line details are left for the final error report.
    fn headline(err: &MediaMergeError) -> String {
        err.to_string().lines().next().unwrap_or_default().to_owned()
    }
}

impl Cli {
    pub fn handle_command_line() -> Result<(), MediaMergeError> {
        let args = Cli::parse();

        let project_dirs = ProjectDirs::from("", "", "mediamerge").ok_or_else(|| {
            MediaMergeError::Configuration("Could not determine the data directory".into())
        })?;
        let config = Config::load_config(&project_dirs, args.config.as_deref());
        let _logger = logging::init(&config.logging, &config.paths.log_dir())?;
        debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());
        debug!("Configuration: {:?}", config);

        Self::run_command(args.command, &config)
    }

    pub fn run_command(command: Command, config: &Config) -> Result<(), MediaMergeError> {
        match command {
            Command::Migrate {
                rollback: false,
                skip_backup,
            } => Self::migrate(config, skip_backup),
            Command::Migrate {
                rollback: true,
                skip_backup,
            } => Self::rollback(config, skip_backup),
            Command::Files { rollback: true, .. } => Self::files_rollback(config),
            Command::Files { cleanup: true, .. } => Self::files_cleanup(config),
            Command::Files { .. } => Self::files_run(config),
            Command::Verify => Self::verify(config),
            Command::Status => Self::status(config),
            Command::Backup { action } => Self::backup(config, action),
        }
    }

    fn file_migrator(config: &Config) -> FileMigrator {
        FileMigrator::new(
            FileLayout::from_config(&config.paths),
            config.files.progress_interval(),
        )
    }

    fn open_database(config: &Config) -> Result<Database, MediaMergeError> {
        let path = BackupManager::from_config(&config.paths).locate_database()?;
        let db = Database::open(&path)?;
        debug!("Using database {}", db.path().display());
        Ok(db)
    }

    fn migrate(config: &Config, skip_backup: bool) -> Result<(), MediaMergeError> {
        let backups = BackupManager::from_config(&config.paths);
        let files = Self::file_migrator(config);
        let mut db = Self::open_database(config)?;
        let mut steps = Steps::new(if skip_backup { 2 } else { 3 });

        if skip_backup {
            warn!("Skipping database backup at user request");
        } else {
            let backup = steps.run("Backing up database", || backups.create_backup())?;
            println!("      backup: {}", backup.display());
        }

        let summary = steps.run("Migrating records and files", || {
            SchemaMigrator::new(&mut db).with_file_migrator(&files).run()
        })?;
        if summary.already_completed {
            println!("      records: already migrated");
        } else {
            println!(
                "      records: {} image(s), {} document(s)",
                summary.images, summary.documents
            );
        }
        if let Some(report) = &summary.files {
            Self::print_file_report(report);
        }

        let verified = steps.run("Verifying", || VerificationAuditor::new(&db).check());
        db.close()?;
        verified?;

        println!("Migration complete");
        Ok(())
    }

    fn rollback(config: &Config, skip_backup: bool) -> Result<(), MediaMergeError> {
        let backups = BackupManager::from_config(&config.paths);
        let files = Self::file_migrator(config);
        let mut db = Self::open_database(config)?;
        let mut steps = Steps::new(if skip_backup { 1 } else { 2 });

        if !skip_backup {
            let backup = steps.run("Backing up database", || backups.create_backup())?;
            println!("      backup: {}", backup.display());
        }

        let summary = steps.run("Rolling back records and files", || {
            SchemaMigrator::new(&mut db).with_file_migrator(&files).rollback()
        })?;
        db.close()?;

        if !summary.rolled_back {
            println!("Nothing to roll back");
            return Ok(());
        }
        if let Some(report) = &summary.files {
            Self::print_file_report(report);
        }
        println!("Rollback complete");
        Ok(())
    }

    fn files_run(config: &Config) -> Result<(), MediaMergeError> {
        let files = Self::file_migrator(config);
        let report = Steps::new(1).run("Copying legacy files", || files.run())?;
        println!("      into: {}", files.layout().unified_dir.display());
        Self::print_file_report(&report);

        if !report.is_clean() {
            warn!(
                "'{}' left unset: {} file(s) failed, {} conflicted",
                MEDIA_FILES, report.failed, report.conflicts
            );
            return Ok(());
        }

        match Self::open_database(config) {
            Ok(db) => {
                if MigrationLedger::is_completed(db.conn(), MEDIA_UNIFICATION)? {
                    MigrationLedger::mark_completed(db.conn(), MEDIA_FILES)?;
                    info!("Recorded '{}' as completed", MEDIA_FILES);
                }
                db.close()?;
            }
            Err(e) => warn!("Files copied but the files flag could not be recorded: {}", e),
        }
        Ok(())
    }

    fn files_rollback(config: &Config) -> Result<(), MediaMergeError> {
        let files = Self::file_migrator(config);
        let report = Steps::new(1).run("Restoring files to legacy directories", || files.rollback())?;
        Self::print_file_report(&report);

        // The unified layout is no longer authoritative once files have been sent back
        match Self::open_database(config) {
            Ok(db) => {
                if MigrationLedger::remove(db.conn(), MEDIA_FILES)? {
                    info!("Cleared '{}'", MEDIA_FILES);
                }
                db.close()?;
            }
            Err(e) => warn!("Files restored but the files flag could not be cleared: {}", e),
        }
        Ok(())
    }

    /// Deleting legacy files is only allowed once the records verify and the file
    /// phase is recorded as finished.
    fn files_cleanup(config: &Config) -> Result<(), MediaMergeError> {
        let files = Self::file_migrator(config);
        let db = Self::open_database(config)?;
        let mut steps = Steps::new(2);

        let gate = steps.run("Verifying before cleanup", || {
            VerificationAuditor::new(&db).check()?;
            if !MigrationLedger::is_completed(db.conn(), MEDIA_FILES)? {
                return Err(MediaMergeError::Error(format!(
                    "'{}' is not completed; run `mediamerge files` first",
                    MEDIA_FILES
                )));
            }
            Ok(())
        });
        db.close()?;
        gate?;

        let report = steps.run("Deleting legacy files", || files.cleanup_legacy_files())?;
        Self::print_file_report(&report);
        Ok(())
    }

    fn verify(config: &Config) -> Result<(), MediaMergeError> {
        let db = Self::open_database(config)?;
        let result = Steps::new(1).run("Verifying", || VerificationAuditor::new(&db).check());
        db.close()?;

        let report = result?;
        print!("{}", report);
        Ok(())
    }

    fn status(config: &Config) -> Result<(), MediaMergeError> {
        let db = Self::open_database(config)?;
        let records = MigrationLedger::get(db.conn(), MEDIA_UNIFICATION)?;
        let files = MigrationLedger::get(db.conn(), MEDIA_FILES)?;
        let ready = VerificationAuditor::new(&db).cutover_ready()?;
        db.close()?;

        let describe = |entry: Option<LedgerEntry>| match entry {
            Some(entry) if entry.completed => {
                let when = DateTime::from_timestamp(entry.updated_at, 0)
                    .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                format!("yes ({})", when)
            }
            _ => "no".to_owned(),
        };

        println!("records migrated: {}", describe(records));
        println!("files migrated:   {}", describe(files));
        println!("cutover ready:    {}", if ready { "yes" } else { "no" });
        Ok(())
    }

    fn backup(config: &Config, action: BackupCommand) -> Result<(), MediaMergeError> {
        let backups = BackupManager::from_config(&config.paths);

        match action {
            BackupCommand::Create => {
                let path = Steps::new(1).run("Backing up database", || backups.create_backup())?;
                println!("{}", path.display());
            }
            BackupCommand::List => {
                let listed = backups.list_backups()?;
                if listed.is_empty() {
                    println!("No backups in {}", backups.backup_dir().display());
                }
                for backup in listed {
                    let created = backup
                        .created
                        .map(|c| c.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_owned());
                    println!("{:<20} {:>12}  {}", created, backup.size, backup.path.display());
                }
            }
            BackupCommand::Restore { path } => {
                Steps::new(1).run("Restoring database", || backups.restore_backup(&path))?;
            }
            BackupCommand::Delete { path } => {
                Steps::new(1).run("Deleting backup", || backups.delete_backup(&path))?;
            }
        }
        Ok(())
    }

    fn print_file_report(report: &FileReport) {
        println!(
            "      files: {} scanned, {} copied, {} skipped, {} unsupported, {} conflicts, {} removed, {} failed",
            report.scanned,
            report.copied,
            report.skipped,
            report.unsupported,
            report.conflicts,
            report.removed,
            report.failed
        );
    }
}
