use rusqlite::Error as RusqliteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaMergeError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    /// The database file could not be located, or a path handed to us is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Any failure inside a Run/Rollback transaction. The transaction is always
    /// rolled back in full before this is returned.
    #[error("Transaction aborted during {stage}: {source}")]
    Transaction {
        stage: &'static str,
        #[source]
        source: RusqliteError,
    },

    #[error("File error on '{}': {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// First line is a one-line summary; the per-category breakdown follows
    #[error("Verification failed: {0}")]
    VerificationMismatch(String),

    #[error("Backup '{}' failed its integrity check: {reason}", path.display())]
    BackupIntegrity { path: PathBuf, reason: String },

    #[error("Error: {0}")]
    Error(String),
}

impl MediaMergeError {
    pub fn transaction(stage: &'static str) -> impl FnOnce(RusqliteError) -> Self {
        move |source| MediaMergeError::Transaction { stage, source }
    }

    pub fn file_io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| MediaMergeError::FileIo { path, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_error_names_stage() {
        let err = MediaMergeError::transaction("insert images")(RusqliteError::InvalidQuery);
        let msg = err.to_string();
        assert!(msg.starts_with("Transaction aborted during insert images"));
    }

    #[test]
    fn test_file_io_error_includes_path() {
        let err = MediaMergeError::file_io("/tmp/a.png")(io::Error::from(io::ErrorKind::NotFound));
        assert!(err.to_string().contains("/tmp/a.png"));
    }
}
