use std::path::Path;

use flexi_logger::{
    detailed_format, Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming,
};

use crate::config::LoggingConfig;
use crate::error::MediaMergeError;

const LOG_BASENAME: &str = "mediamerge";
const ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_LOG_FILES: usize = 7;

/// Start the file logger. The returned handle must be held for the life of the
/// process or buffered lines are lost.
pub fn init(logging: &LoggingConfig, log_dir: &Path) -> Result<LoggerHandle, MediaMergeError> {
    Logger::try_with_env_or_str(logging.log_spec())
        .and_then(|logger| {
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(log_dir)
                        .basename(LOG_BASENAME),
                )
                .format_for_files(detailed_format)
                .duplicate_to_stderr(Duplicate::Warn)
                .rotate(
                    Criterion::Size(ROTATE_BYTES),
                    Naming::Timestamps,
                    Cleanup::KeepLogFiles(KEEP_LOG_FILES),
                )
                .start()
        })
        .map_err(|e| MediaMergeError::Configuration(format!("Failed to start logger: {}", e)))
}
