use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub mediamerge: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const MEDIAMERGE_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            mediamerge: Self::MEDIAMERGE_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.mediamerge.clone();
        self.mediamerge = self.mediamerge.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.mediamerge.as_str()) {
            eprintln!(
                "Config error: mediamerge log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::MEDIAMERGE_LEVEL
            );
            self.mediamerge = Self::MEDIAMERGE_LEVEL.to_owned();
        }
    }

    /// Log spec handed to flexi_logger. Third-party crates stay at warn.
    pub fn log_spec(&self) -> String {
        format!("warn, mediamerge={}", self.mediamerge)
    }
}

/// Locations of everything the migration touches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub backup_dir: PathBuf,
    pub image_dir: PathBuf,
    pub document_dir: PathBuf,
    pub unified_dir: PathBuf,
}

impl PathsConfig {
    const DATABASE_FILE: &str = "app.db";

    fn default_for(data_dir: &Path, backup_dir: &Path) -> Self {
        let uploads = data_dir.join("uploads");
        PathsConfig {
            data_dir: data_dir.to_owned(),
            database_file: Self::DATABASE_FILE.to_owned(),
            backup_dir: backup_dir.to_owned(),
            image_dir: uploads.join("images"),
            document_dir: uploads.join("documents"),
            unified_dir: uploads.join("media"),
        }
    }

    fn ensure_valid(&mut self) {
        let trimmed = self.database_file.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '\\']) {
            eprintln!(
                "Config error: database_file of '{}' must be a bare file name - using default of '{}'",
                self.database_file,
                Self::DATABASE_FILE
            );
            self.database_file = Self::DATABASE_FILE.to_owned();
        } else {
            self.database_file = trimmed.to_owned();
        }
    }

    /// Where the live database is searched for, in order.
    pub fn database_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = vec![self.data_dir.join(&self.database_file)];
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(&self.database_file));
        }
        candidates
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FilesConfig {
    progress_interval: usize,
}

impl FilesConfig {
    const PROGRESS_INTERVAL: usize = 100;

    pub fn progress_interval(&self) -> usize {
        self.progress_interval
    }

    fn default() -> Self {
        FilesConfig {
            progress_interval: Self::PROGRESS_INTERVAL,
        }
    }

    fn ensure_valid(&mut self) {
        if self.progress_interval == 0 {
            eprintln!(
                "Config error: progress_interval of 0 is invalid - using default of '{}'",
                Self::PROGRESS_INTERVAL
            );
            self.progress_interval = Self::PROGRESS_INTERVAL;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub files: FilesConfig,
}

impl Config {
    const FILE_NAME: &str = "config.toml";
    const ENV_PREFIX: &str = "MEDIAMERGE_";

    /// Defaults rooted at `data_dir`. Backups go to a sibling directory so they
    /// never live inside the live data directory.
    pub fn default_for(data_dir: &Path) -> Self {
        let backup_dir = match data_dir.parent() {
            Some(parent) => parent.join("mediamerge-backups"),
            None => data_dir.join("..").join("mediamerge-backups"),
        };
        Config {
            logging: LoggingConfig::default(),
            paths: PathsConfig::default_for(data_dir, &backup_dir),
            files: FilesConfig::default(),
        }
    }

    /// Loads the configuration from `explicit_path` if given, otherwise from a TOML file
    /// located in the app's data directory. If the file is missing or fails to parse,
    /// defaults are used. Writes the default config to disk if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs, explicit_path: Option<&Path>) -> Self {
        let data_dir = project_dirs.data_local_dir();
        let config_path = match explicit_path {
            Some(path) => path.to_owned(),
            None => data_dir.join(Self::FILE_NAME),
        };

        let default_config = Config::default_for(data_dir);

        if !config_path.exists() {
            Self::write_default(&config_path, &default_config);
        }

        Self::from_figment(default_config, &config_path)
    }

    /// Layers: defaults, then the TOML file, then `MEDIAMERGE_*` environment variables.
    pub fn from_figment(default_config: Config, config_path: &Path) -> Self {
        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn write_default(config_path: &Path, default_config: &Config) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(default_config) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.paths.ensure_valid();
        self.files.ensure_valid();
    }
}
