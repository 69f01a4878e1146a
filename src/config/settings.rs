use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::mode::Mode;
use crate::storage::{SqliteOptions, DEFAULT_BUCKET, DEFAULT_SPILL_THRESHOLD};

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

const ENV_PREFIX: &str = "REPLAYKIT_";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    /// Run mode
    pub mode: Mode,
    /// Storage file name inside `db_dir`
    pub db_file: String,
    /// Directory holding the storage file
    pub db_dir: PathBuf,
    /// Root directory for test-case bundles
    pub output_dir: PathBuf,
    /// Seconds between timed bundle rotations
    pub refresh_interval_secs: u64,
    /// Values larger than this (in bytes) spill into side files
    pub spill_threshold: usize,
    /// Table holding the entries
    pub bucket: String,
    /// Rotate after this many captures; 0 disables count-based rotation
    pub rotate_every: u64,
    /// Shell command run for each finished bundle
    pub upload_command: Option<String>,
    /// Destination handed to the upload command as `S3_CASE_DIR`
    pub upload_destination: Option<String>,
    /// Flag file snapshotted into each bundle
    pub env_flag_file: Option<PathBuf>,
    /// Pinned start time (RFC 3339) for the replay clock
    pub server_time: Option<String>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlEngineConfig {
    pub mode: Option<String>,
    pub db_file: Option<String>,
    pub db_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub refresh_interval_secs: Option<u64>,
    pub spill_threshold: Option<usize>,
    pub bucket: Option<String>,
    pub rotate_every: Option<u64>,
    pub upload: Option<TomlUploadConfig>,
    pub env_flag_file: Option<PathBuf>,
    pub server_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlUploadConfig {
    pub command: Option<String>,
    pub destination: Option<String>,
}

/// Base directory for replaykit files (~/.replaykit)
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".replaykit"))
        .unwrap_or_else(|| PathBuf::from(".replaykit"))
}

/// Default config file path (~/.replaykit/config.toml)
pub fn config_path() -> PathBuf {
    base_dir().join("config.toml")
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base = base_dir();
        Self {
            mode: Mode::Off,
            db_file: "replaykit.db".to_string(),
            db_dir: base.join("data"),
            output_dir: base.join("cases"),
            refresh_interval_secs: 7200,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            bucket: DEFAULT_BUCKET.to_string(),
            rotate_every: 0,
            upload_command: None,
            upload_destination: None,
            env_flag_file: None,
            server_time: None,
        }
    }
}

impl EngineConfig {
    /// Defaults, then `~/.replaykit/config.toml`, then `REPLAYKIT_*` variables.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults merged with the TOML file at `path`, if it exists.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        if !path.exists() {
            return Ok(config);
        }

        let contents = fs::read_to_string(path)?;
        let toml_config: TomlEngineConfig = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_toml(toml_config)?;
        tracing::debug!(path = %path.display(), "Loaded replaykit config");
        Ok(config)
    }

    pub fn apply_toml(&mut self, toml_config: TomlEngineConfig) -> Result<()> {
        if let Some(mode) = toml_config.mode {
            self.mode = parse_mode(&mode)?;
        }
        if let Some(db_file) = toml_config.db_file {
            self.db_file = db_file;
        }
        if let Some(db_dir) = toml_config.db_dir {
            self.db_dir = db_dir;
        }
        if let Some(output_dir) = toml_config.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(secs) = toml_config.refresh_interval_secs {
            self.refresh_interval_secs = secs;
        }
        if let Some(threshold) = toml_config.spill_threshold {
            self.spill_threshold = threshold;
        }
        if let Some(bucket) = toml_config.bucket {
            self.bucket = bucket;
        }
        if let Some(rotate_every) = toml_config.rotate_every {
            self.rotate_every = rotate_every;
        }
        if let Some(upload) = toml_config.upload {
            if upload.command.is_some() {
                self.upload_command = upload.command;
            }
            if upload.destination.is_some() {
                self.upload_destination = upload.destination;
            }
        }
        if toml_config.env_flag_file.is_some() {
            self.env_flag_file = toml_config.env_flag_file;
        }
        if toml_config.server_time.is_some() {
            self.server_time = toml_config.server_time;
        }
        self.validate()
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a full variable name to its value.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|v| !v.trim().is_empty())
        };

        if let Some(mode) = var("MODE") {
            self.mode = parse_mode(&mode)?;
        }
        if let Some(db_file) = var("DB_FILE") {
            self.db_file = db_file;
        }
        if let Some(db_dir) = var("DB_DIR") {
            self.db_dir = PathBuf::from(db_dir);
        }
        if let Some(output_dir) = var("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(output_dir);
        }
        if let Some(secs) = var("REFRESH_INTERVAL_SECS") {
            self.refresh_interval_secs = parse_number("REFRESH_INTERVAL_SECS", &secs)?;
        }
        if let Some(threshold) = var("SPILL_THRESHOLD") {
            self.spill_threshold = parse_number("SPILL_THRESHOLD", &threshold)?;
        }
        if let Some(bucket) = var("BUCKET") {
            self.bucket = bucket;
        }
        if let Some(rotate_every) = var("ROTATE_EVERY") {
            self.rotate_every = parse_number("ROTATE_EVERY", &rotate_every)?;
        }
        if let Some(command) = var("UPLOAD_COMMAND") {
            self.upload_command = Some(command);
        }
        if let Some(destination) = var("UPLOAD_DESTINATION") {
            self.upload_destination = Some(destination);
        }
        if let Some(file) = var("ENV_FLAG_FILE") {
            self.env_flag_file = Some(PathBuf::from(file));
        }
        if let Some(time) = var("SERVER_TIME") {
            self.server_time = Some(time);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_file.trim().is_empty() {
            return Err(EngineError::Config("db_file must not be empty".into()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(EngineError::Config(
                "refresh_interval_secs must be greater than zero".into(),
            ));
        }
        if self.bucket.is_empty()
            || !self
                .bucket
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(EngineError::Config(format!(
                "invalid bucket name: {:?}",
                self.bucket
            )));
        }
        if let Some(time) = &self.server_time {
            chrono::DateTime::parse_from_rfc3339(time.trim()).map_err(|e| {
                EngineError::Config(format!("invalid server_time {time:?}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Full path of the storage file.
    pub fn db_path(&self) -> PathBuf {
        self.db_dir.join(&self.db_file)
    }

    pub fn sqlite_options(&self) -> SqliteOptions {
        SqliteOptions {
            bucket: self.bucket.clone(),
            spill_threshold: self.spill_threshold,
        }
    }

    /// Upload command and destination, when both are configured.
    pub fn upload_target(&self) -> Option<(&str, &str)> {
        match (&self.upload_command, &self.upload_destination) {
            (Some(command), Some(destination)) if !command.is_empty() && !destination.is_empty() => {
                Some((command.as_str(), destination.as_str()))
            }
            _ => None,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

fn parse_mode(raw: &str) -> Result<Mode> {
    raw.parse::<Mode>().map_err(EngineError::Config)
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("{ENV_PREFIX}{name} is not a valid number: {raw:?}")))
}
