//! Command-line flags that point a process at a recorded bundle.
//!
//! Every bundle manifest carries `--replaykit-mode=replay`,
//! `--server-time=<rfc3339>` and `--replaykit-db-file=<db>`; [`EngineArgs`]
//! parses them and folds them into an [`EngineConfig`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{Args, Parser};

use super::EngineConfig;
use crate::bundle::TestSuiteManifest;
use crate::error::{EngineError, Result};
use crate::mode::Mode;

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineArgs {
    /// Operating mode: off, record or replay
    #[arg(long = "replaykit-mode", value_name = "MODE")]
    pub mode: Option<Mode>,

    /// Storage file; a relative path resolves against the bundle directory
    #[arg(long = "replaykit-db-file", value_name = "FILE")]
    pub db_file: Option<PathBuf>,

    /// Start time for the replay clock (RFC 3339)
    #[arg(long = "server-time", value_name = "TIME")]
    pub server_time: Option<String>,
}

#[derive(Parser)]
#[command(no_binary_name = true)]
struct FlagParser {
    #[command(flatten)]
    args: EngineArgs,
}

impl EngineArgs {
    /// Parse a flag list such as a manifest's `flags`.
    pub fn parse_flags<I, S>(flags: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString> + Clone,
    {
        FlagParser::try_parse_from(flags)
            .map(|parsed| parsed.args)
            .map_err(|e| EngineError::Config(format!("invalid engine flags: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Override `config` with the flags that were given.
    pub fn apply(&self, config: &mut EngineConfig, base_dir: &Path) -> Result<()> {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(db_file) = &self.db_file {
            let path = if db_file.is_absolute() {
                db_file.clone()
            } else {
                base_dir.join(db_file)
            };
            let name = path.file_name().ok_or_else(|| {
                EngineError::Config(format!("invalid db file: {}", db_file.display()))
            })?;
            config.db_file = name.to_string_lossy().into_owned();
            config.db_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| base_dir.to_path_buf());
        }
        if let Some(time) = &self.server_time {
            config.server_time = Some(time.clone());
        }
        config.validate()
    }
}

impl EngineConfig {
    /// Apply the flags recorded in the manifest of bundle `dir`.
    pub fn apply_bundle(&mut self, dir: &Path) -> Result<()> {
        let manifest = TestSuiteManifest::load(dir)?.ok_or_else(|| {
            EngineError::Config(format!("no bundle manifest in {}", dir.display()))
        })?;
        let args = EngineArgs::parse_flags(&manifest.flags)?;
        args.apply(self, dir)?;
        tracing::debug!(
            dir = %dir.display(),
            mode = %self.mode,
            db = %self.db_path().display(),
            "Applied bundle flags"
        );
        Ok(())
    }

    /// Loaded configuration pointed at bundle `dir`.
    pub fn for_bundle(dir: &Path) -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_bundle(dir)?;
        Ok(config)
    }
}
