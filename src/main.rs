use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replaykit::bundle::{pack_bundle, unpack_bundle, TestSuiteManifest};
use replaykit::config::{EngineArgs, EngineConfig, EXAMPLE_CONFIG};
use replaykit::storage::{SqliteOptions, SqliteStorage, Storage, DEFAULT_BUCKET};
use replaykit::EngineError;

#[derive(Parser)]
#[command(name = "replaykit")]
#[command(about = "Inspect replaykit recordings and test-case bundles", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DbArgs {
    /// Storage file
    #[arg(long)]
    db: PathBuf,
    /// Table holding the entries
    #[arg(long, default_value = DEFAULT_BUCKET)]
    bucket: String,
}

impl DbArgs {
    fn open(&self) -> Result<SqliteStorage> {
        let options = SqliteOptions {
            bucket: self.bucket.clone(),
            ..SqliteOptions::default()
        };
        SqliteStorage::open(&self.db, options)
            .with_context(|| format!("failed to open {}", self.db.display()))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored under a key
    Get {
        #[command(flatten)]
        db: DbArgs,
        key: String,
    },
    /// Store a value under a key
    Put {
        #[command(flatten)]
        db: DbArgs,
        key: String,
        value: String,
    },
    /// List stored keys
    Keys {
        #[command(flatten)]
        db: DbArgs,
    },
    /// Pretty-print a bundle manifest
    Manifest {
        /// Bundle directory
        dir: PathBuf,
    },
    /// Zip a bundle directory
    Pack {
        dir: PathBuf,
        out: PathBuf,
    },
    /// Extract a zipped bundle
    Unpack {
        archive: PathBuf,
        out: PathBuf,
        #[arg(long)]
        overwrite: bool,
    },
    /// Show the effective configuration
    Config {
        /// Print the annotated example file instead
        #[arg(long)]
        example: bool,
        /// Apply the flags recorded in this bundle's manifest
        #[arg(long, value_name = "DIR")]
        bundle: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Get { db, key } => {
            let storage = db.open()?;
            match storage.get(&key) {
                Ok(value) => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&value)?;
                    stdout.write_all(b"\n")?;
                }
                Err(EngineError::NotFound { key }) => {
                    eprintln!("key not found: {key}");
                    return Ok(ExitCode::from(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Put { db, key, value } => {
            let storage = db.open()?;
            storage.put(&key, value.as_bytes())?;
            storage.close();
        }
        Commands::Keys { db } => {
            let storage = db.open()?;
            for key in storage.keys()? {
                println!("{key}");
            }
        }
        Commands::Manifest { dir } => {
            let manifest = TestSuiteManifest::load(&dir)?
                .with_context(|| format!("no manifest in {}", dir.display()))?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Commands::Pack { dir, out } => {
            let files = pack_bundle(&dir, &out)?;
            println!("packed {} files into {}", files, out.display());
        }
        Commands::Unpack {
            archive,
            out,
            overwrite,
        } => {
            unpack_bundle(&archive, &out, overwrite)?;
            println!("extracted {} into {}", archive.display(), out.display());
        }
        Commands::Config {
            example,
            bundle,
            engine,
        } => {
            if example {
                print!("{EXAMPLE_CONFIG}");
            } else {
                let mut config = EngineConfig::load()?;
                if let Some(dir) = &bundle {
                    config.apply_bundle(dir)?;
                }
                let base = bundle.as_deref().unwrap_or_else(|| Path::new("."));
                engine.apply(&mut config, base)?;
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
