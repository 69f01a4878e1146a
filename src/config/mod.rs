mod args;
mod settings;

pub use args::EngineArgs;
pub use settings::{
    base_dir, config_path, EngineConfig, TomlEngineConfig, TomlUploadConfig, EXAMPLE_CONFIG,
};
