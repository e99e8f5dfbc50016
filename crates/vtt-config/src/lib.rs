//! Configuration for the tabletop sync client.
//!
//! Settings persist as `config.ron` in the user's config directory. CLI flags
//! override whatever was loaded, and [`Config::reload`] detects on-disk edits.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, MonitorConfig, NetworkConfig, SyncConfig, default_config_dir,
};
pub use error::ConfigError;
