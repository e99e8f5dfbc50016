//! Command-line arguments for the headless client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tabletop sync client command-line arguments.
///
/// Connection and logging flags override `config.ron`; session flags choose
/// which room to enter.
#[derive(Parser, Debug, Default)]
#[command(name = "vtt-client", about = "Headless tabletop sync client")]
pub struct CliArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Name to play under.
    #[arg(long, default_value = "Observer")]
    pub player_name: String,

    /// Room id to join.
    #[arg(long, conflicts_with = "create_room")]
    pub room: Option<String>,

    /// Create a room with this name and act as its game master.
    #[arg(long)]
    pub create_room: Option<String>,

    /// Room password.
    #[arg(long, default_value = "")]
    pub password: String,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs::parse_from([
            "vtt-client",
            "--server",
            "10.0.0.5",
            "--log-level",
            "debug",
            "--room",
            "abc123",
        ]);
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_address, "10.0.0.5");
        assert_eq!(config.debug.log_level, "debug");
        assert_eq!(config.network.server_port, 3001);
        assert_eq!(args.room.as_deref(), Some("abc123"));
        assert_eq!(args.player_name, "Observer");
    }

    #[test]
    fn test_cli_no_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::parse_from(["vtt-client"]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_room_and_create_room_conflict() {
        let result =
            CliArgs::try_parse_from(["vtt-client", "--room", "r1", "--create-room", "Crypt"]);
        assert!(result.is_err());
    }
}
