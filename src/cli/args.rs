//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the key-reset tool
#[derive(Debug, Parser)]
#[command(name = "u2-key-reset")]
#[command(about = "Reset U2 secret announce keys across torrent-client backends", long_about = None)]
pub struct CliArgs {
    /// Target backend: transmission, qbittorrent, or deluge
    #[arg(short, long, value_name = "BACKEND")]
    pub target: Option<String>,

    /// Backend host
    #[arg(short = 'H', long, value_name = "HOST")]
    pub host: Option<String>,

    /// Backend port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Connect to the backend over HTTPS
    #[arg(short, long)]
    pub secure: bool,

    /// Backend user name
    #[arg(short, long, value_name = "USER")]
    pub user: Option<String>,

    /// Backend password
    #[arg(short = 'P', long, value_name = "PASS")]
    pub password: Option<String>,

    /// U2 API key (from https://u2.dmhy.org/privatetorrents.php)
    #[arg(short = 'k', long, value_name = "KEY")]
    pub api_key: Option<String>,

    /// HTTP proxy for reaching the U2 API, e.g. http://127.0.0.1:1080
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Path to the saved configuration file
    #[arg(long, value_name = "FILE", default_value = "config.json")]
    pub config: PathBuf,

    /// Persist the resolved configuration back to the config file
    #[arg(long)]
    pub save_config: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args() -> CliArgs {
        CliArgs {
            target: None,
            host: None,
            port: None,
            secure: false,
            user: None,
            password: None,
            api_key: None,
            proxy: None,
            config: PathBuf::from("config.json"),
            save_config: false,
            verbose: false,
            quiet: false,
        }
    }

    #[test]
    fn test_default_log_level() {
        let args = bare_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_verbose_log_level() {
        let mut args = bare_args();
        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
        assert!(args.is_verbose());
    }

    #[test]
    fn test_quiet_log_level() {
        let mut args = bare_args();
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
        assert!(args.is_quiet());
    }
}
