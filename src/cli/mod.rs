//! CLI module
//!
//! Command-line argument parsing and configuration management.

pub mod args;
pub mod config;

pub use args::CliArgs;
pub use config::Config;
