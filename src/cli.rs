//! Command-line interface parsing for steadyfetch
//!
//! Global flags adjust the client configuration (loaded from an optional
//! TOML file); subcommands map one-to-one onto client operations.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::config::{ClientConfig, ConfigError};

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// The resource path is not usable relative to the base URL
    #[error("Invalid path: '{0}'. Paths start with '/' and contain no whitespace")]
    InvalidPath(String),

    /// The configuration file or an override is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// steadyfetch - cached, rate-limited, circuit-protected HTTP GETs
#[derive(Parser, Debug)]
#[command(name = "steadyfetch")]
#[command(about = "Resilient caching client for a rate-limited HTTP API")]
#[command(version)]
pub struct Cli {
    /// TOML config file; missing fields take their defaults
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Override the disk cache directory
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Keep binary assets in memory only
    #[arg(long, global = true)]
    pub no_disk_cache: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch a text resource relative to the base URL and print it
    ///
    /// Example:
    ///   steadyfetch fetch /cards/random
    Fetch {
        #[arg(value_parser = parse_resource_path)]
        path: String,
    },

    /// Fetch a binary asset from an absolute URL
    FetchBinary {
        url: String,
        /// Write the asset here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show cache statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove every cached entry
    Clear,

    /// Remove expired cache entries
    Cleanup,
}

/// Checks a resource path argument.
///
/// # Arguments
/// * `s` - The path string from the command line
///
/// # Returns
/// * `Ok(String)` if it starts with `/` and contains no whitespace
/// * `Err(CliError::InvalidPath)` otherwise
pub fn parse_resource_path(s: &str) -> Result<String, CliError> {
    if s.starts_with('/') && !s.chars().any(char::is_whitespace) {
        Ok(s.to_string())
    } else {
        Err(CliError::InvalidPath(s.to_string()))
    }
}

/// Builds the client configuration from the config file and CLI overrides.
///
/// # Returns
/// * `Ok(ClientConfig)` that has passed validation
/// * `Err(CliError::Config)` if the file cannot be loaded or a value is invalid
pub fn resolve_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(cache_dir) = &cli.cache_dir {
        config.cache_dir = Some(cache_dir.clone());
    }
    if cli.no_disk_cache {
        config.disk_cache_enabled = false;
    }

    config.validate()?;
    Ok(config)
}

/// Default `tracing` filter when `RUST_LOG` is unset
pub fn default_log_filter(verbose: bool) -> &'static str {
    if verbose {
        "steadyfetch=debug"
    } else {
        "steadyfetch=info"
    }
}
