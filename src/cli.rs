// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::ChangeMask;

/// Command-line arguments for `sharenotify`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sharenotify",
    version,
    about = "Watch directories through a pluggable change-notification backend and print events.",
    long_about = None
)]
pub struct CliArgs {
    /// Directories to watch. When empty, the shares of `--config` are watched.
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Share config file (TOML).
    ///
    /// Default when no PATH is given: `sharenotify.toml` in the current
    /// working directory.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Backend to try first (e.g. `inotify`, `poll`).
    #[arg(long, value_name = "NAME")]
    pub backend: Option<String>,

    /// Report changes anywhere below PATH, not only direct children.
    #[arg(long, short = 'r')]
    pub recursive: bool,

    /// Comma-separated change kinds to report (created, deleted, modified,
    /// renamed, renamed-from, renamed-to, all).
    #[arg(long, value_name = "KINDS", value_delimiter = ',', default_value = "all")]
    pub filter: Vec<String>,

    /// Poll interval for the polling backend, e.g. `100ms`.
    #[arg(long, value_name = "DURATION")]
    pub poll_interval: Option<String>,

    /// Print the registered backends and exit.
    #[arg(long)]
    pub list_backends: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SHARENOTIFY_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

impl CliArgs {
    /// The `--filter` names as a mask.
    pub fn filter_mask(&self) -> Result<ChangeMask, String> {
        ChangeMask::from_names(&self.filter)
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
