//! CLI command definitions for the `parley` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Reliable conversation service for chat assistants.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter for the chosen verbosity. `RUST_LOG` wins when set.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info,sqlx=warn",
            1 => "debug,sqlx=warn,hyper=info",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Address to bind (overrides `server.host`).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides `server.port`).
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to the configuration file.
        #[arg(long, short, default_value = parley_infra::config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Print the effective configuration as TOML.
    Config {
        /// Path to the configuration file.
        #[arg(long, short, default_value = parley_infra::config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}
