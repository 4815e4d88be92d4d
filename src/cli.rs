//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// OIDC authenticating reverse proxy
#[derive(Parser, Debug)]
#[command(name = "oidc-authproxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTHPROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTHPROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTHPROXY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTHPROXY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTHPROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy (default)
    Serve,

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// Print shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}
