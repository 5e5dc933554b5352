//! Command-line interface definitions for the coordinator.
//!
//! `control-service` runs the HTTP service. The remaining subcommands are
//! small operator helpers that never touch the container runtime.

use std::env;

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands for the coordinator.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch the control service that provisions tenant gateways.
    ControlService(ServiceArgs),

    /// Print a fresh random control key, or a cipher key with `--cipher`.
    GenerateKey {
        /// Generate a base64 encoded 256 bit key for `[secrets].key` instead.
        #[arg(long)]
        cipher: bool,
    },

    /// Read a plaintext from stdin and print its encrypted envelope.
    EncryptSecret {
        /// Base64 encoded cipher key.
        #[arg(long, env = "TENANTGATE_SECRETS_KEY", hide_env_values = true)]
        key: String,
    },

    /// Print the gateway config for a tenant together with its hash.
    ///
    /// Reads the database password and the JWT secret from stdin, one per line.
    Render(RenderArgs),
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}

/// Arguments for the control service command.
#[derive(Debug, Parser)]
pub struct ServiceArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "tenantgate.toml")]
    pub config: String,
    /// Optional override for the listen port (overrides port in config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Optional override for the bind address (overrides bind in config)
    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long, value_enum, default_value_t)]
    pub log_format: LogFormat,
}

#[derive(Debug, Parser)]
pub struct RenderArgs {
    #[arg(long)]
    pub tenant_id: String,
    /// Database name; defaults to the tenant id.
    #[arg(long)]
    pub db_name: Option<String>,
    /// Pooling proxy host the gateway connects to.
    #[arg(long, default_value = "pgbouncer")]
    pub host: String,
    #[arg(long, default_value = "6432")]
    pub port: u16,
}
