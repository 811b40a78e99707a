//! Clap derive structures for the `wearlink` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// wearlink -- bridge a wearable temperature controller to its realtime database
#[derive(Debug, Parser)]
#[command(
    name = "wearlink",
    version,
    about = "Bridge a wearable temperature controller to its realtime database",
    long_about = "Bridge a wearable temperature controller to its realtime database.\n\n\
        Keeps the device's control state in sync with the remote document,\n\
        drives the controller over its serial port, and relays temperature\n\
        telemetry back to the database.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "WEARLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run,

    /// Create the device configuration for a new device
    Provision(ProvisionArgs),

    /// Inspect or create the settings file
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Device identifier (document key under the remote root)
    #[arg(long)]
    pub device_id: Option<String>,

    /// Device password
    #[arg(long, env = "WEARLINK_DEVICE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Human-readable device name
    #[arg(long)]
    pub name: Option<String>,

    /// Replace an existing configuration and remote document
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the settings and device configuration paths
    Path,

    /// Display the effective settings as TOML
    Show,

    /// Write a settings file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
