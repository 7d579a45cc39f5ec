//! Clap derive structures for the `homelink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// homelink -- bridge a local Home Assistant to a remote AI service
#[derive(Debug, Parser)]
#[command(
    name = "homelink",
    version,
    about = "Bridge a local Home Assistant to a remote AI service",
    long_about = "Runs an outbound agent: connects to the remote service over a WebSocket,\n\
        reports the local entity inventory, and executes the commands it receives\n\
        against the Home Assistant REST API.\n\n\
        With no subcommand, `homelink run` is assumed.",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'C', env = "HOMELINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Remote service URL (overrides config)
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Agent token for the remote service
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Home Assistant base URL
    #[arg(long, alias = "ha-url", global = true)]
    pub local_url: Option<String>,

    /// Home Assistant long-lived access token
    #[arg(long, alias = "ha-token", global = true)]
    pub local_token: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the agent until interrupted
    Run,

    /// Validate configuration and probe the local API
    Check,

    /// Inspect configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration with secrets redacted
    Show,
    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
