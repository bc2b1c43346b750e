//! Clap derive structures for the `kumo` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// kumo -- control Mitsubishi units behind Kumo Cloud
#[derive(Debug, Parser)]
#[command(
    name = "kumo",
    version,
    about = "Watch and control Kumo Cloud climate devices from the command line",
    long_about = "Keeps a reconciled live view of a Kumo Cloud site.\n\n\
        Commands are applied optimistically and confirmed against the\n\
        cloud's socket feed and periodic REST snapshots.",
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
    /// Account profile to use
    #[arg(long, short = 'p', env = "KUMO_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Site id (overrides profile)
    #[arg(long, short = 's', env = "KUMO_SITE", global = true)]
    pub site: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "KUMO_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "KUMO_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "KUMO_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON (one object per line when streaming)
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List sites on the account
    Sites,

    /// Inspect devices on the active site
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Stream live changes until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Change settings on a device
    Set(SetArgs),

    /// Show current weather at the active site
    Weather,

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List devices with their current state
    #[command(alias = "ls")]
    List,

    /// Show every known field of one device
    Get {
        /// Device serial or name
        device: String,
    },
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show changes for this device (serial or name)
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,

    /// Print counters when the watch ends
    #[arg(long)]
    pub stats: bool,
}

// ── Set ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Device serial or name
    pub device: String,

    /// Power on or off
    #[arg(long, value_name = "on|off")]
    pub power: Option<String>,

    /// Operation mode (off, cool, heat, dry, vent, auto)
    #[arg(long)]
    pub mode: Option<String>,

    /// Target temperature for the current mode, in °C
    #[arg(long, short = 't', conflicts_with_all = ["cool", "heat"])]
    pub temp: Option<String>,

    /// Cooling setpoint in °C
    #[arg(long)]
    pub cool: Option<String>,

    /// Heating setpoint in °C
    #[arg(long)]
    pub heat: Option<String>,

    /// Fan speed (auto, superQuiet, quiet, low, powerful, superPowerful)
    #[arg(long)]
    pub fan: Option<String>,

    /// Vane position (auto, horizontal, midhorizontal, midpoint, midvertical, vertical, swing)
    #[arg(long)]
    pub vane: Option<String>,

    /// Room temperature calibration in °C (-5 to 5)
    #[arg(long, allow_hyphen_values = true)]
    pub offset: Option<String>,

    /// Wait for the cloud to confirm the new values (or for the hold to lapse)
    #[arg(long)]
    pub wait: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create a profile with guided setup
    Init,

    /// Display current configuration
    Show,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a password in the system keyring
    SetPassword {
        /// Profile to store the password for (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
