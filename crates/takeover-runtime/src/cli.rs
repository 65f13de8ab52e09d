//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use takeover_core::DeviceKind;

#[derive(Parser)]
#[command(
    name = "takeover",
    about = "Human/autonomous takeover arbitration for simulated agents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a JSONL tick script through a policy, one ActionInfo per line
    Replay(ReplayOpts),
    /// Load and validate a policy config, print it with defaults filled in
    CheckConfig(CheckConfigOpts),
}

#[derive(clap::Args)]
pub struct ReplayOpts {
    /// Policy config (TOML). Defaults apply when omitted
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Tick script (JSON Lines). `-` reads stdin
    #[arg(long, short = 's')]
    pub script: PathBuf,

    /// Seed for the stochastic takeover draw
    #[arg(long, default_value = "0", env = "TAKEOVER_SEED")]
    pub seed: u64,

    /// Agent the policy drives
    #[arg(long, default_value = "default_agent")]
    pub agent: String,

    /// Connected devices, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    pub connected: Vec<DeviceKind>,
}

#[derive(clap::Args)]
pub struct CheckConfigOpts {
    /// Policy config (TOML)
    pub config: PathBuf,
}
