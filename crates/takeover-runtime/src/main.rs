//! takeover: replay and config tooling for takeover arbitration policies.

use std::fs::File;
use std::io::{self, BufReader};

use anyhow::Context;
use clap::Parser;
use takeover_core::PolicyConfig;

mod check_config;
mod cli;
mod replay;

fn init_tracing() {
    let filter = std::env::var("TAKEOVER_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    // stdout carries the per-tick JSON, keep logs off it.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(io::stderr)
        .init();
}

fn cmd_replay(opts: cli::ReplayOpts) -> anyhow::Result<()> {
    let config = match &opts.config {
        Some(path) => PolicyConfig::load(path)
            .with_context(|| format!("invalid policy config {}", path.display()))?,
        None => PolicyConfig::default(),
    };

    let ticks = if opts.script.as_os_str() == "-" {
        replay::parse_script(io::stdin().lock())?
    } else {
        let file = File::open(&opts.script)
            .with_context(|| format!("cannot open script {}", opts.script.display()))?;
        replay::parse_script(BufReader::new(file))?
    };

    tracing::info!(
        agent_id = %opts.agent,
        ticks = ticks.len(),
        seed = opts.seed,
        mode = %config.takeover.mode,
        "replay starting"
    );
    let mut replay = replay::Replay::new(config, opts.seed, opts.agent, &opts.connected)?;
    replay.run(&ticks, io::stdout().lock())?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    init_tracing();

    match args.command {
        cli::Command::Replay(opts) => cmd_replay(opts)?,
        cli::Command::CheckConfig(opts) => check_config::cmd_check_config(&opts.config)?,
    }

    Ok(())
}
