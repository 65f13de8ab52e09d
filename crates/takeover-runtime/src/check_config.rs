//! `takeover check-config`: load, validate and echo a policy config.

use std::path::Path;

use anyhow::Context;
use takeover_core::{ActionSpace, PolicyConfig};

/// Resolved view of a config: the file's values with defaults applied, plus
/// what they imply.
pub fn describe(config: &PolicyConfig) -> anyhow::Result<serde_json::Value> {
    let device = config.device_kind()?;
    let space = ActionSpace::from_config(config);
    Ok(serde_json::json!({
        "config": config,
        "device": device,
        "action_space": space.to_string(),
        "discrete": space.is_discrete(),
        "brake_suppressed": config.takeover.mode.suppresses_brake(),
    }))
}

pub fn cmd_check_config(path: &Path) -> anyhow::Result<()> {
    let config = PolicyConfig::load(path)
        .with_context(|| format!("invalid policy config {}", path.display()))?;
    let summary = describe(&config)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    tracing::info!(path = %path.display(), "config ok");
    Ok(())
}
