//! Policy configuration.
//!
//! Loaded from TOML; every key is optional and falls back to the defaults
//! below. Unknown controller names are rejected by [`PolicyConfig::validate`]
//! so that a typo fails setup instead of the first tick.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::arbiter::{
    DEFAULT_TAKEOVER_PROBABILITY, DEFAULT_TAKEOVER_STEPS, JOYSTICK_DEADZONE,
    KEYBOARD_INTENT_THRESHOLD,
};
use crate::device::DeviceKind;
use crate::error::TakeoverError;

/// Default number of discrete bins per control channel.
pub const DEFAULT_DISCRETE_DIM: u32 = 5;

/// Largest accepted number of discrete bins per control channel.
pub const MAX_DISCRETE_DIM: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Allow a human operator to drive the tracked agent.
    pub manual_control: bool,
    /// Rendering is on; the toggle key is bound through the host window.
    pub use_render: bool,
    /// Device name, see [`DeviceKind`] for accepted spellings.
    pub controller: String,
    /// Validate external actions against the declared action space.
    pub action_check: bool,
    /// Consult the expert when the agent's expert-takeover flag is set.
    pub enable_expert: bool,
    pub discrete_action: bool,
    pub use_multi_discrete: bool,
    pub discrete_steering_dim: u32,
    pub discrete_throttle_dim: u32,
    pub takeover: TakeoverConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            manual_control: false,
            use_render: false,
            controller: "keyboard".to_string(),
            action_check: false,
            enable_expert: true,
            discrete_action: false,
            use_multi_discrete: false,
            discrete_steering_dim: DEFAULT_DISCRETE_DIM,
            discrete_throttle_dim: DEFAULT_DISCRETE_DIM,
            takeover: TakeoverConfig::default(),
        }
    }
}

/// Arbitration policy selected for the human/autonomous split.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationMode {
    /// Eligible ticks are always driven by the device.
    Manual,
    /// Device intent decides, tick by tick.
    #[default]
    Takeover,
    /// Like `Takeover`, with human braking discarded.
    TakeoverWithoutBrake,
    /// Human takeovers last a fixed number of ticks and are also injected
    /// at random. Human braking is discarded.
    MinDuration,
}

impl ArbitrationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Takeover => "takeover",
            Self::TakeoverWithoutBrake => "takeover_without_brake",
            Self::MinDuration => "min_duration",
        }
    }

    pub fn suppresses_brake(self) -> bool {
        matches!(self, Self::TakeoverWithoutBrake | Self::MinDuration)
    }
}

impl std::fmt::Display for ArbitrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeoverConfig {
    pub mode: ArbitrationMode,
    /// Keyboard intent threshold on `|steering| + |throttle|`.
    pub keyboard_threshold: f64,
    /// Gamepad deadzone on `|steering| + |throttle|`.
    pub gamepad_deadzone: f64,
    /// Length of a minimum-duration takeover, in ticks.
    pub takeover_steps: u32,
    /// Per-tick chance of an injected takeover in `min_duration` mode.
    pub takeover_probability: f64,
}

impl Default for TakeoverConfig {
    fn default() -> Self {
        Self {
            mode: ArbitrationMode::default(),
            keyboard_threshold: KEYBOARD_INTENT_THRESHOLD,
            gamepad_deadzone: JOYSTICK_DEADZONE,
            takeover_steps: DEFAULT_TAKEOVER_STEPS,
            takeover_probability: DEFAULT_TAKEOVER_PROBABILITY,
        }
    }
}

impl PolicyConfig {
    /// Parse a TOML string. Does not validate.
    pub fn from_toml(s: &str) -> Result<Self, TakeoverError> {
        Ok(toml::from_str(s)?)
    }

    /// Read, parse and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, TakeoverError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// The device this config asks for.
    pub fn device_kind(&self) -> Result<DeviceKind, TakeoverError> {
        self.controller.parse()
    }

    pub fn validate(&self) -> Result<(), TakeoverError> {
        self.device_kind()?;

        let t = &self.takeover;
        if !(t.keyboard_threshold.is_finite() && t.keyboard_threshold >= 0.0) {
            return Err(TakeoverError::InvalidConfig(format!(
                "takeover.keyboard_threshold must be a non-negative number, got {}",
                t.keyboard_threshold
            )));
        }
        if !(t.gamepad_deadzone.is_finite() && t.gamepad_deadzone >= 0.0) {
            return Err(TakeoverError::InvalidConfig(format!(
                "takeover.gamepad_deadzone must be a non-negative number, got {}",
                t.gamepad_deadzone
            )));
        }
        if !(0.0..=1.0).contains(&t.takeover_probability) {
            return Err(TakeoverError::InvalidConfig(format!(
                "takeover.takeover_probability must be within [0, 1], got {}",
                t.takeover_probability
            )));
        }
        if t.mode == ArbitrationMode::MinDuration && t.takeover_steps == 0 {
            return Err(TakeoverError::InvalidConfig(
                "takeover.takeover_steps must be at least 1 in min_duration mode".into(),
            ));
        }
        let dims = 2..=MAX_DISCRETE_DIM;
        if self.discrete_action
            && !(dims.contains(&self.discrete_steering_dim)
                && dims.contains(&self.discrete_throttle_dim))
        {
            return Err(TakeoverError::InvalidConfig(format!(
                "discrete dims must be within [2, {MAX_DISCRETE_DIM}], got steering={} throttle={}",
                self.discrete_steering_dim, self.discrete_throttle_dim
            )));
        }
        Ok(())
    }
}
