use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TakeoverError;

// ─── Agent Action ─────────────────────────────────────────────────

/// Final 2-channel control command handed to the simulation step.
///
/// Serialized as `[steering, throttle]`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct AgentAction {
    pub steering: f64,
    /// Positive values accelerate, negative values brake.
    pub throttle: f64,
}

impl AgentAction {
    pub const NEUTRAL: Self = Self {
        steering: 0.0,
        throttle: 0.0,
    };

    pub fn new(steering: f64, throttle: f64) -> Self {
        Self { steering, throttle }
    }

    pub fn to_array(self) -> [f64; 2] {
        [self.steering, self.throttle]
    }

    /// Sum of absolute channel values. Used as the human-intent magnitude.
    pub fn magnitude(self) -> f64 {
        self.steering.abs() + self.throttle.abs()
    }

    /// Zero the brake component, keep steering.
    #[must_use]
    pub fn without_brake(self) -> Self {
        Self {
            steering: self.steering,
            throttle: if self.throttle < 0.0 { 0.0 } else { self.throttle },
        }
    }
}

impl From<[f64; 2]> for AgentAction {
    fn from(v: [f64; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

impl From<AgentAction> for [f64; 2] {
    fn from(a: AgentAction) -> Self {
        a.to_array()
    }
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.steering, self.throttle)
    }
}

// ─── Raw & External Actions ───────────────────────────────────────

/// Action as produced by a source, before conversion and clipping.
///
/// JSON shape follows the action space: a bare integer for `Discrete`,
/// an array for `Box` and `MultiDiscrete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAction {
    Index(u64),
    Vector(Vec<f64>),
}

impl From<AgentAction> for RawAction {
    fn from(a: AgentAction) -> Self {
        Self::Vector(a.to_array().to_vec())
    }
}

impl fmt::Display for RawAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Vector(v) => write!(f, "{v:?}"),
        }
    }
}

/// Per-tick input supplied from outside the policy (env.step, a recorder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalActionRecord {
    /// Action plus an externally forced takeover flag.
    Tagged {
        action: RawAction,
        #[serde(default)]
        extra: bool,
    },
    Bare(RawAction),
}

impl ExternalActionRecord {
    pub fn action(&self) -> &RawAction {
        match self {
            Self::Tagged { action, .. } | Self::Bare(action) => action,
        }
    }

    /// Externally requested takeover. Always false for bare actions.
    pub fn extra_takeover(&self) -> bool {
        matches!(self, Self::Tagged { extra: true, .. })
    }
}

impl From<RawAction> for ExternalActionRecord {
    fn from(a: RawAction) -> Self {
        Self::Bare(a)
    }
}

// ─── Takeover State ───────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakeoverState {
    #[default]
    Autonomous,
    Manual,
}

impl TakeoverState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Manual => "manual",
        }
    }

    pub fn is_manual(self) -> bool {
        self == Self::Manual
    }

    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Autonomous => Self::Manual,
            Self::Manual => Self::Autonomous,
        }
    }
}

impl fmt::Display for TakeoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TakeoverState {
    type Err = TakeoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "autonomous" => Ok(Self::Autonomous),
            "manual" => Ok(Self::Manual),
            _ => Err(TakeoverError::InvalidConfig(format!(
                "unknown takeover state: {s}"
            ))),
        }
    }
}

// ─── Transition Cause ─────────────────────────────────────────────

/// Why the arbiter holds its current state after a tick.
///
/// Operator toggles and autonomous fallbacks share one transition path but
/// stay distinguishable here.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Nothing has happened yet.
    #[default]
    Initial,
    OperatorToggle,
    AutonomousFallback,
    /// Manual-only arbitration: every eligible tick belongs to the human.
    AlwaysManual,
    DeviceIntent,
    ExternalFlag,
    StochasticDraw,
    /// A minimum-duration takeover is still counting down.
    MinimumDuration,
    CountdownExpired,
    NoIntent,
    /// Manual control is not permitted for this agent on this tick.
    Ineligible,
    /// The expert drives this tick.
    ExpertTakeover,
}

impl TransitionCause {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::OperatorToggle => "operator_toggle",
            Self::AutonomousFallback => "autonomous_fallback",
            Self::AlwaysManual => "always_manual",
            Self::DeviceIntent => "device_intent",
            Self::ExternalFlag => "external_flag",
            Self::StochasticDraw => "stochastic_draw",
            Self::MinimumDuration => "minimum_duration",
            Self::CountdownExpired => "countdown_expired",
            Self::NoIntent => "no_intent",
            Self::Ineligible => "ineligible",
            Self::ExpertTakeover => "expert_takeover",
        }
    }

    /// Causes that go through the explicit toggle path.
    pub fn is_toggle(self) -> bool {
        matches!(self, Self::OperatorToggle | Self::AutonomousFallback)
    }
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Action Info ──────────────────────────────────────────────────

/// Diagnostic side channel written on every `act` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub action: AgentAction,
    pub manual_control: bool,
    pub takeover_state: TakeoverState,
    pub cause: TransitionCause,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_action_serializes_as_pair() {
        let a = AgentAction::new(0.5, -0.25);
        let json = serde_json::to_string(&a).expect("serialize");
        assert_eq!(json, "[0.5,-0.25]");
        let back: AgentAction = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, a);
    }

    #[test]
    fn magnitude_is_sum_of_abs() {
        let a = AgentAction::new(-0.01, 0.01);
        assert!((a.magnitude() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn without_brake_zeroes_negative_throttle_only() {
        assert_eq!(
            AgentAction::new(0.3, -0.8).without_brake(),
            AgentAction::new(0.3, 0.0)
        );
        assert_eq!(
            AgentAction::new(-0.3, 0.8).without_brake(),
            AgentAction::new(-0.3, 0.8)
        );
    }

    #[test]
    fn external_record_bare_and_tagged() {
        let bare: ExternalActionRecord = serde_json::from_str("[0.1, 0.2]").expect("bare");
        assert_eq!(bare.action(), &RawAction::Vector(vec![0.1, 0.2]));
        assert!(!bare.extra_takeover());

        let tagged: ExternalActionRecord =
            serde_json::from_str(r#"{"action": [0.1, 0.2], "extra": true}"#).expect("tagged");
        assert_eq!(tagged.action(), &RawAction::Vector(vec![0.1, 0.2]));
        assert!(tagged.extra_takeover());

        let discrete: ExternalActionRecord = serde_json::from_str("7").expect("index");
        assert_eq!(discrete.action(), &RawAction::Index(7));
    }

    #[test]
    fn tagged_without_extra_defaults_false() {
        let tagged: ExternalActionRecord =
            serde_json::from_str(r#"{"action": 3}"#).expect("tagged");
        assert!(!tagged.extra_takeover());
    }

    #[test]
    fn takeover_state_roundtrip_str() {
        for s in [TakeoverState::Autonomous, TakeoverState::Manual] {
            assert_eq!(s.as_str().parse::<TakeoverState>().expect("parse"), s);
            assert_eq!(s.flipped().flipped(), s);
        }
        assert!("sideways".parse::<TakeoverState>().is_err());
    }

    #[test]
    fn toggle_causes() {
        assert!(TransitionCause::OperatorToggle.is_toggle());
        assert!(TransitionCause::AutonomousFallback.is_toggle());
        assert!(!TransitionCause::DeviceIntent.is_toggle());
        assert!(!TransitionCause::StochasticDraw.is_toggle());
    }
}
