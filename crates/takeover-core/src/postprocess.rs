//! Action post-processing: discrete lookup, validation and clipping.
//!
//! Every action leaving the policy passes through [`clip`], so both channels
//! are always within `[-1, 1]`.

use crate::error::TakeoverError;
use crate::space::ActionSpace;
use crate::types::{AgentAction, RawAction};

/// Clamp one channel into `[-1, 1]`. NaN maps to 0.
fn clip_channel(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) }
}

/// Clip both channels independently into `[-1, 1]`.
pub fn clip(action: AgentAction) -> AgentAction {
    AgentAction::new(clip_channel(action.steering), clip_channel(action.throttle))
}

fn mismatch(raw: &RawAction, space: &ActionSpace) -> TakeoverError {
    TakeoverError::ActionSpaceMismatch {
        action: raw.to_string(),
        space: space.to_string(),
    }
}

/// Value of bin `idx` out of `dim` evenly spaced bins over `[-1, 1]`.
fn bin_value(idx: u64, dim: u32) -> f64 {
    let unit = 2.0 / f64::from(dim.saturating_sub(1).max(1));
    idx as f64 * unit - 1.0
}

/// Map a raw action onto the continuous steering/throttle pair.
///
/// Discrete spaces go through the fixed bin lookup; continuous spaces take
/// the vector as is. Shapes the space cannot interpret are rejected.
pub fn to_continuous(raw: &RawAction, space: &ActionSpace) -> Result<AgentAction, TakeoverError> {
    match (space, raw) {
        (ActionSpace::Box { .. }, RawAction::Vector(v)) if v.len() == 2 => {
            Ok(AgentAction::new(v[0], v[1]))
        }
        (
            ActionSpace::Discrete {
                steering_dim,
                throttle_dim,
            },
            RawAction::Index(i),
        ) if *i < u64::from(*steering_dim) * u64::from(*throttle_dim) => {
            let s = *i % u64::from(*steering_dim);
            let t = *i / u64::from(*steering_dim);
            Ok(AgentAction::new(
                bin_value(s, *steering_dim),
                bin_value(t, *throttle_dim),
            ))
        }
        (
            ActionSpace::MultiDiscrete {
                steering_dim,
                throttle_dim,
            },
            RawAction::Vector(v),
        ) if space.contains(raw) => {
            // membership guarantees non-negative whole numbers
            let (s, t) = (v[0] as u64, v[1] as u64);
            Ok(AgentAction::new(
                bin_value(s, *steering_dim),
                bin_value(t, *throttle_dim),
            ))
        }
        _ => Err(mismatch(raw, space)),
    }
}

/// Convert (when the space is discrete) and clip a raw action.
pub fn finalize(raw: &RawAction, space: &ActionSpace) -> Result<AgentAction, TakeoverError> {
    to_continuous(raw, space).map(clip)
}

/// Post-processor bound to one declared space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionPostProcessor {
    space: ActionSpace,
    action_check: bool,
}

impl ActionPostProcessor {
    pub fn new(space: ActionSpace, action_check: bool) -> Self {
        Self {
            space,
            action_check,
        }
    }

    pub fn space(&self) -> &ActionSpace {
        &self.space
    }

    pub fn action_check(&self) -> bool {
        self.action_check
    }

    /// Membership check on the pre-clip action. No-op unless `action_check`.
    pub fn validate(&self, raw: &RawAction) -> Result<(), TakeoverError> {
        if self.action_check && !self.space.contains(raw) {
            return Err(mismatch(raw, &self.space));
        }
        Ok(())
    }

    /// Validate, convert and clip a raw action from an external source.
    pub fn finalize(&self, raw: &RawAction) -> Result<AgentAction, TakeoverError> {
        self.validate(raw)?;
        finalize(raw, &self.space)
    }
}
