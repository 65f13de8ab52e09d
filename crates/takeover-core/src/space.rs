//! Declared action spaces and membership checks.

use std::fmt;

use crate::config::PolicyConfig;
use crate::types::RawAction;

/// Action space an external source is expected to act in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionSpace {
    /// Continuous `[low, high]^dim`.
    Box { low: f64, high: f64, dim: usize },
    /// Single index over `steering_dim * throttle_dim` combinations.
    Discrete {
        steering_dim: u32,
        throttle_dim: u32,
    },
    /// One index per channel.
    MultiDiscrete {
        steering_dim: u32,
        throttle_dim: u32,
    },
}

impl ActionSpace {
    /// The default continuous steering/throttle space.
    pub const CONTINUOUS: Self = Self::Box {
        low: -1.0,
        high: 1.0,
        dim: 2,
    };

    pub fn from_config(config: &PolicyConfig) -> Self {
        if !config.discrete_action {
            return Self::CONTINUOUS;
        }
        if config.use_multi_discrete {
            Self::MultiDiscrete {
                steering_dim: config.discrete_steering_dim,
                throttle_dim: config.discrete_throttle_dim,
            }
        } else {
            Self::Discrete {
                steering_dim: config.discrete_steering_dim,
                throttle_dim: config.discrete_throttle_dim,
            }
        }
    }

    pub fn is_discrete(&self) -> bool {
        !matches!(self, Self::Box { .. })
    }

    pub fn contains(&self, action: &RawAction) -> bool {
        match (self, action) {
            (Self::Box { low, high, dim }, RawAction::Vector(v)) => {
                v.len() == *dim && v.iter().all(|x| x.is_finite() && *x >= *low && *x <= *high)
            }
            (
                Self::Discrete {
                    steering_dim,
                    throttle_dim,
                },
                RawAction::Index(i),
            ) => *i < u64::from(*steering_dim) * u64::from(*throttle_dim),
            (
                Self::MultiDiscrete {
                    steering_dim,
                    throttle_dim,
                },
                RawAction::Vector(v),
            ) => {
                v.len() == 2
                    && is_index_below(v[0], *steering_dim)
                    && is_index_below(v[1], *throttle_dim)
            }
            _ => false,
        }
    }
}

fn is_index_below(x: f64, n: u32) -> bool {
    x.is_finite() && x >= 0.0 && x.fract() == 0.0 && x < f64::from(n)
}

impl fmt::Display for ActionSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Box { low, high, dim } => write!(f, "Box({low:?}, {high:?}, ({dim},))"),
            Self::Discrete {
                steering_dim,
                throttle_dim,
            } => write!(
                f,
                "Discrete({})",
                u64::from(*steering_dim) * u64::from(*throttle_dim)
            ),
            Self::MultiDiscrete {
                steering_dim,
                throttle_dim,
            } => write!(f, "MultiDiscrete([{steering_dim} {throttle_dim}])"),
        }
    }
}
