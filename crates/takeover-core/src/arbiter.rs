//! Takeover arbitration state machine.
//!
//! Decides, once per tick, whether the human device or the autonomous
//! source drives the agent:
//!
//! - **Toggle**: an explicit toggle (operator key or autonomous fallback)
//!   flips the state. Toggling into manual latches operator authority until
//!   the next toggle; device intent and countdowns cannot override it.
//! - **Intent**: while autonomous, device-specific rules on buttons, paddles
//!   and input magnitude hand authority to the human for the tick.
//! - **Minimum duration**: in [`ArbitrationMode::MinDuration`] a takeover
//!   lasts `takeover_steps` ticks, after which the arbiter reverts and
//!   re-evaluates the external flag, device intent and a seeded random draw.
//! - **Brake suppression**: in modes that ask for it, a human action's
//!   negative throttle is zeroed before use.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::{ArbitrationMode, TakeoverConfig};
use crate::device::IntentFlags;
use crate::types::{AgentAction, TakeoverState, TransitionCause};

/// Keyboard magnitude above which input counts as takeover intent.
pub const KEYBOARD_INTENT_THRESHOLD: f64 = 0.01;

/// Gamepad deadzone on `|steering| + |throttle|`.
pub const JOYSTICK_DEADZONE: f64 = 0.025;

/// Ticks a minimum-duration takeover lasts.
pub const DEFAULT_TAKEOVER_STEPS: u32 = 10;

/// Per-tick probability of an injected takeover.
pub const DEFAULT_TAKEOVER_PROBABILITY: f64 = 0.1;

/// Device-specific human-intent rule.
///
/// - steering wheel: either paddle;
/// - keyboard: takeover key, or magnitude above `keyboard_threshold`;
/// - gamepad: A/B/X/Y, or magnitude above `gamepad_deadzone`.
pub fn detects_intent(intent: &IntentFlags, raw: AgentAction, config: &TakeoverConfig) -> bool {
    match intent {
        IntentFlags::SteeringWheel { .. } => intent.any_pressed(),
        IntentFlags::Keyboard { .. } => {
            intent.any_pressed() || raw.magnitude() > config.keyboard_threshold
        }
        IntentFlags::Gamepad { .. } => {
            intent.any_pressed() || raw.magnitude() > config.gamepad_deadzone
        }
    }
}

/// Human side of one tick, present only when manual control is eligible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumanInput {
    pub action: AgentAction,
    pub intent: IntentFlags,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInput {
    pub human: Option<HumanInput>,
    /// Takeover requested by the external action record.
    pub external_takeover: bool,
}

/// Outcome of one arbitration tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub state: TakeoverState,
    pub cause: TransitionCause,
    /// Human action to use; `None` means the autonomous source drives.
    pub human_action: Option<AgentAction>,
}

impl Decision {
    pub fn manual_control(&self) -> bool {
        self.human_action.is_some()
    }
}

/// Per-agent arbitration state. Nothing is shared between instances.
#[derive(Debug, Clone)]
pub struct TakeoverArbiter {
    config: TakeoverConfig,
    state: TakeoverState,
    cause: TransitionCause,
    latched: bool,
    /// Ticks spent in the current minimum-duration takeover.
    takeover_elapsed: u32,
    rng: ChaCha8Rng,
}

impl TakeoverArbiter {
    pub fn new(config: TakeoverConfig, seed: u64) -> Self {
        Self {
            config,
            state: TakeoverState::Autonomous,
            cause: TransitionCause::Initial,
            latched: false,
            takeover_elapsed: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &TakeoverConfig {
        &self.config
    }

    pub fn state(&self) -> TakeoverState {
        self.state
    }

    pub fn cause(&self) -> TransitionCause {
        self.cause
    }

    /// Operator authority held by an explicit toggle.
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn takeover_elapsed(&self) -> u32 {
        self.takeover_elapsed
    }

    /// Back to the initial state. The random stream is not rewound.
    pub fn reset(&mut self) {
        self.state = TakeoverState::Autonomous;
        self.cause = TransitionCause::Initial;
        self.latched = false;
        self.takeover_elapsed = 0;
    }

    /// Flip the state unconditionally. Returns the new state.
    pub fn toggle(&mut self, cause: TransitionCause) -> TakeoverState {
        debug_assert!(cause.is_toggle(), "toggle with non-toggle cause {cause}");
        self.state = self.state.flipped();
        self.latched = self.state.is_manual();
        self.takeover_elapsed = 0;
        self.cause = cause;
        self.state
    }

    /// Take manual authority through the toggle path.
    ///
    /// Flips when autonomous; when already manual only latches, so the
    /// result is manual either way. Returns whether a flip happened.
    pub fn force_manual(&mut self, cause: TransitionCause) -> bool {
        if self.state.is_manual() {
            self.latched = true;
            self.cause = cause;
            false
        } else {
            self.toggle(cause);
            true
        }
    }

    /// Run one tick.
    pub fn decide(&mut self, input: TickInput) -> Decision {
        let Some(human) = input.human else {
            return self.decide_ineligible();
        };

        if self.latched {
            return self.manual(human.action);
        }

        let previous = self.state;
        let decision = match self.config.mode {
            ArbitrationMode::Manual => {
                self.cause = TransitionCause::AlwaysManual;
                self.state = TakeoverState::Manual;
                self.manual(human.action)
            }
            ArbitrationMode::Takeover | ArbitrationMode::TakeoverWithoutBrake => {
                if detects_intent(&human.intent, human.action, &self.config) {
                    self.state = TakeoverState::Manual;
                    self.cause = TransitionCause::DeviceIntent;
                    self.manual(human.action)
                } else {
                    self.state = TakeoverState::Autonomous;
                    self.cause = TransitionCause::NoIntent;
                    self.autonomous()
                }
            }
            ArbitrationMode::MinDuration => self.decide_min_duration(human, input.external_takeover),
        };

        if previous != self.state {
            tracing::debug!(
                from = %previous,
                to = %self.state,
                cause = %self.cause,
                "takeover state changed"
            );
        }
        decision
    }

    fn decide_min_duration(&mut self, human: HumanInput, external_takeover: bool) -> Decision {
        let mut expired = false;
        if self.state.is_manual() && self.takeover_elapsed >= self.config.takeover_steps {
            self.state = TakeoverState::Autonomous;
            self.takeover_elapsed = 0;
            expired = true;
        }

        if self.state.is_manual() {
            self.cause = TransitionCause::MinimumDuration;
        } else {
            // Drawn on every autonomous tick so the stream stays aligned
            // with the tick count.
            let draw = self.rng.r#gen::<f64>() < self.config.takeover_probability;
            let trigger = if external_takeover {
                Some(TransitionCause::ExternalFlag)
            } else if detects_intent(&human.intent, human.action, &self.config) {
                Some(TransitionCause::DeviceIntent)
            } else if draw {
                Some(TransitionCause::StochasticDraw)
            } else {
                None
            };

            match trigger {
                Some(cause) => {
                    self.state = TakeoverState::Manual;
                    self.cause = cause;
                }
                None => {
                    self.cause = if expired {
                        TransitionCause::CountdownExpired
                    } else {
                        TransitionCause::NoIntent
                    };
                    return self.autonomous();
                }
            }
        }

        self.takeover_elapsed += 1;
        tracing::debug!(
            elapsed = self.takeover_elapsed,
            takeover_steps = self.config.takeover_steps,
            "current takeover steps"
        );
        self.manual(human.action)
    }

    /// The expert drives this tick. An unlatched takeover ends and its
    /// countdown is cancelled; a latch is left alone.
    pub fn yield_to_expert(&mut self) -> Decision {
        if !self.latched {
            if self.state.is_manual() {
                tracing::debug!(
                    from = %self.state,
                    to = %TakeoverState::Autonomous,
                    cause = %TransitionCause::ExpertTakeover,
                    "takeover state changed"
                );
            }
            self.state = TakeoverState::Autonomous;
            self.takeover_elapsed = 0;
            self.cause = TransitionCause::ExpertTakeover;
        }
        Decision {
            state: self.state,
            cause: self.cause,
            human_action: None,
        }
    }

    /// Manual control is not allowed this tick: drop any unlatched takeover.
    fn decide_ineligible(&mut self) -> Decision {
        if !self.latched {
            self.state = TakeoverState::Autonomous;
            self.takeover_elapsed = 0;
            self.cause = TransitionCause::Ineligible;
        }
        Decision {
            state: self.state,
            cause: self.cause,
            human_action: None,
        }
    }

    fn manual(&self, action: AgentAction) -> Decision {
        let action = if self.config.mode.suppresses_brake() {
            action.without_brake()
        } else {
            action
        };
        Decision {
            state: TakeoverState::Manual,
            cause: self.cause,
            human_action: Some(action),
        }
    }

    fn autonomous(&self) -> Decision {
        Decision {
            state: self.state,
            cause: self.cause,
            human_action: None,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
