//! Per-agent policy facade.
//!
//! One [`TakeoverPolicy`] drives one agent. Each tick the caller builds a
//! [`TickContext`] from its own engine state and calls [`TakeoverPolicy::act`]:
//!
//! 1. auxiliary controls are polled; a toggle press flips the arbiter;
//! 2. when the expert is enabled and the agent's expert-takeover flag is set,
//!    the expert acts; if it rejects the observation the arbiter is forced
//!    to manual and the tick continues. An expert tick ends any unlatched
//!    takeover;
//! 3. the external action is validated (`action_check`) and converted;
//! 4. the arbiter picks human or external action, human input being
//!    eligible only for the tracked agent outside the bird's-eye view;
//! 5. the chosen action is clipped and [`ActionInfo`] recorded.

use std::fmt;

use crate::arbiter::{Decision, HumanInput, TakeoverArbiter, TickInput};
use crate::config::PolicyConfig;
use crate::device::{DeviceProvider, InputDevice, KeyboardMode};
use crate::error::TakeoverError;
use crate::postprocess::{ActionPostProcessor, clip};
use crate::space::ActionSpace;
use crate::types::{ActionInfo, AgentAction, ExternalActionRecord, TransitionCause};

/// Key registered with the host window for the takeover toggle.
pub const TOGGLE_KEY: &str = "t";

/// Expert (rule-based or learned) policy consulted on expert takeover.
pub trait AutonomousSource {
    /// Fails with [`TakeoverError::ObservationMismatch`] when the current
    /// observation is not in a format the expert accepts.
    fn act(&mut self, agent_id: &str) -> Result<AgentAction, TakeoverError>;
}

/// Hosting environment that owns the render window's key bindings.
pub trait ControlHost {
    fn bind_key(&mut self, key: &str);
}

/// Engine view for one tick, supplied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    /// Agent the camera currently follows.
    pub tracked_agent: Option<&'a str>,
    /// Camera is in the bird's-eye view; manual control is off there.
    pub bird_view: bool,
    /// The agent's expert-takeover flag.
    pub expert_takeover: bool,
    pub external: &'a ExternalActionRecord,
}

impl<'a> TickContext<'a> {
    /// Context for a tracked agent in a normal camera view.
    pub fn tracking(agent_id: &'a str, external: &'a ExternalActionRecord) -> Self {
        Self {
            tracked_agent: Some(agent_id),
            bird_view: false,
            expert_takeover: false,
            external,
        }
    }

    fn is_tracked(&self, agent_id: &str) -> bool {
        self.tracked_agent == Some(agent_id)
    }
}

pub struct TakeoverPolicy {
    config: PolicyConfig,
    device: Option<InputDevice>,
    arbiter: TakeoverArbiter,
    post: ActionPostProcessor,
    expert: Option<Box<dyn AutonomousSource>>,
    action_info: ActionInfo,
}

impl fmt::Debug for TakeoverPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TakeoverPolicy")
            .field("config", &self.config)
            .field("device", &self.device)
            .field("arbiter", &self.arbiter)
            .field("post", &self.post)
            .field("has_expert", &self.expert.is_some())
            .field("action_info", &self.action_info)
            .finish()
    }
}

impl TakeoverPolicy {
    /// Build a policy. The device is opened only when `manual_control` is on.
    ///
    /// Fails on invalid config, unknown controller name, or when not even
    /// the keyboard can be opened.
    pub fn new(
        config: PolicyConfig,
        seed: u64,
        provider: &dyn DeviceProvider,
    ) -> Result<Self, TakeoverError> {
        config.validate()?;
        let device = if config.manual_control {
            let mode = KeyboardMode::for_render(config.use_render);
            Some(InputDevice::from_name(&config.controller, mode, provider)?)
        } else {
            None
        };
        let post = ActionPostProcessor::new(ActionSpace::from_config(&config), config.action_check);
        let arbiter = TakeoverArbiter::new(config.takeover.clone(), seed);
        tracing::debug!(
            mode = %config.takeover.mode,
            device = ?device.as_ref().map(InputDevice::kind),
            space = %post.space(),
            action_check = post.action_check(),
            "takeover policy ready"
        );
        Ok(Self {
            config,
            device,
            arbiter,
            post,
            expert: None,
            action_info: ActionInfo::default(),
        })
    }

    #[must_use]
    pub fn with_expert(mut self, expert: Box<dyn AutonomousSource>) -> Self {
        self.expert = Some(expert);
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn arbiter(&self) -> &TakeoverArbiter {
        &self.arbiter
    }

    pub fn device(&self) -> Option<&InputDevice> {
        self.device.as_ref()
    }

    /// Diagnostics of the last successful `act`.
    pub fn action_info(&self) -> &ActionInfo {
        &self.action_info
    }

    /// Bind the toggle key with the host when rendering with manual control.
    /// Returns whether a binding was made.
    pub fn register_controls(&self, host: &mut dyn ControlHost) -> bool {
        if self.config.manual_control && self.config.use_render {
            host.bind_key(TOGGLE_KEY);
            true
        } else {
            false
        }
    }

    /// Host callback for the bound toggle key.
    pub fn on_toggle_key(&mut self, agent_id: &str) {
        self.toggle(agent_id, TransitionCause::OperatorToggle);
    }

    /// Start of a new episode.
    pub fn reset(&mut self) {
        self.arbiter.reset();
        self.action_info = ActionInfo::default();
    }

    fn toggle(&mut self, agent_id: &str, cause: TransitionCause) {
        let state = self.arbiter.toggle(cause);
        tracing::info!(agent_id, state = %state, cause = %cause, "takeover toggled");
    }

    /// Compute the action for `agent_id` on this tick.
    ///
    /// Device poll failures and expert observation mismatches are handled
    /// here. An external action outside the declared space is returned as
    /// [`TakeoverError::ActionSpaceMismatch`] before arbitration, whichever
    /// side ends up driving.
    pub fn act(
        &mut self,
        agent_id: &str,
        ctx: &TickContext<'_>,
    ) -> Result<AgentAction, TakeoverError> {
        self.poll_auxiliary(agent_id);

        if let Some(action) = self.try_expert(agent_id, ctx)? {
            return Ok(action);
        }

        let external = self.post.finalize(ctx.external.action())?;

        let decision = self.arbitrate(agent_id, ctx);
        let action = decision.human_action.map_or(external, clip);

        self.record(action, &decision);
        Ok(action)
    }

    fn poll_auxiliary(&mut self, agent_id: &str) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let mut pressed = false;
        device.process_others(|| pressed = true);
        if pressed {
            self.toggle(agent_id, TransitionCause::OperatorToggle);
        }
    }

    /// Expert action when the expert holds authority this tick.
    ///
    /// A latched manual takeover keeps the expert out until toggled back.
    fn try_expert(
        &mut self,
        agent_id: &str,
        ctx: &TickContext<'_>,
    ) -> Result<Option<AgentAction>, TakeoverError> {
        if !(self.config.enable_expert && ctx.expert_takeover) || self.arbiter.is_latched() {
            return Ok(None);
        }
        let Some(expert) = self.expert.as_mut() else {
            tracing::debug!(agent_id, "expert takeover requested but no expert attached");
            return Ok(None);
        };

        match expert.act(agent_id) {
            Ok(action) => {
                let action = clip(action);
                let decision = self.arbiter.yield_to_expert();
                self.record(action, &decision);
                Ok(Some(action))
            }
            Err(TakeoverError::ObservationMismatch(detail)) => {
                tracing::warn!(
                    agent_id,
                    detail = %detail,
                    "current observation does not match the format that expert can accept, falling back to manual control"
                );
                if self.arbiter.force_manual(TransitionCause::AutonomousFallback) {
                    tracing::info!(
                        agent_id,
                        state = %self.arbiter.state(),
                        cause = %TransitionCause::AutonomousFallback,
                        "takeover toggled"
                    );
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn arbitrate(&mut self, agent_id: &str, ctx: &TickContext<'_>) -> Decision {
        let human = match self.device.as_mut() {
            Some(device)
                if self.config.manual_control && ctx.is_tracked(agent_id) && !ctx.bird_view =>
            {
                let action = device.process_input(agent_id);
                Some(HumanInput {
                    action,
                    intent: device.intent_flags(),
                })
            }
            _ => None,
        };
        self.arbiter.decide(TickInput {
            human,
            external_takeover: ctx.external.extra_takeover(),
        })
    }

    fn record(&mut self, action: AgentAction, decision: &Decision) {
        self.action_info = ActionInfo {
            action,
            manual_control: decision.manual_control(),
            takeover_state: decision.state,
            cause: decision.cause,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArbitrationMode;
    use crate::device::{DeviceKind, DeviceReading, IntentFlags};
    use crate::feed::{SnapshotFeed, SnapshotProvider};
    use crate::types::{RawAction, TakeoverState};

    struct FixedExpert(Result<AgentAction, fn() -> TakeoverError>);

    impl AutonomousSource for FixedExpert {
        fn act(&mut self, _agent_id: &str) -> Result<AgentAction, TakeoverError> {
            self.0.map_err(|f| f())
        }
    }

    fn mismatch() -> TakeoverError {
        TakeoverError::ObservationMismatch("expected lidar observation".into())
    }

    #[derive(Default)]
    struct RecordingHost {
        keys: Vec<String>,
    }

    impl ControlHost for RecordingHost {
        fn bind_key(&mut self, key: &str) {
            self.keys.push(key.to_string());
        }
    }

    fn manual_config() -> PolicyConfig {
        PolicyConfig {
            manual_control: true,
            ..PolicyConfig::default()
        }
    }

    fn policy(config: PolicyConfig) -> (TakeoverPolicy, SnapshotFeed) {
        let feed = SnapshotFeed::new();
        let provider = SnapshotProvider::all(feed.clone());
        let policy = TakeoverPolicy::new(config, 0, &provider).expect("policy");
        (policy, feed)
    }

    fn keys(axes: [f64; 2], takeover: bool) -> DeviceReading {
        DeviceReading {
            axes,
            intent: IntentFlags::Keyboard { takeover },
            toggle: false,
        }
    }

    fn external(s: f64, t: f64) -> ExternalActionRecord {
        ExternalActionRecord::Bare(RawAction::Vector(vec![s, t]))
    }

    #[test]
    fn no_device_without_manual_control() {
        let (mut policy, _feed) = policy(PolicyConfig::default());
        assert!(policy.device().is_none());

        let ext = external(0.2, 0.3);
        let action = policy
            .act("a0", &TickContext::tracking("a0", &ext))
            .expect("act");
        assert_eq!(action, AgentAction::new(0.2, 0.3));
        assert!(!policy.action_info().manual_control);
    }

    #[test]
    fn untracked_agent_uses_external_action() {
        let (mut policy, feed) = policy(manual_config());
        feed.set(keys([0.9, 0.9], true));
        let ext = external(0.1, 0.1);
        let ctx = TickContext::tracking("other", &ext);
        let action = policy.act("a0", &ctx).expect("act");
        assert_eq!(action, AgentAction::new(0.1, 0.1));
        assert!(!policy.action_info().manual_control);
        assert_eq!(policy.action_info().cause, TransitionCause::Ineligible);
    }

    #[test]
    fn bird_view_disables_manual_control() {
        let (mut policy, feed) = policy(manual_config());
        feed.set(keys([0.9, 0.9], true));
        let ext = external(0.1, 0.1);
        let ctx = TickContext {
            bird_view: true,
            ..TickContext::tracking("a0", &ext)
        };
        policy.act("a0", &ctx).expect("act");
        assert!(!policy.action_info().manual_control);
    }

    #[test]
    fn toggle_key_press_latches_manual() {
        let (mut policy, feed) = policy(manual_config());
        let ext = external(0.1, 0.1);
        let ctx = TickContext::tracking("a0", &ext);

        feed.set(DeviceReading {
            toggle: true,
            ..keys([0.0, 0.0], false)
        });
        let action = policy.act("a0", &ctx).expect("act");
        assert_eq!(action, AgentAction::NEUTRAL);
        assert!(policy.action_info().manual_control);
        assert_eq!(policy.action_info().cause, TransitionCause::OperatorToggle);

        // Key released: authority stays with the operator.
        feed.set(keys([0.0, 0.0], false));
        policy.act("a0", &ctx).expect("act");
        assert!(policy.action_info().manual_control);

        // Second press hands back.
        feed.set(DeviceReading {
            toggle: true,
            ..keys([0.0, 0.0], false)
        });
        let action = policy.act("a0", &ctx).expect("act");
        assert_eq!(action, AgentAction::new(0.1, 0.1));
        assert!(!policy.action_info().manual_control);
    }

    #[test]
    fn register_controls_only_with_render_and_manual() {
        let mut host = RecordingHost::default();

        let (p, _) = policy(manual_config());
        assert!(!p.register_controls(&mut host));

        let (p, _) = policy(PolicyConfig {
            use_render: true,
            ..PolicyConfig::default()
        });
        assert!(!p.register_controls(&mut host));
        assert!(host.keys.is_empty());

        let (p, _) = policy(PolicyConfig {
            use_render: true,
            ..manual_config()
        });
        assert!(p.register_controls(&mut host));
        assert_eq!(host.keys, vec![TOGGLE_KEY.to_string()]);
    }

    #[test]
    fn host_toggle_callback_flips_arbiter() {
        let (mut policy, _feed) = policy(PolicyConfig {
            use_render: true,
            ..manual_config()
        });
        policy.on_toggle_key("a0");
        assert_eq!(policy.arbiter().state(), TakeoverState::Manual);
        policy.on_toggle_key("a0");
        assert_eq!(policy.arbiter().state(), TakeoverState::Autonomous);
    }

    #[test]
    fn expert_drives_when_flag_set() {
        let (policy, _feed) = policy(manual_config());
        let mut policy = policy.with_expert(Box::new(FixedExpert(Ok(AgentAction::new(1.5, 0.4)))));
        let ext = external(0.0, 0.0);
        let ctx = TickContext {
            expert_takeover: true,
            ..TickContext::tracking("a0", &ext)
        };
        let action = policy.act("a0", &ctx).expect("act");
        assert_eq!(action, AgentAction::new(1.0, 0.4));
        assert!(!policy.action_info().manual_control);
    }

    #[test]
    fn expert_disabled_by_config() {
        let (policy, _feed) = policy(PolicyConfig {
            enable_expert: false,
            ..manual_config()
        });
        let mut policy = policy.with_expert(Box::new(FixedExpert(Ok(AgentAction::new(0.5, 0.5)))));
        let ext = external(0.0, 0.2);
        let ctx = TickContext {
            expert_takeover: true,
            ..TickContext::tracking("a0", &ext)
        };
        assert_eq!(
            policy.act("a0", &ctx).expect("act"),
            AgentAction::new(0.0, 0.2)
        );
    }

    #[test]
    fn expert_mismatch_falls_back_to_manual() {
        let (policy, feed) = policy(manual_config());
        let mut policy = policy.with_expert(Box::new(FixedExpert(Err(mismatch as fn() -> TakeoverError))));
        feed.set(keys([0.0, 0.0], false));
        let ext = external(0.3, 0.3);
        let ctx = TickContext {
            expert_takeover: true,
            ..TickContext::tracking("a0", &ext)
        };

        let action = policy.act("a0", &ctx).expect("recovered");
        assert_eq!(action, AgentAction::NEUTRAL);
        let info = policy.action_info();
        assert!(info.manual_control);
        assert_eq!(info.takeover_state, TakeoverState::Manual);
        assert_eq!(info.cause, TransitionCause::AutonomousFallback);

        // Latched: the expert is not retried, the human keeps driving.
        policy.act("a0", &ctx).expect("still manual");
        assert_eq!(policy.action_info().cause, TransitionCause::AutonomousFallback);
        assert!(policy.action_info().manual_control);
    }

    #[test]
    fn expert_ticks_end_min_duration_takeover() {
        let mut cfg = manual_config();
        cfg.takeover.mode = ArbitrationMode::MinDuration;
        cfg.takeover.takeover_probability = 0.0;
        cfg.takeover.takeover_steps = 10;
        let (policy, feed) = policy(cfg);
        let mut policy = policy.with_expert(Box::new(FixedExpert(Ok(AgentAction::new(0.4, 0.4)))));

        feed.set(keys([0.0, 0.0], true));
        let ext = external(0.1, 0.1);
        policy
            .act("a0", &TickContext::tracking("a0", &ext))
            .expect("enter");
        assert!(policy.action_info().manual_control);
        feed.clear();

        let expert_ctx = TickContext {
            expert_takeover: true,
            ..TickContext::tracking("a0", &ext)
        };
        for _ in 0..20 {
            let action = policy.act("a0", &expert_ctx).expect("expert tick");
            assert_eq!(action, AgentAction::new(0.4, 0.4));
            let info = policy.action_info();
            assert!(!info.manual_control);
            assert_eq!(info.takeover_state, TakeoverState::Autonomous);
            assert_eq!(info.cause, TransitionCause::ExpertTakeover);
        }
        assert_eq!(policy.arbiter().takeover_elapsed(), 0);

        // Back without the expert: no takeover is pending.
        policy
            .act("a0", &TickContext::tracking("a0", &ext))
            .expect("tick");
        assert!(!policy.action_info().manual_control);
        assert_eq!(policy.action_info().cause, TransitionCause::NoIntent);
    }

    #[test]
    fn out_of_space_external_rejected_on_manual_tick() {
        let (mut policy, feed) = policy(PolicyConfig {
            action_check: true,
            ..manual_config()
        });
        feed.set(keys([0.5, 0.5], true));
        let ext = external(0.0, 3.0);
        let err = policy
            .act("a0", &TickContext::tracking("a0", &ext))
            .expect_err("mismatch");
        assert!(matches!(err, TakeoverError::ActionSpaceMismatch { .. }));
    }

    #[test]
    fn operator_toggle_overrides_expert() {
        let (policy, _feed) = policy(manual_config());
        let mut policy = policy.with_expert(Box::new(FixedExpert(Ok(AgentAction::new(0.5, 0.5)))));
        policy.on_toggle_key("a0");
        let ext = external(0.0, 0.0);
        let ctx = TickContext {
            expert_takeover: true,
            ..TickContext::tracking("a0", &ext)
        };
        policy.act("a0", &ctx).expect("act");
        assert!(policy.action_info().manual_control);
    }

    #[test]
    fn validation_error_propagates() {
        let (mut policy, _feed) = policy(PolicyConfig {
            action_check: true,
            ..manual_config()
        });
        let ext = external(2.0, 0.0);
        let err = policy
            .act("a0", &TickContext::tracking("a0", &ext))
            .expect_err("mismatch");
        assert!(matches!(err, TakeoverError::ActionSpaceMismatch { .. }));
    }

    #[test]
    fn discrete_external_action_is_converted() {
        let (mut policy, _feed) = policy(PolicyConfig {
            discrete_action: true,
            action_check: true,
            ..PolicyConfig::default()
        });
        let ext = ExternalActionRecord::Bare(RawAction::Index(24));
        let action = policy
            .act("a0", &TickContext::tracking("a0", &ext))
            .expect("act");
        assert_eq!(action, AgentAction::new(1.0, 1.0));
    }

    #[test]
    fn min_duration_policy_honours_external_flag() {
        let mut cfg = manual_config();
        cfg.takeover.mode = ArbitrationMode::MinDuration;
        cfg.takeover.takeover_probability = 0.0;
        cfg.takeover.takeover_steps = 2;
        let (mut policy, feed) = policy(cfg);
        feed.set(keys([0.0, -0.8], false));

        let forced = ExternalActionRecord::Tagged {
            action: RawAction::Vector(vec![0.5, 0.5]),
            extra: true,
        };
        let action = policy
            .act("a0", &TickContext::tracking("a0", &forced))
            .expect("act");
        // Human brake discarded.
        assert_eq!(action, AgentAction::new(0.0, 0.0));
        assert_eq!(policy.action_info().cause, TransitionCause::ExternalFlag);

        let plain = external(0.5, 0.5);
        policy
            .act("a0", &TickContext::tracking("a0", &plain))
            .expect("act");
        assert!(policy.action_info().manual_control);
        assert_eq!(policy.action_info().cause, TransitionCause::MinimumDuration);

        feed.set(keys([0.0, 0.0], false));
        let action = policy
            .act("a0", &TickContext::tracking("a0", &plain))
            .expect("act");
        assert_eq!(action, AgentAction::new(0.5, 0.5));
        assert_eq!(policy.action_info().cause, TransitionCause::CountdownExpired);
    }

    #[test]
    fn unsupported_controller_fails_construction() {
        let feed = SnapshotFeed::new();
        let provider = SnapshotProvider::all(feed);
        let err = TakeoverPolicy::new(
            PolicyConfig {
                controller: "joypad2".into(),
                ..manual_config()
            },
            0,
            &provider,
        )
        .expect_err("unsupported");
        assert!(matches!(err, TakeoverError::UnsupportedDevice(_)));
    }

    #[test]
    fn missing_wheel_falls_back_to_keyboard() {
        let provider = SnapshotProvider::new([DeviceKind::Keyboard], SnapshotFeed::new());
        let policy = TakeoverPolicy::new(
            PolicyConfig {
                controller: "steering_wheel".into(),
                ..manual_config()
            },
            0,
            &provider,
        )
        .expect("fallback");
        assert_eq!(
            policy.device().map(InputDevice::kind),
            Some(DeviceKind::Keyboard)
        );
    }

    #[test]
    fn reset_clears_latch_and_info() {
        let (mut policy, _feed) = policy(manual_config());
        policy.on_toggle_key("a0");
        policy.reset();
        assert_eq!(policy.arbiter().state(), TakeoverState::Autonomous);
        assert_eq!(policy.action_info(), &ActionInfo::default());
    }
}
