//! `takeover replay`: drive a policy from a recorded tick script.
//!
//! Each script line is one tick: the engine view, the external action, the
//! driver snapshot and, optionally, what the expert answers. Output is one
//! JSON object per tick carrying the resulting `ActionInfo`.

use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::rc::Rc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use takeover_core::{
    ActionInfo, AgentAction, AutonomousSource, ControlHost, DeviceKind, DeviceReading,
    ExternalActionRecord, PolicyConfig, SnapshotFeed, SnapshotProvider, TakeoverError,
    TakeoverPolicy, TickContext,
};

// ─── Script Format ────────────────────────────────────────────────

/// What the expert does on a tick where it is consulted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertStep {
    Action(AgentAction),
    /// Expert rejects the observation with this detail.
    Mismatch(String),
}

fn default_true() -> bool {
    true
}

/// One scripted tick.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptTick {
    /// Start a new episode before this tick.
    #[serde(default)]
    pub reset: bool,
    /// Camera follows the replayed agent.
    #[serde(default = "default_true")]
    pub tracked: bool,
    #[serde(default)]
    pub bird_view: bool,
    #[serde(default)]
    pub expert_takeover: bool,
    pub external: ExternalActionRecord,
    /// Driver snapshot. Absent means neutral input.
    #[serde(default)]
    pub device: Option<DeviceReading>,
    /// Driver failure for this tick. Takes precedence over `device`.
    #[serde(default)]
    pub device_error: Option<String>,
    /// Toggle key pressed in the render window.
    #[serde(default)]
    pub toggle_key: bool,
    #[serde(default)]
    pub expert: Option<ExpertStep>,
}

/// Parse a JSONL script. Blank lines and `#` comments are skipped.
pub fn parse_script(reader: impl BufRead) -> anyhow::Result<Vec<ScriptTick>> {
    let mut ticks = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading script line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tick: ScriptTick = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid tick on script line {}", idx + 1))?;
        ticks.push(tick);
    }
    Ok(ticks)
}

// ─── Scripted Collaborators ───────────────────────────────────────

/// Expert answering whatever the current tick scripted.
#[derive(Debug, Clone, Default)]
struct ScriptedExpert {
    step: Rc<RefCell<Option<ExpertStep>>>,
}

impl ScriptedExpert {
    fn stage(&self, step: Option<ExpertStep>) {
        *self.step.borrow_mut() = step;
    }
}

impl AutonomousSource for ScriptedExpert {
    fn act(&mut self, agent_id: &str) -> Result<AgentAction, TakeoverError> {
        match self.step.borrow_mut().take() {
            Some(ExpertStep::Action(action)) => Ok(action),
            Some(ExpertStep::Mismatch(detail)) => Err(TakeoverError::ObservationMismatch(detail)),
            None => {
                tracing::debug!(agent_id, "no scripted expert action, holding neutral");
                Ok(AgentAction::NEUTRAL)
            }
        }
    }
}

/// Stand-in for the render window's key bindings.
#[derive(Debug, Default)]
struct ReplayHost {
    bound: Vec<String>,
}

impl ControlHost for ReplayHost {
    fn bind_key(&mut self, key: &str) {
        self.bound.push(key.to_string());
    }
}

// ─── Replay ───────────────────────────────────────────────────────

/// Per-tick output line.
#[derive(Debug, Serialize)]
struct TickRecord<'a> {
    tick: usize,
    agent_id: &'a str,
    #[serde(flatten)]
    info: ActionInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub ticks: usize,
    pub manual_ticks: usize,
    pub toggles: usize,
}

pub struct Replay {
    agent_id: String,
    policy: TakeoverPolicy,
    feed: SnapshotFeed,
    expert: ScriptedExpert,
    toggle_bound: bool,
}

impl Replay {
    /// Build the policy against feed-backed devices. An empty `connected`
    /// list means every device kind is present.
    pub fn new(
        config: PolicyConfig,
        seed: u64,
        agent_id: impl Into<String>,
        connected: &[DeviceKind],
    ) -> anyhow::Result<Self> {
        let feed = SnapshotFeed::new();
        let provider = if connected.is_empty() {
            SnapshotProvider::all(feed.clone())
        } else {
            SnapshotProvider::new(connected.iter().copied(), feed.clone())
        };
        let expert = ScriptedExpert::default();
        let policy = TakeoverPolicy::new(config, seed, &provider)
            .context("building takeover policy")?
            .with_expert(Box::new(expert.clone()));

        let mut host = ReplayHost::default();
        let toggle_bound = policy.register_controls(&mut host);
        tracing::debug!(keys = ?host.bound, "replay controls registered");

        Ok(Self {
            agent_id: agent_id.into(),
            policy,
            feed,
            expert,
            toggle_bound,
        })
    }

    pub fn policy(&self) -> &TakeoverPolicy {
        &self.policy
    }

    /// Run one tick. Errors from `act` abort the tick.
    pub fn step(&mut self, tick: &ScriptTick) -> Result<ActionInfo, TakeoverError> {
        if tick.reset {
            self.policy.reset();
        }

        match (&tick.device_error, tick.device) {
            (Some(reason), _) => self.feed.disconnect(reason.clone()),
            (None, Some(reading)) => self.feed.set(reading),
            (None, None) => self.feed.clear(),
        }
        self.expert.stage(tick.expert.clone());

        if tick.toggle_key {
            if self.toggle_bound {
                self.policy.on_toggle_key(&self.agent_id);
            } else {
                tracing::debug!(agent_id = %self.agent_id, "toggle key not bound, press ignored");
            }
        }

        let ctx = TickContext {
            tracked_agent: tick.tracked.then_some(self.agent_id.as_str()),
            bird_view: tick.bird_view,
            expert_takeover: tick.expert_takeover,
            external: &tick.external,
        };
        self.policy.act(&self.agent_id, &ctx)?;
        Ok(*self.policy.action_info())
    }

    /// Replay every tick, writing one JSON line each to `out`.
    pub fn run(
        &mut self,
        ticks: &[ScriptTick],
        mut out: impl Write,
    ) -> anyhow::Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        let mut previous = self.policy.arbiter().state();
        for (idx, tick) in ticks.iter().enumerate() {
            let info = self
                .step(tick)
                .with_context(|| format!("tick {idx} failed"))?;

            summary.ticks += 1;
            if info.manual_control {
                summary.manual_ticks += 1;
            }
            if info.takeover_state != previous && info.cause.is_toggle() {
                summary.toggles += 1;
            }
            previous = info.takeover_state;

            let record = TickRecord {
                tick: idx,
                agent_id: &self.agent_id,
                info,
            };
            serde_json::to_writer(&mut out, &record)?;
            writeln!(out)?;
        }
        out.flush()?;
        tracing::info!(
            agent_id = %self.agent_id,
            ticks = summary.ticks,
            manual_ticks = summary.manual_ticks,
            toggles = summary.toggles,
            "replay finished"
        );
        Ok(summary)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
