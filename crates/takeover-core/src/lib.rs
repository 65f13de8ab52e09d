//! takeover-core: human/autonomous input arbitration for simulated agents.
//!
//! Decides per tick whether an agent's motion command comes from the
//! autonomous source or from a human device, and post-processes the chosen
//! action into a clipped `[steering, throttle]` pair. Pure and synchronous;
//! device drivers, rendering and vehicle dynamics stay with the caller.

pub mod arbiter;
pub mod config;
pub mod device;
pub mod error;
pub mod feed;
pub mod policy;
pub mod postprocess;
pub mod space;
pub mod types;

pub use arbiter::{Decision, HumanInput, TakeoverArbiter, TickInput, detects_intent};
pub use config::{ArbitrationMode, PolicyConfig, TakeoverConfig};
pub use device::{
    DeviceKind, DeviceProvider, DeviceReading, InputBackend, InputDevice, IntentFlags,
    KeyboardMode,
};
pub use error::TakeoverError;
pub use feed::{SnapshotBackend, SnapshotFeed, SnapshotProvider};
pub use policy::{AutonomousSource, ControlHost, TOGGLE_KEY, TakeoverPolicy, TickContext};
pub use postprocess::{ActionPostProcessor, clip, finalize};
pub use space::ActionSpace;
pub use types::{
    ActionInfo, AgentAction, ExternalActionRecord, RawAction, TakeoverState, TransitionCause,
};
