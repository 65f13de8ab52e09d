//! Error types for takeover arbitration.

use thiserror::Error;

use crate::device::DeviceKind;

#[derive(Debug, Error)]
pub enum TakeoverError {
    /// Controller name does not map to any known device. Fatal at setup.
    #[error("no such controller type: {0}")]
    UnsupportedDevice(String),

    /// Requested hardware could not be opened. Recovered by keyboard fallback.
    #[error("{device} unavailable: {reason}")]
    DeviceUnavailable { device: DeviceKind, reason: String },

    /// The autonomous source cannot handle the current observation.
    /// Recovered per tick by forcing manual control.
    #[error("observation mismatch: {0}")]
    ObservationMismatch(String),

    /// External action is not a member of the declared action space.
    #[error("input {action} is not compatible with action space {space}")]
    ActionSpaceMismatch { action: String, space: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
