//! Human input devices.
//!
//! A device is a tagged [`DeviceKind`] plus a driver backend. The backend
//! hands over a [`DeviceReading`] snapshot per poll; everything below the
//! snapshot (key scanning, joystick axes, wheel force feedback) lives in the
//! driver and is not modelled here.
//!
//! One poll per tick: [`InputDevice::process_others`] polls and caches the
//! reading, the following [`InputDevice::process_input`] consumes it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TakeoverError;
use crate::types::AgentAction;

// ─── Device Kind ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Keyboard,
    Gamepad,
    SteeringWheel,
}

impl DeviceKind {
    pub const ALL: [Self; 3] = [Self::Keyboard, Self::Gamepad, Self::SteeringWheel];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyboard => "keyboard",
            Self::Gamepad => "gamepad",
            Self::SteeringWheel => "steering_wheel",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = TakeoverError;

    /// Case-insensitive; accepts the aliases used in simulator configs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyboard" => Ok(Self::Keyboard),
            "xbox" | "xboxcontroller" | "gamepad" | "joystick" => Ok(Self::Gamepad),
            "steering_wheel" | "wheel" => Ok(Self::SteeringWheel),
            _ => Err(TakeoverError::UnsupportedDevice(s.to_string())),
        }
    }
}

/// How the keyboard toggle key reaches the policy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyboardMode {
    /// The render window owns the key; the host calls back into the policy.
    HostBound,
    /// No window: the device scans keys itself and reports the toggle.
    #[default]
    Direct,
}

impl KeyboardMode {
    pub fn for_render(use_render: bool) -> Self {
        if use_render {
            Self::HostBound
        } else {
            Self::Direct
        }
    }
}

// ─── Intent & Readings ────────────────────────────────────────────

/// Discrete takeover-intent signals, one shape per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "device", rename_all = "snake_case")]
pub enum IntentFlags {
    Keyboard {
        #[serde(default)]
        takeover: bool,
    },
    Gamepad {
        #[serde(default)]
        a: bool,
        #[serde(default)]
        b: bool,
        #[serde(default)]
        x: bool,
        #[serde(default)]
        y: bool,
    },
    SteeringWheel {
        #[serde(default)]
        left_paddle: bool,
        #[serde(default)]
        right_paddle: bool,
    },
}

impl IntentFlags {
    /// All signals released.
    pub fn cleared(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Keyboard => Self::Keyboard { takeover: false },
            DeviceKind::Gamepad => Self::Gamepad {
                a: false,
                b: false,
                x: false,
                y: false,
            },
            DeviceKind::SteeringWheel => Self::SteeringWheel {
                left_paddle: false,
                right_paddle: false,
            },
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Keyboard { .. } => DeviceKind::Keyboard,
            Self::Gamepad { .. } => DeviceKind::Gamepad,
            Self::SteeringWheel { .. } => DeviceKind::SteeringWheel,
        }
    }

    /// Whether any takeover button, key or paddle is held.
    pub fn any_pressed(&self) -> bool {
        match *self {
            Self::Keyboard { takeover } => takeover,
            Self::Gamepad { a, b, x, y } => a || b || x || y,
            Self::SteeringWheel {
                left_paddle,
                right_paddle,
            } => left_paddle || right_paddle,
        }
    }
}

/// One driver snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    /// `[steering, throttle]` as reported by the driver, unclipped.
    pub axes: [f64; 2],
    pub intent: IntentFlags,
    /// Auxiliary toggle control held down.
    #[serde(default)]
    pub toggle: bool,
}

impl DeviceReading {
    pub fn neutral(kind: DeviceKind) -> Self {
        Self {
            axes: [0.0, 0.0],
            intent: IntentFlags::cleared(kind),
            toggle: false,
        }
    }
}

// ─── Driver Seam ──────────────────────────────────────────────────

/// Driver backend for one device. Enables mock injection for testing.
pub trait InputBackend {
    fn poll(&mut self) -> Result<DeviceReading, TakeoverError>;
}

/// Opens driver backends by kind.
pub trait DeviceProvider {
    /// Fails with [`TakeoverError::DeviceUnavailable`] when the hardware is
    /// missing.
    fn open(
        &self,
        kind: DeviceKind,
        mode: KeyboardMode,
    ) -> Result<Box<dyn InputBackend>, TakeoverError>;
}

impl<T: DeviceProvider + ?Sized> DeviceProvider for &T {
    fn open(
        &self,
        kind: DeviceKind,
        mode: KeyboardMode,
    ) -> Result<Box<dyn InputBackend>, TakeoverError> {
        (**self).open(kind, mode)
    }
}

// ─── Input Device ─────────────────────────────────────────────────

pub struct InputDevice {
    kind: DeviceKind,
    mode: KeyboardMode,
    backend: Box<dyn InputBackend>,
    last: DeviceReading,
    /// `last` was polled this tick and not yet consumed.
    fresh: bool,
    toggle_held: bool,
}

impl fmt::Debug for InputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputDevice")
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl InputDevice {
    /// Open exactly `kind`; no fallback.
    pub fn open(
        kind: DeviceKind,
        mode: KeyboardMode,
        provider: &dyn DeviceProvider,
    ) -> Result<Self, TakeoverError> {
        let backend = provider.open(kind, mode)?;
        Ok(Self::with_backend(kind, mode, backend))
    }

    pub fn with_backend(
        kind: DeviceKind,
        mode: KeyboardMode,
        backend: Box<dyn InputBackend>,
    ) -> Self {
        Self {
            kind,
            mode,
            backend,
            last: DeviceReading::neutral(kind),
            fresh: false,
            toggle_held: false,
        }
    }

    /// Construct by controller name.
    ///
    /// Unknown names are fatal. Missing gamepad or wheel hardware falls back
    /// to the keyboard with a warning.
    pub fn from_name(
        name: &str,
        mode: KeyboardMode,
        provider: &dyn DeviceProvider,
    ) -> Result<Self, TakeoverError> {
        let kind: DeviceKind = name.parse()?;
        match Self::open(kind, mode, provider) {
            Err(TakeoverError::DeviceUnavailable { device, reason })
                if kind != DeviceKind::Keyboard =>
            {
                tracing::warn!(
                    device = %device,
                    reason = %reason,
                    "failed to load joystick or steering wheel, falling back to keyboard"
                );
                Self::open(DeviceKind::Keyboard, mode, provider)
            }
            other => other,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn mode(&self) -> KeyboardMode {
        self.mode
    }

    /// Intent signals from the most recent reading.
    pub fn intent_flags(&self) -> IntentFlags {
        self.last.intent
    }

    fn poll(&mut self) {
        let reading = match self.backend.poll() {
            Ok(r) if r.intent.kind() == self.kind => r,
            Ok(r) => {
                tracing::warn!(
                    device = %self.kind,
                    reported = %r.intent.kind(),
                    "reading reports foreign intent flags, ignoring them"
                );
                DeviceReading {
                    intent: IntentFlags::cleared(self.kind),
                    ..r
                }
            }
            Err(e) => {
                tracing::warn!(device = %self.kind, error = %e, "device poll failed, using neutral input");
                DeviceReading::neutral(self.kind)
            }
        };
        self.last = reading;
        self.fresh = true;
    }

    /// Poll auxiliary controls. Calls `on_toggle` once per toggle press.
    ///
    /// A host-bound keyboard never reports the toggle here; the host calls
    /// the policy directly instead.
    pub fn process_others(&mut self, on_toggle: impl FnOnce()) {
        self.poll();
        let reads_toggle = !(self.kind == DeviceKind::Keyboard && self.mode == KeyboardMode::HostBound);
        let pressed = self.last.toggle;
        let edge = pressed && !self.toggle_held;
        self.toggle_held = pressed;
        if reads_toggle && edge {
            on_toggle();
        }
    }

    /// Raw `[steering, throttle]` from the device for `agent_id`.
    pub fn process_input(&mut self, agent_id: &str) -> AgentAction {
        if !self.fresh {
            self.poll();
        }
        self.fresh = false;
        let action = AgentAction::from(self.last.axes);
        tracing::trace!(agent_id, device = %self.kind, action = %action, "device input");
        action
    }
}
