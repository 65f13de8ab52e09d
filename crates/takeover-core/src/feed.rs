//! Push-style device backend.
//!
//! The caller owns a [`SnapshotFeed`] and writes the current reading before
//! each tick; the device's backend reads it back on poll. Single-threaded by
//! construction (`Rc`), matching the one-`act`-per-tick model.

use std::cell::RefCell;
use std::rc::Rc;

use crate::device::{DeviceKind, DeviceProvider, DeviceReading, InputBackend, KeyboardMode};
use crate::error::TakeoverError;

#[derive(Debug, Clone, Default)]
enum FeedState {
    #[default]
    Idle,
    Reading(DeviceReading),
    Disconnected(String),
}

/// Shared handle to the current driver snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFeed {
    state: Rc<RefCell<FeedState>>,
}

impl SnapshotFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the reading for the next poll(s).
    pub fn set(&self, reading: DeviceReading) {
        *self.state.borrow_mut() = FeedState::Reading(reading);
    }

    /// Back to neutral input.
    pub fn clear(&self) {
        *self.state.borrow_mut() = FeedState::Idle;
    }

    /// Make subsequent polls fail until the next [`SnapshotFeed::set`].
    pub fn disconnect(&self, reason: impl Into<String>) {
        *self.state.borrow_mut() = FeedState::Disconnected(reason.into());
    }

    fn read(&self, kind: DeviceKind) -> Result<DeviceReading, TakeoverError> {
        match &*self.state.borrow() {
            FeedState::Idle => Ok(DeviceReading::neutral(kind)),
            FeedState::Reading(r) => Ok(*r),
            FeedState::Disconnected(reason) => Err(TakeoverError::DeviceUnavailable {
                device: kind,
                reason: reason.clone(),
            }),
        }
    }
}

/// Backend reading from a [`SnapshotFeed`].
#[derive(Debug)]
pub struct SnapshotBackend {
    kind: DeviceKind,
    feed: SnapshotFeed,
}

impl SnapshotBackend {
    pub fn new(kind: DeviceKind, feed: SnapshotFeed) -> Self {
        Self { kind, feed }
    }
}

impl InputBackend for SnapshotBackend {
    fn poll(&mut self) -> Result<DeviceReading, TakeoverError> {
        self.feed.read(self.kind)
    }
}

/// Provider handing out feed-backed devices for a fixed set of connected
/// hardware kinds.
#[derive(Debug, Clone)]
pub struct SnapshotProvider {
    connected: Vec<DeviceKind>,
    feed: SnapshotFeed,
}

impl SnapshotProvider {
    pub fn new(connected: impl IntoIterator<Item = DeviceKind>, feed: SnapshotFeed) -> Self {
        Self {
            connected: connected.into_iter().collect(),
            feed,
        }
    }

    /// Every device kind connected.
    pub fn all(feed: SnapshotFeed) -> Self {
        Self::new(DeviceKind::ALL, feed)
    }

    pub fn feed(&self) -> &SnapshotFeed {
        &self.feed
    }
}

impl DeviceProvider for SnapshotProvider {
    fn open(
        &self,
        kind: DeviceKind,
        _mode: KeyboardMode,
    ) -> Result<Box<dyn InputBackend>, TakeoverError> {
        if !self.connected.contains(&kind) {
            return Err(TakeoverError::DeviceUnavailable {
                device: kind,
                reason: "not connected".into(),
            });
        }
        Ok(Box::new(SnapshotBackend::new(kind, self.feed.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::IntentFlags;

    #[test]
    fn backend_sees_latest_reading() {
        let feed = SnapshotFeed::new();
        let mut backend = SnapshotBackend::new(DeviceKind::Keyboard, feed.clone());

        assert_eq!(
            backend.poll().expect("idle"),
            DeviceReading::neutral(DeviceKind::Keyboard)
        );

        let reading = DeviceReading {
            axes: [0.2, 0.4],
            intent: IntentFlags::Keyboard { takeover: true },
            toggle: false,
        };
        feed.set(reading);
        assert_eq!(backend.poll().expect("set"), reading);
        // Readings persist until replaced.
        assert_eq!(backend.poll().expect("set"), reading);

        feed.clear();
        assert_eq!(
            backend.poll().expect("cleared"),
            DeviceReading::neutral(DeviceKind::Keyboard)
        );
    }

    #[test]
    fn disconnected_feed_fails_poll() {
        let feed = SnapshotFeed::new();
        let mut backend = SnapshotBackend::new(DeviceKind::Gamepad, feed.clone());
        feed.disconnect("cable pulled");
        let err = backend.poll().expect_err("disconnected");
        assert!(matches!(
            err,
            TakeoverError::DeviceUnavailable { device: DeviceKind::Gamepad, ref reason }
                if reason == "cable pulled"
        ));
    }

    #[test]
    fn provider_rejects_unconnected_kinds() {
        let provider = SnapshotProvider::new([DeviceKind::Keyboard], SnapshotFeed::new());
        assert!(
            provider
                .open(DeviceKind::Keyboard, KeyboardMode::Direct)
                .is_ok()
        );
        assert!(matches!(
            provider.open(DeviceKind::SteeringWheel, KeyboardMode::Direct),
            Err(TakeoverError::DeviceUnavailable {
                device: DeviceKind::SteeringWheel,
                ..
            })
        ));
    }
}
