//! Battery-level publication point for the service layer.
//!
//! The wireless transport itself lives outside this firmware; whatever
//! service exposes the level subscribes here. `SharedLevel` is the static
//! the subscriber reads, and [`LevelPublisher`] is the pipeline-facing sink
//! that reports `NotConnected` until a subscriber attaches.

#![allow(dead_code)]

use core::convert::Infallible;

use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use monitor_core::pipeline::{LevelSink, SinkError};

/// Marker stored while no measurement has been published yet.
pub const LEVEL_UNKNOWN: u8 = 0xFF;

/// Latest battery level shared between the monitor task and the service
/// layer.
pub struct SharedLevel {
    level: AtomicU8,
    active: AtomicBool,
}

impl SharedLevel {
    /// Creates an unattached publication point with no reading.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            level: AtomicU8::new(LEVEL_UNKNOWN),
            active: AtomicBool::new(false),
        }
    }

    /// Marks a subscriber as attached; updates flow from the next cycle on.
    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Marks the subscriber as detached.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Returns `true` while a subscriber is attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns the most recently published level, if any.
    #[must_use]
    pub fn level(&self) -> Option<u8> {
        match self.level.load(Ordering::Acquire) {
            LEVEL_UNKNOWN => None,
            value => Some(value),
        }
    }
}

impl Default for SharedLevel {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline-facing handle over a [`SharedLevel`].
pub struct LevelPublisher<'a> {
    shared: &'a SharedLevel,
}

impl<'a> LevelPublisher<'a> {
    /// Creates a publisher over the shared publication point.
    #[must_use]
    pub const fn new(shared: &'a SharedLevel) -> Self {
        Self { shared }
    }
}

impl LevelSink for LevelPublisher<'_> {
    type Error = Infallible;

    fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    fn update(&mut self, level_percent: u8) -> Result<(), SinkError<Self::Error>> {
        if !self.shared.is_active() {
            return Err(SinkError::NotConnected);
        }
        self.shared.level.store(level_percent, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_are_rejected_until_a_subscriber_attaches() {
        let shared = SharedLevel::new();
        let mut publisher = LevelPublisher::new(&shared);

        assert!(!publisher.is_active());
        assert_eq!(
            publisher.update(55),
            Err(SinkError::NotConnected)
        );
        assert_eq!(shared.level(), None);

        shared.activate();
        publisher.update(55).expect("update");
        assert_eq!(shared.level(), Some(55));

        shared.deactivate();
        assert!(!publisher.is_active());
    }
}
