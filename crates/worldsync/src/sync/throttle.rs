use std::time::Duration;

use crate::clock::Timestamp;
use crate::config::SyncConfig;

/// Trailing-edge debounce: fires once `quiet` has elapsed since the last call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce {
    quiet: Duration,
    deadline: Option<Timestamp>,
}

impl Debounce {
    pub const fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    pub fn call(&mut self, now: Timestamp) {
        self.deadline = Some(now.saturating_add(self.quiet));
    }

    /// True exactly once per burst, at the first poll at or after the deadline.
    pub fn poll(&mut self, now: Timestamp) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueWrites {
    pub placement: bool,
    pub clear_waypoints: bool,
}

impl DueWrites {
    pub fn any(self) -> bool {
        self.placement || self.clear_waypoints
    }
}

/// Per-actor pending persistence timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceSchedule {
    placement: Debounce,
    clear_waypoints: Debounce,
}

impl PersistenceSchedule {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            placement: Debounce::new(config.placement_quiet_period),
            clear_waypoints: Debounce::new(config.clear_quiet_period),
        }
    }

    /// Called on every local transform write.
    pub fn touch(&mut self, now: Timestamp) {
        self.placement.call(now);
        self.clear_waypoints.call(now);
    }

    pub fn poll(&mut self, now: Timestamp) -> DueWrites {
        DueWrites {
            placement: self.placement.poll(now),
            clear_waypoints: self.clear_waypoints.poll(now),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.placement.is_pending() || self.clear_waypoints.is_pending()
    }

    pub fn cancel(&mut self) {
        self.placement.cancel();
        self.clear_waypoints.cancel();
    }
}
