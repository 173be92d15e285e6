use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

static METRICS_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_metrics_lock_poison_once(operation: &'static str) {
    if METRICS_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "sync metrics lock poisoned; recovered inner value");
    }
}

/// Running totals since the world was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    pub actors: usize,
    pub active_tweens: usize,
    pub placements_applied: u64,
    pub placements_buffered: u64,
    pub placements_ignored: u64,
    pub waypoints_applied: u64,
    pub waypoints_stale: u64,
    pub waypoints_unknown_target: u64,
    pub events_dispatched: u64,
    pub events_honored: u64,
    pub store_writes_failed: u64,
    pub scripts_failed: u64,
}

#[derive(Clone, Debug)]
pub struct MetricsHandle {
    snapshot: Arc<RwLock<SyncMetricsSnapshot>>,
}

impl Default for MetricsHandle {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(SyncMetricsSnapshot::default())),
        }
    }
}

impl MetricsHandle {
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        match self.snapshot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn_metrics_lock_poison_once("read");
                *poisoned.into_inner()
            }
        }
    }

    pub(crate) fn publish(&self, snapshot: SyncMetricsSnapshot) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => {
                warn_metrics_lock_poison_once("write");
                let mut guard = poisoned.into_inner();
                *guard = snapshot;
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MetricsAccumulator {
    totals: SyncMetricsSnapshot,
}

impl MetricsAccumulator {
    pub(crate) fn totals(&self) -> SyncMetricsSnapshot {
        self.totals
    }

    pub(crate) fn record_placement_applied(&mut self) {
        self.totals.placements_applied = self.totals.placements_applied.saturating_add(1);
    }

    pub(crate) fn record_placement_buffered(&mut self) {
        self.totals.placements_buffered = self.totals.placements_buffered.saturating_add(1);
    }

    pub(crate) fn record_placement_ignored(&mut self) {
        self.totals.placements_ignored = self.totals.placements_ignored.saturating_add(1);
    }

    pub(crate) fn record_waypoint_applied(&mut self) {
        self.totals.waypoints_applied = self.totals.waypoints_applied.saturating_add(1);
    }

    pub(crate) fn record_waypoint_stale(&mut self) {
        self.totals.waypoints_stale = self.totals.waypoints_stale.saturating_add(1);
    }

    pub(crate) fn record_waypoint_unknown_target(&mut self) {
        self.totals.waypoints_unknown_target =
            self.totals.waypoints_unknown_target.saturating_add(1);
    }

    pub(crate) fn record_event(&mut self, honored: usize) {
        self.totals.events_dispatched = self.totals.events_dispatched.saturating_add(1);
        self.totals.events_honored = self
            .totals
            .events_honored
            .saturating_add(u64::try_from(honored).unwrap_or(u64::MAX));
    }

    pub(crate) fn record_store_write_failed(&mut self) {
        self.totals.store_writes_failed = self.totals.store_writes_failed.saturating_add(1);
    }

    pub(crate) fn record_script_failed(&mut self) {
        self.totals.scripts_failed = self.totals.scripts_failed.saturating_add(1);
    }

    pub(crate) fn snapshot(&mut self, actors: usize, active_tweens: usize) -> SyncMetricsSnapshot {
        self.totals.actors = actors;
        self.totals.active_tweens = active_tweens;
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use std::sync::RwLock;
    use std::thread;

    use super::*;

    fn poison_lock(lock: &RwLock<SyncMetricsSnapshot>) {
        thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = lock.write().expect("write guard");
                    panic!("poison metrics lock");
                })
                .join();
        });
    }

    #[test]
    fn accumulator_counts_honored_deliveries() {
        let mut accumulator = MetricsAccumulator::default();
        accumulator.record_event(1);
        accumulator.record_event(0);
        accumulator.record_event(3);
        accumulator.record_waypoint_stale();

        let snapshot = accumulator.snapshot(4, 2);
        assert_eq!(snapshot.events_dispatched, 3);
        assert_eq!(snapshot.events_honored, 4);
        assert_eq!(snapshot.waypoints_stale, 1);
        assert_eq!(snapshot.actors, 4);
        assert_eq!(snapshot.active_tweens, 2);
    }

    #[test]
    fn snapshot_recovers_after_poison_without_panic() {
        let handle = MetricsHandle::default();
        poison_lock(handle.snapshot.as_ref());

        assert_eq!(handle.snapshot(), SyncMetricsSnapshot::default());
    }

    #[test]
    fn publish_recovers_after_poison_without_panic() {
        let handle = MetricsHandle::default();
        poison_lock(handle.snapshot.as_ref());

        let expected = SyncMetricsSnapshot {
            placements_applied: 3,
            waypoints_stale: 7,
            ..SyncMetricsSnapshot::default()
        };
        handle.publish(expected);

        assert_eq!(handle.snapshot(), expected);
    }
}
