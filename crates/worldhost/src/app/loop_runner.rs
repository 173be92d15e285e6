use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, info, warn};
use worldsync::{
    Clock, EventPayload, HeadlessRenderer, MemoryStore, StoreEvent, StoreSubscription, SyncConfig,
    SystemClock, Timestamp, World, WorldServices,
};

use super::bootstrap::HostWiring;
use super::{CommandScriptRunner, HostConfig};

pub(crate) const HEARTBEAT_EVENT: &str = "heartbeat";

/// One connected client: its own registry fed by its own store watch.
pub(crate) struct ClientWorld {
    index: usize,
    world: World,
    subscription: StoreSubscription,
}

impl ClientWorld {
    /// Opens a watch on `store` and replays what is already there: scripts
    /// first, actor definitions in priority order, then placements and
    /// waypoints.
    pub(crate) fn connect(
        index: usize,
        store: &MemoryStore,
        config: SyncConfig,
        clock: impl Clock + 'static,
    ) -> Self {
        let services = WorldServices::new(
            store.clone(),
            HeadlessRenderer::default(),
            CommandScriptRunner::default(),
            clock,
        );
        let mut world = World::new(config, services);
        let subscription = store.subscribe();

        let mut definitions = Vec::new();
        let mut deferred = Vec::new();
        for event in subscription.drain() {
            match event {
                StoreEvent::ActorChanged(record) if record.id.is_some() => {
                    definitions.push(record)
                }
                StoreEvent::ScriptChanged(script) => {
                    world.apply_store_event(StoreEvent::ScriptChanged(script))
                }
                other => deferred.push(other),
            }
        }
        let loaded = world.load_definitions(definitions);
        let replayed = deferred.len();
        for event in deferred {
            world.apply_store_event(event);
        }
        info!(client = index, actors = loaded, replayed, "client_connected");

        Self {
            index,
            world,
            subscription,
        }
    }

    /// Applies every store change that arrived since the last pump.
    pub(crate) fn pump(&mut self) -> usize {
        let events = self.subscription.drain();
        let count = events.len();
        for event in events {
            self.world.apply_store_event(event);
        }
        if count > 0 {
            debug!(client = self.index, events = count, "client_pumped");
        }
        count
    }

    pub(crate) fn world(&self) -> &World {
        &self.world
    }
}

/// Fixed-step driver for every client. Client 0 broadcasts the heartbeat.
pub(crate) struct Simulation<C> {
    clients: Vec<ClientWorld>,
    clock: C,
    heartbeat_interval: Duration,
    next_heartbeat: Timestamp,
    heartbeats: u64,
    ticks: u64,
}

impl<C: Clock + Clone + 'static> Simulation<C> {
    pub(crate) fn new(store: &MemoryStore, config: &HostConfig, clock: C) -> Self {
        let clients = (0..config.client_count.max(1))
            .map(|index| ClientWorld::connect(index, store, config.sync.clone(), clock.clone()))
            .collect();
        let next_heartbeat = clock.now();
        Self {
            clients,
            clock,
            heartbeat_interval: config.heartbeat_interval,
            next_heartbeat,
            heartbeats: 0,
            ticks: 0,
        }
    }

    pub(crate) fn step(&mut self) {
        for client in &mut self.clients {
            client.pump();
        }

        let now = self.clock.now();
        if now >= self.next_heartbeat {
            self.heartbeats += 1;
            if let Some(driver) = self.clients.first_mut() {
                let payload = EventPayload::broadcast().with("tick", json!(self.heartbeats));
                driver.world.broadcast_event(HEARTBEAT_EVENT, payload);
            }
            self.next_heartbeat = now.saturating_add(self.heartbeat_interval);
        }

        for client in &mut self.clients {
            client.world.tick();
        }
        self.ticks += 1;
    }

    pub(crate) fn clients(&self) -> &[ClientWorld] {
        &self.clients
    }

    pub(crate) fn log_metrics(&self) {
        for client in &self.clients {
            let metrics = client.world.metrics_snapshot();
            info!(
                client = client.index,
                ticks = self.ticks,
                actors = metrics.actors,
                active_tweens = metrics.active_tweens,
                placements_applied = metrics.placements_applied,
                placements_buffered = metrics.placements_buffered,
                waypoints_applied = metrics.waypoints_applied,
                waypoints_stale = metrics.waypoints_stale,
                events_dispatched = metrics.events_dispatched,
                events_honored = metrics.events_honored,
                store_writes_failed = metrics.store_writes_failed,
                scripts_failed = metrics.scripts_failed,
                "sync_metrics"
            );
        }
    }

    /// Saves whatever is still dirty on every client. Returns how many
    /// actors could not be saved.
    pub(crate) fn shutdown(&mut self) -> usize {
        let mut failed = 0;
        for client in &mut self.clients {
            let report = client.world.flush_all();
            failed += report.failed;
            info!(
                client = client.index,
                saved = report.saved,
                failed = report.failed,
                "client_flushed"
            );
        }
        failed
    }
}

pub(crate) fn run(wiring: HostWiring) -> ExitCode {
    let HostWiring { config, store } = wiring;
    let fixed_dt = config.fixed_dt();
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let metrics_log_interval =
        normalize_non_zero_duration(config.metrics_log_interval, Duration::from_secs(1));

    let mut simulation = Simulation::new(&store, &config, SystemClock);
    info!(
        target_tps = config.target_tps,
        clients = config.client_count,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        heartbeat_ms = config.heartbeat_interval.as_millis() as u64,
        run_ms = config.run_duration.map(|limit| limit.as_millis() as u64),
        "loop_config"
    );

    let started = Instant::now();
    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = Instant::now();
    let mut last_metrics_log = Instant::now();
    loop {
        if config
            .run_duration
            .is_some_and(|limit| started.elapsed() >= limit)
        {
            info!(reason = "run_duration_elapsed", "shutdown_requested");
            break;
        }

        let now = Instant::now();
        let frame_dt = clamp_frame_delta(now.duration_since(last_frame_instant), max_frame_delta);
        last_frame_instant = now;
        accumulator = accumulator.saturating_add(frame_dt);

        let plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
        accumulator = plan.remaining_accumulator;
        if !plan.dropped_backlog.is_zero() {
            warn!(
                dropped_backlog_ms = plan.dropped_backlog.as_millis() as u64,
                ticks_run = plan.ticks_to_run,
                "sim_backlog_dropped"
            );
        }
        for _ in 0..plan.ticks_to_run {
            simulation.step();
        }

        if last_metrics_log.elapsed() >= metrics_log_interval {
            simulation.log_metrics();
            last_metrics_log = Instant::now();
        }
        thread::sleep(fixed_dt.saturating_sub(accumulator));
    }

    let failed = simulation.shutdown();
    simulation.log_metrics();
    if let Some(path) = config.snapshot_path.as_deref() {
        if let Err(err) = store.write_snapshot(path) {
            error!(error = %err, path = %path.display(), "snapshot_write_failed");
            return ExitCode::FAILURE;
        }
    }
    if failed > 0 {
        warn!(failed, "shutdown_left_unsaved_actors");
    }
    ExitCode::SUCCESS
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    let dropped_backlog = if accumulator >= fixed_dt {
        std::mem::take(&mut accumulator)
    } else {
        Duration::ZERO
    };
    StepPlan {
        ticks_to_run,
        remaining_accumulator: accumulator,
        dropped_backlog,
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use worldsync::{ActorId, ManualClock, Vec3};

    use super::super::bootstrap::build_with_config;
    use super::*;

    fn seeded_store() -> MemoryStore {
        build_with_config(HostConfig::default())
            .expect("seeded store")
            .store
    }

    fn quiet_config() -> HostConfig {
        HostConfig {
            heartbeat_interval: Duration::from_secs(60),
            ..HostConfig::default()
        }
    }

    fn beacon_position(client: &ClientWorld) -> Vec3 {
        client
            .world()
            .actor(&ActorId::from("beacon"))
            .expect("beacon")
            .position()
    }

    #[test]
    fn clamp_frame_delta_caps_large_frame() {
        let max_frame_delta = Duration::from_millis(250);
        let raw_frame_dt = Duration::from_millis(600);

        assert_eq!(
            clamp_frame_delta(raw_frame_dt, max_frame_delta),
            max_frame_delta
        );
    }

    #[test]
    fn plan_sim_steps_runs_expected_ticks_without_drop() {
        let fixed_dt = Duration::from_millis(16);
        let result = plan_sim_steps(Duration::from_millis(48), fixed_dt, 5);

        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::ZERO);
    }

    #[test]
    fn plan_sim_steps_drops_backlog_when_tick_cap_hit() {
        let fixed_dt = Duration::from_millis(16);
        let result = plan_sim_steps(Duration::from_millis(120), fixed_dt, 3);

        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::from_millis(72));
    }

    #[test]
    fn zero_durations_fall_back() {
        let fallback = Duration::from_secs(1);
        assert_eq!(normalize_non_zero_duration(Duration::ZERO, fallback), fallback);
        assert_eq!(
            normalize_non_zero_duration(Duration::from_millis(5), fallback),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn every_client_replays_the_seeded_store() {
        let store = seeded_store();
        let clock = ManualClock::new(Timestamp(10_000));
        let simulation = Simulation::new(&store, &quiet_config(), clock);

        assert_eq!(simulation.clients().len(), 2);
        for client in simulation.clients() {
            let world = client.world();
            assert_eq!(world.len(), 3);
            assert_eq!(world.pending_placement_count(), 0);
            assert_eq!(beacon_position(client), Vec3::new(0.0, 1.0, 0.0));
            let lamp = world.actor(&ActorId::from("lamp")).expect("lamp");
            assert_eq!(lamp.parent(), Some(&ActorId::from("beacon")));
            assert!(world.scripts().by_path("scripts/bob").is_some());
        }
    }

    #[test]
    fn heartbeat_script_converges_on_the_other_client() {
        let store = seeded_store();
        let clock = ManualClock::new(Timestamp(10_000));
        let mut simulation = Simulation::new(&store, &quiet_config(), clock.clone());

        simulation.step();
        assert_eq!(
            beacon_position(&simulation.clients()[0]),
            Vec3::new(1.0, 1.0, 0.0)
        );
        assert_eq!(
            beacon_position(&simulation.clients()[1]),
            Vec3::new(0.0, 1.0, 0.0)
        );

        clock.advance(Duration::from_millis(100));
        simulation.step();
        let follower = &simulation.clients()[1];
        let beacon = follower
            .world()
            .actor(&ActorId::from("beacon"))
            .expect("beacon");
        assert_eq!(beacon.active_tweens(), 3);
        assert_eq!(beacon.state().get("beats"), Some(&Value::from(1)));

        clock.advance(Duration::from_millis(1_100));
        simulation.step();
        let settled = beacon_position(&simulation.clients()[1]);
        assert!(
            settled.distance(Vec3::new(1.0, 1.0, 0.0)) < 1e-4,
            "follower at {settled:?}"
        );
    }

    #[test]
    fn shutdown_reports_unsaved_actors() {
        let store = seeded_store();
        let clock = ManualClock::new(Timestamp(10_000));
        let mut simulation = Simulation::new(&store, &quiet_config(), clock);

        store.set_failure(Some("offline"));
        simulation.step();
        assert_eq!(simulation.shutdown(), 1);

        store.set_failure(None);
        assert_eq!(simulation.shutdown(), 0);
    }

    #[test]
    fn bounded_run_writes_the_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshot = dir.path().join("store.json");
        let config = HostConfig {
            run_duration: Some(Duration::from_millis(50)),
            snapshot_path: Some(snapshot.clone()),
            ..HostConfig::default()
        };
        let wiring = build_with_config(config).expect("wiring");

        run(wiring);
        let restored = MemoryStore::load_snapshot(&snapshot).expect("snapshot");
        assert_eq!(restored.actor_count(), 3);
    }
}
