//! Scenario runner - executes reconciliation scenarios on a paused clock.

use crate::scenarios::ScenarioId;
use crate::world::SimWorld;

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sensorsim_core::testing::sim_definition;
use sensorsim_core::{Backoff, SensorConfig, SyncPhase, STOP_GRACE};
use sensorsim_env::{ChangeAction, ConfigChangeEvent, Measurement, SimulatorContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Virtual seconds the scenario spanned
    pub virtual_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioMetrics {
    /// Measurements accepted by the archive
    pub archived: u64,

    /// Measurements accepted by the stream
    pub streamed: u64,

    pub events_applied: u64,
    pub events_dropped: u64,
    pub catalog_attempts: u64,
    pub subscriptions: u64,
}

impl ScenarioMetrics {
    fn collect(world: &SimWorld) -> Self {
        let stats = world.stats();
        Self {
            archived: world.archive.count() as u64,
            streamed: world.stream.count() as u64,
            events_applied: stats.events_applied(),
            events_dropped: stats.events_dropped(),
            catalog_attempts: stats.catalog_attempts(),
            subscriptions: stats.subscriptions(),
        }
    }
}

type Outcome = Result<ScenarioMetrics, String>;

/// Fails the scenario with a formatted reason unless `cond` holds.
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(format!($($arg)+));
        }
    };
}

/// Runs reconciliation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build();
        let runtime = match runtime {
            Ok(runtime) => runtime,
            Err(e) => return self.result(scenario, Err(format!("runtime: {}", e)), 0.0),
        };

        let seed = self.seed;
        let (outcome, virtual_secs) = runtime.block_on(async move {
            let started = tokio::time::Instant::now();
            let outcome = match scenario {
                ScenarioId::InitialSync => run_initial_sync(seed).await,
                ScenarioId::DisableViaEvent => run_disable_via_event(seed).await,
                ScenarioId::DeleteUnknown => run_delete_unknown(seed).await,
                ScenarioId::RemoveMidDelivery => run_remove_mid_delivery(seed).await,
                ScenarioId::CatalogOutage => run_catalog_outage(seed).await,
                ScenarioId::StreamFlap => run_stream_flap(seed).await,
                ScenarioId::UpsertStorm => run_upsert_storm(seed).await,
                ScenarioId::Shutdown => run_shutdown(seed).await,
            };
            (outcome, started.elapsed().as_secs_f64())
        });

        self.result(scenario, outcome, virtual_secs)
    }

    fn result(&self, scenario: ScenarioId, outcome: Outcome, virtual_secs: f64) -> ScenarioResult {
        let (passed, failure_reason, metrics) = match outcome {
            Ok(metrics) => (true, None, metrics),
            Err(reason) => (false, Some(reason), ScenarioMetrics::default()),
        };
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            virtual_secs,
            failure_reason,
            metrics,
        }
    }
}

/// Seeded value range `[min, max]` with a width of at least one unit.
fn seeded_range(rng: &mut ChaCha8Rng) -> (f64, f64) {
    let min = rng.gen_range(-50..50) as f64;
    let width = rng.gen_range(1..200) as f64;
    (min, min + width)
}

/// True when `value` lies on the two-decimal grid.
fn is_cents(value: f64) -> bool {
    ((value * 100.0).round() - value * 100.0).abs() < 1e-6
}

/// Stream measurements for one sensor whose timestamp lies in `[from, from + span]`.
fn count_between(measurements: &[Measurement], from: DateTime<Utc>, span: Duration) -> usize {
    let until = from + chrono::Duration::milliseconds(span.as_millis() as i64);
    measurements
        .iter()
        .filter(|m| m.timestamp >= from && m.timestamp <= until)
        .count()
}

/// Smallest spacing between consecutive timestamps.
fn min_gap(measurements: &[Measurement]) -> Option<chrono::Duration> {
    measurements
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .min()
}

/// The delays a fresh backoff schedule produces for `failures` failures.
fn expected_gaps(failures: usize) -> Vec<u64> {
    let mut backoff = Backoff::new();
    (0..failures).map(|_| backoff.next_delay().as_secs()).collect()
}

fn gaps(times: &[tokio::time::Instant]) -> Vec<u64> {
    times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect()
}

/// DST-001: Snapshot [A enabled, B disabled] starts exactly A.
async fn run_initial_sync(seed: u64) -> Outcome {
    info!("DST-001: InitialSync - snapshot filtering");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (min, max) = seeded_range(&mut rng);

    let a = sim_definition("A", min, max, 1000);
    let mut b = sim_definition("B", 0.0, 10.0, 1000);
    b.enabled = false;

    let mut world = SimWorld::new(seed, vec![a, b]);
    world.start();
    world.wait_for_phase(SyncPhase::Streaming).await?;

    ensure!(world.registry.contains("A"), "A not running after initial sync");
    ensure!(!world.registry.contains("B"), "disabled B is running");
    ensure!(world.registry.len() == 1, "expected 1 handle, found {}", world.registry.len());

    tokio::time::sleep(Duration::from_millis(3500)).await;

    let readings = world.streamed("A");
    ensure!(readings.len() == 4, "expected 4 readings in 3.5s, got {}", readings.len());
    ensure!(world.archive.count_for("A") == 4, "archive missed readings");
    ensure!(world.stream.count_for("B") == 0, "B produced readings");
    for m in &readings {
        ensure!(
            (min..=max).contains(&m.value) && is_cents(m.value),
            "reading {} outside [{}, {}] or not two-decimal",
            m.value,
            min,
            max
        );
    }
    let gap = min_gap(&readings).unwrap_or_else(chrono::Duration::zero);
    ensure!(
        gap >= chrono::Duration::milliseconds(999),
        "readings not spaced by the interval (gap {}ms)",
        gap.num_milliseconds()
    );

    world.shutdown().await?;
    Ok(ScenarioMetrics::collect(&world))
}

/// DST-002: An upsert with enabled=false removes a running sensor.
async fn run_disable_via_event(seed: u64) -> Outcome {
    info!("DST-002: DisableViaEvent - disable through the change stream");
    let mut world = SimWorld::new(seed, vec![sim_definition("A", 0.0, 10.0, 1000)]);
    world.start();
    world.wait_for_phase(SyncPhase::Streaming).await?;
    ensure!(world.registry.contains("A"), "A not running after initial sync");

    let mut disabled = sim_definition("A", 0.0, 10.0, 1000);
    disabled.enabled = false;
    world.events.publish_upsert(disabled);

    world
        .wait_until("A to stop", |w| !w.registry.contains("A"))
        .await?;
    tokio::time::sleep(STOP_GRACE).await;

    let before = world.stream.count_for("A");
    tokio::time::sleep(Duration::from_secs(5)).await;
    ensure!(
        world.stream.count_for("A") == before,
        "disabled A kept producing readings"
    );
    ensure!(world.stats().events_applied() == 1, "event was not applied");

    world.shutdown().await?;
    Ok(ScenarioMetrics::collect(&world))
}

/// DST-003: Deleting an identity that never ran changes nothing.
async fn run_delete_unknown(seed: u64) -> Outcome {
    info!("DST-003: DeleteUnknown - silent no-op");
    let mut world = SimWorld::new(seed, vec![]);
    world.start();
    world.wait_for_phase(SyncPhase::Streaming).await?;

    world.events.publish_delete("A");
    tokio::time::sleep(Duration::from_millis(100)).await;

    ensure!(world.registry.is_empty(), "delete of unknown id created a handle");
    ensure!(world.stats().events_applied() == 1, "delete was not applied");
    ensure!(world.stats().events_dropped() == 0, "delete was treated as malformed");
    ensure!(world.phase() == SyncPhase::Streaming, "stream left STREAMING");

    // The stream is still live afterwards
    world.events.publish_upsert(sim_definition("A", 0.0, 1.0, 1000));
    world.wait_until("A to start", |w| w.registry.contains("A")).await?;

    world.shutdown().await?;
    Ok(ScenarioMetrics::collect(&world))
}

/// DST-004: Remove while a delivery is stalled, racing a late upsert.
async fn run_remove_mid_delivery(seed: u64) -> Outcome {
    info!("DST-004: RemoveMidDelivery - grace-bounded stop");
    let mut world = SimWorld::new(seed, vec![sim_definition("A", 0.0, 10.0, 1000)]);
    world.archive.set_latency(Duration::from_secs(5));
    world.start();
    world.wait_for_phase(SyncPhase::Streaming).await?;

    tokio::time::sleep(Duration::from_millis(10)).await;
    ensure!(world.archive.in_flight() == 1, "first delivery not in flight");

    let removed_at = tokio::time::Instant::now();
    world.events.publish_delete("A");
    tokio::time::sleep(Duration::from_millis(100)).await;
    ensure!(
        !world.registry.contains("A"),
        "A still listed while its generator drains"
    );

    // An upsert arriving during the grace period waits its turn
    world.archive.set_latency(Duration::ZERO);
    world.events.publish_upsert(sim_definition("A", 0.0, 10.0, 1000));
    world.wait_until("A to restart", |w| w.registry.contains("A")).await?;
    let restarted = removed_at.elapsed();
    ensure!(
        restarted >= STOP_GRACE && restarted < STOP_GRACE + Duration::from_millis(500),
        "restart after {:?}, expected one grace period",
        restarted
    );
    ensure!(world.registry.len() == 1, "expected 1 handle, found {}", world.registry.len());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let readings = world.streamed("A");
    let gap = min_gap(&readings).unwrap_or_else(chrono::Duration::zero);
    ensure!(
        gap >= chrono::Duration::seconds(1),
        "two generators for A overlapped (gap {}ms)",
        gap.num_milliseconds()
    );
    ensure!(readings.len() >= 10, "restarted A produced {} readings", readings.len());

    world.shutdown().await?;
    Ok(ScenarioMetrics::collect(&world))
}

/// DST-005: Catalog unavailable for a seeded number of attempts.
async fn run_catalog_outage(seed: u64) -> Outcome {
    info!("DST-005: CatalogOutage - initial sync backoff");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let failures = rng.gen_range(1..=7usize);

    let mut world = SimWorld::new(seed, vec![sim_definition("A", 0.0, 1.0, 1000)]);
    world.catalog.fail_next(failures as u32);
    world.start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    ensure!(world.phase() == SyncPhase::InitialSync, "left INITIAL_SYNC while catalog down");
    ensure!(world.registry.is_empty(), "sensor started without a snapshot");

    world.wait_for_phase(SyncPhase::Streaming).await?;
    let observed = gaps(&world.catalog.calls());
    ensure!(
        observed == expected_gaps(failures),
        "retry gaps {:?}, expected {:?}",
        observed,
        expected_gaps(failures)
    );
    ensure!(
        world.stats().catalog_attempts() == failures as u64 + 1,
        "catalog attempts {}",
        world.stats().catalog_attempts()
    );
    ensure!(world.registry.contains("A"), "A not running after recovery");
    debug!(failures, "catalog recovered");

    world.shutdown().await?;
    Ok(ScenarioMetrics::collect(&world))
}

/// DST-006: Topic not ready, junk events, a broken subscription.
async fn run_stream_flap(seed: u64) -> Outcome {
    info!("DST-006: StreamFlap - streaming backoff and recovery");
    let mut world = SimWorld::new(seed, vec![sim_definition("A", 0.0, 1.0, 1000)]);
    world.events.fail_next_subscribes(3);
    world.start();

    world.wait_until("first subscription", |w| w.events.is_subscribed()).await?;
    ensure!(
        gaps(&world.events.attempts()) == vec![2, 4, 8],
        "subscribe gaps {:?}",
        gaps(&world.events.attempts())
    );

    world.events.publish_raw(b"{not json".to_vec());
    world.events.publish(&ConfigChangeEvent {
        action: ChangeAction::Upserted,
        sensor_id: "X".into(),
        timestamp: Utc::now(),
        payload: None,
    });
    world.events.publish(&ConfigChangeEvent {
        action: ChangeAction::Upserted,
        sensor_id: "Y".into(),
        timestamp: Utc::now(),
        payload: Some(sim_definition("Z", 0.0, 1.0, 1000)),
    });
    world.events.publish_upsert(sim_definition("B", 0.0, 1.0, 1000));
    tokio::time::sleep(Duration::from_millis(100)).await;

    ensure!(world.stats().events_dropped() == 3, "dropped {}", world.stats().events_dropped());
    ensure!(world.registry.contains("B"), "B not started");
    ensure!(
        !world.registry.contains("X") && !world.registry.contains("Y") && !world.registry.contains("Z"),
        "malformed event started a sensor"
    );

    world.events.inject_stream_error();
    tokio::time::sleep(Duration::from_millis(10)).await;
    ensure!(world.phase() == SyncPhase::Backoff, "expected BACKOFF after stream error");

    // Published while disconnected; replayed on resubscribe
    world.events.publish_delete("A");
    world.wait_until("resubscription", |w| w.events.is_subscribed()).await?;
    world.wait_until("A to stop", |w| !w.registry.contains("A")).await?;

    let observed = gaps(&world.events.attempts());
    ensure!(observed == vec![2, 4, 8, 2], "backoff did not reset: {:?}", observed);
    ensure!(
        world.registry.len() == 1 && world.registry.contains("B"),
        "final state {:?}",
        world.registry.list()
    );
    ensure!(world.stats().events_applied() == 2, "applied {}", world.stats().events_applied());
    ensure!(world.stats().subscriptions() == 2, "subscriptions {}", world.stats().subscriptions());

    world.shutdown().await?;
    Ok(ScenarioMetrics::collect(&world))
}

/// DST-007: Seeded concurrent upserts and removes on a handful of ids.
async fn run_upsert_storm(seed: u64) -> Outcome {
    info!("DST-007: UpsertStorm - one generator per identity");
    const IDS: [&str; 3] = ["S0", "S1", "S2"];
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut world = SimWorld::new(seed, vec![]);
    world.archive.set_latency(Duration::from_millis(300));
    world.start();
    world.wait_for_phase(SyncPhase::Streaming).await?;

    let mut tasks = Vec::new();
    for _ in 0..60 {
        let id = IDS[rng.gen_range(0..IDS.len())];
        let delay = Duration::from_millis(rng.gen_range(0..2000));
        let op = rng.gen_range(0..4u8);
        let (min, max) = seeded_range(&mut rng);
        let interval = Duration::from_millis(rng.gen_range(100..=1500));
        let config = SensorConfig::new(id, "temperature", interval, min, max).map_err(|e| e.to_string())?;

        let registry = Arc::clone(&world.registry);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match op {
                0 => registry.remove(id).await,
                1 => registry.upsert(config.with_enabled(false)).await,
                _ => registry.upsert(config).await,
            }
        }));
    }
    for task in tasks {
        task.await.map_err(|e| format!("storm task failed: {}", e))?;
    }
    ensure!(world.registry.len() <= IDS.len(), "{} handles for {} ids", world.registry.len(), IDS.len());

    // With every id removed nothing may keep ticking
    for id in IDS {
        world.registry.remove(id).await;
    }
    tokio::time::sleep(STOP_GRACE).await;
    let quiet = world.stream.count();
    tokio::time::sleep(Duration::from_secs(5)).await;
    ensure!(world.stream.count() == quiet, "orphaned generator still producing");

    world.archive.set_latency(Duration::ZERO);
    let mut started_at = Vec::new();
    for id in IDS {
        let config = SensorConfig::new(id, "temperature", Duration::from_secs(1), 0.0, 1.0)
            .map_err(|e| e.to_string())?;
        world.registry.upsert(config).await;
        started_at.push((id, world.context.now_utc()));
    }
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    for (id, from) in started_at {
        let ticks = count_between(&world.streamed(id), from, Duration::from_millis(10_500));
        ensure!(ticks == 11, "{} delivered {} readings in 10.5s, expected 11", id, ticks);
    }

    world.shutdown().await?;
    Ok(ScenarioMetrics::collect(&world))
}

/// DST-008: Shutdown with deliveries stalled past the grace period.
async fn run_shutdown(seed: u64) -> Outcome {
    info!("DST-008: Shutdown - broadcast cancellation");
    let definitions = (0..5)
        .map(|i| sim_definition(&format!("S{}", i), 0.0, 100.0, 1000))
        .collect();
    let mut world = SimWorld::new(seed, definitions);
    world.archive.set_latency(Duration::from_secs(5));
    world.start();
    world.wait_for_phase(SyncPhase::Streaming).await?;
    tokio::time::sleep(Duration::from_millis(2300)).await;
    ensure!(world.registry.len() == 5, "expected 5 handles, found {}", world.registry.len());

    world.stop_coordinator().await?;
    ensure!(world.phase() == SyncPhase::Stopped, "coordinator not STOPPED");

    let started = tokio::time::Instant::now();
    world.registry.shutdown().await;
    let waited = started.elapsed();
    ensure!(
        waited >= STOP_GRACE && waited < STOP_GRACE + Duration::from_millis(100),
        "shutdown took {:?}",
        waited
    );
    ensure!(world.registry.is_empty(), "handles left after shutdown");

    let streamed = world.stream.count();
    let archived = world.archive.count();
    tokio::time::sleep(Duration::from_secs(10)).await;
    ensure!(world.stream.count() == streamed, "generator ticked after shutdown");
    ensure!(
        world.archive.count() <= archived + 5,
        "more archive deliveries than stalled ticks"
    );

    let late = SensorConfig::new("late", "temperature", Duration::from_secs(1), 0.0, 1.0)
        .map_err(|e| e.to_string())?;
    world.registry.upsert(late).await;
    ensure!(world.registry.is_empty(), "upsert after shutdown started a generator");

    Ok(ScenarioMetrics::collect(&world))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_sync_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::InitialSync);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.catalog_attempts, 1);
        assert!(result.metrics.streamed >= 4);
    }

    #[test]
    fn test_remove_mid_delivery_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::RemoveMidDelivery);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.virtual_secs > STOP_GRACE.as_secs_f64());
    }

    #[test]
    fn test_stream_flap_scenario() {
        let result = ScenarioRunner::new(7).run(ScenarioId::StreamFlap);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.events_dropped, 3);
        assert_eq!(result.metrics.subscriptions, 2);
    }

    #[test]
    fn test_upsert_storm_deterministic() {
        // Same seed should give the same delivery totals
        let result1 = ScenarioRunner::new(42).run(ScenarioId::UpsertStorm);
        let result2 = ScenarioRunner::new(42).run(ScenarioId::UpsertStorm);

        assert!(result1.passed, "{:?}", result1.failure_reason);
        assert_eq!(result1.metrics, result2.metrics);
    }

    #[test]
    fn test_expected_gaps() {
        assert_eq!(expected_gaps(6), vec![2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_is_cents() {
        assert!(is_cents(12.34));
        assert!(!is_cents(12.345));
    }
}
