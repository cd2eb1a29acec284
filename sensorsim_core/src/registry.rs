//! Runtime Registry - the table of running generators.
//!
//! The registry owns every generator's lifecycle. Mutations for one sensor
//! identity are linearized through a per-identity gate; mutations for
//! different identities never wait on each other.
//!
//! # Locking
//!
//! ```text
//! table: std Mutex<HashMap<id, Slot>>   (held only for map edits, never across .await)
//!            │
//!            └── Slot { gate: Arc<tokio Mutex<()>>, handle: Option<RunningHandle> }
//!                         │
//!                         └── held across the whole stop → start sequence for `id`
//! ```
//!
//! A slot with no handle and no waiters is pruned when the last operation
//! holding its gate lets go, even if that operation was dropped while still
//! queued, so the table does not grow with every identity ever seen.

use crate::config::SensorConfig;
use crate::generator::{SensorGenerator, Sinks};
use sensorsim_env::SimulatorContext;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period a generator gets to observe cancellation before its entry
/// is dropped.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// The registry's record of one running generator.
struct RunningHandle {
    /// Config snapshot at start time
    config: SensorConfig,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningHandle {
    /// Cancels the generator and waits up to `grace` for it to exit.
    ///
    /// Returns false when the grace period elapsed first. The task is then
    /// left to finish on its own.
    async fn stop(mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        tokio::time::timeout(grace, &mut self.task).await.is_ok()
    }
}

struct Slot {
    gate: Arc<tokio::sync::Mutex<()>>,
    handle: Option<RunningHandle>,
}

impl Slot {
    fn new() -> Self {
        Self {
            gate: Arc::new(tokio::sync::Mutex::new(())),
            handle: None,
        }
    }
}

/// One operation's claim on an identity's gate. Dropping it, on completion
/// or cancellation, prunes the slot if it was left idle.
struct Lease<'a, Ctx: SimulatorContext> {
    registry: &'a RuntimeRegistry<Ctx>,
    sensor_id: &'a str,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<Ctx: SimulatorContext> Drop for Lease<'_, Ctx> {
    fn drop(&mut self) {
        self.registry.release(self.sensor_id, &self.gate);
    }
}

/// Authoritative in-memory table mapping sensor identity to its generator.
///
/// Constructed once at startup and shared by `Arc` between the coordinator
/// and the introspection surface.
pub struct RuntimeRegistry<Ctx: SimulatorContext> {
    table: Mutex<HashMap<String, Slot>>,
    context: Arc<Ctx>,
    sinks: Sinks,

    /// Parent of every handle's token; cancelled once by `shutdown()`
    root: CancellationToken,

    grace: Duration,
}

impl<Ctx: SimulatorContext> RuntimeRegistry<Ctx> {
    /// Creates an empty registry whose generators deliver to `sinks`.
    pub fn new(context: Arc<Ctx>, sinks: Sinks) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            context,
            sinks,
            root: CancellationToken::new(),
            grace: STOP_GRACE,
        }
    }

    /// Overrides the stop grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Creates an Arc-wrapped registry for sharing across tasks.
    pub fn shared(context: Arc<Ctx>, sinks: Sinks) -> Arc<Self> {
        Arc::new(Self::new(context, sinks))
    }

    /// Returns the environment context generators run against.
    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    /// Point-in-time snapshot of every running sensor's config.
    pub fn list(&self) -> Vec<SensorConfig> {
        self.table()
            .values()
            .filter_map(|slot| slot.handle.as_ref().map(|h| h.config.clone()))
            .collect()
    }

    /// Number of running generators.
    pub fn len(&self) -> usize {
        self.table().values().filter(|slot| slot.handle.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a generator is running for `sensor_id`.
    pub fn contains(&self, sensor_id: &str) -> bool {
        self.table()
            .get(sensor_id)
            .is_some_and(|slot| slot.handle.is_some())
    }

    /// Replaces whatever runs for `config.sensor_id` with a generator for
    /// `config`, or just stops it when the config is disabled.
    pub async fn upsert(&self, config: SensorConfig) {
        let sensor_id = config.sensor_id.clone();
        let lease = Lease {
            registry: self,
            sensor_id: &sensor_id,
            gate: self.gate_or_insert(&sensor_id),
        };
        let _serial = lease.gate.lock().await;

        self.stop_current(&sensor_id).await;

        if !config.enabled {
            info!(sensor_id = %sensor_id, "Sensor not started because enabled=false");
        } else {
            self.start(config);
        }
    }

    /// Stops and removes the generator for `sensor_id`, if any.
    ///
    /// Never fails: a generator that ignores cancellation past the grace
    /// period is dropped from the table anyway.
    pub async fn remove(&self, sensor_id: &str) {
        // An absent identity is a no-op and must not create a slot
        let Some(gate) = self.existing_gate(sensor_id) else {
            return;
        };
        let lease = Lease {
            registry: self,
            sensor_id,
            gate,
        };
        let _serial = lease.gate.lock().await;

        self.stop_current(sensor_id).await;
    }

    /// Broadcast cancellation of every generator, then one shared grace
    /// period for all of them to exit. Later upserts start nothing.
    pub async fn shutdown(&self) {
        let handles: Vec<RunningHandle> = {
            let mut table = self.table();
            self.root.cancel();
            table.values_mut().filter_map(|slot| slot.handle.take()).collect()
        };
        if handles.is_empty() {
            return;
        }

        let total = handles.len();
        let mut tasks: Vec<JoinHandle<()>> = handles.into_iter().map(|h| h.task).collect();
        let joined = tokio::time::timeout(self.grace, async {
            for task in tasks.iter_mut() {
                let _ = task.await;
            }
        })
        .await;

        match joined {
            Ok(()) => info!(stopped = total, "Registry shut down"),
            Err(_) => {
                let lingering = tasks.iter().filter(|t| !t.is_finished()).count();
                warn!(stopped = total - lingering, lingering, "Registry shutdown grace period elapsed");
            }
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate_or_insert(&self, sensor_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.table();
        let slot = table.entry(sensor_id.to_string()).or_insert_with(Slot::new);
        Arc::clone(&slot.gate)
    }

    fn existing_gate(&self, sensor_id: &str) -> Option<Arc<tokio::sync::Mutex<()>>> {
        self.table().get(sensor_id).map(|slot| Arc::clone(&slot.gate))
    }

    /// Takes the current handle out of the table and stops it.
    /// Caller holds the identity's gate.
    async fn stop_current(&self, sensor_id: &str) {
        let handle = self
            .table()
            .get_mut(sensor_id)
            .and_then(|slot| slot.handle.take());
        let Some(handle) = handle else { return };

        if handle.stop(self.grace).await {
            info!(sensor_id = %sensor_id, "Sensor stopped");
        } else {
            warn!(
                sensor_id = %sensor_id,
                grace_ms = self.grace.as_millis() as u64,
                "Sensor did not stop within grace period; entry dropped"
            );
        }
    }

    /// Spawns a generator and records its handle. Caller holds the gate.
    fn start(&self, config: SensorConfig) {
        let mut table = self.table();
        if self.root.is_cancelled() {
            warn!(sensor_id = %config.sensor_id, "Registry is shut down; sensor not started");
            return;
        }

        let cancel = self.root.child_token();
        let generator = SensorGenerator::new(config.clone(), Arc::clone(&self.context), self.sinks.clone());
        let task = tokio::spawn(generator.run(cancel.clone()));

        info!(
            sensor_id = %config.sensor_id,
            interval_ms = config.interval.as_millis() as u64,
            "Sensor started"
        );

        let slot = table.entry(config.sensor_id.clone()).or_insert_with(Slot::new);
        slot.handle = Some(RunningHandle { config, cancel, task });
    }

    /// Prunes the slot if it is empty and no other lease holds its gate.
    /// New leases only clone the gate under the table lock.
    fn release(&self, sensor_id: &str, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut table = self.table();
        let idle = table
            .get(sensor_id)
            .is_some_and(|slot| slot.handle.is_none() && Arc::strong_count(gate) == 2);
        if idle {
            table.remove(sensor_id);
        }
    }
}

impl<Ctx: SimulatorContext> Drop for RuntimeRegistry<Ctx> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
