//! SimWorld - the simulation harness container.

use crate::events::SimEventSource;

use sensorsim_core::testing::{RecordingSink, ScriptedCatalog, SimContext};
use sensorsim_core::{RuntimeRegistry, Sinks, SyncCoordinator, SyncPhase, SyncStats};
use sensorsim_env::{Measurement, SensorDefinition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on any single wait inside a scenario.
pub const WAIT_LIMIT: Duration = Duration::from_secs(600);

/// Coordinator type every scenario runs.
pub type SimCoordinator = SyncCoordinator<SimContext, Arc<ScriptedCatalog>, Arc<SimEventSource>>;

/// The SimWorld - container for one reconciliation run.
///
/// Must be created inside a runtime built with `start_paused(true)`.
pub struct SimWorld {
    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Catalog snapshot source
    pub catalog: Arc<ScriptedCatalog>,

    /// Change-event topic
    pub events: Arc<SimEventSource>,

    /// Durable archive double
    pub archive: Arc<RecordingSink>,

    /// Real-time stream double
    pub stream: Arc<RecordingSink>,

    pub registry: Arc<RuntimeRegistry<SimContext>>,

    /// Fires the coordinator's shutdown
    pub shutdown: CancellationToken,

    stats: Arc<SyncStats>,
    phase: watch::Receiver<SyncPhase>,
    coordinator: Option<SimCoordinator>,
    task: Option<JoinHandle<()>>,
}

impl SimWorld {
    /// Creates a world whose catalog serves `definitions`.
    pub fn new(seed: u64, definitions: Vec<SensorDefinition>) -> Self {
        let context = SimContext::shared(seed);
        let catalog = ScriptedCatalog::shared(definitions);
        let events = SimEventSource::shared();
        let archive = RecordingSink::shared("archive");
        let stream = RecordingSink::shared("stream");

        let registry = RuntimeRegistry::shared(
            Arc::clone(&context),
            Sinks::new(archive.clone(), stream.clone()),
        );
        let coordinator = SyncCoordinator::new(Arc::clone(&registry), catalog.clone(), events.clone());
        let stats = coordinator.stats();
        let phase = coordinator.phase();

        Self {
            context,
            catalog,
            events,
            archive,
            stream,
            registry,
            shutdown: CancellationToken::new(),
            stats,
            phase,
            coordinator: Some(coordinator),
            task: None,
        }
    }

    /// Spawns the coordinator. Later calls do nothing.
    pub fn start(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            self.task = Some(tokio::spawn(coordinator.run(self.shutdown.clone())));
        }
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Current coordinator phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Waits until the coordinator reports `phase`.
    pub async fn wait_for_phase(&mut self, phase: SyncPhase) -> Result<(), String> {
        let waited = tokio::time::timeout(WAIT_LIMIT, self.phase.wait_for(|p| *p == phase)).await;
        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(format!("coordinator exited before reaching {:?}", phase)),
            Err(_) => Err(format!("coordinator never reached {:?}", phase)),
        }
    }

    /// Polls `condition` every 100ms of virtual time.
    pub async fn wait_until(&self, what: &str, condition: impl Fn(&Self) -> bool) -> Result<(), String> {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while !condition(self) {
            if tokio::time::Instant::now() >= deadline {
                return Err(format!("timed out waiting for {}", what));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    /// Stops the coordinator and waits for it to exit.
    pub async fn stop_coordinator(&mut self) -> Result<(), String> {
        self.shutdown.cancel();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(Duration::from_secs(1), task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("coordinator task failed: {}", e)),
            Err(_) => Err("coordinator ignored shutdown".to_string()),
        }
    }

    /// Full process shutdown: coordinator first, then every generator.
    pub async fn shutdown(&mut self) -> Result<(), String> {
        self.stop_coordinator().await?;
        self.registry.shutdown().await;
        Ok(())
    }

    /// Stream measurements for `sensor_id`, in delivery order.
    pub fn streamed(&self, sensor_id: &str) -> Vec<Measurement> {
        self.stream
            .measurements()
            .into_iter()
            .filter(|m| m.sensor_id == sensor_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorsim_core::testing::sim_definition;

    #[tokio::test(start_paused = true)]
    async fn test_world_reaches_streaming() {
        let mut world = SimWorld::new(1, vec![sim_definition("A", 0.0, 1.0, 1000)]);
        assert_eq!(world.phase(), SyncPhase::InitialSync);

        world.start();
        world.wait_for_phase(SyncPhase::Streaming).await.unwrap();
        assert!(world.registry.contains("A"));
        assert!(world.events.is_subscribed());

        world.shutdown().await.unwrap();
        assert_eq!(world.phase(), SyncPhase::Stopped);
        assert!(world.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out() {
        let world = SimWorld::new(1, vec![]);
        let waited = world.wait_until("never", |_| false).await;
        assert!(waited.is_err());
    }
}
