//! Sync Coordinator - keeps the registry reconciled with the catalog.
//!
//! # State Machine
//!
//! ```text
//!   INITIAL_SYNC ──ok──> STREAMING <──resubscribe── BACKOFF
//!     │    ▲                 │                        ▲
//!     └fail┘ (2s..30s)       └── subscribe/recv err ──┘
//!
//!   any state ──shutdown──> STOPPED
//! ```
//!
//! Initial sync never gives up. Streaming drops malformed events without
//! touching the backoff schedule and resets it after every applied event.
//! A panic inside a catalog fetch or a streaming attempt is logged and
//! retried on the same schedule as any other failure.

use crate::backoff::Backoff;
use crate::config::SensorConfig;
use crate::error::CoreError;
use crate::registry::RuntimeRegistry;
use futures::FutureExt;
use sensorsim_env::{
    CatalogSource, ChangeAction, ChangeEventSource, ConfigChangeEvent, EnvError, EventSubscription,
    SensorDefinition, SimulatorContext,
};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Observable coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    InitialSync,
    Streaming,
    Backoff,
    Stopped,
}

/// Counters updated by the coordinator task.
#[derive(Debug, Default)]
pub struct SyncStats {
    catalog_attempts: AtomicU64,
    subscriptions: AtomicU64,
    events_applied: AtomicU64,
    events_dropped: AtomicU64,
}

impl SyncStats {
    pub fn catalog_attempts(&self) -> u64 {
        self.catalog_attempts.load(Ordering::Relaxed)
    }

    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::Relaxed)
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

/// Seeds the registry from the catalog, then follows the change stream.
pub struct SyncCoordinator<Ctx, C, E>
where
    Ctx: SimulatorContext,
    C: CatalogSource,
    E: ChangeEventSource,
{
    registry: Arc<RuntimeRegistry<Ctx>>,
    catalog: C,
    events: E,
    phase: watch::Sender<SyncPhase>,
    stats: Arc<SyncStats>,
}

impl<Ctx, C, E> SyncCoordinator<Ctx, C, E>
where
    Ctx: SimulatorContext,
    C: CatalogSource,
    E: ChangeEventSource,
{
    pub fn new(registry: Arc<RuntimeRegistry<Ctx>>, catalog: C, events: E) -> Self {
        let (phase, _) = watch::channel(SyncPhase::InitialSync);
        Self {
            registry,
            catalog,
            events,
            phase,
            stats: Arc::new(SyncStats::default()),
        }
    }

    /// Subscribes to phase transitions.
    pub fn phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn stats(&self) -> Arc<SyncStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until `shutdown` fires. Source failures are retried forever.
    pub async fn run(self, shutdown: CancellationToken) {
        if self.initial_sync(&shutdown).await {
            self.follow_changes(&shutdown).await;
        }
        self.set_phase(SyncPhase::Stopped);
        info!("Config sync stopped");
    }

    /// Applies one decoded change event to the registry.
    pub async fn apply_event(&self, event: &ConfigChangeEvent) -> Result<(), CoreError> {
        match event.action {
            ChangeAction::Deleted => {
                self.registry.remove(&event.sensor_id).await;
                Ok(())
            }
            ChangeAction::Upserted => {
                let def = event.payload.as_ref().ok_or_else(|| {
                    CoreError::MalformedEvent(format!("upserted {} without payload", event.sensor_id))
                })?;
                if def.sensor_id != event.sensor_id {
                    return Err(CoreError::MalformedEvent(format!(
                        "event key {} does not match payload {}",
                        event.sensor_id, def.sensor_id
                    )));
                }
                self.apply_definition(def).await;
                Ok(())
            }
        }
    }

    /// Brings one sensor in line with its latest definition.
    pub async fn apply_definition(&self, def: &SensorDefinition) {
        if !def.should_simulate() {
            self.registry.remove(&def.sensor_id).await;
            return;
        }

        match SensorConfig::try_from(def) {
            Ok(config) => self.registry.upsert(config).await,
            Err(e) => {
                warn!(sensor_id = %def.sensor_id, error = %e, "Rejecting sensor definition");
                self.registry.remove(&def.sensor_id).await;
            }
        }
    }

    /// Returns false if shutdown arrived before the snapshot was applied.
    async fn initial_sync(&self, shutdown: &CancellationToken) -> bool {
        let mut backoff = Backoff::new();
        self.set_phase(SyncPhase::InitialSync);

        loop {
            self.stats.catalog_attempts.fetch_add(1, Ordering::Relaxed);
            let listing = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return false,
                listing = supervised(self.catalog.list_simulated()) => listing,
            };

            let delay = match listing {
                Ok(Ok(defs)) => {
                    info!(count = defs.len(), "Initial sync loaded sensors");
                    for def in &defs {
                        if shutdown.is_cancelled() {
                            return false;
                        }
                        self.apply_definition(def).await;
                    }
                    return true;
                }
                Ok(Err(e)) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, delay_secs = delay.as_secs(), "Initial sync failed. Retrying");
                    delay
                }
                Err(panic) => {
                    let delay = backoff.next_delay();
                    error!(panic = %panic, delay_secs = delay.as_secs(), "Catalog fetch panicked. Retrying");
                    delay
                }
            };
            if !self.pause(delay, shutdown).await {
                return false;
            }
        }
    }

    async fn follow_changes(&self, shutdown: &CancellationToken) {
        let mut backoff = Backoff::new();

        loop {
            self.set_phase(SyncPhase::Streaming);
            let failure = match supervised(self.stream_attempt(&mut backoff, shutdown)).await {
                Ok(Some(failure)) => failure,
                Ok(None) => return,
                Err(panic) => {
                    let delay = backoff.next_delay();
                    error!(panic = %panic, delay_secs = delay.as_secs(), "Change stream attempt panicked. Retrying");
                    self.set_phase(SyncPhase::Backoff);
                    if !self.pause(delay, shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            let delay = backoff.next_delay();
            match failure {
                EnvError::TopicNotReady(_) => {
                    warn!(error = %failure, delay_secs = delay.as_secs(), "Config topic not ready. Retrying")
                }
                EnvError::Transport(_) | EnvError::Closed(_) | EnvError::Timeout(_) => {
                    warn!(error = %failure, delay_secs = delay.as_secs(), "Change stream error. Retrying")
                }
                _ => error!(error = %failure, delay_secs = delay.as_secs(), "Unexpected change stream failure"),
            }

            self.set_phase(SyncPhase::Backoff);
            if !self.pause(delay, shutdown).await {
                return;
            }
        }
    }

    /// Subscribes and drains until failure. Returns `None` on shutdown.
    async fn stream_attempt(&self, backoff: &mut Backoff, shutdown: &CancellationToken) -> Option<EnvError> {
        let subscribed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            subscribed = self.events.subscribe() => subscribed,
        };

        match subscribed {
            Ok(mut subscription) => {
                self.stats.subscriptions.fetch_add(1, Ordering::Relaxed);
                info!("Config change consumer started");
                self.consume(&mut subscription, backoff, shutdown).await
            }
            Err(e) => Some(e),
        }
    }

    /// Drains a subscription. Returns `None` on shutdown.
    async fn consume(
        &self,
        subscription: &mut E::Subscription,
        backoff: &mut Backoff,
        shutdown: &CancellationToken,
    ) -> Option<EnvError> {
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                received = subscription.recv() => received,
            };

            let bytes = match received {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => return Some(e),
            };

            let event = match ConfigChangeEvent::from_slice(&bytes) {
                Ok(event) => event,
                Err(e) => {
                    self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, len = bytes.len(), "Dropping undecodable config event");
                    continue;
                }
            };

            match self.apply_event(&event).await {
                Ok(()) => {
                    self.stats.events_applied.fetch_add(1, Ordering::Relaxed);
                    debug!(sensor_id = %event.sensor_id, action = ?event.action, "Applied config event");
                    backoff.reset();
                }
                Err(e) => {
                    self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Dropping config event");
                }
            }
        }
    }

    /// Sleeps for `delay`; false if shutdown interrupted the wait.
    async fn pause(&self, delay: Duration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = self.registry.context().sleep(delay) => true,
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }
}

/// Runs `fut`, turning a panic into its message.
async fn supervised<F: Future>(fut: F) -> Result<F::Output, String> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(panic.as_ref()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
