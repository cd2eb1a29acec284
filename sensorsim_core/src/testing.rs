//! Deterministic doubles for the environment traits.
//!
//! Used by this crate's unit tests and, through the `testing` feature, by
//! the simulation harness. Everything runs on tokio's clock, so pair with
//! `start_paused = true`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sensorsim_env::{CatalogSource, EnvError, Measurement, MeasurementSink, SensorDefinition, SimulatorContext};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Simulation context backed by tokio's paused clock and a master seed.
///
/// - Virtual time auto-advances when every task idles
/// - Per-generator RNGs are derived from the master seed
/// - A fixed epoch keeps timestamps identical across runs
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Virtual instant that maps to `epoch`
    start: tokio::time::Instant,

    /// Wall-clock time of virtual zero
    epoch: DateTime<Utc>,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start: tokio::time::Instant::now(),
            epoch: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(), // 2024-01-01 00:00:00 UTC
        }
    }

    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Virtual time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[async_trait]
impl SimulatorContext for SimContext {
    fn now_utc(&self) -> DateTime<Utc> {
        self.epoch + ChronoDuration::from_std(self.elapsed()).unwrap_or(ChronoDuration::zero())
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn derive_rng(&self, seed_extension: u64) -> StdRng {
        // Combine master seed with extension for a reproducible stream
        let combined_seed = self.seed.wrapping_mul(0x517cc1b727220a95) ^ seed_extension;
        StdRng::seed_from_u64(combined_seed)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

/// Records every delivered measurement, with injectable failures and latency.
pub struct RecordingSink {
    name: &'static str,
    delivered: Mutex<Vec<Measurement>>,
    failures: AtomicU64,
    failing: AtomicBool,
    latency_ms: AtomicU64,
    in_flight: AtomicUsize,
}

impl RecordingSink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            delivered: Mutex::new(Vec::new()),
            failures: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn shared(name: &'static str) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// While set, every delivery fails after its latency.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay applied to every delivery.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Deliveries currently inside `deliver()`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.delivered().len()
    }

    pub fn count_for(&self, sensor_id: &str) -> usize {
        self.delivered().iter().filter(|m| m.sensor_id == sensor_id).count()
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        self.delivered().clone()
    }

    fn delivered(&self) -> MutexGuard<'_, Vec<Measurement>> {
        self.delivered.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MeasurementSink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn deliver(&self, measurement: &Measurement) -> Result<(), EnvError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(EnvError::transport(format!("{} offline", self.name)));
        }
        self.delivered().push(measurement.clone());
        Ok(())
    }
}

/// Builds a simulated, enabled definition.
pub fn sim_definition(sensor_id: &str, min: f64, max: f64, interval_ms: i64) -> SensorDefinition {
    SensorDefinition {
        id: Uuid::new_v4(),
        sensor_id: sensor_id.to_string(),
        sensor_type: "temperature".to_string(),
        unit: "C".to_string(),
        operating_min: min,
        operating_max: max,
        warning_min: min,
        warning_max: max,
        interval_ms,
        enabled: true,
        simulate: true,
        updated_at: Utc::now(),
    }
}

struct CatalogState {
    definitions: Vec<SensorDefinition>,
    failures_remaining: u32,
    panic_next: bool,
    calls: Vec<tokio::time::Instant>,
}

/// Catalog double: serves `definitions` once the injected outages are spent.
pub struct ScriptedCatalog {
    state: Mutex<CatalogState>,
}

impl ScriptedCatalog {
    pub fn new(definitions: Vec<SensorDefinition>) -> Self {
        Self {
            state: Mutex::new(CatalogState {
                definitions,
                failures_remaining: 0,
                panic_next: false,
                calls: Vec::new(),
            }),
        }
    }

    pub fn shared(definitions: Vec<SensorDefinition>) -> Arc<Self> {
        Arc::new(Self::new(definitions))
    }

    /// Makes the next `n` listings answer 503.
    pub fn fail_next(&self, n: u32) {
        self.state().failures_remaining = n;
    }

    /// Makes the next listing panic instead of answering.
    pub fn panic_next(&self) {
        self.state().panic_next = true;
    }

    /// Virtual instants of every listing attempt.
    pub fn calls(&self) -> Vec<tokio::time::Instant> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CatalogSource for ScriptedCatalog {
    async fn list_simulated(&self) -> Result<Vec<SensorDefinition>, EnvError> {
        let panicking = {
            let mut state = self.state();
            state.calls.push(tokio::time::Instant::now());
            std::mem::take(&mut state.panic_next)
        };
        if panicking {
            panic!("catalog client bug");
        }

        let mut state = self.state();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(EnvError::Status {
                code: 503,
                body: "catalog unavailable".into(),
            });
        }
        Ok(state.definitions.clone())
    }
}

#[cfg(test)]
pub(crate) use scripted_events::{QueueEvents, SubscribeStep};

#[cfg(test)]
mod scripted_events {
    use async_trait::async_trait;
    use sensorsim_env::{ChangeEventSource, EnvError, EventSubscription};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// One scripted outcome of `subscribe()`.
    pub enum SubscribeStep {
        Fail,
        Deliver(Vec<Result<Option<Vec<u8>>, EnvError>>),
        /// Subscribes, then panics on the first `recv()`
        Panic,
    }

    /// Event source replaying scripted subscriptions. When the script is
    /// exhausted, subscriptions stay open and silent.
    pub struct QueueEvents {
        script: Mutex<VecDeque<SubscribeStep>>,
        attempts: Mutex<Vec<tokio::time::Instant>>,
    }

    impl QueueEvents {
        pub fn shared(script: Vec<SubscribeStep>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        pub fn attempts(&self) -> Vec<tokio::time::Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    pub struct QueueSubscription {
        items: VecDeque<Result<Option<Vec<u8>>, EnvError>>,
        panicking: bool,
    }

    #[async_trait]
    impl ChangeEventSource for QueueEvents {
        type Subscription = QueueSubscription;

        async fn subscribe(&self) -> Result<QueueSubscription, EnvError> {
            self.attempts.lock().unwrap().push(tokio::time::Instant::now());
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(SubscribeStep::Fail) => Err(EnvError::TopicNotReady("sensor-config-events".into())),
                Some(SubscribeStep::Deliver(items)) => Ok(QueueSubscription {
                    items: items.into(),
                    panicking: false,
                }),
                Some(SubscribeStep::Panic) => Ok(QueueSubscription {
                    items: VecDeque::new(),
                    panicking: true,
                }),
                None => Ok(QueueSubscription {
                    items: VecDeque::new(),
                    panicking: false,
                }),
            }
        }
    }

    #[async_trait]
    impl EventSubscription for QueueSubscription {
        async fn recv(&mut self) -> Result<Option<Vec<u8>>, EnvError> {
            if self.panicking {
                panic!("decoder bug");
            }
            match self.items.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_virtual_time() {
        let ctx = SimContext::new(42);
        let t0 = ctx.now_utc();

        ctx.sleep(Duration::from_secs(90)).await;

        assert_eq!(ctx.elapsed(), Duration::from_secs(90));
        assert_eq!((ctx.now_utc() - t0).num_seconds(), 90);
        assert_eq!(t0.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_deterministic_rng() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let a: u64 = ctx1.derive_rng(1).gen();
        let b: u64 = ctx2.derive_rng(1).gen();
        assert_eq!(a, b);

        let c: u64 = ctx1.derive_rng(2).gen();
        assert_ne!(a, c);
        assert_eq!(ctx1.seed(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_outage_then_snapshot() {
        let catalog = ScriptedCatalog::new(vec![sim_definition("A", 0.0, 1.0, 1000)]);
        catalog.fail_next(2);

        assert!(matches!(catalog.list_simulated().await, Err(EnvError::Status { code: 503, .. })));
        assert!(catalog.list_simulated().await.is_err());
        assert_eq!(catalog.list_simulated().await.unwrap().len(), 1);
        assert_eq!(catalog.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_and_latency() {
        let sink = RecordingSink::new("archive");
        sink.set_latency(Duration::from_millis(250));
        let m = Measurement::new("A", Utc::now(), 1.0);

        let started = tokio::time::Instant::now();
        sink.deliver(&m).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(250));

        sink.set_failing(true);
        assert!(sink.deliver(&m).await.is_err());
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.failures(), 1);
        assert_eq!(sink.in_flight(), 0);
    }
}
