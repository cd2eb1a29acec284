//! Sensor Generator - one periodic sample-and-deliver loop per active sensor.
//!
//! # Tick
//!
//! ```text
//! cancelled? ──yes──> exit
//!     │no
//! sample [min, max] ─> round to 0.01 ─> Measurement
//!     │
//!     ├──> archive.deliver() ─┐  (concurrent, failures logged only)
//!     └──> stream.deliver()  ─┤
//!                             ▼
//!               select { cancelled => exit, sleep(interval) => next tick }
//! ```

use crate::config::SensorConfig;
use rand::rngs::StdRng;
use rand::Rng;
use sensorsim_env::{Measurement, MeasurementSink, SimulatorContext};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The two downstream sinks every generator delivers to.
#[derive(Clone)]
pub struct Sinks {
    /// Durable archive
    pub archive: Arc<dyn MeasurementSink>,

    /// Real-time stream
    pub stream: Arc<dyn MeasurementSink>,
}

impl Sinks {
    pub fn new(archive: Arc<dyn MeasurementSink>, stream: Arc<dyn MeasurementSink>) -> Self {
        Self { archive, stream }
    }
}

/// Outcome of one delivery round, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub archived: bool,
    pub streamed: bool,
}

/// Periodic task producing readings for one sensor.
///
/// Owns its RNG and loop state; shares nothing with other generators
/// beyond the sink handles.
pub struct SensorGenerator<Ctx: SimulatorContext> {
    config: SensorConfig,
    context: Arc<Ctx>,
    sinks: Sinks,
    rng: StdRng,
    ticks: u64,
}

impl<Ctx: SimulatorContext> SensorGenerator<Ctx> {
    /// Creates a generator for `config`, deriving its RNG from the context.
    pub fn new(config: SensorConfig, context: Arc<Ctx>, sinks: Sinks) -> Self {
        let rng = context.derive_rng(seed_extension(&config.sensor_id));
        Self {
            config,
            context,
            sinks,
            rng,
            ticks: 0,
        }
    }

    /// Returns the config this generator was started with.
    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Returns the number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Draws the next reading.
    pub fn sample(&mut self) -> f64 {
        sample_value(&mut self.rng, self.config.min_value, self.config.max_value)
    }

    /// Samples once and attempts delivery to both sinks.
    pub async fn tick(&mut self) -> TickOutcome {
        let measurement = Measurement::new(
            self.config.sensor_id.clone(),
            self.context.now_utc(),
            self.sample(),
        );

        let (archived, streamed) = tokio::join!(
            deliver(self.sinks.archive.as_ref(), &measurement),
            deliver(self.sinks.stream.as_ref(), &measurement),
        );
        self.ticks += 1;

        debug!(
            sensor_id = %measurement.sensor_id,
            value = measurement.value,
            archived,
            streamed,
            "tick"
        );

        TickOutcome { archived, streamed }
    }

    /// Runs until `cancel` fires. Delivery failures never end the loop.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.tick().await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.context.sleep(self.config.interval) => {}
            }
        }

        debug!(sensor_id = %self.config.sensor_id, ticks = self.ticks, "generator exited");
    }
}

async fn deliver(sink: &dyn MeasurementSink, measurement: &Measurement) -> bool {
    match sink.deliver(measurement).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                sensor_id = %measurement.sensor_id,
                sink = sink.name(),
                error = %e,
                "Failed sending measurement"
            );
            false
        }
    }
}

/// Draws uniformly from `[min, max]` and snaps to two decimals inside the range.
pub fn sample_value<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    let raw = if min < max { rng.gen_range(min..=max) } else { min };
    snap_to_cents(raw, min, max)
}

/// Rounds to two decimals, keeping the result within `[min, max]`.
///
/// When no two-decimal value lies inside the range the value is only
/// clamped. Validated configs never hit that case.
pub fn snap_to_cents(value: f64, min: f64, max: f64) -> f64 {
    if !has_cents_between(min, max) {
        return value.clamp(min, max);
    }
    round_cents(value).clamp(ceil_cents(min), floor_cents(max))
}

/// True when some two-decimal value lies in `[min, max]`.
pub(crate) fn has_cents_between(min: f64, max: f64) -> bool {
    ceil_cents(min) <= floor_cents(max)
}

/// Rounds half away from zero to two decimal places.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// Scaled values within 1e-9 of an integer are treated as exact so that
// bounds like 0.1 do not ceil to 0.11.
fn ceil_cents(value: f64) -> f64 {
    let scaled = value * 100.0;
    let nearest = scaled.round();
    if (scaled - nearest).abs() < 1e-9 {
        nearest / 100.0
    } else {
        scaled.ceil() / 100.0
    }
}

fn floor_cents(value: f64) -> f64 {
    let scaled = value * 100.0;
    let nearest = scaled.round();
    if (scaled - nearest).abs() < 1e-9 {
        nearest / 100.0
    } else {
        scaled.floor() / 100.0
    }
}

/// Stable per-sensor seed extension (FNV-1a over the identity).
pub fn seed_extension(sensor_id: &str) -> u64 {
    sensor_id
        .bytes()
        .fold(0xcbf29ce484222325, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::config;
    use crate::testing::{RecordingSink, SimContext};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use std::time::Duration;

    fn has_two_decimals(v: f64) -> bool {
        let scaled = v * 100.0;
        (scaled - scaled.round()).abs() < 1e-6
    }

    proptest! {
        #[test]
        fn test_sample_within_range_two_decimals(
            seed in any::<u64>(),
            min in -1000.0f64..1000.0,
            width in 0.01f64..500.0,
        ) {
            let max = min + width;
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..16 {
                let v = sample_value(&mut rng, min, max);
                prop_assert!(v >= min && v <= max, "{} not in [{}, {}]", v, min, max);
                prop_assert!(has_two_decimals(v));
            }
        }
    }

    #[test]
    fn test_snap_keeps_rounded_value_in_range() {
        // 0.004 rounds to 0.00, which would fall below min
        assert_eq!(snap_to_cents(0.004, 0.004, 1.0), 0.01);
        // 9.996 rounds to 10.00, above max
        assert_eq!(snap_to_cents(9.996, 0.0, 9.996), 9.99);
        assert_eq!(snap_to_cents(0.1, 0.1, 0.2), 0.1);
    }

    #[test]
    fn test_snap_degenerate_range() {
        assert_eq!(snap_to_cents(3.0, 3.0, 3.0), 3.0);
        // No cent lies in [0.001, 0.002]; stays in range instead of rounding to 0.00
        assert_eq!(snap_to_cents(0.001, 0.001, 0.002), 0.001);
        assert_eq!(snap_to_cents(0.0, 0.001, 0.002), 0.001);
        assert!(!has_cents_between(0.001, 0.002));
        assert!(has_cents_between(0.001, 0.01));
    }

    #[test]
    fn test_sample_at_largest_accepted_bounds() {
        let bound = crate::config::MAX_BOUND_MAGNITUDE;
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..64 {
            let v = sample_value(&mut rng, -bound, bound);
            assert!(v.is_finite());
            assert!((-bound..=bound).contains(&v));
            assert_eq!(round_cents(v), v);
        }
    }

    #[test]
    fn test_seed_extension_stable() {
        assert_eq!(seed_extension("temp-1"), seed_extension("temp-1"));
        assert_ne!(seed_extension("temp-1"), seed_extension("temp-2"));
    }

    #[tokio::test]
    async fn test_tick_delivers_to_both_sinks() {
        let archive = RecordingSink::shared("archive");
        let stream = RecordingSink::shared("stream");
        let mut gen = SensorGenerator::new(
            config("A"),
            SimContext::shared(7),
            Sinks::new(archive.clone(), stream.clone()),
        );

        let outcome = gen.tick().await;
        assert_eq!(outcome, TickOutcome { archived: true, streamed: true });
        assert_eq!(archive.count(), 1);
        assert_eq!(stream.count(), 1);
        assert_eq!(archive.measurements()[0], stream.measurements()[0]);
    }

    #[tokio::test]
    async fn test_archive_failure_does_not_block_stream() {
        let archive = RecordingSink::shared("archive");
        archive.set_failing(true);
        let stream = RecordingSink::shared("stream");
        let mut gen = SensorGenerator::new(
            config("A"),
            SimContext::shared(7),
            Sinks::new(archive.clone(), stream.clone()),
        );

        let outcome = gen.tick().await;
        assert!(!outcome.archived);
        assert!(outcome.streamed);
        assert_eq!(stream.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_interval_and_survives_failures() {
        let archive = RecordingSink::shared("archive");
        archive.set_failing(true);
        let stream = RecordingSink::shared("stream");
        let gen = SensorGenerator::new(
            config("A"),
            SimContext::shared(1),
            Sinks::new(archive.clone(), stream.clone()),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(gen.run(cancel.clone()));

        // Ticks at t=0, 1, 2, 3
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(stream.count(), 4);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let stream = RecordingSink::shared("stream");
        let mut slow = config("A");
        slow.interval = Duration::from_secs(3600);
        let gen = SensorGenerator::new(
            slow,
            SimContext::shared(1),
            Sinks::new(RecordingSink::shared("archive"), stream.clone()),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(gen.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let joined = tokio::time::timeout(Duration::from_millis(50), task).await;
        assert!(joined.is_ok());
        assert_eq!(stream.count(), 1);
    }

    #[tokio::test]
    async fn test_precancelled_generator_never_delivers() {
        let stream = RecordingSink::shared("stream");
        let gen = SensorGenerator::new(
            config("A"),
            SimContext::shared(1),
            Sinks::new(RecordingSink::shared("archive"), stream.clone()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        gen.run(cancel).await;
        assert_eq!(stream.count(), 0);
    }
}
