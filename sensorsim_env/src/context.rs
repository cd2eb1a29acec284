//! Core environment context trait for sensor generators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use std::time::Duration;

/// The central interface for time and randomness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, OS entropy
/// - **Simulation**: `SimContext` - fixed epoch, paused clock, seeded RNG
#[async_trait]
pub trait SimulatorContext: Send + Sync + 'static {
    /// Returns the wall-clock time used to stamp measurements.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Suspends execution for the given duration.
    ///
    /// Callers race this against a cancellation signal, so implementations
    /// must be cancel-safe (dropping the future stops the wait).
    async fn sleep(&self, duration: Duration);

    /// Creates the RNG owned by one generator.
    ///
    /// The implementation combines its global seed with `seed_extension`
    /// to derive unique but reproducible streams.
    fn derive_rng(&self, seed_extension: u64) -> StdRng;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
