//! Production implementation of SimulatorContext using Tokio.

use crate::SimulatorContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

/// Production context backed by Tokio and OS entropy.
///
/// Time comes from the system clock, randomness from the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioContext;

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SimulatorContext for TokioContext {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn derive_rng(&self, _seed_extension: u64) -> StdRng {
        // Production streams are not reproducible
        StdRng::from_entropy()
    }

    fn seed(&self) -> u64 {
        0
    }
}
