//! Downstream measurement sinks.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::Measurement;

/// A downstream system that accepts a single measurement.
///
/// # Implementations
///
/// - **Production**: HTTP archive, Kafka measurement topic
/// - **Simulation**: `RecordingSink` with injectable failures and latency
///
/// Delivery is best-effort. Callers do not retry a failed delivery.
#[async_trait]
pub trait MeasurementSink: Send + Sync + 'static {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Delivers one measurement.
    async fn deliver(&self, measurement: &Measurement) -> Result<(), EnvError>;
}
