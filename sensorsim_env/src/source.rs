//! Inputs consumed by the reconciliation core: the catalog snapshot and the
//! change-event stream.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::SensorDefinition;
use std::sync::Arc;

/// Bulk listing of the authoritative sensor-definition catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync + 'static {
    /// Fetches every definition flagged for simulation.
    ///
    /// # Returns
    /// * `Ok(defs)` - The full simulated set, in one page
    /// * `Err(_)` - Unreachable, non-success status or malformed body
    async fn list_simulated(&self) -> Result<Vec<SensorDefinition>, EnvError>;
}

/// Source of incremental catalog change events.
///
/// # Event Flow
///
/// ```text
/// Catalog ──> topic (keyed by sensorId) ──> subscribe() ──> recv() ──> bytes
/// ```
#[async_trait]
pub trait ChangeEventSource: Send + Sync + 'static {
    /// The live subscription type. Dropping it releases the subscription.
    type Subscription: EventSubscription;

    /// Opens a subscription positioned at this instance's read offset.
    async fn subscribe(&self) -> Result<Self::Subscription, EnvError>;
}

/// An open change-event subscription.
#[async_trait]
pub trait EventSubscription: Send + 'static {
    /// Waits for the next message.
    ///
    /// # Returns
    /// * `Ok(Some(bytes))` - The raw message value
    /// * `Ok(None)` - A message without a value (nothing to apply)
    /// * `Err(_)` - Transport failure; the subscription should be reopened
    ///
    /// # Cancel safety
    /// Must be safe to drop mid-wait.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, EnvError>;
}

#[async_trait]
impl<T: CatalogSource + ?Sized> CatalogSource for Arc<T> {
    async fn list_simulated(&self) -> Result<Vec<SensorDefinition>, EnvError> {
        (**self).list_simulated().await
    }
}

#[async_trait]
impl<T: ChangeEventSource> ChangeEventSource for Arc<T> {
    type Subscription = T::Subscription;

    async fn subscribe(&self) -> Result<Self::Subscription, EnvError> {
        (**self).subscribe().await
    }
}
