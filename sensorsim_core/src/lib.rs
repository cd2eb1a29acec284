//! Sensor Simulator Core - runtime registry and catalog reconciliation
//!
//! This library keeps one synthetic-reading generator running per enabled,
//! simulation-flagged sensor definition:
//! 1. **RuntimeRegistry**: the table of running generators, linearized per identity
//! 2. **SyncCoordinator**: catalog snapshot with retry, then the change stream
//! 3. **SensorGenerator**: the periodic sample-and-deliver loop
//!
//! ```text
//! CatalogSource ─┐
//!                ├─> SyncCoordinator ─> RuntimeRegistry ─> SensorGenerator ─> Sinks
//! ChangeEvents ──┘
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod generator;
pub mod registry;
pub mod sync;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export key types for convenience
pub use backoff::Backoff;
pub use config::SensorConfig;
pub use error::CoreError;
pub use generator::{SensorGenerator, Sinks, TickOutcome};
pub use registry::{RuntimeRegistry, STOP_GRACE};
pub use sync::{SyncCoordinator, SyncPhase, SyncStats};
