//! Sensor Simulator Deterministic Simulation Testing (DST) Harness
//!
//! This crate runs the reconciliation core against in-memory doubles on a
//! paused tokio clock, so whole-process behavior (startup retries, stalled
//! deliveries, concurrent mutations, shutdown) replays identically from a
//! single seed.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock auto-advances when every task is idle
//! - **Collaborators**: Catalog, topic and sinks with injectable faults
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        SimWorld                           │
//! │  ┌─────────────────┐      ┌──────────────────────────┐    │
//! │  │ ScriptedCatalog │─────►│                          │    │
//! │  └─────────────────┘      │     SyncCoordinator      │    │
//! │  ┌─────────────────┐      │                          │    │
//! │  │ SimEventSource  │─────►└────────────┬─────────────┘    │
//! │  └─────────────────┘                   ▼                  │
//! │                           ┌──────────────────────────┐    │
//! │                           │     RuntimeRegistry      │    │
//! │                           │  gen A   gen B   gen C   │    │
//! │                           └───────┬──────────┬───────┘    │
//! │                                   ▼          ▼            │
//! │                         RecordingSink   RecordingSink     │
//! │                          (archive)        (stream)        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sensorsim_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::RemoveMidDelivery);
//! assert!(result.passed);
//! ```

mod events;
mod runner;
mod world;
pub mod scenarios;

pub use events::{SimEventSource, SimSubscription};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use sensorsim_core::testing::{sim_definition, RecordingSink, ScriptedCatalog, SimContext};
pub use world::{SimCoordinator, SimWorld, WAIT_LIMIT};
