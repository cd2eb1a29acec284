//! Sensor Simulator Environment Abstraction Layer
//!
//! This crate provides the seams that let the reconciliation core run against
//! **Production** collaborators (Kafka, HTTP) or **Simulation** doubles.
//!
//! # Core Concept
//!
//! Everything the core touches outside its own memory goes through a trait:
//! - Time and randomness (`SimulatorContext`)
//! - The catalog snapshot (`CatalogSource`)
//! - The change-event stream (`ChangeEventSource`)
//! - Measurement delivery (`MeasurementSink`)
//!
//! # Example
//!
//! ```ignore
//! use sensorsim_env::{SimulatorContext, MeasurementSink};
//!
//! async fn tick<Ctx: SimulatorContext>(ctx: &Ctx, sink: &dyn MeasurementSink) {
//!     let m = Measurement::new("temp-1", ctx.now_utc(), 21.5);
//!     if let Err(e) = sink.deliver(&m).await {
//!         tracing::warn!(error = %e, "delivery failed");
//!     }
//! }
//! ```

mod context;
mod source;
mod sink;
mod types;
mod error;
mod tokio_impl;

pub use context::SimulatorContext;
pub use source::{CatalogSource, ChangeEventSource, EventSubscription};
pub use sink::MeasurementSink;
pub use types::{
    ChangeAction, ConfigChangeEvent, Measurement, SensorDefinition, SensorListResponse,
};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
