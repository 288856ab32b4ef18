//! Warden - a service registry for a compose-managed container platform
//!
//! Warden keeps a compose document of core and third-party services in step
//! with what is installed on disk and what the container engine is running.
//! It provides:
//!
//! - Service declaration and lifecycle (start, stop, build, remove)
//! - Reconciliation reports across the document, disk and engine
//! - Container log streaming and health reporting
//! - Volume and image maintenance
//! - Port prechecks before services start

pub mod compose;
pub mod container;
pub mod engine;
pub mod error;
pub mod image;
pub mod registry;
pub mod report;
pub mod runtime;
pub mod settings;
pub mod storage;

#[cfg(test)]
pub mod testing;

pub use error::{BulkOutcome, Result, WardenError};
