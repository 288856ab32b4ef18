//! Service registry
//!
//! Which services exist, where they come from, and what a command touches.

pub mod core;
pub mod database;
pub mod ports;
pub mod reconcile;
pub mod service;

pub use self::core::{is_core, EnvRole, Section, CORE_SERVICES, ENV_ROLES};
pub use database::{reset_database_files, reset_database_volume};
pub use ports::{check_ports, PortPlan};
pub use reconcile::{InventoryRow, Reconciler, StatusReport, VolumeDiff};
pub use service::{health_report, stream_logs, HealthEntry, ServiceManager};
