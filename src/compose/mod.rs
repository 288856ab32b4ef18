//! Compose document and orchestration
//!
//! The compose file is the registry's only persistent state. `store` reads
//! and rewrites it, `orchestrator` hands declarative changes to the compose
//! tool.

pub mod config;
pub mod orchestrator;
pub mod store;

pub use config::{normalize_name, ComposeDocument, ServiceDefinition};
pub use orchestrator::{ComposeOrchestrator, ComposeTool};
pub use store::{ComposeStore, ServiceLookup, DEFAULT_COMPOSE_FILE};
