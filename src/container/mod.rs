//! Container information module
//!
//! Engine-reported container state in the shape the reconciliation and
//! reporting code works with.

pub mod config;

pub use config::{render_ports, ContainerInfo, ContainerState, Mount, PortBinding, Protocol};
