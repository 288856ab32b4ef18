//! Process runtime
//!
//! Locating and running the external tools that realize compose changes.

pub mod process;

pub use process::{CommandRunner, ProcessRunner};
