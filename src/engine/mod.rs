//! Container engine access
//!
//! The engine API over its unix socket, the data the registry reads from it,
//! and the decoder for multiplexed log streams.

pub mod api;
pub mod client;
pub mod logs;

pub use api::{DiskUsage, ImageSummary, VolumeSummary, VolumeUsageData};
pub use client::{DockerEngine, Engine, LogStream, DEFAULT_SOCKET_PATH};
pub use logs::{copy_frames, next_frame, Frame, StreamType};
