//! Engine volume handling

pub mod volume;

pub use volume::{format_size, volume_owner, VolumeManager, VolumeRow};
