//! Image maintenance

pub mod store;

pub use store::{check_engine_version, load_images, prune_dangling, save_images, MIN_ENGINE_VERSION};
