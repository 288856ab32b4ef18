//! Local image maintenance
//!
//! Pruning leftovers from rebuilds, moving service images between hosts as
//! a single archive, and checking the engine is new enough.

use crate::compose::normalize_name;
use crate::engine::Engine;
use crate::error::{BulkOutcome, Result, WardenError};
use std::cmp::Ordering;
use std::path::Path;
use tracing::{info, warn};

/// Oldest engine version the compose files are written for
pub const MIN_ENGINE_VERSION: &str = "20.10.22";

/// Remove untagged images. Failures are reported per image.
pub async fn prune_dangling(engine: &dyn Engine) -> Result<BulkOutcome> {
    let mut outcome = BulkOutcome::default();
    for image in engine.list_images(false).await? {
        if !image.is_dangling() {
            continue;
        }
        match engine.remove_image(&image.id).await {
            Ok(()) => outcome.ok(image.id),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => outcome.warn(&image.id, e),
        }
    }
    info!("Removed {} unused images", outcome.succeeded.len());
    Ok(outcome)
}

/// Save `<service>:latest` of every service that has an image into
/// `archive`. Returns the saved tags.
pub async fn save_images(
    engine: &dyn Engine,
    services: &[String],
    archive: &Path,
) -> Result<Vec<String>> {
    let mut tags = Vec::new();
    for service in services {
        let service = normalize_name(service);
        if engine.image_exists(&service).await? {
            tags.push(format!("{}:latest", service));
        } else {
            warn!("No local image for {}", service);
        }
    }
    if tags.is_empty() {
        return Err(WardenError::NotFound("no local images to save".to_string()));
    }

    if let Some(parent) = archive.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    info!("Saving {} to {}", tags.join(", "), archive.display());
    engine.save_images(&tags, archive).await?;
    Ok(tags)
}

/// Load images from an archive written by [`save_images`]
pub async fn load_images(engine: &dyn Engine, archive: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(WardenError::NotFound(format!(
            "no image archive at {}",
            archive.display()
        )));
    }
    engine.load_images(archive).await?;
    info!("Loaded images from {}", archive.display());
    Ok(())
}

/// Numeric components of a dotted version, ignoring a leading `v` and any
/// pre-release or build suffix
pub fn parse_version(version: &str) -> Option<Vec<u64>> {
    let version = version.trim().trim_start_matches('v');
    let core = version.split(['-', '+']).next()?;
    if core.is_empty() {
        return None;
    }
    core.split('.').map(|part| part.parse().ok()).collect()
}

/// Compare two dotted versions, missing components counting as zero
pub fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Whether the engine is at least [`MIN_ENGINE_VERSION`]
pub async fn check_engine_version(engine: &dyn Engine) -> Result<bool> {
    let version = engine.version().await?;
    let (Some(found), Some(minimum)) = (parse_version(&version), parse_version(MIN_ENGINE_VERSION))
    else {
        warn!("Invalid engine version string: {}", version);
        return Ok(false);
    };

    if compare_versions(&found, &minimum).is_ge() {
        info!("Engine version {} is supported", version);
        Ok(true)
    } else {
        warn!(
            "Engine version {} is too old, {} or newer is required",
            version, MIN_ENGINE_VERSION
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use tempfile::tempdir;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("24.0.5"), Some(vec![24, 0, 5]));
        assert_eq!(parse_version("v20.10.22"), Some(vec![20, 10, 22]));
        assert_eq!(parse_version("26.1.3-ce"), Some(vec![26, 1, 3]));
        assert_eq!(parse_version("dev"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_compare_versions_numerically() {
        assert!(compare_versions(&[20, 10, 9], &[20, 10, 22]).is_lt());
        assert!(compare_versions(&[20, 10, 22], &[20, 10, 22]).is_eq());
        assert!(compare_versions(&[23, 0], &[20, 10, 22]).is_gt());
    }

    #[tokio::test]
    async fn test_check_engine_version() {
        assert!(check_engine_version(&FakeEngine::new().with_version("24.0.7")).await.unwrap());
        assert!(!check_engine_version(&FakeEngine::new().with_version("20.10.9")).await.unwrap());
        assert!(!check_engine_version(&FakeEngine::new().with_version("nightly")).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_only_dangling() {
        let engine = FakeEngine::new()
            .with_image("apollo:latest")
            .with_image("<none>:<none>")
            .with_untagged_image("sha256:feed");

        let outcome = prune_dangling(&engine).await.unwrap();

        assert_eq!(outcome.succeeded.len(), 2);
        assert!(engine.has_image("apollo:latest"));
        assert!(!engine.has_image("<none>:<none>"));
    }

    #[tokio::test]
    async fn test_save_skips_services_without_images() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("saved_images").join("warden_save.tar");
        let engine = FakeEngine::new().with_image("apollo:latest");

        let tags = save_images(
            &engine,
            &["Apollo".to_string(), "medusa".to_string()],
            &archive,
        )
        .await
        .unwrap();

        assert_eq!(tags, vec!["apollo:latest".to_string()]);
        assert!(archive.is_file());
    }

    #[tokio::test]
    async fn test_save_without_images_and_load_missing_archive() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("warden_save.tar");
        let engine = FakeEngine::new();

        assert!(matches!(
            save_images(&engine, &["medusa".to_string()], &archive).await,
            Err(WardenError::NotFound(_))
        ));
        assert!(matches!(
            load_images(&engine, &archive).await,
            Err(WardenError::NotFound(_))
        ));
    }
}
