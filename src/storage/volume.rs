//! Volume management
//!
//! Volumes belong to the engine. The registry only reports on the declared
//! ones and moves files in and out through a container that mounts them.

use crate::container::{ContainerInfo, Mount};
use crate::engine::Engine;
use crate::error::{BulkOutcome, Result, WardenError};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Volume naming convention suffix: `<service>_volume...`
pub const VOLUME_SUFFIX: &str = "_volume";

/// One row of the volume report
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VolumeRow {
    pub name: String,
    /// Human-readable size, `unknown` when the engine did not compute it
    pub size: String,
    /// `<service> (<refcount>)` when mounted, `unused (0)` otherwise
    pub container: String,
    /// Status of the owning container, `offline` without one
    pub status: String,
    pub location: String,
}

/// Service a volume belongs to by name
pub fn volume_owner(volume: &str) -> &str {
    volume.split(VOLUME_SUFFIX).next().unwrap_or(volume)
}

/// Format a byte count with SI units
pub fn format_size(bytes: i64) -> String {
    if bytes < 0 {
        return "unknown".to_string();
    }
    const UNIT: i64 = 1000;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['k', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}

/// Volume operations through the engine
pub struct VolumeManager {
    engine: Arc<dyn Engine>,
}

impl VolumeManager {
    /// Create a volume manager
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Report on every engine volume that is also declared, ordered by name
    pub async fn report(&self, declared: &BTreeSet<String>) -> Result<Vec<VolumeRow>> {
        let usage = self.engine.disk_usage().await?;
        let containers = self.engine.list_containers(false).await?;

        let mut rows = Vec::new();
        for volume in usage.volumes {
            if !declared.contains(&volume.name) {
                continue;
            }
            let owner = volume_owner(&volume.name);
            let ref_count = volume.usage_data.as_ref().map(|u| u.ref_count).unwrap_or(0);

            let mut container = "unused (0)".to_string();
            let mut status = "offline".to_string();
            for c in &containers {
                if c.name() == owner {
                    status = c.status.clone();
                }
                if c.mounts.iter().any(|m| m.name == volume.name) {
                    container = format!("{} ({})", owner, ref_count);
                }
            }

            rows.push(VolumeRow {
                size: volume
                    .usage_data
                    .as_ref()
                    .map(|u| format_size(u.size))
                    .unwrap_or_else(|| "unknown".to_string()),
                container,
                status,
                location: volume.mountpoint,
                name: volume.name,
            });
        }
        rows.sort();
        Ok(rows)
    }

    /// Remove a volume and every container using it. An unknown volume is
    /// logged and otherwise ignored.
    pub async fn remove(&self, name: &str) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        let known = self.engine.list_volumes().await?;
        if !known.iter().any(|v| v.name == name) {
            info!("Volume {} not found", name);
            return Ok(outcome);
        }

        for container in self.engine.list_containers(true).await? {
            if !container.mounts.iter().any(|m| m.name == name) {
                continue;
            }
            match self.engine.remove_container(&container.id).await {
                Ok(()) => {
                    info!("Removed container {}, which was using {}", container.name(), name);
                    outcome.ok(container.name());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => outcome.warn(container.name(), e),
            }
        }

        self.engine.remove_volume(name).await?;
        info!("Removed volume {}", name);
        Ok(outcome)
    }

    /// Make sure a volume exists and is mounted by its service's container.
    /// Returns that container and the mount.
    pub async fn ensure(&self, name: &str) -> Result<(ContainerInfo, Mount)> {
        let known = self.engine.list_volumes().await?;
        if !known.iter().any(|v| v.name == name) {
            info!("Creating volume {}", name);
            self.engine.create_volume(name).await?;
        }

        let owner = volume_owner(name);
        let container = self
            .engine
            .list_containers(false)
            .await?
            .into_iter()
            .find(|c| c.name() == owner || c.image == owner)
            .ok_or_else(|| {
                WardenError::Volume(format!("no running container {} for volume {}", owner, name))
            })?;

        let mount = container
            .mounts
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| {
                WardenError::Volume(format!("container {} is not using volume {}", owner, name))
            })?;
        Ok((container, mount))
    }

    /// Copy a local file into a volume as `<file_name>`
    pub async fn copy_into(&self, source: &Path, file_name: &str, volume: &str) -> Result<()> {
        let (container, mount) = self.ensure(volume).await?;
        let contents = tokio::fs::read(source).await?;
        let archive = single_file_archive(file_name, &contents)?;

        self.engine
            .copy_to_container(&container.id, &mount.destination, archive)
            .await?;
        info!("Copied {} into {}:{}", source.display(), volume, file_name);
        Ok(())
    }

    /// Copy `<file_name>` out of a volume to a local path
    pub async fn copy_from(&self, volume: &str, file_name: &str, destination: &Path) -> Result<()> {
        let (container, mount) = self.ensure(volume).await?;
        let path = format!("{}/{}", mount.destination.trim_end_matches('/'), file_name);
        let archive = self.engine.copy_from_container(&container.id, &path).await?;

        let contents = first_file(&archive)?
            .ok_or_else(|| WardenError::NotFound(format!("{} in volume {}", file_name, volume)))?;
        tokio::fs::write(destination, contents).await?;
        info!("Copied {}:{} to {}", volume, file_name, destination.display());
        Ok(())
    }
}

/// Tar archive holding one regular file
fn single_file_archive(name: &str, contents: &[u8]) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, contents)?;
    Ok(builder.into_inner()?)
}

/// Contents of the first regular file in a tar archive
fn first_file(archive: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(archive);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return Ok(Some(contents));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn postgres_with_volume() -> ContainerInfo {
        let mut postgres = FakeEngine::container("mythic_postgres", "running");
        postgres.mounts.push(Mount {
            name: "mythic_postgres_volume".to_string(),
            source: "/var/lib/docker/volumes/mythic_postgres_volume/_data".to_string(),
            destination: "/var/lib/postgresql/data".to_string(),
        });
        postgres
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(999), "999 B");
        assert_eq!(format_size(1000), "1.0 kB");
        assert_eq!(format_size(48_000_000), "48.0 MB");
        assert_eq!(format_size(1_500_000_000), "1.5 GB");
        assert_eq!(format_size(-1), "unknown");
    }

    #[test]
    fn test_volume_owner() {
        assert_eq!(volume_owner("mythic_postgres_volume"), "mythic_postgres");
        assert_eq!(volume_owner("apollo_volume_data"), "apollo");
        assert_eq!(volume_owner("plain"), "plain");
    }

    #[tokio::test]
    async fn test_report_declared_volumes_only() {
        let engine = FakeEngine::new()
            .with_container(postgres_with_volume())
            .with_volume("mythic_postgres_volume", 48_000_000, 1)
            .with_volume("mythic_rabbitmq_volume", 2_000, 0)
            .with_volume("undeclared_volume", 10, 0);
        let manager = VolumeManager::new(Arc::new(engine));
        let declared: BTreeSet<String> = ["mythic_postgres_volume", "mythic_rabbitmq_volume"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let rows = manager.report(&declared).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "mythic_postgres_volume");
        assert_eq!(rows[0].size, "48.0 MB");
        assert_eq!(rows[0].container, "mythic_postgres (1)");
        assert_eq!(rows[0].status, "Up 5 minutes");
        assert_eq!(rows[1].container, "unused (0)");
        assert_eq!(rows[1].status, "offline");
    }

    #[tokio::test]
    async fn test_remove_takes_containers_with_it() {
        let engine = Arc::new(
            FakeEngine::new()
                .with_container(postgres_with_volume())
                .with_container(FakeEngine::container("mythic_server", "running"))
                .with_volume("mythic_postgres_volume", 10, 1),
        );
        let manager = VolumeManager::new(engine.clone());

        let outcome = manager.remove("mythic_postgres_volume").await.unwrap();

        assert_eq!(outcome.succeeded, vec!["mythic_postgres".to_string()]);
        assert!(engine.volumes().is_empty());
        let left: Vec<String> = engine.containers().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(left, vec!["mythic_server".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_unknown_volume_is_noop() {
        let manager = VolumeManager::new(Arc::new(FakeEngine::new()));
        let outcome = manager.remove("ghost_volume").await.unwrap();
        assert!(outcome.succeeded.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_creates_missing_volume() {
        let engine = Arc::new(FakeEngine::new().with_container(postgres_with_volume()));
        let manager = VolumeManager::new(engine.clone());

        let (container, mount) = manager.ensure("mythic_postgres_volume").await.unwrap();

        assert_eq!(container.name(), "mythic_postgres");
        assert_eq!(mount.destination, "/var/lib/postgresql/data");
        assert_eq!(engine.volumes(), vec!["mythic_postgres_volume".to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_without_container_fails() {
        let manager = VolumeManager::new(Arc::new(FakeEngine::new()));
        let err = manager.ensure("apollo_volume").await.unwrap_err();
        assert!(matches!(err, WardenError::Volume(_)));
    }

    #[tokio::test]
    async fn test_copy_into_then_out_of_volume() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("backup.sql");
        std::fs::write(&source, b"CREATE TABLE operator();\n").unwrap();
        let engine = Arc::new(
            FakeEngine::new()
                .with_container(postgres_with_volume())
                .with_volume("mythic_postgres_volume", 10, 1),
        );
        let manager = VolumeManager::new(engine.clone());

        manager
            .copy_into(&source, "restore.sql", "mythic_postgres_volume")
            .await
            .unwrap();
        let stored = engine
            .file_in_container("/var/lib/postgresql/data/restore.sql")
            .unwrap();
        assert_eq!(stored, b"CREATE TABLE operator();\n".to_vec());

        let out = dir.path().join("restored.sql");
        manager
            .copy_from("mythic_postgres_volume", "restore.sql", &out)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"CREATE TABLE operator();\n".to_vec());
    }

    #[test]
    fn test_single_file_archive() {
        let archive = single_file_archive("notes.txt", b"hello").unwrap();
        assert_eq!(first_file(&archive).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(first_file(&tar::Builder::new(Vec::new()).into_inner().unwrap()).unwrap(), None);
    }
}
