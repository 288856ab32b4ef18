//! Reconciliation
//!
//! Three membership sets drive every listing and every "which services does
//! this touch" decision:
//!
//! - on disk: directories under the install root
//! - declared: `services` keys of the compose document
//! - running: `name` labels of the containers the engine knows
//!
//! They are recomputed on each call and never cached.

use super::core::is_core;
use crate::compose::{normalize_name, ComposeStore};
use crate::container::ContainerInfo;
use crate::engine::Engine;
use crate::error::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Status listing split by ownership
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Core containers
    pub core: Vec<ContainerInfo>,
    /// Third-party containers that are installed or declared
    pub installed: Vec<ContainerInfo>,
    /// Declared, but no container; start them
    pub declared_not_running: Vec<String>,
    /// On disk, never declared and not running; add them
    pub on_disk_not_declared: Vec<String>,
}

/// One row of the service inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRow {
    pub name: String,
    /// Container status, `N/A` without a container
    pub status: String,
    pub image_built: bool,
    pub declared: bool,
}

/// Declared volumes versus engine volumes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeDiff {
    /// Declared and known to the engine
    pub present: Vec<String>,
    /// Declared, the engine has no such volume
    pub declared_missing: Vec<String>,
    /// Service volumes the engine has that are not declared
    pub undeclared: Vec<String>,
}

/// Computes membership sets and their differences
pub struct Reconciler {
    store: ComposeStore,
    engine: Arc<dyn Engine>,
    install_folder: PathBuf,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(
        store: ComposeStore,
        engine: Arc<dyn Engine>,
        install_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            engine,
            install_folder: install_folder.into(),
        }
    }

    /// Install root
    pub fn install_folder(&self) -> &Path {
        &self.install_folder
    }

    /// Services installed on disk. The install root is created when missing.
    pub fn installed_on_disk(&self) -> Result<BTreeSet<String>> {
        if !self.install_folder.exists() {
            info!("Creating install folder {}", self.install_folder.display());
            std::fs::create_dir_all(&self.install_folder)?;
        }

        let mut installed = BTreeSet::new();
        for entry in std::fs::read_dir(&self.install_folder)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                installed.insert(normalize_name(&entry.file_name().to_string_lossy()));
            }
        }
        Ok(installed)
    }

    /// Declared services outside the core set
    pub fn declared_third_party(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .store
            .load()?
            .service_names()
            .into_iter()
            .filter(|name| !is_core(name))
            .collect())
    }

    /// Declared core services
    pub fn declared_core(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .store
            .load()?
            .service_names()
            .into_iter()
            .filter(|name| is_core(name))
            .collect())
    }

    /// Labelled containers in any state, ordered by name
    pub async fn running_info(&self) -> Result<Vec<ContainerInfo>> {
        let mut containers: Vec<ContainerInfo> = self
            .engine
            .list_containers(true)
            .await?
            .into_iter()
            .filter(|c| !c.name().is_empty())
            .collect();
        containers.sort_by_key(|c| normalize_name(c.name()));
        Ok(containers)
    }

    /// Names of labelled containers
    pub async fn running_labels(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .running_info()
            .await?
            .iter()
            .map(|c| normalize_name(c.name()))
            .collect())
    }

    /// Whether the engine knows a container for `service`
    pub async fn is_running(&self, service: &str) -> Result<bool> {
        Ok(self.running_labels().await?.contains(&normalize_name(service)))
    }

    /// Split containers into core and installed rows and compute the two
    /// advisory lists. Read-only.
    pub async fn diff_for_status(&self) -> Result<StatusReport> {
        let on_disk = self.installed_on_disk()?;
        let declared = self.declared_third_party()?;
        let containers = self.running_info().await?;
        let running: BTreeSet<String> = containers.iter().map(|c| normalize_name(c.name())).collect();

        let mut report = StatusReport::default();
        for container in containers {
            let name = normalize_name(container.name());
            if is_core(&name) {
                report.core.push(container);
            } else if on_disk.contains(&name) || declared.contains(&name) {
                report.installed.push(container);
            }
        }

        report.declared_not_running = declared.difference(&running).cloned().collect();
        report.on_disk_not_declared = on_disk
            .iter()
            .filter(|name| !declared.contains(*name) && !running.contains(*name))
            .cloned()
            .collect();
        Ok(report)
    }

    /// Services a command applies to: the requested names, or every declared
    /// service when nothing was requested.
    pub fn resolve_targets(&self, requested: &[String]) -> Result<Vec<String>> {
        if !requested.is_empty() {
            return Ok(requested.to_vec());
        }
        let mut all = self.declared_third_party()?;
        all.extend(self.declared_core()?);
        Ok(all.into_iter().collect())
    }

    /// Services whose images get saved: the requested names, or everything
    /// installed on disk plus the declared core services.
    pub fn image_targets(&self, requested: &[String]) -> Result<Vec<String>> {
        if !requested.is_empty() {
            return Ok(requested.iter().map(|s| normalize_name(s)).collect());
        }
        let mut all = self.installed_on_disk()?;
        all.extend(self.declared_core()?);
        Ok(all.into_iter().collect())
    }

    /// Third-party inventory: containers built from the install root first,
    /// then declared services without a container, then on-disk leftovers.
    pub async fn inventory(&self) -> Result<Vec<InventoryRow>> {
        let mut on_disk = self.installed_on_disk()?;
        let mut declared = self.declared_third_party()?;
        let install_root = self.install_folder.to_string_lossy().into_owned();

        let mut rows = Vec::new();
        for container in self.running_info().await? {
            let name = normalize_name(container.name());
            if !container
                .mounts
                .iter()
                .any(|m| m.source.contains(&install_root))
            {
                continue;
            }
            rows.push(InventoryRow {
                status: container.status.clone(),
                image_built: true,
                declared: declared.contains(&name),
                name: name.clone(),
            });
            on_disk.remove(&name);
            declared.remove(&name);
        }

        for name in &declared {
            rows.push(InventoryRow {
                name: name.clone(),
                status: "N/A".to_string(),
                image_built: self.engine.image_exists(name).await?,
                declared: true,
            });
        }
        for name in on_disk.difference(&declared) {
            rows.push(InventoryRow {
                name: name.clone(),
                status: "N/A".to_string(),
                image_built: self.engine.image_exists(name).await?,
                declared: false,
            });
        }
        Ok(rows)
    }

    /// Compare declared volumes with the engine's
    pub async fn volume_diff(&self) -> Result<VolumeDiff> {
        let declared: BTreeSet<String> = self
            .store
            .get_volumes()?
            .keys()
            .filter_map(|k| k.as_str().map(String::from))
            .collect();
        let known: BTreeSet<String> = self
            .engine
            .list_volumes()
            .await?
            .into_iter()
            .map(|v| v.name)
            .collect();

        Ok(VolumeDiff {
            present: declared.intersection(&known).cloned().collect(),
            declared_missing: declared.difference(&known).cloned().collect(),
            undeclared: known
                .difference(&declared)
                .filter(|name| name.contains("_volume"))
                .cloned()
                .collect(),
        })
    }
}
