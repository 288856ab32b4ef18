//! Service lifecycle commands

use super::core::ENV_ROLES;
use super::ports::check_ports;
use super::reconcile::Reconciler;
use crate::compose::{normalize_name, ComposeOrchestrator, ComposeStore};
use crate::engine::{copy_frames, Engine};
use crate::error::{BulkOutcome, Result, WardenError};
use crate::settings::EnvBindings;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::{info, warn};

/// Applies start/stop/build/add/remove to the compose document and the engine
pub struct ServiceManager {
    store: ComposeStore,
    reconciler: Reconciler,
    orchestrator: ComposeOrchestrator,
    engine: Arc<dyn Engine>,
    bindings: EnvBindings,
    install_folder: PathBuf,
}

impl ServiceManager {
    /// Create a service manager
    pub fn new(
        store: ComposeStore,
        reconciler: Reconciler,
        orchestrator: ComposeOrchestrator,
        engine: Arc<dyn Engine>,
        bindings: EnvBindings,
    ) -> Self {
        let install_folder = reconciler.install_folder().to_path_buf();
        Self {
            store,
            reconciler,
            orchestrator,
            engine,
            bindings,
            install_folder,
        }
    }

    fn targets(&self, requested: &[String]) -> Result<Vec<String>> {
        let targets: BTreeSet<String> = self
            .reconciler
            .resolve_targets(requested)?
            .iter()
            .map(|s| normalize_name(s))
            .collect();
        Ok(targets.into_iter().collect())
    }

    /// Start services, after making sure their published ports are free
    pub async fn start(&self, requested: &[String], rebuild: bool) -> Result<()> {
        let targets = self.targets(requested)?;
        if targets.is_empty() {
            info!("No services declared, nothing to start");
            return Ok(());
        }
        check_ports(&targets, &self.bindings, ENV_ROLES).await?;
        self.orchestrator.start(&targets, rebuild).await
    }

    /// Stop services; `remove` also deletes their containers
    pub async fn stop(&self, requested: &[String], remove: bool) -> Result<()> {
        let targets = self.targets(requested)?;
        if targets.is_empty() {
            info!("No services declared, nothing to stop");
            return Ok(());
        }
        self.orchestrator.stop(&targets, remove).await
    }

    /// Stop, then start again
    pub async fn restart(&self, requested: &[String], rebuild: bool) -> Result<()> {
        self.stop(requested, false).await?;
        self.start(requested, rebuild).await
    }

    /// Rebuild the named services
    pub async fn build(&self, names: &[String]) -> Result<()> {
        let names: Vec<String> = names.iter().map(|s| normalize_name(s)).collect();
        self.orchestrator.build(&names).await
    }

    /// Declare services with the default definition. Services installed on
    /// disk get a build context pointing at their directory.
    pub async fn add(&self, names: &[String]) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for name in names {
            let name = normalize_name(name);
            let lookup = self.store.get_service(&name)?;
            if lookup.existed {
                info!("{} is already declared", name);
                outcome.ok(name);
                continue;
            }

            let mut definition = lookup.definition;
            let install_dir = self.install_folder.join(&name);
            if install_dir.is_dir() {
                let mut build = Mapping::new();
                build.insert(
                    Value::from("context"),
                    Value::from(install_dir.to_string_lossy().into_owned()),
                );
                definition.set("build", Value::Mapping(build));
            } else {
                warn!(
                    "{} is not installed under {}, declaring it without a build context",
                    name,
                    self.install_folder.display()
                );
            }
            self.store.set_service(&name, definition)?;
            outcome.ok(name);
        }
        Ok(outcome)
    }

    /// Remove services from the document. A service with a container is
    /// stopped and its container removed first, and its `name:latest` image
    /// is dropped. Unknown names are skipped.
    pub async fn remove(&self, names: &[String]) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        let names: Vec<String> = names.iter().map(|s| normalize_name(s)).collect();

        for name in &names {
            if !self.reconciler.is_running(name).await? {
                continue;
            }
            if let Err(e) = self
                .orchestrator
                .stop(std::slice::from_ref(name), true)
                .await
            {
                if e.is_fatal() {
                    return Err(e);
                }
                outcome.warn(name, e);
            }
            let image = format!("{}:latest", name);
            match self.engine.remove_image(&image).await {
                Ok(()) => info!("Removed image {}", image),
                Err(WardenError::NotFound(_)) => {}
                Err(e) => outcome.warn(&image, e),
            }
        }

        for name in self.store.remove_services(&names)? {
            outcome.ok(name);
        }
        Ok(outcome)
    }
}

/// Stream a container's logs, stdout frames to `stdout` and stderr frames to
/// `stderr`. Returns the number of frames written.
pub async fn stream_logs<O, E>(
    engine: &dyn Engine,
    service: &str,
    tail: usize,
    follow: bool,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<usize>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    let service = normalize_name(service);
    let container = engine
        .list_containers(false)
        .await?
        .into_iter()
        .find(|c| c.name() == service)
        .ok_or_else(|| WardenError::NotFound(format!("no running container for {}", service)))?;

    let mut stream = engine.container_logs(&container.id, Some(tail), follow).await?;
    copy_frames(&mut stream, stdout, stderr).await
}

/// Healthcheck state of one container
#[derive(Debug, Clone, PartialEq)]
pub struct HealthEntry {
    pub container: String,
    /// `State.Health`, `null` without a healthcheck
    pub health: serde_json::Value,
}

/// Inspect the health of each container; failures are per-item warnings
pub async fn health_report(
    engine: &dyn Engine,
    containers: &[String],
) -> Result<(Vec<HealthEntry>, BulkOutcome)> {
    let mut entries = Vec::new();
    let mut outcome = BulkOutcome::default();
    for container in containers {
        match engine.inspect_health(container).await {
            Ok(health) => {
                entries.push(HealthEntry {
                    container: container.clone(),
                    health,
                });
                outcome.ok(container.as_str());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => outcome.warn(container, e),
        }
    }
    Ok((entries, outcome))
}
