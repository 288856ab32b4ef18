//! Test doubles for the engine and the tool runner.
//!
//! - [`FakeEngine`]: in-memory containers, images, volumes and log streams
//! - [`FakeRunner`]: records compose invocations instead of running them
//! - [`Fixture`]: a temporary home directory wired to both

use crate::compose::{ComposeOrchestrator, ComposeStore, ComposeTool, ServiceDefinition};
use crate::compose::config::NAME_LABEL;
use crate::container::{ContainerInfo, ContainerState};
use crate::engine::api::{DiskUsage, ImageSummary, VolumeSummary, VolumeUsageData};
use crate::engine::{Engine, LogStream};
use crate::error::{Result, WardenError};
use crate::registry::{Reconciler, ServiceManager};
use crate::runtime::CommandRunner;
use crate::settings::{EnvBindings, Settings};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct EngineState {
    containers: Vec<ContainerInfo>,
    images: Vec<ImageSummary>,
    volumes: Vec<VolumeSummary>,
    logs: HashMap<String, Vec<u8>>,
    files: HashMap<String, Vec<u8>>,
}

/// In-memory engine
pub struct FakeEngine {
    state: Mutex<EngineState>,
    version: String,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            version: "24.0.7".to_string(),
        }
    }

    /// A labelled container in the given state
    pub fn container(name: &str, state: &str) -> ContainerInfo {
        let state = ContainerState::from(state);
        let status = match state {
            ContainerState::Running => "Up 5 minutes".to_string(),
            _ => "Exited (0) 2 hours ago".to_string(),
        };
        ContainerInfo {
            id: format!("{}-0123456789ab", name),
            image: name.to_string(),
            labels: HashMap::from([(NAME_LABEL.to_string(), name.to_string())]),
            state,
            status,
            ports: Vec::new(),
            mounts: Vec::new(),
        }
    }

    pub fn with_container(self, container: ContainerInfo) -> Self {
        self.add_container(container);
        self
    }

    pub fn add_container(&self, container: ContainerInfo) {
        self.state.lock().unwrap().containers.push(container);
    }

    pub fn with_image(self, tag: &str) -> Self {
        self.state.lock().unwrap().images.push(ImageSummary {
            id: format!("sha256:{}", tag),
            repo_tags: vec![tag.to_string()],
        });
        self
    }

    pub fn with_untagged_image(self, id: &str) -> Self {
        self.state.lock().unwrap().images.push(ImageSummary {
            id: id.to_string(),
            repo_tags: Vec::new(),
        });
        self
    }

    pub fn with_volume(self, name: &str, size: i64, ref_count: i64) -> Self {
        self.state.lock().unwrap().volumes.push(VolumeSummary {
            name: name.to_string(),
            mountpoint: format!("/var/lib/docker/volumes/{}/_data", name),
            usage_data: Some(VolumeUsageData { size, ref_count }),
        });
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Raw multiplexed log bytes served for a service's container
    pub fn with_logs(self, service: &str, wire: Vec<u8>) -> Self {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(service.to_string(), wire);
        self
    }

    pub fn containers(&self) -> Vec<ContainerInfo> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .iter()
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn has_image(&self, tag: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .images
            .iter()
            .any(|i| i.has_tag(tag))
    }

    /// File copied into a container, by absolute path
    pub fn file_in_container(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    fn find(&self, id_or_name: &str) -> Option<ContainerInfo> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.id == id_or_name || c.name() == id_or_name)
            .cloned()
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .containers()
            .into_iter()
            .filter(|c| all || c.state == ContainerState::Running)
            .collect())
    }

    async fn inspect_health(&self, container: &str) -> Result<serde_json::Value> {
        self.find(container)
            .map(|_| serde_json::json!({"Status": "healthy", "FailingStreak": 0, "Log": []}))
            .ok_or_else(|| WardenError::NotFound(format!("No such container: {}", container)))
    }

    async fn list_images(&self, _all: bool) -> Result<Vec<ImageSummary>> {
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.images.len();
        state.images.retain(|i| i.id != id && !i.has_tag(id));
        if state.images.len() == before {
            return Err(WardenError::NotFound(format!("No such image: {}", id)));
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id && c.name() != id);
        if state.containers.len() == before {
            return Err(WardenError::NotFound(format!("No such container: {}", id)));
        }
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeSummary>> {
        Ok(self.state.lock().unwrap().volumes.clone())
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().volumes.push(VolumeSummary {
            name: name.to_string(),
            mountpoint: format!("/var/lib/docker/volumes/{}/_data", name),
            usage_data: None,
        });
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.volumes.len();
        state.volumes.retain(|v| v.name != name);
        if state.volumes.len() == before {
            return Err(WardenError::NotFound(format!("No such volume: {}", name)));
        }
        Ok(())
    }

    async fn disk_usage(&self) -> Result<DiskUsage> {
        Ok(DiskUsage {
            volumes: self.state.lock().unwrap().volumes.clone(),
        })
    }

    async fn save_images(&self, tags: &[String], destination: &Path) -> Result<()> {
        tokio::fs::write(destination, tags.join("\n")).await?;
        Ok(())
    }

    async fn load_images(&self, archive: &Path) -> Result<()> {
        tokio::fs::metadata(archive).await?;
        Ok(())
    }

    async fn container_logs(
        &self,
        id: &str,
        _tail: Option<usize>,
        _follow: bool,
    ) -> Result<LogStream> {
        let container = self
            .find(id)
            .ok_or_else(|| WardenError::NotFound(format!("No such container: {}", id)))?;
        let wire = self
            .state
            .lock()
            .unwrap()
            .logs
            .get(container.name())
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(std::io::Cursor::new(wire)))
    }

    async fn copy_to_container(&self, id: &str, directory: &str, archive: Vec<u8>) -> Result<()> {
        if self.find(id).is_none() {
            return Err(WardenError::NotFound(format!("No such container: {}", id)));
        }
        let mut unpacked = Vec::new();
        let mut tar = tar::Archive::new(archive.as_slice());
        for entry in tar.entries()? {
            let mut entry = entry?;
            let path = format!(
                "{}/{}",
                directory.trim_end_matches('/'),
                entry.path()?.display()
            );
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            unpacked.push((path, contents));
        }
        self.state.lock().unwrap().files.extend(unpacked);
        Ok(())
    }

    async fn copy_from_container(&self, _id: &str, path: &str) -> Result<Vec<u8>> {
        let contents = self
            .file_in_container(path)
            .ok_or_else(|| WardenError::NotFound(format!("Could not find the file {}", path)))?;
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());

        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, name, contents.as_slice())?;
        Ok(builder.into_inner()?)
    }
}

/// Records tool invocations
pub struct FakeRunner {
    tools: HashMap<String, PathBuf>,
    calls: Mutex<Vec<Vec<String>>>,
    output: String,
}

impl FakeRunner {
    /// Runner that finds the given tools under `/usr/bin`
    pub fn with_tools(tools: &[&str]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|t| (t.to_string(), PathBuf::from("/usr/bin").join(t)))
                .collect(),
            calls: Mutex::new(Vec::new()),
            output: String::new(),
        }
    }

    /// Stdout returned by `capture`
    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    /// Argument lists of every invocation so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        self.tools.get(name).cloned()
    }

    async fn run(&self, _program: &Path, args: &[String]) -> Result<()> {
        self.calls.lock().unwrap().push(args.to_vec());
        Ok(())
    }

    async fn capture(&self, _program: &Path, args: &[String]) -> Result<String> {
        self.calls.lock().unwrap().push(args.to_vec());
        Ok(self.output.clone())
    }
}

/// Temporary home directory with an empty compose file and install root
pub struct Fixture {
    _temp: tempfile::TempDir,
    pub settings: Settings,
    pub engine: Arc<FakeEngine>,
    pub runner: Arc<FakeRunner>,
    pub bindings: EnvBindings,
}

impl Fixture {
    pub fn new(engine: FakeEngine) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let settings = Settings::for_home(temp.path());
        std::fs::create_dir_all(&settings.install_folder).unwrap();
        ComposeStore::new(&settings.compose_file).ensure().unwrap();

        Self {
            _temp: temp,
            settings,
            engine: Arc::new(engine),
            runner: Arc::new(FakeRunner::with_tools(&["docker-compose"])),
            bindings: EnvBindings::default(),
        }
    }

    pub fn with_bindings(mut self, bindings: EnvBindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn store(&self) -> ComposeStore {
        ComposeStore::new(&self.settings.compose_file)
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store(),
            self.engine.clone(),
            &self.settings.install_folder,
        )
    }

    pub fn orchestrator(&self) -> ComposeOrchestrator {
        ComposeOrchestrator::with_tool(
            ComposeTool::Standalone(PathBuf::from("/usr/bin/docker-compose")),
            self.runner.clone(),
            self.engine.clone(),
        )
    }

    pub fn manager(&self) -> ServiceManager {
        ServiceManager::new(
            self.store(),
            self.reconciler(),
            self.orchestrator(),
            self.engine.clone(),
            self.bindings.clone(),
        )
    }

    /// Declare a service with the default definition
    pub fn declare(&self, name: &str) {
        self.store()
            .set_service(name, ServiceDefinition::template(name))
            .unwrap();
    }

    /// Create an install directory for a service
    pub fn install_on_disk(&self, name: &str) {
        std::fs::create_dir_all(self.settings.install_folder.join(name)).unwrap();
    }
}
