//! Compose orchestration
//!
//! Declarative changes are applied by an external compose tool. The tool is
//! picked once per invocation: a standalone `docker-compose` when installed,
//! else the engine CLI's `compose` plugin. There is no third option.

use crate::engine::Engine;
use crate::error::{BulkOutcome, Result, WardenError};
use crate::runtime::CommandRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Standalone compose executable
pub const STANDALONE_TOOL: &str = "docker-compose";

/// Engine CLI carrying the compose plugin
pub const ENGINE_CLI: &str = "docker";

/// Subcommand prefix for the plugin variant
pub const PLUGIN_SUBCOMMAND: &str = "compose";

/// Container holding the web UI sources
pub const UI_CONTAINER: &str = "mythic_react";

/// Shell command that rebuilds the web UI bundle
pub const UI_BUILD_COMMAND: &str = "npm run react-build";

/// Compose tool variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeTool {
    /// `docker-compose <args>`
    Standalone(PathBuf),
    /// `docker compose <args>`
    Plugin(PathBuf),
}

impl ComposeTool {
    /// Find a compose tool: standalone first, plugin second
    pub fn select(runner: &dyn CommandRunner) -> Result<Self> {
        if let Some(path) = runner.find_executable(STANDALONE_TOOL) {
            debug!("Using standalone compose tool at {}", path.display());
            return Ok(ComposeTool::Standalone(path));
        }
        if let Some(path) = runner.find_executable(ENGINE_CLI) {
            debug!("Using compose plugin of {}", path.display());
            return Ok(ComposeTool::Plugin(path));
        }
        Err(WardenError::EngineUnavailable(format!(
            "neither {} nor {} is installed or available in the current PATH",
            STANDALONE_TOOL, ENGINE_CLI
        )))
    }

    /// Executable to invoke
    pub fn program(&self) -> &Path {
        match self {
            ComposeTool::Standalone(path) | ComposeTool::Plugin(path) => path,
        }
    }

    /// Full argument list for a compose subcommand
    pub fn arguments<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        if let ComposeTool::Plugin(_) = self {
            full.push(PLUGIN_SUBCOMMAND.to_string());
        }
        full.extend(args.iter().map(|a| a.as_ref().to_string()));
        full
    }
}

/// Drives the compose tool for start/stop/build/remove
pub struct ComposeOrchestrator {
    tool: ComposeTool,
    runner: Arc<dyn CommandRunner>,
    engine: Arc<dyn Engine>,
}

impl ComposeOrchestrator {
    /// Create an orchestrator, selecting the compose tool up front
    pub fn new(runner: Arc<dyn CommandRunner>, engine: Arc<dyn Engine>) -> Result<Self> {
        let tool = ComposeTool::select(runner.as_ref())?;
        Ok(Self::with_tool(tool, runner, engine))
    }

    /// Create an orchestrator for an already selected tool
    pub fn with_tool(
        tool: ComposeTool,
        runner: Arc<dyn CommandRunner>,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            tool,
            runner,
            engine,
        }
    }

    /// Selected tool
    pub fn tool(&self) -> &ComposeTool {
        &self.tool
    }

    async fn compose(&self, subcommand: &[&str], services: &[String]) -> Result<()> {
        let mut args: Vec<String> = subcommand.iter().map(|s| s.to_string()).collect();
        args.extend(services.iter().cloned());
        let args = self.tool.arguments(&args);
        self.runner.run(self.tool.program(), &args).await
    }

    /// Version string reported by the compose tool
    pub async fn version(&self) -> Result<String> {
        let args = self.tool.arguments(&["version", "--short"]);
        let output = self.runner.capture(self.tool.program(), &args).await?;
        Ok(output.trim().to_string())
    }

    /// Start services. Without `rebuild`, services whose image already
    /// exists are started as-is and only the rest are built first.
    pub async fn start(&self, services: &[String], rebuild: bool) -> Result<()> {
        if rebuild {
            return self.compose(&["up", "--build", "-d"], services).await;
        }

        let mut need_build = Vec::new();
        let mut built = Vec::new();
        for service in services {
            if self.engine.image_exists(service).await? {
                built.push(service.clone());
            } else {
                need_build.push(service.clone());
            }
        }

        if !need_build.is_empty() {
            info!("Building and starting {}", need_build.join(", "));
            self.compose(&["up", "--build", "-d"], &need_build).await?;
        }
        if !built.is_empty() {
            info!("Starting {}", built.join(", "));
            self.compose(&["up", "-d"], &built).await?;
        }
        Ok(())
    }

    /// Stop services; with `remove` their containers and anonymous volumes go too
    pub async fn stop(&self, services: &[String], remove: bool) -> Result<()> {
        if remove {
            self.compose(&["rm", "-s", "-v", "-f"], services).await
        } else {
            self.compose(&["stop"], services).await
        }
    }

    /// Rebuild services from scratch. Nothing to do for an empty list.
    pub async fn build(&self, services: &[String]) -> Result<()> {
        if services.is_empty() {
            return Ok(());
        }
        self.compose(&["rm", "-s", "-v", "-f"], services).await?;
        self.compose(&["up", "--build", "-d"], services).await
    }

    /// Rebuild the web UI bundle inside its running container. This goes
    /// through the engine CLI whichever compose tool was picked.
    pub async fn build_ui(&self) -> Result<()> {
        let cli = self.runner.find_executable(ENGINE_CLI).ok_or_else(|| {
            WardenError::EngineUnavailable(format!("{} not found on the search path", ENGINE_CLI))
        })?;
        let args: Vec<String> = ["exec", UI_CONTAINER, "/bin/sh", "-c", UI_BUILD_COMMAND]
            .iter()
            .map(|s| s.to_string())
            .collect();
        info!("Building the web UI in {}", UI_CONTAINER);
        self.runner.run(&cli, &args).await
    }

    /// Remove service containers through compose, then force-remove any
    /// container still carrying one of the names.
    pub async fn remove_containers(&self, services: &[String]) -> Result<BulkOutcome> {
        self.compose(&["rm", "-s", "-v", "-f"], services).await?;

        let mut outcome = BulkOutcome::default();
        for service in services {
            match self.engine.remove_container(service).await {
                Ok(()) => outcome.ok(service.as_str()),
                Err(WardenError::NotFound(_)) => outcome.ok(service.as_str()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => outcome.warn(service, e),
            }
        }
        Ok(outcome)
    }
}
