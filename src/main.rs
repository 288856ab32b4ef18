//! Warden - service registry for a compose-managed container platform
//!
//! This is the main CLI entry point for Warden.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden::compose::{ComposeOrchestrator, ComposeStore};
use warden::engine::{DockerEngine, Engine};
use warden::error::BulkOutcome;
use warden::registry::{
    health_report, reset_database_files, reset_database_volume, stream_logs, Reconciler,
    ServiceManager,
};
use warden::report;
use warden::runtime::ProcessRunner;
use warden::settings::{EnvBindings, Settings};
use warden::storage::VolumeManager;

/// Warden - service registry for a compose-managed container platform
#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Declare, start and inspect platform services", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start services, building images that are missing
    Start {
        /// Service names; all declared services when empty
        services: Vec<String>,
        /// Rebuild every image before starting
        #[arg(long)]
        rebuild: bool,
    },

    /// Stop services
    Stop {
        /// Service names; all declared services when empty
        services: Vec<String>,
        /// Also remove the containers and their anonymous volumes
        #[arg(long)]
        remove: bool,
    },

    /// Stop and start services
    Restart {
        /// Service names; all declared services when empty
        services: Vec<String>,
        /// Rebuild every image before starting
        #[arg(long)]
        rebuild: bool,
    },

    /// Rebuild service images and recreate their containers
    Build {
        /// Service names
        #[arg(required = true)]
        services: Vec<String>,
    },

    /// Remove service containers, keeping their declarations
    Down {
        /// Service names
        #[arg(required = true)]
        services: Vec<String>,
    },

    /// Declare services in the compose file
    Add {
        /// Service names
        #[arg(required = true)]
        services: Vec<String>,
    },

    /// Remove services from the compose file
    Remove {
        /// Service names
        #[arg(required = true)]
        services: Vec<String>,
    },

    /// Show running core and installed services
    Status {
        /// Also list declared services that are not running and
        /// installed services that are not declared
        #[arg(short, long)]
        verbose: bool,
    },

    /// Inventory of third-party services
    Services,

    /// Show a service's container logs
    Logs {
        /// Service name
        service: String,
        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "500")]
        tail: usize,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
    },

    /// Show container health
    Health {
        /// Container names
        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Service definitions
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Volume management
    Volume {
        #[command(subcommand)]
        command: VolumeCommands,
    },

    /// Image management
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },

    /// Database maintenance
    Database {
        #[command(subcommand)]
        command: DatabaseCommands,
    },

    /// Rebuild the web UI inside its running container
    BuildUi,

    /// Show where platform services can be reached
    Info,

    /// Check the engine and compose tool versions
    CheckEngine,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print a service definition
    Show {
        /// Service name
        service: String,
    },
}

#[derive(Subcommand)]
enum VolumeCommands {
    /// List declared volumes
    #[command(name = "ls")]
    List,
    /// Remove a volume and every container using it
    #[command(name = "rm")]
    Remove {
        /// Volume name
        volume: String,
    },
    /// Copy a file into a volume
    CopyIn {
        /// Volume name
        volume: String,
        /// File to copy
        source: PathBuf,
    },
    /// Copy a file out of a volume
    CopyOut {
        /// Volume name
        volume: String,
        /// File name inside the volume
        file: String,
        /// Destination file or directory
        #[arg(default_value = ".")]
        destination: PathBuf,
    },
    /// Compare declared volumes with the engine
    Diff,
}

#[derive(Subcommand)]
enum DatabaseCommands {
    /// Delete the database so the next start creates an empty one
    Reset {
        /// The database lives in a named volume rather than in files under home
        #[arg(long)]
        volume: bool,
    },
}

#[derive(Subcommand)]
enum ImageCommands {
    /// Save service images into one archive
    Save {
        /// Service names; installed and core services when empty
        services: Vec<String>,
    },
    /// Load images from the saved archive
    Load,
    /// Remove untagged images
    Prune,
}

/// Settings and bindings shared by every command
struct Session {
    settings: Settings,
    bindings: EnvBindings,
}

impl Session {
    fn load() -> anyhow::Result<Self> {
        let settings = Settings::load().context("failed to resolve settings")?;
        let bindings = EnvBindings::load(&settings.env_file)?;
        Ok(Self { settings, bindings })
    }

    fn store(&self) -> anyhow::Result<ComposeStore> {
        let store = ComposeStore::new(&self.settings.compose_file);
        store.ensure()?;
        Ok(store)
    }

    async fn engine(&self) -> anyhow::Result<Arc<dyn Engine>> {
        let engine = DockerEngine::connect(&self.settings.engine_socket)
            .await
            .context("is the container engine running?")?;
        Ok(Arc::new(engine))
    }

    fn runner(&self) -> Arc<ProcessRunner> {
        Arc::new(ProcessRunner::new(&self.settings.home).envs(self.bindings.exported()))
    }

    fn reconciler(&self, engine: Arc<dyn Engine>) -> anyhow::Result<Reconciler> {
        Ok(Reconciler::new(
            self.store()?,
            engine,
            &self.settings.install_folder,
        ))
    }

    fn orchestrator(&self, engine: Arc<dyn Engine>) -> anyhow::Result<ComposeOrchestrator> {
        Ok(ComposeOrchestrator::new(self.runner(), engine)?)
    }

    async fn manager(&self) -> anyhow::Result<ServiceManager> {
        let engine = self.engine().await?;
        Ok(ServiceManager::new(
            self.store()?,
            self.reconciler(engine.clone())?,
            self.orchestrator(engine.clone())?,
            engine,
            self.bindings.clone(),
        ))
    }
}

fn print_outcome(outcome: &BulkOutcome) {
    for item in &outcome.succeeded {
        println!("{}", item);
    }
    if !outcome.is_clean() {
        warn!("{} item(s) failed", outcome.warnings.len());
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let session = Session::load()?;

    match command {
        Commands::Start { services, rebuild } => {
            session.manager().await?.start(&services, rebuild).await?;
        }

        Commands::Stop { services, remove } => {
            session.manager().await?.stop(&services, remove).await?;
        }

        Commands::Restart { services, rebuild } => {
            session.manager().await?.restart(&services, rebuild).await?;
        }

        Commands::Build { services } => {
            session.manager().await?.build(&services).await?;
        }

        Commands::Down { services } => {
            let engine = session.engine().await?;
            let services: Vec<String> = services
                .iter()
                .map(|s| warden::compose::normalize_name(s))
                .collect();
            let outcome = session
                .orchestrator(engine)?
                .remove_containers(&services)
                .await?;
            print_outcome(&outcome);
        }

        Commands::Add { services } => {
            let outcome = session.manager().await?.add(&services).await?;
            print_outcome(&outcome);
        }

        Commands::Remove { services } => {
            let outcome = session.manager().await?.remove(&services).await?;
            print_outcome(&outcome);
        }

        Commands::Status { verbose } => {
            let engine = session.engine().await?;
            let status = session.reconciler(engine)?.diff_for_status().await?;
            print!("{}", report::render_status(&status, verbose));
        }

        Commands::Services => {
            let engine = session.engine().await?;
            let rows = session.reconciler(engine)?.inventory().await?;
            print!("{}", report::render_inventory(&rows));
        }

        Commands::Logs {
            service,
            tail,
            follow,
        } => {
            let engine = session.engine().await?;
            let mut stdout = tokio::io::stdout();
            let mut stderr = tokio::io::stderr();
            stream_logs(
                engine.as_ref(),
                &service,
                tail,
                follow,
                &mut stdout,
                &mut stderr,
            )
            .await?;
        }

        Commands::Health { containers } => {
            let engine = session.engine().await?;
            let (entries, outcome) = health_report(engine.as_ref(), &containers).await?;
            print!("{}", report::render_health(&entries));
            if !outcome.is_clean() {
                warn!("{} container(s) could not be inspected", outcome.warnings.len());
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Show { service } => {
                let lookup = session.store()?.get_service(&service)?;
                if !lookup.existed {
                    info!("{} is not declared, showing the default definition", service);
                }
                print!("{}", serde_yaml::to_string(lookup.definition.as_mapping())?);
            }
        },

        Commands::Volume { command } => {
            let engine = session.engine().await?;
            let volumes = VolumeManager::new(engine.clone());
            match command {
                VolumeCommands::List => {
                    let declared: BTreeSet<String> =
                        session.store()?.load()?.volume_names().into_iter().collect();
                    let rows = volumes.report(&declared).await?;
                    print!("{}", report::render_volumes(&rows));
                }
                VolumeCommands::Remove { volume } => {
                    let outcome = volumes.remove(&volume).await?;
                    print_outcome(&outcome);
                }
                VolumeCommands::CopyIn { volume, source } => {
                    let file_name = source
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .with_context(|| format!("{} is not a file", source.display()))?;
                    volumes.copy_into(&source, &file_name, &volume).await?;
                    info!("Copied {} into {}", file_name, volume);
                }
                VolumeCommands::CopyOut {
                    volume,
                    file,
                    destination,
                } => {
                    let target = if destination.is_dir() {
                        destination.join(&file)
                    } else {
                        destination
                    };
                    volumes.copy_from(&volume, &file, &target).await?;
                }
                VolumeCommands::Diff => {
                    let diff = session.reconciler(engine)?.volume_diff().await?;
                    print!("{}", report::render_volume_diff(&diff));
                }
            }
        }

        Commands::Image { command } => {
            let engine = session.engine().await?;
            let archive = session.settings.save_archive();
            match command {
                ImageCommands::Save { services } => {
                    let targets = session.reconciler(engine.clone())?.image_targets(&services)?;
                    let tags =
                        warden::image::save_images(engine.as_ref(), &targets, &archive).await?;
                    for tag in tags {
                        println!("{}", tag);
                    }
                }
                ImageCommands::Load => {
                    warden::image::load_images(engine.as_ref(), &archive).await?;
                }
                ImageCommands::Prune => {
                    let outcome = warden::image::prune_dangling(engine.as_ref()).await?;
                    print_outcome(&outcome);
                }
            }
        }

        Commands::Database { command } => match command {
            DatabaseCommands::Reset { volume: true } => {
                let engine = session.engine().await?;
                let volumes = VolumeManager::new(engine.clone());
                let outcome =
                    reset_database_volume(&session.orchestrator(engine)?, &volumes).await?;
                print_outcome(&outcome);
            }
            DatabaseCommands::Reset { volume: false } => {
                reset_database_files(&session.settings.database_folder)?;
            }
        },

        Commands::BuildUi => {
            let engine = session.engine().await?;
            session.orchestrator(engine)?.build_ui().await?;
        }

        Commands::Info => {
            print!("{}", report::render_connection_info(&session.bindings));
        }

        Commands::CheckEngine => {
            let engine = session.engine().await?;
            let supported = warden::image::check_engine_version(engine.as_ref()).await?;
            let orchestrator = session.orchestrator(engine.clone())?;
            println!("Engine version: {}", engine.version().await?);
            println!(
                "Compose tool: {} ({})",
                orchestrator.tool().program().display(),
                orchestrator.version().await?
            );
            if !supported {
                anyhow::bail!(
                    "engine {} or newer is required",
                    warden::image::MIN_ENGINE_VERSION
                );
            }
        }
    }

    Ok(())
}
