//! Runtime settings
//!
//! Everything lives next to the executable unless `WARDEN_HOME` says
//! otherwise: the compose file, the install root for third-party services,
//! the `.env` bindings and saved image archives.

use crate::compose::DEFAULT_COMPOSE_FILE;
use crate::engine::DEFAULT_SOCKET_PATH;
use crate::error::{Result, WardenError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Overrides the home directory
pub const HOME_VAR: &str = "WARDEN_HOME";

/// Install root for third-party services, under home
pub const INSTALL_FOLDER: &str = "InstalledServices";

/// Environment bindings file, under home
pub const ENV_FILE: &str = ".env";

/// Saved image archives, under home
pub const SAVED_IMAGES_FOLDER: &str = "saved_images";

/// Archive name used by image save/load
pub const SAVE_ARCHIVE: &str = "warden_save.tar";

/// Database files when the database is bind-mounted, under home
pub const DATABASE_FOLDER: &str = "postgres-docker/database";

/// Paths and endpoints for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Base directory
    pub home: PathBuf,
    /// Compose document
    pub compose_file: PathBuf,
    /// Install root for third-party services
    pub install_folder: PathBuf,
    /// `.env` bindings
    pub env_file: PathBuf,
    /// Image archive folder
    pub saved_images_folder: PathBuf,
    /// Bind-mounted database files
    pub database_folder: PathBuf,
    /// Engine unix socket
    pub engine_socket: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_home(".")
    }
}

impl Settings {
    /// Settings rooted at `home`
    pub fn for_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            compose_file: home.join(DEFAULT_COMPOSE_FILE),
            install_folder: home.join(INSTALL_FOLDER),
            env_file: home.join(ENV_FILE),
            saved_images_folder: home.join(SAVED_IMAGES_FOLDER),
            database_folder: home.join(DATABASE_FOLDER),
            engine_socket: PathBuf::from(DEFAULT_SOCKET_PATH),
            home,
        }
    }

    /// Resolve settings from the process environment
    pub fn load() -> Result<Self> {
        let home = match std::env::var_os(HOME_VAR) {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => {
                let exe = std::env::current_exe()?;
                exe.parent().map(Path::to_path_buf).ok_or_else(|| {
                    WardenError::InvalidConfig(format!(
                        "cannot determine the directory of {}",
                        exe.display()
                    ))
                })?
            }
        };

        let settings = Self::for_home(home)
            .with_engine_socket(socket_from_docker_host(std::env::var("DOCKER_HOST").ok().as_deref()));
        debug!("Settings: {:?}", settings);
        Ok(settings)
    }

    /// Use a different engine socket
    pub fn with_engine_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.engine_socket = socket.into();
        self
    }

    /// Image archive written by save and read by load
    pub fn save_archive(&self) -> PathBuf {
        self.saved_images_folder.join(SAVE_ARCHIVE)
    }
}

/// Socket path from a `DOCKER_HOST` value. Only `unix://` hosts are
/// supported; anything else falls back to the default socket.
pub fn socket_from_docker_host(value: Option<&str>) -> PathBuf {
    match value.and_then(|v| v.strip_prefix("unix://")) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_SOCKET_PATH),
    }
}

/// Key/value bindings from the `.env` file.
///
/// Keys are upper-cased. A process environment variable of the same name
/// takes precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvBindings {
    values: BTreeMap<String, String>,
}

impl EnvBindings {
    /// Read bindings from `path`; a missing file gives empty bindings
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No environment file at {}", path.display());
            return Ok(Self::default());
        }

        let parse_error = |e: dotenvy::Error| WardenError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        let mut bindings = Self::default();
        for item in dotenvy::from_path_iter(path).map_err(parse_error)? {
            let (key, value) = item.map_err(parse_error)?;
            bindings.insert(&key, &value);
        }
        bindings.overlay(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        );
        Ok(bindings)
    }

    /// Bindings from key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut bindings = Self::default();
        for (key, value) in pairs {
            bindings.insert(key.as_ref(), value.as_ref());
        }
        bindings
    }

    fn insert(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_uppercase(), value.to_string());
    }

    /// Replace values of keys already present
    fn overlay<I: IntoIterator<Item = (String, String)>>(&mut self, vars: I) {
        for (key, value) in vars {
            if let Some(existing) = self.values.get_mut(&key.to_uppercase()) {
                *existing = value;
            }
        }
    }

    /// String value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_uppercase()).map(String::as_str)
    }

    /// Port value; `None` when unset or not a port number
    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.get_str(key).and_then(|v| v.trim().parse().ok())
    }

    /// Boolean value; unset is `false`
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(
            self.get_str(key).map(|v| v.trim().to_lowercase()).as_deref(),
            Some("true") | Some("1") | Some("yes") | Some("on")
        )
    }

    /// Non-empty bindings, for export to child processes
    pub fn exported(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
