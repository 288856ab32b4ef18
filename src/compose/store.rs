//! Compose file store
//!
//! Loads, patches and rewrites the compose document. Every mutation re-reads
//! the file and replaces it wholesale, so concurrent invocations follow
//! last-writer-wins.

use super::config::{normalize_name, ComposeDocument, ServiceDefinition};
use crate::error::{Result, WardenError};
use serde_yaml::Mapping;
use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default compose file name
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

/// Mode of a compose file written for the first time
const NEW_FILE_MODE: u32 = 0o644;

/// A service definition as handed out for editing
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceLookup {
    /// Definition (template view when declared, default template otherwise)
    pub definition: ServiceDefinition,
    /// Whether the service was declared
    pub existed: bool,
}

/// Compose document store
#[derive(Debug, Clone)]
pub struct ComposeStore {
    path: PathBuf,
}

impl ComposeStore {
    /// Create a store for the document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure the document exists, creating an empty one when missing
    pub fn ensure(&self) -> Result<()> {
        self.load().map(|_| ())
    }

    /// Load the document. A missing file is replaced with an empty one; a
    /// file that does not parse as a compose mapping is an error.
    pub fn load(&self) -> Result<ComposeDocument> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No compose file at {}, creating an empty one",
                    self.path.display()
                );
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::File::create(&self.path).map_err(|e| self.write_error(e))?;
                return Ok(ComposeDocument::new());
            }
            Err(e) => return Err(e.into()),
        };

        Self::parse_str(&content).map_err(|message| WardenError::Parse {
            path: self.path.display().to_string(),
            message,
        })
    }

    /// Parse a document from a string
    pub fn parse_str(content: &str) -> std::result::Result<ComposeDocument, String> {
        let value: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        ComposeDocument::from_value(value)
    }

    /// Serialize and atomically replace the file. The version tag is set and
    /// the document-level `networks` key is dropped before writing. The
    /// replacement keeps the old file's mode, or gets 0644 when new.
    pub fn persist(&self, document: &mut ComposeDocument) -> Result<()> {
        document.apply_write_defaults();
        let content = serde_yaml::to_string(document)?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let permissions = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata.permissions(),
            Err(_) => Permissions::from_mode(NEW_FILE_MODE),
        };

        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.write_error(e))?;
        staged
            .write_all(content.as_bytes())
            .map_err(|e| self.write_error(e))?;
        staged
            .as_file()
            .set_permissions(permissions)
            .map_err(|e| self.write_error(e))?;
        staged
            .persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;

        debug!("Wrote {}", self.path.display());
        Ok(())
    }

    /// Look up a service for editing. Declared services come back without
    /// their transient keys; unknown services get the default template.
    pub fn get_service(&self, name: &str) -> Result<ServiceLookup> {
        let document = self.load()?;
        Ok(match document.service(name) {
            Some(definition) => ServiceLookup {
                definition: definition.without_transient(),
                existed: true,
            },
            None => ServiceLookup {
                definition: ServiceDefinition::template(&normalize_name(name)),
                existed: false,
            },
        })
    }

    /// Insert or replace a service definition
    pub fn set_service(&self, name: &str, definition: ServiceDefinition) -> Result<()> {
        let mut document = self.load()?;
        let name = normalize_name(name);
        if document.set_service(&name, definition) {
            info!("Added {} to {}", name, self.file_name());
        } else {
            info!("Updated {} in {}", name, self.file_name());
        }
        self.persist(&mut document)
    }

    /// Remove service definitions; names that are not declared are skipped.
    /// Returns the names that were actually removed.
    pub fn remove_services(&self, names: &[String]) -> Result<Vec<String>> {
        let mut document = self.load()?;
        let mut removed = Vec::new();
        for name in names {
            let name = normalize_name(name);
            if document.remove_service(&name) {
                info!("Removed {} from {}", name, self.file_name());
                removed.push(name);
            }
        }
        self.persist(&mut document)?;
        Ok(removed)
    }

    /// Declared volumes
    pub fn get_volumes(&self) -> Result<Mapping> {
        Ok(self.load()?.volumes())
    }

    /// Replace the declared volumes
    pub fn set_volumes(&self, volumes: Mapping) -> Result<()> {
        let mut document = self.load()?;
        document.set_volumes(volumes);
        self.persist(&mut document)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_COMPOSE_FILE.to_string())
    }

    fn write_error(&self, error: std::io::Error) -> WardenError {
        WardenError::Write {
            path: self.path.display().to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::config::{COMPOSE_VERSION, TRANSIENT_KEYS};
    use pretty_assertions::assert_eq;
    use serde_yaml::Value;
    use tempfile::tempdir;

    fn store_with(content: &str) -> (tempfile::TempDir, ComposeStore) {
        let temp = tempdir().unwrap();
        let path = temp.path().join(DEFAULT_COMPOSE_FILE);
        std::fs::write(&path, content).unwrap();
        (temp, ComposeStore::new(path))
    }

    #[test]
    fn test_persist_keeps_file_mode() {
        let (_temp, store) = store_with("services: {}\n");
        std::fs::set_permissions(store.path(), Permissions::from_mode(0o644)).unwrap();

        store
            .set_service("apollo", ServiceDefinition::template("apollo"))
            .unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        assert!(store.load().unwrap().service("apollo").is_some());
    }

    #[test]
    fn test_persist_new_file_is_world_readable() {
        let temp = tempdir().unwrap();
        let store = ComposeStore::new(temp.path().join(DEFAULT_COMPOSE_FILE));

        store.persist(&mut ComposeDocument::new()).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, NEW_FILE_MODE);
    }

    #[test]
    fn test_load_missing_creates_empty_document() {
        let temp = tempdir().unwrap();
        let store = ComposeStore::new(temp.path().join(DEFAULT_COMPOSE_FILE));

        let document = store.load().unwrap();
        assert!(document.service_names().is_empty());
        assert!(store.path().exists());
        // second load reads the created file
        assert!(store.load().is_ok());
    }

    #[test]
    fn test_load_parse_error_is_fatal() {
        let (_temp, store) = store_with("services: [\n");
        let err = store.load().unwrap_err();
        assert!(matches!(err, WardenError::Parse { .. }));
        assert!(err.is_fatal());

        let (_temp, store) = store_with("- just\n- a list\n");
        assert!(matches!(store.load(), Err(WardenError::Parse { .. })));
    }

    #[test]
    fn test_set_then_get_strips_transient_keys() {
        let (_temp, store) = store_with("");
        let definition: ServiceDefinition = serde_yaml::from_str(
            r#"
image: athena
build:
  context: ./InstalledServices/athena
network_mode: host
restart: always
environment:
  - LOG_LEVEL=info
labels:
  name: athena
"#,
        )
        .unwrap();

        store.set_service("Athena", definition.clone()).unwrap();
        let lookup = store.get_service("athena").unwrap();

        assert!(lookup.existed);
        assert_eq!(lookup.definition, definition.without_transient());
        for field in TRANSIENT_KEYS {
            assert!(!lookup.definition.contains(field));
        }

        // the full definition is still on disk
        let document = store.load().unwrap();
        assert_eq!(document.service("athena"), Some(definition));
    }

    #[test]
    fn test_get_missing_service_returns_template() {
        let (_temp, store) = store_with("");
        let lookup = store.get_service("Merlin").unwrap();

        assert!(!lookup.existed);
        assert_eq!(lookup.definition, ServiceDefinition::template("merlin"));
    }

    #[test]
    fn test_set_service_preserves_other_keys() {
        let (_temp, store) = store_with(
            "x-anchors:\n  common: 1\nvolumes:\n  mythic_postgres_volume: {}\nservices:\n  mythic_server:\n    image: mythic_server\n",
        );

        store
            .set_service("poseidon", ServiceDefinition::template("poseidon"))
            .unwrap();
        let document = store.load().unwrap();

        assert!(document.get("x-anchors").is_some());
        assert_eq!(document.volume_names(), vec!["mythic_postgres_volume"]);
        assert!(document.has_service("mythic_server"));
        assert!(document.has_service("poseidon"));
        assert_eq!(document.version(), Some(COMPOSE_VERSION));
    }

    #[test]
    fn test_persist_drops_document_networks() {
        let (_temp, store) = store_with(
            "networks:\n  default:\n    external: true\nservices:\n  a:\n    networks: [default]\n",
        );
        store.set_volumes(Mapping::new()).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: Value = serde_yaml::from_str(&raw).unwrap();
        assert!(value.get("networks").is_none());
        // per-service networks stay on plain rewrites
        assert!(value["services"]["a"].get("networks").is_some());
    }

    #[test]
    fn test_remove_services_is_idempotent() {
        let (_temp, store) = store_with(
            "services:\n  apollo:\n    image: apollo\n  merlin:\n    image: merlin\n",
        );

        let removed = store.remove_services(&["Apollo".to_string()]).unwrap();
        assert_eq!(removed, vec!["apollo"]);
        let first = std::fs::read_to_string(store.path()).unwrap();

        let removed = store.remove_services(&["apollo".to_string()]).unwrap();
        assert!(removed.is_empty());
        let second = std::fs::read_to_string(store.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.load().unwrap().service_names(), vec!["merlin"]);
    }

    #[test]
    fn test_volumes_round_trip() {
        let (_temp, store) = store_with("");
        let mut volumes = Mapping::new();
        volumes.insert(
            Value::String("mythic_jupyter_volume".to_string()),
            Value::Mapping(Mapping::new()),
        );

        store.set_volumes(volumes.clone()).unwrap();
        assert_eq!(store.get_volumes().unwrap(), volumes);
    }
}
