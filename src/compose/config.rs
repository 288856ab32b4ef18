//! Compose document and service definition types
//!
//! The document is deliberately schema-light: third-party service
//! definitions are open-ended, so both the document and every service are
//! backed by a YAML mapping. A handful of known fields get typed accessors.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Compose file version written on every save
pub const COMPOSE_VERSION: &str = "2.4";

/// Top-level keys
pub const SERVICES_KEY: &str = "services";
pub const VOLUMES_KEY: &str = "volumes";
pub const VERSION_KEY: &str = "version";
pub const NETWORKS_KEY: &str = "networks";

/// Service keys computed by the engine or carrying identity. They are left out
/// when a stored definition is handed out as a template for mutation.
pub const TRANSIENT_KEYS: &[&str] = &[
    "network_mode",
    "extra_hosts",
    "build",
    "networks",
    "command",
    "image",
    "healthcheck",
];

/// Label the engine uses to identify which service a container belongs to
pub const NAME_LABEL: &str = "name";

/// Normalize a service name for use as a map key or engine label
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

/// A single service definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceDefinition(Mapping);

impl ServiceDefinition {
    /// Create an empty definition
    pub fn new() -> Self {
        Self(Mapping::new())
    }

    /// Default definition for a service that is not declared yet
    pub fn template(name: &str) -> Self {
        let mut logging_options = Mapping::new();
        logging_options.insert(key("max-file"), key("1"));
        logging_options.insert(key("max-size"), key("10m"));

        let mut logging = Mapping::new();
        logging.insert(key("driver"), key("json-file"));
        logging.insert(key("options"), Value::Mapping(logging_options));

        let mut labels = Mapping::new();
        labels.insert(key(NAME_LABEL), key(name));

        Self::new()
            .with("logging", Value::Mapping(logging))
            .with("restart", key("always"))
            .with("labels", Value::Mapping(labels))
            .with("container_name", key(name))
            .with("image", key(name))
    }

    /// Builder-style insert
    pub fn with(mut self, field: &str, value: Value) -> Self {
        self.set(field, value);
        self
    }

    /// Get a raw field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a raw field
    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(key(field), value);
    }

    /// Remove a raw field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Check whether a field is present
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Copy with the transient keys removed
    pub fn without_transient(&self) -> Self {
        let mut stripped = self.clone();
        for field in TRANSIENT_KEYS {
            stripped.remove(field);
        }
        stripped
    }

    /// Restart policy
    pub fn restart(&self) -> Option<&str> {
        self.get("restart").and_then(Value::as_str)
    }

    /// Container name
    pub fn container_name(&self) -> Option<&str> {
        self.get("container_name").and_then(Value::as_str)
    }

    /// Image reference
    pub fn image(&self) -> Option<&str> {
        self.get("image").and_then(Value::as_str)
    }

    /// Label value; labels may be given as a map or as `key=value` strings
    pub fn label(&self, label: &str) -> Option<String> {
        match self.get("labels")? {
            Value::Mapping(map) => map.get(label).and_then(scalar_to_string),
            Value::Sequence(items) => items.iter().filter_map(Value::as_str).find_map(|item| {
                item.split_once('=')
                    .filter(|(k, _)| *k == label)
                    .map(|(_, v)| v.to_string())
            }),
            _ => None,
        }
    }

    /// Build context, from either the short or the long `build` syntax
    pub fn build_context(&self) -> Option<&str> {
        match self.get("build")? {
            Value::String(context) => Some(context.as_str()),
            Value::Mapping(map) => map.get("context").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Underlying mapping
    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    /// Take the underlying mapping
    pub fn into_mapping(self) -> Mapping {
        self.0
    }
}

impl From<Mapping> for ServiceDefinition {
    fn from(mapping: Mapping) -> Self {
        Self(mapping)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The whole compose document
///
/// Every top-level key is kept verbatim so hand edits survive a rewrite; only
/// `services` and `volumes` get structured access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComposeDocument(Mapping);

impl ComposeDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self(Mapping::new())
    }

    /// Build a document from a parsed YAML value. An empty file parses as
    /// null and is treated as an empty document.
    pub fn from_value(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Mapping(mapping) => {
                let document = Self(mapping);
                for sub in [SERVICES_KEY, VOLUMES_KEY] {
                    match document.0.get(sub) {
                        None | Some(Value::Null) | Some(Value::Mapping(_)) => {}
                        Some(_) => return Err(format!("'{}' must be a mapping", sub)),
                    }
                }
                Ok(document)
            }
            _ => Err("top level must be a mapping".to_string()),
        }
    }

    /// Raw top-level field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a raw top-level field
    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(key(field), value);
    }

    /// Remove a raw top-level field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Version tag, if any
    pub fn version(&self) -> Option<&str> {
        self.get(VERSION_KEY).and_then(Value::as_str)
    }

    fn sub_mapping(&self, field: &str) -> Option<&Mapping> {
        self.get(field).and_then(Value::as_mapping)
    }

    /// Names of all declared services
    pub fn service_names(&self) -> Vec<String> {
        self.sub_mapping(SERVICES_KEY)
            .map(|services| {
                services
                    .keys()
                    .filter_map(Value::as_str)
                    .map(normalize_name)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stored service definition, verbatim
    pub fn service(&self, name: &str) -> Option<ServiceDefinition> {
        let services = self.sub_mapping(SERVICES_KEY)?;
        let wanted = normalize_name(name);
        services.iter().find_map(|(k, v)| {
            let matches = k.as_str().map(normalize_name).as_deref() == Some(wanted.as_str());
            match (matches, v) {
                (true, Value::Mapping(mapping)) => Some(ServiceDefinition::from(mapping.clone())),
                (true, Value::Null) => Some(ServiceDefinition::new()),
                _ => None,
            }
        })
    }

    /// Check whether a service is declared
    pub fn has_service(&self, name: &str) -> bool {
        self.service(name).is_some()
    }

    /// Insert or replace a service; returns true when it was new
    pub fn set_service(&mut self, name: &str, definition: ServiceDefinition) -> bool {
        let existed = self.remove_service(name);
        let mut services = self.sub_mapping(SERVICES_KEY).cloned().unwrap_or_default();
        services.insert(
            key(&normalize_name(name)),
            Value::Mapping(definition.into_mapping()),
        );
        self.set(SERVICES_KEY, Value::Mapping(services));
        !existed
    }

    /// Remove a service; returns true when something was removed
    pub fn remove_service(&mut self, name: &str) -> bool {
        let wanted = normalize_name(name);
        let Some(Value::Mapping(services)) = self.0.get_mut(SERVICES_KEY) else {
            return false;
        };
        let matching: Vec<Value> = services
            .keys()
            .filter(|k| k.as_str().map(normalize_name).as_deref() == Some(wanted.as_str()))
            .cloned()
            .collect();
        for k in &matching {
            services.remove(k);
        }
        !matching.is_empty()
    }

    /// Declared volumes
    pub fn volumes(&self) -> Mapping {
        self.sub_mapping(VOLUMES_KEY).cloned().unwrap_or_default()
    }

    /// Replace the whole volumes subtree
    pub fn set_volumes(&mut self, volumes: Mapping) {
        self.set(VOLUMES_KEY, Value::Mapping(volumes));
    }

    /// Names of declared volumes
    pub fn volume_names(&self) -> Vec<String> {
        self.sub_mapping(VOLUMES_KEY)
            .map(|volumes| {
                volumes
                    .keys()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Apply the rules every save must follow: the version tag is set and
    /// the document-level `networks` key is dropped.
    pub fn apply_write_defaults(&mut self) {
        self.set(VERSION_KEY, key(COMPOSE_VERSION));
        self.remove(NETWORKS_KEY);
    }

    /// Underlying mapping
    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }
}
