//! Container information as reported by the engine

use crate::compose::config::NAME_LABEL;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container is created but not running
    Created,
    /// Container is running
    Running,
    /// Container is paused
    Paused,
    /// Container is restarting
    Restarting,
    /// Container is being removed
    Removing,
    /// Container has exited
    Exited,
    /// Container is in an error state
    Dead,
    /// State string the engine reported that we do not model
    Other(String),
}

impl From<&str> for ContainerState {
    fn from(state: &str) -> Self {
        match state {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            other => ContainerState::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Restarting => write!(f, "restarting"),
            ContainerState::Removing => write!(f, "removing"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Dead => write!(f, "dead"),
            ContainerState::Other(other) => write!(f, "{}", other),
        }
    }
}

/// Network protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl From<&str> for Protocol {
    fn from(protocol: &str) -> Self {
        match protocol {
            "udp" => Protocol::Udp,
            "sctp" => Protocol::Sctp,
            _ => Protocol::Tcp,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

/// Address every interface binds to
pub const ALL_INTERFACES: &str = "0.0.0.0";

/// Published port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host address the port is published on
    pub ip: String,
    /// Port inside the container
    pub private_port: u16,
    /// Port on the host, 0 when not published
    pub public_port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    /// Same port inside and out, published on every interface
    pub fn is_identity(&self) -> bool {
        self.private_port == self.public_port && self.ip == ALL_INTERFACES
    }
}

/// Mount attached to a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Volume name, empty for bind mounts
    pub name: String,
    /// Source path on the host
    pub source: String,
    /// Path inside the container
    pub destination: String,
}

/// A container the engine knows about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Engine container ID
    pub id: String,
    /// Image the container runs
    pub image: String,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Lifecycle state
    pub state: ContainerState,
    /// Free-text status, e.g. "Up 3 hours"
    pub status: String,
    /// Port bindings
    pub ports: Vec<PortBinding>,
    /// Mounts
    pub mounts: Vec<Mount>,
}

impl ContainerInfo {
    /// Service name from the `name` label, empty when unlabelled
    pub fn name(&self) -> &str {
        self.labels.get(NAME_LABEL).map(String::as_str).unwrap_or("")
    }

    /// Volume mounts following the `<service>_volume` naming convention
    pub fn service_volumes(&self) -> Vec<&str> {
        let prefix = format!("{}_volume", self.name());
        self.mounts
            .iter()
            .filter(|m| m.name.starts_with(&prefix))
            .map(|m| m.name.as_str())
            .collect()
    }

    /// Mount column for listings: service volumes, or "local"
    pub fn mount_summary(&self) -> String {
        let volumes = self.service_volumes();
        if volumes.is_empty() {
            "local".to_string()
        } else {
            volumes.join(", ")
        }
    }

    /// Published ports, rendered for listings.
    ///
    /// Identity mappings come first as a bare ascending list, followed by
    /// explicit `private/proto -> ip:public` entries. Unpublished ports are
    /// left out.
    pub fn port_summary(&self) -> String {
        render_ports(&self.ports)
    }
}

/// Render port bindings for listings
pub fn render_ports(ports: &[PortBinding]) -> String {
    let mut published: Vec<&PortBinding> = ports.iter().filter(|p| p.public_port > 0).collect();
    published.sort_by_key(|p| (p.public_port, p.private_port));

    let mut bare: Vec<u16> = published
        .iter()
        .filter(|p| p.is_identity())
        .map(|p| p.private_port)
        .collect();
    bare.sort_unstable();
    bare.dedup();

    let mut parts: Vec<String> = bare.iter().map(u16::to_string).collect();
    parts.extend(
        published
            .iter()
            .filter(|p| !p.is_identity())
            .map(|p| format!("{}/{} -> {}:{}", p.private_port, p.protocol, p.ip, p.public_port)),
    );
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(ip: &str, private_port: u16, public_port: u16) -> PortBinding {
        PortBinding {
            ip: ip.to_string(),
            private_port,
            public_port,
            protocol: Protocol::Tcp,
        }
    }

    #[test]
    fn test_render_ports_bare_then_mapped() {
        let ports = vec![
            port("127.0.0.1", 5432, 5432),
            port("0.0.0.0", 7443, 7443),
            port("0.0.0.0", 80, 8080),
            port("0.0.0.0", 17443, 17443),
            port("", 9000, 0),
        ];

        assert_eq!(
            render_ports(&ports),
            "7443, 17443, 5432/tcp -> 127.0.0.1:5432, 80/tcp -> 0.0.0.0:8080"
        );
    }

    #[test]
    fn test_render_ports_empty() {
        assert_eq!(render_ports(&[]), "");
        assert_eq!(render_ports(&[port("", 80, 0)]), "");
    }

    #[test]
    fn test_mount_summary() {
        let mut info = ContainerInfo {
            id: "abc".to_string(),
            image: "mythic_postgres".to_string(),
            labels: HashMap::from([(NAME_LABEL.to_string(), "mythic_postgres".to_string())]),
            state: ContainerState::Running,
            status: "Up 2 hours".to_string(),
            ports: Vec::new(),
            mounts: vec![Mount {
                name: "unrelated".to_string(),
                source: "/var/lib/docker/volumes/unrelated".to_string(),
                destination: "/x".to_string(),
            }],
        };
        assert_eq!(info.mount_summary(), "local");

        info.mounts.push(Mount {
            name: "mythic_postgres_volume".to_string(),
            source: String::new(),
            destination: "/var/lib/postgresql/data".to_string(),
        });
        assert_eq!(info.mount_summary(), "mythic_postgres_volume");
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!(ContainerState::from("running"), ContainerState::Running);
        assert_eq!(
            ContainerState::from("weird"),
            ContainerState::Other("weird".to_string())
        );
        assert_eq!(ContainerState::Exited.to_string(), "exited");
    }
}
