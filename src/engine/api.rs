//! Engine data the registry reads
//!
//! Trimmed views of the engine's container, image and volume models. The
//! bollard models carry most fields as options; these conversions settle
//! the missing ones on empty values once so the rest of the crate never
//! has to.

use crate::container::{ContainerInfo, ContainerState, Mount, PortBinding, Protocol};
use bollard::models;
use serde::{Deserialize, Serialize};

impl From<models::ContainerSummary> for ContainerInfo {
    fn from(summary: models::ContainerSummary) -> Self {
        let state = summary.state.map(|s| s.to_string()).unwrap_or_default();
        Self {
            id: summary.id.unwrap_or_default(),
            image: summary.image.unwrap_or_default(),
            labels: summary.labels.unwrap_or_default(),
            state: ContainerState::from(state.as_str()),
            status: summary.status.unwrap_or_default(),
            ports: summary
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| {
                    let protocol = p.typ.map(|t| t.to_string()).unwrap_or_default();
                    PortBinding {
                        ip: p.ip.unwrap_or_default(),
                        private_port: p.private_port,
                        public_port: p.public_port.unwrap_or_default(),
                        protocol: Protocol::from(protocol.as_str()),
                    }
                })
                .collect(),
            mounts: summary
                .mounts
                .unwrap_or_default()
                .into_iter()
                .map(|m| Mount {
                    name: m.name.unwrap_or_default(),
                    source: m.source.unwrap_or_default(),
                    destination: m.destination.unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// Image list item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

/// Tag the engine reports for images without a repository or tag
pub const DANGLING_TAG: &str = "<none>:<none>";

impl ImageSummary {
    /// Check whether the image carries a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.repo_tags.iter().any(|t| t == tag)
    }

    /// Untagged leftovers from rebuilds. Newer engines report no tags at all
    /// instead of the placeholder.
    pub fn is_dangling(&self) -> bool {
        self.repo_tags.is_empty() || self.has_tag(DANGLING_TAG)
    }
}

impl From<models::ImageSummary> for ImageSummary {
    fn from(image: models::ImageSummary) -> Self {
        Self {
            id: image.id,
            repo_tags: image.repo_tags,
        }
    }
}

/// Volume usage data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeUsageData {
    /// Size in bytes, -1 when not computed
    pub size: i64,
    /// Number of containers referencing the volume
    pub ref_count: i64,
}

/// Volume as listed by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: String,
    pub usage_data: Option<VolumeUsageData>,
}

impl From<models::Volume> for VolumeSummary {
    fn from(volume: models::Volume) -> Self {
        Self {
            name: volume.name,
            mountpoint: volume.mountpoint,
            usage_data: volume.usage_data.map(|u| VolumeUsageData {
                size: u.size,
                ref_count: u.ref_count,
            }),
        }
    }
}

/// Disk usage, volumes only
#[derive(Debug, Clone, Default)]
pub struct DiskUsage {
    pub volumes: Vec<VolumeSummary>,
}

impl From<models::SystemDataUsageResponse> for DiskUsage {
    fn from(usage: models::SystemDataUsageResponse) -> Self {
        Self {
            volumes: usage
                .volumes
                .unwrap_or_default()
                .into_iter()
                .map(VolumeSummary::from)
                .collect(),
        }
    }
}

/// Error body the engine sends with non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
