//! Port precheck
//!
//! Before starting core services whose ports this host publishes, make sure
//! nothing else already listens there. A collision found later by the
//! engine is much harder to read.

use super::core::EnvRole;
use crate::compose::normalize_name;
use crate::error::{Result, WardenError};
use crate::settings::EnvBindings;
use tokio::net::TcpListener;
use tracing::debug;

/// Loopback address
pub const LOOPBACK: &str = "127.0.0.1";

/// A port that was checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCheck {
    pub service: String,
    pub port: u16,
    pub variable: String,
}

/// Result of a precheck
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortPlan {
    /// Ports found free
    pub checked: Vec<PortCheck>,
    /// Services bound to some other host, not checked
    pub skipped: Vec<String>,
}

/// Probe the ports of every role whose service is in `services` and whose
/// host binding is the service itself or loopback. The first port in use
/// aborts the check.
pub async fn check_ports(
    services: &[String],
    bindings: &EnvBindings,
    roles: &[EnvRole],
) -> Result<PortPlan> {
    let services: Vec<String> = services.iter().map(|s| normalize_name(s)).collect();
    let mut plan = PortPlan::default();

    for role in roles {
        if !services.iter().any(|s| s == role.service) {
            continue;
        }

        let host = bindings.get_str(role.host_var).unwrap_or_default();
        if host != role.service && host != LOOPBACK {
            debug!("Skipping port check for {}, bound to {:?}", role.service, host);
            plan.skipped.push(role.service.to_string());
            continue;
        }

        let port = bindings.get_u16(role.port_var).ok_or_else(|| {
            WardenError::InvalidConfig(format!(
                "{} is not set to a valid port",
                role.port_var
            ))
        })?;

        try_bind(port).await.map_err(|e| WardenError::PortConflict {
            port,
            variable: role.port_var.to_string(),
            reason: e.to_string(),
        })?;

        debug!("Port {} for {} is free", port, role.service);
        plan.checked.push(PortCheck {
            service: role.service.to_string(),
            port,
            variable: role.port_var.to_string(),
        });
    }

    Ok(plan)
}

/// Bind on all interfaces and release immediately
async fn try_bind(port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    drop(listener);
    Ok(())
}
