//! Operator-facing listings
//!
//! Plain aligned tables written to stdout. Columns are padded to the widest
//! cell plus two spaces.

use crate::container::ContainerInfo;
use crate::registry::core::{EnvRole, Section, ENV_ROLES};
use crate::registry::ports::LOOPBACK;
use crate::registry::{HealthEntry, InventoryRow, StatusReport, VolumeDiff};
use crate::settings::EnvBindings;
use crate::storage::VolumeRow;
use std::fmt::Write;

const PADDING: usize = 2;

/// Column-aligned table
#[derive(Debug, Clone, Default)]
pub struct Table {
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Create a table with a header row
    pub fn new(headers: &[&str]) -> Self {
        Self {
            rows: vec![headers.iter().map(|h| h.to_string()).collect()],
        }
    }

    /// Append a row
    pub fn row(&mut self, cells: Vec<String>) -> &mut Self {
        self.rows.push(cells);
        self
    }

    /// Number of rows below the header
    pub fn len(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render with aligned columns; the last column is not padded
    pub fn render(&self) -> String {
        let columns = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        let widths: Vec<usize> = (0..columns)
            .map(|i| {
                self.rows
                    .iter()
                    .filter_map(|r| r.get(i))
                    .map(|c| c.chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        for row in &self.rows {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                if i + 1 == row.len() {
                    line.push_str(cell);
                } else {
                    let _ = write!(line, "{:<width$}", cell, width = widths[i] + PADDING);
                }
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

fn status_cells(container: &ContainerInfo) -> Vec<String> {
    vec![
        container.name().to_string(),
        container.state.to_string(),
        container.status.clone(),
        container.mount_summary(),
    ]
}

/// Status listing. The advisory sections only appear when `verbose`.
pub fn render_status(report: &StatusReport, verbose: bool) -> String {
    let mut out = String::new();

    let mut core = Table::new(&["CONTAINER NAME", "STATE", "STATUS", "MOUNT", "PORTS"]);
    for container in &report.core {
        let mut cells = status_cells(container);
        cells.push(container.port_summary());
        core.row(cells);
    }
    out.push_str("Core Services\n");
    out.push_str(&core.render());
    out.push('\n');

    let mut installed = Table::new(&["CONTAINER NAME", "STATE", "STATUS", "MOUNT"]);
    for container in &report.installed {
        installed.row(status_cells(container));
    }
    out.push_str("Installed Services\n");
    out.push_str(&installed.render());

    if verbose && !report.declared_not_running.is_empty() {
        out.push_str("\nDeclared services not running, start with: warden start [name]\n");
        out.push_str(&name_table(&report.declared_not_running).render());
    }
    if verbose && !report.on_disk_not_declared.is_empty() {
        out.push_str("\nExtra services on disk, declare with: warden add [name]\n");
        out.push_str(&name_table(&report.on_disk_not_declared).render());
    }
    out
}

fn name_table(names: &[String]) -> Table {
    let mut table = Table::new(&["NAME"]);
    for name in names {
        table.row(vec![name.clone()]);
    }
    table
}

/// Third-party service inventory
pub fn render_inventory(rows: &[InventoryRow]) -> String {
    let mut table = Table::new(&["NAME", "CONTAINER STATUS", "IMAGE BUILT", "DECLARED"]);
    for row in rows {
        table.row(vec![
            row.name.clone(),
            row.status.clone(),
            row.image_built.to_string(),
            row.declared.to_string(),
        ]);
    }
    table.render()
}

/// Volume report
pub fn render_volumes(rows: &[VolumeRow]) -> String {
    let mut table = Table::new(&[
        "VOLUME",
        "SIZE",
        "CONTAINER (REF COUNT)",
        "CONTAINER STATUS",
        "LOCATION",
    ]);
    for row in rows {
        table.row(vec![
            row.name.clone(),
            row.size.clone(),
            row.container.clone(),
            row.status.clone(),
            row.location.clone(),
        ]);
    }
    table.render()
}

/// Declared versus engine volumes
pub fn render_volume_diff(diff: &VolumeDiff) -> String {
    let mut table = Table::new(&["VOLUME", "STATE"]);
    for name in &diff.present {
        table.row(vec![name.clone(), "declared".to_string()]);
    }
    for name in &diff.declared_missing {
        table.row(vec![name.clone(), "declared, not created".to_string()]);
    }
    for name in &diff.undeclared {
        table.row(vec![name.clone(), "not declared".to_string()]);
    }
    table.render()
}

/// Health listing, one JSON document per container
pub fn render_health(entries: &[HealthEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "{}:\n{}\n", entry.container, entry.health);
    }
    out
}

/// Address of a first-party endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRow {
    pub label: String,
    pub address: String,
    pub bound_locally: bool,
    pub section: Section,
}

/// Endpoint for one role. A host equal to the service's own name is
/// reachable through loopback.
pub fn connection_row(role: &EnvRole, bindings: &EnvBindings) -> ConnectionRow {
    let host = match bindings.get_str(role.host_var) {
        Some(host) if host == role.service => LOOPBACK,
        Some(host) => host,
        None => "",
    };
    let scheme = match role.tls_flag {
        Some(flag) if bindings.get_bool(flag) => "https",
        _ => "http",
    };
    let user = role
        .user_var
        .and_then(|var| bindings.get_str(var))
        .unwrap_or_default();
    let port = bindings.get_str(role.port_var).unwrap_or_default();

    ConnectionRow {
        label: role.label.to_string(),
        address: role
            .address
            .replace("{scheme}", scheme)
            .replace("{user}", user)
            .replace("{host}", host)
            .replace("{port}", port),
        bound_locally: bindings.get_bool(role.localhost_flag),
        section: role.section,
    }
}

/// Connection info for every first-party role
pub fn render_connection_info(bindings: &EnvBindings) -> String {
    let rows: Vec<ConnectionRow> = ENV_ROLES
        .iter()
        .map(|role| connection_row(role, bindings))
        .collect();

    let mut out = String::new();
    for (section, headers) in [
        (Section::Web, ["SERVICE", "WEB ADDRESS", "BOUND LOCALLY"]),
        (Section::Additional, ["ADDITIONAL SERVICES", "ADDRESS", "BOUND LOCALLY"]),
    ] {
        let mut table = Table::new(&headers);
        for row in rows.iter().filter(|r| r.section == section) {
            table.row(vec![
                row.label.clone(),
                row.address.clone(),
                row.bound_locally.to_string(),
            ]);
        }
        out.push_str(&table.render());
        out.push('\n');
    }
    out
}
