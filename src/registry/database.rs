//! Database reset
//!
//! The platform database keeps its data either in a named volume or in
//! bind-mounted files under home. A reset throws that data away; the next
//! start initialises an empty database.

use crate::compose::ComposeOrchestrator;
use crate::error::{BulkOutcome, Result, WardenError};
use crate::storage::VolumeManager;
use std::path::Path;
use tracing::info;

/// Database service and container name
pub const DATABASE_CONTAINER: &str = "mythic_postgres";

/// Volume holding the database when it is not bind-mounted
pub const DATABASE_VOLUME: &str = "mythic_postgres_volume";

/// Delete the bind-mounted database files. Returns false when there were
/// none.
pub fn reset_database_files(folder: &Path) -> Result<bool> {
    match std::fs::remove_dir_all(folder) {
        Ok(()) => {
            info!("Removed database files in {}", folder.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No database files in {}", folder.display());
            Ok(false)
        }
        Err(e) => Err(WardenError::Write {
            path: folder.display().to_string(),
            message: e.to_string(),
        }),
    }
}

/// Remove the database container, then the database volume along with
/// anything else still mounting it. A container that cannot be removed is
/// a warning; the volume removal still runs.
pub async fn reset_database_volume(
    orchestrator: &ComposeOrchestrator,
    volumes: &VolumeManager,
) -> Result<BulkOutcome> {
    let mut outcome = match orchestrator
        .remove_containers(&[DATABASE_CONTAINER.to_string()])
        .await
    {
        Ok(outcome) => outcome,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            let mut outcome = BulkOutcome::default();
            outcome.warn(DATABASE_CONTAINER, e);
            outcome
        }
    };

    let removed = volumes.remove(DATABASE_VOLUME).await?;
    outcome.succeeded.extend(removed.succeeded);
    outcome.warnings.extend(removed.warnings);
    Ok(outcome)
}
