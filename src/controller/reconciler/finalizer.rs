//! # Finalizer
//!
//! The finalizer only holds deletion until the project has been marked
//! `Terminating`; owned objects are reclaimed by garbage collection.

use super::conditions::{set_condition, CONDITION_READY, REASON_RECONCILING};
use super::error::ReconcilerError;
use crate::constants::FINALIZER;
use crate::controller::cluster::{within_deadline, ClusterApi};
use crate::crd::{Phase, SupabaseProject};
use tokio::time::Instant;
use tracing::{info, warn};

/// Add the finalizer, returning the updated project
pub async fn add_finalizer<C: ClusterApi>(
    cluster: &C,
    project: &SupabaseProject,
    deadline: Instant,
) -> Result<SupabaseProject, ReconcilerError> {
    let mut finalizers = project.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());

    let updated =
        within_deadline(deadline, cluster.set_project_finalizers(project, finalizers)).await?;
    info!(resource.name = project.name_or_empty(), "Added finalizer {}", FINALIZER);
    Ok(updated)
}

/// Mark the project `Terminating` (best effort) and release the finalizer
pub async fn finalize<C: ClusterApi>(
    cluster: &C,
    project: &SupabaseProject,
    deadline: Instant,
) -> Result<(), ReconcilerError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut status = project.current_status();
    status.phase = Some(Phase::Terminating);
    status.message = Phase::Terminating.message().to_string();
    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        false,
        REASON_RECONCILING,
        Phase::Terminating.message(),
        &now,
    );
    status.last_reconcile_time = Some(now);

    let written = within_deadline(deadline, cluster.update_project_status(project, &status)).await;
    let project = match written {
        Ok(updated) => updated,
        Err(e) => {
            warn!(
                resource.name = project.name_or_empty(),
                error = %e,
                "Failed to record Terminating status, continuing"
            );
            project.clone()
        }
    };

    let finalizers: Vec<String> = project
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();

    within_deadline(deadline, cluster.set_project_finalizers(&project, finalizers)).await?;
    info!(resource.name = project.name_or_empty(), "Removed finalizer {}", FINALIZER);
    Ok(())
}
