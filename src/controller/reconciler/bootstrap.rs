//! # Database Bootstrap Supervision
//!
//! Drives the bootstrap Job by diffing against its observed state on every
//! pass. Nothing is tracked in memory: a completed or running Job is never
//! submitted twice, and waiting is expressed as a requeue delay.

use super::error::ReconcilerError;
use super::owner_reference;
use crate::components::bootstrap::{build_job, build_scripts_config_map};
use crate::config::ControllerConfig;
use crate::controller::cluster::{within_deadline, ClusterApi};
use crate::crd::SupabaseProject;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// State of the bootstrap after one supervision step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap {
    Complete,
    /// Check again after the delay
    Pending(Duration),
}

/// What earlier passes recorded about the bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapHistory {
    Fresh,
    /// The Job succeeded before; a cleaned-up Job is not re-run
    Initialized,
    /// The retry ceiling was exceeded. Only a spec change re-arms the Job.
    Exhausted { spec_changed: bool },
}

/// Observed Job counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub succeeded: i32,
    pub failed: i32,
    pub active: i32,
}

impl From<&Job> for JobProgress {
    fn from(job: &Job) -> Self {
        let status = job.status.as_ref();
        Self {
            succeeded: status.and_then(|s| s.succeeded).unwrap_or(0),
            failed: status.and_then(|s| s.failed).unwrap_or(0),
            active: status.and_then(|s| s.active).unwrap_or(0),
        }
    }
}

/// Decide the bootstrap state from an existing Job's counters
pub fn evaluate_job(
    job_name: &str,
    progress: JobProgress,
    config: &ControllerConfig,
) -> Result<Bootstrap, ReconcilerError> {
    if progress.succeeded > 0 {
        return Ok(Bootstrap::Complete);
    }

    if progress.failed > config.bootstrap_retry_ceiling {
        return Err(ReconcilerError::BootstrapExhausted {
            job: job_name.to_string(),
            failures: progress.failed,
            ceiling: config.bootstrap_retry_ceiling,
        });
    }

    if progress.failed > 0 {
        info!(
            job = job_name,
            failures = progress.failed,
            ceiling = config.bootstrap_retry_ceiling,
            "Database initialization job failed, the job will retry"
        );
        return Ok(Bootstrap::Pending(config.bootstrap_requeue));
    }

    Ok(Bootstrap::Pending(config.job_running_requeue))
}

/// Ensure the database has been bootstrapped
///
/// `history` keeps a Job removed by its TTL from being submitted again: after
/// success the bootstrap stays complete, after exhaustion it stays failed
/// until the spec changes. A spec change deletes the failed Job so the next
/// pass submits a fresh one.
pub async fn ensure_bootstrapped<C: ClusterApi>(
    cluster: &C,
    project: &SupabaseProject,
    config: &ControllerConfig,
    history: BootstrapHistory,
    deadline: Instant,
) -> Result<Bootstrap, ReconcilerError> {
    let namespace = project.namespace_or_default();
    let owner = owner_reference(project)?;
    let contract = |e: crate::components::BuildError| ReconcilerError::Contract {
        component: "db-init".to_string(),
        reason: e.to_string(),
    };

    let mut scripts = build_scripts_config_map(project).map_err(contract)?;
    let scripts_name = scripts.metadata.name.clone().unwrap_or_default();
    let existing_scripts: Option<ConfigMap> =
        within_deadline(deadline, cluster.get(namespace, &scripts_name)).await?;
    if existing_scripts.is_none() {
        scripts.metadata.owner_references = Some(vec![owner.clone()]);
        within_deadline(deadline, cluster.create(namespace, &scripts)).await?;
        info!(config_map = %scripts_name, "Created database init scripts");
    }

    let mut job = build_job(project, config.bootstrap_retry_ceiling).map_err(contract)?;
    let job_name = job.metadata.name.clone().unwrap_or_default();
    let existing: Option<Job> = within_deadline(deadline, cluster.get(namespace, &job_name)).await?;

    match (existing, history) {
        (Some(_), BootstrapHistory::Exhausted { spec_changed: true }) => {
            within_deadline(deadline, cluster.delete::<Job>(namespace, &job_name)).await?;
            info!(job = %job_name, "Spec changed, deleted exhausted database init job");
            Ok(Bootstrap::Pending(config.job_started_requeue))
        }
        (Some(existing), _) => evaluate_job(&job_name, JobProgress::from(&existing), config),
        (None, BootstrapHistory::Initialized) => Ok(Bootstrap::Complete),
        (None, BootstrapHistory::Exhausted { spec_changed: false }) => {
            Err(ReconcilerError::BootstrapExhausted {
                job: job_name,
                failures: config.bootstrap_retry_ceiling.saturating_add(1),
                ceiling: config.bootstrap_retry_ceiling,
            })
        }
        (None, _) => {
            job.metadata.owner_references = Some(vec![owner]);
            within_deadline(deadline, cluster.create(namespace, &job)).await?;
            info!(job = %job_name, "🚀 Created database init job");
            Ok(Bootstrap::Pending(config.job_started_requeue))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(succeeded: i32, failed: i32) -> JobProgress {
        JobProgress {
            succeeded,
            failed,
            active: 0,
        }
    }

    #[test]
    fn test_succeeded_job_completes() {
        let config = ControllerConfig::default();
        assert_eq!(
            evaluate_job("acme-db-init", progress(1, 2), &config).unwrap(),
            Bootstrap::Complete
        );
    }

    #[test]
    fn test_failures_within_ceiling_requeue() {
        let config = ControllerConfig::default();
        for failed in 1..=3 {
            assert_eq!(
                evaluate_job("acme-db-init", progress(0, failed), &config).unwrap(),
                Bootstrap::Pending(config.bootstrap_requeue)
            );
        }
    }

    #[test]
    fn test_fourth_failure_is_fatal() {
        let config = ControllerConfig::default();
        let err = evaluate_job("acme-db-init", progress(0, 4), &config).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            ReconcilerError::BootstrapExhausted {
                failures: 4,
                ceiling: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_active_job_waits() {
        let config = ControllerConfig::default();
        assert_eq!(
            evaluate_job("acme-db-init", JobProgress::default(), &config).unwrap(),
            Bootstrap::Pending(config.job_running_requeue)
        );
    }
}
