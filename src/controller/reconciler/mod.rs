//! # Reconciler
//!
//! One reconciliation pass for a `SupabaseProject`:
//!
//! 1. Resolve the project, handle deletion, ensure the finalizer
//! 2. Validate external dependency bundles
//! 3. Ensure the credential bundle
//! 4. Supervise the database bootstrap Job
//! 5. Converge the seven components
//!
//! The pass is the only writer of `phase`, `message`, and the top-level
//! conditions. Steps return their errors here; the state machine alone
//! decides phase, conditions, and the requeue delay. Status is written once
//! per pass, and only when it changed.

pub mod bootstrap;
pub mod components;
pub mod conditions;
pub mod credentials;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod phase;
pub mod status;
pub mod validation;

pub use bootstrap::{Bootstrap, BootstrapHistory};
pub use components::ComponentObservation;
pub use error::{ReconcilerError, ValidationError};
pub use phase::PhaseTracker;

use crate::config::ControllerConfig;
use crate::constants::{DEPENDENCY_DASHBOARD_AUTH, FINALIZER};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::cluster::{within_deadline, ClusterApi};
use crate::crd::{Phase, SupabaseProject, SupabaseProjectStatus};
use crate::observability::metrics;
use conditions::{
    find_condition, is_condition_true, set_condition, CONDITION_DATABASE_INITIALIZED,
    CONDITION_SECRETS_READY, REASON_DATABASE_INITIALIZED, REASON_DATABASE_INIT_EXHAUSTED,
    REASON_SECRETS_CREATED, REASON_WAITING_FOR_DATABASE_INIT,
};
use credentials::CredentialOutcome;
use events::{emit, LifecycleEvent};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-resource error backoff, consulted by the error policy
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}

/// Reconciliation step, used to pick failure reasons and requeue delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Dependencies,
    Secrets,
    Bootstrap,
    Components,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Dependencies => "dependencies",
            Step::Secrets => "secrets",
            Step::Bootstrap => "bootstrap",
            Step::Components => "components",
        }
    }

    /// Prefix of the status message when the step fails
    pub fn failure_summary(self) -> &'static str {
        match self {
            Step::Dependencies => "Dependency validation failed",
            Step::Secrets => "Secret generation failed",
            Step::Bootstrap => "Database initialization failed",
            Step::Components => "Component deployment failed",
        }
    }

    pub fn requeue_delay(self, config: &ControllerConfig) -> Duration {
        match self {
            Step::Dependencies => config.dependency_requeue,
            Step::Secrets => config.secrets_requeue,
            Step::Bootstrap => config.bootstrap_requeue,
            Step::Components => config.components_requeue,
        }
    }

    fn failure_event(self) -> LifecycleEvent {
        match self {
            Step::Dependencies => LifecycleEvent::ValidationFailed,
            Step::Secrets => LifecycleEvent::SecretsFailed,
            Step::Bootstrap => LifecycleEvent::DatabaseInitFailed,
            Step::Components => LifecycleEvent::ComponentDeploymentFailed,
        }
    }
}

/// What the caller should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Nothing left to do for this object
    Done,
    RequeueAfter(Duration),
    /// Fatal failure; wait for the project to change
    AwaitChange,
}

/// Outcome of one pass
#[derive(Debug)]
pub struct PassReport {
    /// Phases entered during the pass, in order
    pub phase_trail: Vec<Phase>,
    pub next: NextAction,
    /// Step error recorded in status, if the pass failed
    pub failure: Option<ReconcilerError>,
}

impl PassReport {
    fn done(phase_trail: Vec<Phase>) -> Self {
        Self {
            phase_trail,
            next: NextAction::Done,
            failure: None,
        }
    }
}

/// Result of running the steps without a step error
enum StepsOutcome {
    Converged(Vec<ComponentObservation>),
    WaitingForBootstrap(Duration),
}

/// Controller owner reference to the project
pub(crate) fn owner_reference(
    project: &SupabaseProject,
) -> Result<OwnerReference, ReconcilerError> {
    project
        .controller_owner_ref(&())
        .ok_or_else(|| ReconcilerError::Contract {
            component: "SupabaseProject".to_string(),
            reason: "project has no name or uid".to_string(),
        })
}

/// Reconciler context shared by all passes
#[derive(Debug)]
pub struct Reconciler<C: ClusterApi> {
    cluster: C,
    config: ControllerConfig,
    /// Fibonacci backoff per `namespace/name`, advanced by the error policy
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl<C: ClusterApi> Reconciler<C> {
    pub fn new(cluster: C, config: ControllerConfig) -> Self {
        Self {
            cluster,
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Forget the error backoff of a resource after a successful pass
    pub fn reset_backoff(&self, resource_key: &str) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                states.remove(resource_key);
            }
            Err(e) => warn!("Failed to lock backoff_states: {}", e),
        }
    }

    /// Run one reconciliation pass for `namespace/name`
    ///
    /// Step failures are recorded in status and reported in the returned
    /// [`PassReport`]. An `Err` means the outcome could not be recorded
    /// (project read, finalizer, or status write failed).
    pub async fn reconcile_pass(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PassReport, ReconcilerError> {
        let deadline = Instant::now() + self.config.reconcile_timeout;

        let project: Option<SupabaseProject> =
            within_deadline(deadline, self.cluster.get(namespace, name)).await?;
        let Some(project) = project else {
            debug!(
                resource.namespace = namespace,
                resource.name = name,
                "Project no longer exists"
            );
            return Ok(PassReport::done(Vec::new()));
        };

        if project.is_deleting() {
            if !project.has_finalizer(FINALIZER) {
                return Ok(PassReport::done(Vec::new()));
            }
            finalizer::finalize(&self.cluster, &project, deadline).await?;
            emit(
                &self.cluster,
                &project,
                LifecycleEvent::PhaseChanged(Phase::Terminating),
                Phase::Terminating.message(),
            )
            .await;
            return Ok(PassReport::done(vec![Phase::Terminating]));
        }

        let project = if project.has_finalizer(FINALIZER) {
            project
        } else {
            finalizer::add_finalizer(&self.cluster, &project, deadline).await?
        };

        let previous = project.current_status();
        let mut status = previous.clone();
        let now = chrono::Utc::now().to_rfc3339();
        let mut tracker = PhaseTracker::new(previous.phase);

        let outcome = self
            .run_steps(&project, &previous, &mut status, &mut tracker, &now, deadline)
            .await;

        let (next, failure) = match outcome {
            Ok(StepsOutcome::Converged(observations)) => {
                status::mark_running(&mut status, &project, &observations, &now);
                (NextAction::RequeueAfter(self.config.resync_interval), None)
            }
            Ok(StepsOutcome::WaitingForBootstrap(delay)) => {
                let phase = tracker.current().unwrap_or(Phase::InitializingDatabase);
                let reason = REASON_WAITING_FOR_DATABASE_INIT;
                status::mark_progressing(&mut status, phase, reason, &now);
                metrics::increment_requeues_total("bootstrap-wait");
                (NextAction::RequeueAfter(delay), None)
            }
            Err((step, error)) => {
                // Failed is reachable from every phase
                let _ = tracker.enter(Phase::Failed);
                status::mark_failed(&mut status, step, &error, &now);
                if error.is_fatal() {
                    status.observed_generation = project.metadata.generation;
                }
                metrics::increment_step_failures(step.as_str(), error.as_str());
                emit(&self.cluster, &project, step.failure_event(), &status.message).await;

                let next = if error.is_fatal() {
                    NextAction::AwaitChange
                } else if error.is_conflict() {
                    metrics::increment_requeues_total("conflict");
                    NextAction::RequeueAfter(self.config.conflict_requeue)
                } else {
                    metrics::increment_requeues_total(step.as_str());
                    NextAction::RequeueAfter(step.requeue_delay(&self.config))
                };
                (next, Some(error))
            }
        };

        // A resync walks back to Running; only report the walk when the phase moved
        if status.phase != previous.phase {
            for phase in tracker.trail() {
                let event = LifecycleEvent::PhaseChanged(*phase);
                emit(&self.cluster, &project, event, phase.message()).await;
            }
        }
        info!(
            resource.name = name,
            trail = ?tracker.trail(),
            next = ?next,
            "Reconciliation pass finished"
        );

        status.last_reconcile_time = Some(now);
        if status::status_changed(&previous, &status) {
            within_deadline(deadline, self.cluster.update_project_status(&project, &status)).await?;
            debug!(resource.name = name, phase = ?status.phase, "Status updated");
        } else {
            debug!(resource.name = name, "Status unchanged, skipping update");
        }

        if previous.phase != Some(Phase::Running) && status.phase == Some(Phase::Running) {
            emit(
                &self.cluster,
                &project,
                LifecycleEvent::ReconciliationComplete,
                "SupabaseProject is running",
            )
            .await;
        }

        Ok(PassReport {
            phase_trail: tracker.into_trail(),
            next,
            failure,
        })
    }

    async fn run_steps(
        &self,
        project: &SupabaseProject,
        previous: &SupabaseProjectStatus,
        status: &mut SupabaseProjectStatus,
        tracker: &mut PhaseTracker,
        now: &str,
        deadline: Instant,
    ) -> Result<StepsOutcome, (Step, ReconcilerError)> {
        let generation_changed = previous.observed_generation.is_some()
            && project.metadata.generation != previous.observed_generation;
        if tracker.current() == Some(Phase::Running) && generation_changed {
            info!(
                resource.name = project.name_or_empty(),
                "🔄 Spec changed, updating components"
            );
            tracker.enter(Phase::Updating).map_err(|e| (Step::Dependencies, e))?;
        }

        // Dependencies
        tracker
            .enter(Phase::ValidatingDependencies)
            .map_err(|e| (Step::Dependencies, e))?;
        let mut checks = Vec::new();
        let validated =
            validation::validate_dependencies(&self.cluster, project, deadline, &mut checks).await;
        status::record_dependencies(status, &checks, now);
        if !checks.iter().any(|c| c.dependency == DEPENDENCY_DASHBOARD_AUTH) && validated.is_ok() {
            status::forget_dependency(status, DEPENDENCY_DASHBOARD_AUTH);
        }
        validated.map_err(|e| (Step::Dependencies, e))?;
        if !previous_dependencies_ok(previous, &checks) {
            emit(
                &self.cluster,
                project,
                LifecycleEvent::DependenciesValidated,
                "All dependencies validated",
            )
            .await;
        }

        // Credentials
        tracker
            .enter(Phase::DeployingSecrets)
            .map_err(|e| (Step::Secrets, e))?;
        let credentials = credentials::ensure_credentials(&self.cluster, project, deadline)
            .await
            .map_err(|e| (Step::Secrets, e))?;
        match credentials {
            CredentialOutcome::Created => {
                let message = "Credential bundle created";
                emit(&self.cluster, project, LifecycleEvent::SecretsCreated, message).await;
            }
            CredentialOutcome::Healed(keys) => {
                emit(
                    &self.cluster,
                    project,
                    LifecycleEvent::SecretsCreated,
                    &format!("Credential bundle healed: {}", keys.join(", ")),
                )
                .await;
            }
            CredentialOutcome::Unchanged => {}
        }
        set_condition(
            &mut status.conditions,
            CONDITION_SECRETS_READY,
            true,
            REASON_SECRETS_CREATED,
            "Credential bundle is present",
            now,
        );

        // Database bootstrap
        tracker
            .enter(Phase::InitializingDatabase)
            .map_err(|e| (Step::Bootstrap, e))?;
        let history = bootstrap_history(project, previous);
        let previously_initialized = history == BootstrapHistory::Initialized;
        let bootstrap = bootstrap::ensure_bootstrapped(
            &self.cluster,
            project,
            &self.config,
            history,
            deadline,
        )
        .await
        .map_err(|e| (Step::Bootstrap, e))?;
        if let Bootstrap::Pending(delay) = bootstrap {
            set_condition(
                &mut status.conditions,
                CONDITION_DATABASE_INITIALIZED,
                false,
                REASON_WAITING_FOR_DATABASE_INIT,
                "Waiting for the database initialization job",
                now,
            );
            return Ok(StepsOutcome::WaitingForBootstrap(delay));
        }
        if !previously_initialized {
            let message = "Database initialized";
            emit(&self.cluster, project, LifecycleEvent::DatabaseInitialized, message).await;
        }
        set_condition(
            &mut status.conditions,
            CONDITION_DATABASE_INITIALIZED,
            true,
            REASON_DATABASE_INITIALIZED,
            "Database initialization job completed",
            now,
        );

        // Components
        tracker
            .enter(Phase::DeployingComponents)
            .map_err(|e| (Step::Components, e))?;
        let observations = components::converge_components(&self.cluster, project, deadline)
            .await
            .map_err(|e| (Step::Components, e))?;

        tracker.enter(Phase::Running).map_err(|e| (Step::Components, e))?;
        Ok(StepsOutcome::Converged(observations))
    }
}

fn bootstrap_history(
    project: &SupabaseProject,
    previous: &SupabaseProjectStatus,
) -> BootstrapHistory {
    if is_condition_true(&previous.conditions, CONDITION_DATABASE_INITIALIZED) {
        return BootstrapHistory::Initialized;
    }
    // Later dependency failures leave this condition untouched
    let exhausted = find_condition(&previous.conditions, CONDITION_DATABASE_INITIALIZED)
        .is_some_and(|c| c.reason == REASON_DATABASE_INIT_EXHAUSTED);
    if exhausted {
        BootstrapHistory::Exhausted {
            spec_changed: project.metadata.generation != previous.observed_generation,
        }
    } else {
        BootstrapHistory::Fresh
    }
}

/// Whether every dependency checked this pass was already recorded as available
fn previous_dependencies_ok(
    previous: &SupabaseProjectStatus,
    checks: &[validation::DependencyCheck],
) -> bool {
    checks.iter().all(|check| {
        previous
            .dependencies
            .get(check.dependency)
            .is_some_and(|d| d.available)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_delays_follow_config() {
        let config = ControllerConfig::default();
        assert_eq!(Step::Dependencies.requeue_delay(&config), Duration::from_secs(30));
        assert_eq!(Step::Secrets.requeue_delay(&config), Duration::from_secs(10));
        assert_eq!(Step::Bootstrap.requeue_delay(&config), Duration::from_secs(10));
        assert_eq!(Step::Components.requeue_delay(&config), Duration::from_secs(10));
    }

    #[test]
    fn test_dependencies_retry_slower_than_secrets() {
        let config = ControllerConfig::default();
        assert!(Step::Dependencies.requeue_delay(&config) > Step::Secrets.requeue_delay(&config));
    }

    #[test]
    fn test_backoff_state_counts_errors() {
        let mut state = BackoffState::new(5, 300);
        state.increment_error();
        state.increment_error();
        assert_eq!(state.error_count, 2);
        assert_eq!(state.backoff.next_backoff_seconds(), 5);
    }
}
