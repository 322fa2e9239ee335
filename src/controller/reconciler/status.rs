//! # Status Assembly
//!
//! Pure functions computing the next status snapshot from a pass outcome.
//! The snapshot is persisted once at the end of the pass.
//!
//! Timestamps only move when the value they describe changes, so an
//! unchanged project produces an identical snapshot on every pass.

use super::components::ComponentObservation;
use super::conditions::*;
use super::error::ReconcilerError;
use super::validation::DependencyCheck;
use super::Step;
use crate::components::kong;
use crate::constants::{DEPENDENCY_DASHBOARD_AUTH, DEPENDENCY_POSTGRESQL, DEPENDENCY_S3};
use crate::crd::{DependencyStatus, Phase, SupabaseProject, SupabaseProjectStatus};

/// Whether `next` differs from `previous` in anything but `lastReconcileTime`
///
/// CRITICAL: unchanged status is never written, so a resync does not
/// generate a watch event of its own.
pub fn status_changed(previous: &SupabaseProjectStatus, next: &SupabaseProjectStatus) -> bool {
    let strip = |status: &SupabaseProjectStatus| SupabaseProjectStatus {
        last_reconcile_time: None,
        ..status.clone()
    };
    strip(previous) != strip(next)
}

fn dependency_condition(dependency: &str) -> Option<&'static str> {
    match dependency {
        DEPENDENCY_POSTGRESQL => Some(CONDITION_POSTGRESQL_CONNECTED),
        DEPENDENCY_S3 => Some(CONDITION_S3_CONNECTED),
        DEPENDENCY_DASHBOARD_AUTH => Some(CONDITION_DASHBOARD_AUTH_READY),
        _ => None,
    }
}

/// Record per-dependency results and their connection conditions
pub fn record_dependencies(
    status: &mut SupabaseProjectStatus,
    checks: &[DependencyCheck],
    now: &str,
) {
    for check in checks {
        let unchanged = status.dependencies.get(check.dependency).is_some_and(|previous| {
            previous.available == check.available
                && previous.secret == check.secret
                && previous.message == check.message
        });

        if !unchanged {
            status.dependencies.insert(
                check.dependency.to_string(),
                DependencyStatus {
                    available: check.available,
                    secret: check.secret.clone(),
                    message: check.message.clone(),
                    last_transition_time: Some(now.to_string()),
                },
            );
        }

        if let Some(condition_type) = dependency_condition(check.dependency) {
            let reason = if check.available {
                REASON_SECRET_VALIDATED
            } else {
                REASON_SECRET_INVALID
            };
            set_condition(
                &mut status.conditions,
                condition_type,
                check.available,
                reason,
                &check.message,
                now,
            );
        }
    }
}

/// Drop a dependency the project no longer references
pub fn forget_dependency(status: &mut SupabaseProjectStatus, dependency: &str) {
    status.dependencies.remove(dependency);
    if let Some(condition_type) = dependency_condition(dependency) {
        status.conditions.retain(|c| c.r#type != condition_type);
    }
}

/// Record component read-backs and their readiness conditions
pub fn record_components(
    status: &mut SupabaseProjectStatus,
    observations: &[ComponentObservation],
    now: &str,
) {
    for observation in observations {
        let mut next = observation.status.clone();
        let previous = status.components.get(observation.name);

        next.conditions = previous.map(|p| p.conditions.clone()).unwrap_or_default();
        let (condition_status, reason, message) = if !observation.is_known() {
            (
                ConditionStatus::Unknown,
                REASON_COMPONENT_STATUS_UNKNOWN,
                "Deployment status could not be read".to_string(),
            )
        } else {
            let message = format!("{}/{} replicas ready", next.ready_replicas, next.replicas);
            if next.ready {
                (ConditionStatus::True, REASON_COMPONENT_READY, message)
            } else {
                (ConditionStatus::False, REASON_COMPONENT_NOT_READY, message)
            }
        };
        set_condition(
            &mut next.conditions,
            CONDITION_READY,
            condition_status,
            reason,
            &message,
            now,
        );
        set_condition(
            &mut status.conditions,
            observation.condition_type,
            condition_status,
            reason,
            &message,
            now,
        );

        let unchanged = previous.is_some_and(|p| {
            p.phase == next.phase
                && p.ready == next.ready
                && p.version == next.version
                && p.replicas == next.replicas
                && p.ready_replicas == next.ready_replicas
        });
        next.last_update_time = match previous {
            Some(p) if unchanged => p.last_update_time.clone(),
            _ => Some(now.to_string()),
        };

        status.components.insert(observation.name.to_string(), next);
    }
}

/// Mark the pass as still working through `phase`
pub fn mark_progressing(status: &mut SupabaseProjectStatus, phase: Phase, reason: &str, now: &str) {
    status.phase = Some(phase);
    status.message = phase.message().to_string();
    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        false,
        REASON_RECONCILING,
        phase.message(),
        now,
    );
    set_condition(
        &mut status.conditions,
        CONDITION_PROGRESSING,
        true,
        reason,
        phase.message(),
        now,
    );
}

/// Stable `Ready` reason for a failed step
pub fn failure_reason(step: Step, error: &ReconcilerError) -> &'static str {
    match (step, error) {
        (_, ReconcilerError::InvalidTransition { .. }) => REASON_INVALID_PHASE_TRANSITION,
        (Step::Dependencies, _) => REASON_DEPENDENCY_VALIDATION_FAILED,
        (Step::Secrets, _) => REASON_SECRET_GENERATION_FAILED,
        (Step::Bootstrap, ReconcilerError::BootstrapExhausted { .. }) => {
            REASON_DATABASE_INIT_EXHAUSTED
        }
        (Step::Bootstrap, _) => REASON_DATABASE_INIT_FAILED,
        (Step::Components, _) => REASON_COMPONENT_DEPLOYMENT_FAILED,
    }
}

/// Mark the pass as failed at `step`
pub fn mark_failed(
    status: &mut SupabaseProjectStatus,
    step: Step,
    error: &ReconcilerError,
    now: &str,
) {
    let reason = failure_reason(step, error);
    let message = format!("{}: {error}", step.failure_summary());

    status.phase = Some(Phase::Failed);
    status.message.clone_from(&message);

    set_condition(&mut status.conditions, CONDITION_READY, false, reason, &message, now);
    set_condition(
        &mut status.conditions,
        CONDITION_PROGRESSING,
        false,
        REASON_RECONCILIATION_FAILED,
        &message,
        now,
    );
    set_condition(&mut status.conditions, CONDITION_DEGRADED, true, reason, &message, now);

    let step_condition = match step {
        Step::Secrets => Some(CONDITION_SECRETS_READY),
        Step::Bootstrap => Some(CONDITION_DATABASE_INITIALIZED),
        Step::Components => Some(CONDITION_NETWORK_READY),
        Step::Dependencies => None,
    };
    if let Some(condition_type) = step_condition {
        set_condition(&mut status.conditions, condition_type, false, reason, &message, now);
    }
}

/// Mark the project as fully converged
pub fn mark_running(
    status: &mut SupabaseProjectStatus,
    project: &SupabaseProject,
    observations: &[ComponentObservation],
    now: &str,
) {
    record_components(status, observations, now);

    let ready = observations.iter().filter(|o| o.status.ready).count();
    let total = observations.len();

    status.phase = Some(Phase::Running);
    status.message = Phase::Running.message().to_string();
    status.observed_generation = project.metadata.generation;
    status.endpoints = kong::endpoints(project);

    let conditions = &mut status.conditions;
    set_condition(
        conditions,
        CONDITION_READY,
        true,
        REASON_ALL_COMPONENTS_READY,
        "All components are running",
        now,
    );
    set_condition(
        conditions,
        CONDITION_PROGRESSING,
        false,
        REASON_RECONCILIATION_COMPLETE,
        "Reconciliation complete",
        now,
    );
    if ready == total {
        set_condition(
            conditions,
            CONDITION_AVAILABLE,
            true,
            REASON_ALL_COMPONENTS_READY,
            "All components are available",
            now,
        );
    } else {
        let message = format!("{ready}/{total} components ready");
        set_condition(
            conditions,
            CONDITION_AVAILABLE,
            false,
            REASON_COMPONENTS_NOT_READY,
            &message,
            now,
        );
    }
    set_condition(
        conditions,
        CONDITION_DEGRADED,
        false,
        REASON_NO_DEGRADATION,
        "No degradation detected",
        now,
    );
    set_condition(
        conditions,
        CONDITION_NETWORK_READY,
        true,
        REASON_SERVICES_CREATED,
        "All component services created",
        now,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::error::ValidationError;
    use crate::crd::ComponentStatus;

    const T0: &str = "2025-01-01T00:00:00+00:00";
    const T1: &str = "2025-01-01T00:05:00+00:00";

    fn observation(name: &'static str, replicas: i32, ready_replicas: i32) -> ComponentObservation {
        ComponentObservation {
            name,
            condition_type: "KongReady",
            status: ComponentStatus {
                phase: if replicas == ready_replicas { "Running" } else { "Pending" }.to_string(),
                ready: replicas == ready_replicas,
                version: "kong:2.8.1".to_string(),
                replicas,
                ready_replicas,
                ..ComponentStatus::default()
            },
        }
    }

    #[test]
    fn test_last_reconcile_time_alone_is_not_a_change() {
        let previous = SupabaseProjectStatus {
            last_reconcile_time: Some(T0.to_string()),
            ..SupabaseProjectStatus::default()
        };
        let mut next = previous.clone();
        next.last_reconcile_time = Some(T1.to_string());
        assert!(!status_changed(&previous, &next));

        next.message = "changed".to_string();
        assert!(status_changed(&previous, &next));
    }

    #[test]
    fn test_component_timestamps_are_stable() {
        let mut status = SupabaseProjectStatus::default();
        record_components(&mut status, &[observation("kong", 3, 1)], T0);
        let first = status.clone();
        record_components(&mut status, &[observation("kong", 3, 1)], T1);
        assert_eq!(first, status);

        record_components(&mut status, &[observation("kong", 3, 3)], T1);
        let kong = &status.components["kong"];
        assert!(kong.ready);
        assert_eq!(kong.last_update_time.as_deref(), Some(T1));
        assert!(is_condition_true(&status.conditions, "KongReady"));
    }

    #[test]
    fn test_failed_dependency_step() {
        let mut status = SupabaseProjectStatus::default();
        let error = ReconcilerError::from(ValidationError::MissingField {
            dependency: "postgresql",
            secret: "default/acme-db".into(),
            field: "host".into(),
        });
        mark_failed(&mut status, Step::Dependencies, &error, T0);

        assert_eq!(status.phase, Some(Phase::Failed));
        assert!(status.message.contains("'host'"));
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason, REASON_DEPENDENCY_VALIDATION_FAILED);
    }

    #[test]
    fn test_exhausted_bootstrap_reason() {
        let error = ReconcilerError::BootstrapExhausted {
            job: "acme-db-init".into(),
            failures: 4,
            ceiling: 3,
        };
        assert_eq!(failure_reason(Step::Bootstrap, &error), REASON_DATABASE_INIT_EXHAUSTED);
    }

    #[test]
    fn test_dependency_checks_recorded() {
        let mut status = SupabaseProjectStatus::default();
        let check = DependencyCheck {
            dependency: DEPENDENCY_POSTGRESQL,
            secret: "default/acme-db".into(),
            available: true,
            message: "Secret default/acme-db validated".into(),
        };
        record_dependencies(&mut status, std::slice::from_ref(&check), T0);
        record_dependencies(&mut status, std::slice::from_ref(&check), T1);

        let dependency = &status.dependencies[DEPENDENCY_POSTGRESQL];
        assert!(dependency.available);
        assert_eq!(dependency.last_transition_time.as_deref(), Some(T0));
        assert!(is_condition_true(&status.conditions, CONDITION_POSTGRESQL_CONNECTED));

        forget_dependency(&mut status, DEPENDENCY_POSTGRESQL);
        assert!(status.dependencies.is_empty());
        assert!(find_condition(&status.conditions, CONDITION_POSTGRESQL_CONNECTED).is_none());
    }
}
