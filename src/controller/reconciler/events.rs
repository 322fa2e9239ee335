//! # Lifecycle Events
//!
//! Notable transitions are published as Kubernetes Events on the project,
//! logged with a stable `reason` field, and counted by reason in metrics.
//! Publishing is best effort: a rejected Event never fails the pass.

use crate::controller::cluster::ClusterApi;
use crate::crd::{Phase, SupabaseProject};
use crate::observability::metrics;
use kube::runtime::events::{Event, EventType};
use tracing::{info, warn};

/// Action recorded on every published Event
pub const EVENT_ACTION: &str = "Reconcile";

/// Kubernetes rejects Event notes above 1 KiB
const MAX_NOTE_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    PhaseChanged(Phase),
    DependenciesValidated,
    ValidationFailed,
    SecretsCreated,
    SecretsFailed,
    DatabaseInitialized,
    DatabaseInitFailed,
    ComponentDeploymentFailed,
    ReconciliationComplete,
}

impl LifecycleEvent {
    pub fn reason(self) -> &'static str {
        match self {
            LifecycleEvent::PhaseChanged(_) => "PhaseChanged",
            LifecycleEvent::DependenciesValidated => "DependenciesValidated",
            LifecycleEvent::ValidationFailed => "ValidationFailed",
            LifecycleEvent::SecretsCreated => "SecretsCreated",
            LifecycleEvent::SecretsFailed => "SecretsFailed",
            LifecycleEvent::DatabaseInitialized => "DatabaseInitialized",
            LifecycleEvent::DatabaseInitFailed => "DatabaseInitFailed",
            LifecycleEvent::ComponentDeploymentFailed => "ComponentDeploymentFailed",
            LifecycleEvent::ReconciliationComplete => "ReconciliationComplete",
        }
    }

    pub fn is_warning(self) -> bool {
        matches!(
            self,
            LifecycleEvent::ValidationFailed
                | LifecycleEvent::SecretsFailed
                | LifecycleEvent::DatabaseInitFailed
                | LifecycleEvent::ComponentDeploymentFailed
        )
    }

    pub fn event_type(self) -> EventType {
        if self.is_warning() {
            EventType::Warning
        } else {
            EventType::Normal
        }
    }
}

fn truncate_note(message: &str) -> String {
    if message.len() <= MAX_NOTE_BYTES {
        return message.to_string();
    }
    let mut end = MAX_NOTE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

pub async fn emit<C: ClusterApi>(
    cluster: &C,
    project: &SupabaseProject,
    event: LifecycleEvent,
    message: &str,
) {
    let name = project.name_or_empty();
    let namespace = project.namespace_or_default();
    let reason = event.reason();

    if let LifecycleEvent::PhaseChanged(phase) = event {
        metrics::increment_phase_transitions(phase.as_str());
    }
    metrics::increment_lifecycle_events(reason);

    if event.is_warning() {
        warn!(resource.name = name, resource.namespace = namespace, reason, "{}", message);
    } else {
        info!(resource.name = name, resource.namespace = namespace, reason, "{}", message);
    }

    let record = Event {
        type_: event.event_type(),
        reason: reason.to_string(),
        note: Some(truncate_note(message)),
        action: EVENT_ACTION.to_string(),
        secondary: None,
    };
    if let Err(e) = cluster.publish_event(project, &record).await {
        warn!(resource.name = name, reason, error = %e, "Failed to publish Kubernetes event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_are_warnings() {
        assert_eq!(LifecycleEvent::DatabaseInitFailed.event_type(), EventType::Warning);
        assert_eq!(LifecycleEvent::SecretsCreated.event_type(), EventType::Normal);
        assert_eq!(LifecycleEvent::PhaseChanged(Phase::Failed).event_type(), EventType::Normal);
    }

    #[test]
    fn test_long_notes_are_cut_on_a_char_boundary() {
        let message = "é".repeat(600);
        let note = truncate_note(&message);
        assert!(note.len() <= MAX_NOTE_BYTES);
        assert!(note.chars().all(|c| c == 'é'));
        assert_eq!(truncate_note("short"), "short");
    }
}
