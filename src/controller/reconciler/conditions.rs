//! # Conditions
//!
//! Condition types, reasons, and the upsert used for every condition write.

use crate::crd::Condition;

// Overall
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_DEGRADED: &str = "Degraded";

// Dependencies
pub const CONDITION_POSTGRESQL_CONNECTED: &str = "PostgreSQLConnected";
pub const CONDITION_S3_CONNECTED: &str = "S3Connected";
pub const CONDITION_DASHBOARD_AUTH_READY: &str = "DashboardAuthReady";

// Infrastructure
pub const CONDITION_SECRETS_READY: &str = "SecretsReady";
pub const CONDITION_DATABASE_INITIALIZED: &str = "DatabaseInitialized";
pub const CONDITION_NETWORK_READY: &str = "NetworkReady";

// Reasons
pub const REASON_RECONCILING: &str = "Reconciling";
pub const REASON_RECONCILIATION_COMPLETE: &str = "ReconciliationComplete";
pub const REASON_RECONCILIATION_FAILED: &str = "ReconciliationFailed";
pub const REASON_ALL_COMPONENTS_READY: &str = "AllComponentsReady";
pub const REASON_COMPONENTS_NOT_READY: &str = "ComponentsNotReady";
pub const REASON_COMPONENT_READY: &str = "ComponentReady";
pub const REASON_COMPONENT_NOT_READY: &str = "ComponentNotReady";
pub const REASON_COMPONENT_STATUS_UNKNOWN: &str = "StatusUnknown";
pub const REASON_DEPENDENCY_VALIDATION_FAILED: &str = "DependencyValidationFailed";
pub const REASON_SECRET_VALIDATED: &str = "SecretValidated";
pub const REASON_SECRET_INVALID: &str = "SecretInvalid";
pub const REASON_SECRETS_CREATED: &str = "SecretsCreated";
pub const REASON_SECRET_GENERATION_FAILED: &str = "SecretGenerationFailed";
pub const REASON_WAITING_FOR_DATABASE_INIT: &str = "WaitingForDatabaseInit";
pub const REASON_DATABASE_INITIALIZED: &str = "DatabaseInitialized";
pub const REASON_DATABASE_INIT_FAILED: &str = "DatabaseInitFailed";
pub const REASON_DATABASE_INIT_EXHAUSTED: &str = "DatabaseInitExhausted";
pub const REASON_SERVICES_CREATED: &str = "ServicesCreated";
pub const REASON_COMPONENT_DEPLOYMENT_FAILED: &str = "ComponentDeploymentFailed";
pub const REASON_INVALID_PHASE_TRANSITION: &str = "InvalidPhaseTransition";
pub const REASON_NO_DEGRADATION: &str = "NoDegradation";

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// Upsert a condition by type
///
/// The transition time is only refreshed when status, reason, or message
/// change, so rewriting an identical condition is a no-op.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: impl Into<ConditionStatus>,
    reason: &str,
    message: &str,
    now: &str,
) {
    let status = status.into().as_str();

    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        if existing.status == status && existing.reason == reason && existing.message == message {
            return;
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.last_transition_time = Some(now.to_string());
        return;
    }

    conditions.push(Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Some(now.to_string()),
    });
}

pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type).is_some_and(|c| c.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2025-01-01T00:00:00+00:00";
    const T1: &str = "2025-01-01T00:05:00+00:00";

    #[test]
    fn test_set_condition_inserts() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_READY,
            true,
            REASON_ALL_COMPONENTS_READY,
            "ok",
            T0,
        );
        assert_eq!(conditions.len(), 1);
        assert!(is_condition_true(&conditions, CONDITION_READY));
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some(T0));
    }

    #[test]
    fn test_unchanged_condition_keeps_transition_time() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_READY,
            true,
            REASON_ALL_COMPONENTS_READY,
            "ok",
            T0,
        );
        set_condition(
            &mut conditions,
            CONDITION_READY,
            true,
            REASON_ALL_COMPONENTS_READY,
            "ok",
            T1,
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some(T0));
    }

    #[test]
    fn test_changed_condition_refreshes_transition_time() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_READY,
            true,
            REASON_ALL_COMPONENTS_READY,
            "ok",
            T0,
        );
        set_condition(
            &mut conditions,
            CONDITION_READY,
            false,
            REASON_DEPENDENCY_VALIDATION_FAILED,
            "missing host",
            T1,
        );
        let ready = find_condition(&conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason, REASON_DEPENDENCY_VALIDATION_FAILED);
        assert_eq!(ready.last_transition_time.as_deref(), Some(T1));
    }

    #[test]
    fn test_message_change_alone_is_a_transition() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_AVAILABLE,
            false,
            REASON_COMPONENTS_NOT_READY,
            "1/3",
            T0,
        );
        set_condition(
            &mut conditions,
            CONDITION_AVAILABLE,
            false,
            REASON_COMPONENTS_NOT_READY,
            "2/3",
            T1,
        );
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some(T1));
    }

    #[test]
    fn test_unknown_status() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            "KongReady",
            ConditionStatus::Unknown,
            REASON_COMPONENT_STATUS_UNKNOWN,
            "",
            T0,
        );
        assert_eq!(conditions[0].status, "Unknown");
        assert!(!is_condition_true(&conditions, "KongReady"));
    }
}
