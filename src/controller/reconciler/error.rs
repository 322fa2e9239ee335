//! # Reconciler Errors
//!
//! Every step returns its error to the phase state machine, which alone
//! decides phase, conditions, and requeue delay from the classification here.

use crate::controller::cluster::ClusterError;
use crate::crd::Phase;
use thiserror::Error;

/// A referenced dependency bundle is unusable
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{dependency} secret {secret} not found")]
    BundleNotFound {
        dependency: &'static str,
        secret: String,
    },

    #[error("{dependency} secret {secret} is missing required field '{field}'")]
    MissingField {
        dependency: &'static str,
        secret: String,
        field: String,
    },

    #[error("{dependency} secret {secret} must be in the project namespace {namespace}")]
    ForeignNamespace {
        dependency: &'static str,
        secret: String,
        namespace: String,
    },
}

impl ValidationError {
    pub fn dependency(&self) -> &'static str {
        match self {
            ValidationError::BundleNotFound { dependency, .. }
            | ValidationError::MissingField { dependency, .. }
            | ValidationError::ForeignNamespace { dependency, .. } => dependency,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("dependency validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("credential generation failed: {0}")]
    CredentialGeneration(String),

    #[error("bootstrap job {job} failed {failures} times, exceeding the retry ceiling {ceiling}")]
    BootstrapExhausted {
        job: String,
        failures: i32,
        ceiling: i32,
    },

    #[error("component {component} produced an invalid spec: {reason}")]
    Contract { component: String, reason: String },

    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl ReconcilerError {
    /// Fatal errors need operator action and are not requeued on a timer
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconcilerError::BootstrapExhausted { .. }
                | ReconcilerError::Contract { .. }
                | ReconcilerError::InvalidTransition { .. }
        )
    }

    /// Optimistic-concurrency conflict, retried from a fresh read after a short delay
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcilerError::Cluster(e) if e.is_conflict())
    }

    /// Metric label for the error class
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerError::Validation(_) => "validation",
            ReconcilerError::CredentialGeneration(_) => "credential_generation",
            ReconcilerError::BootstrapExhausted { .. } => "bootstrap_exhausted",
            ReconcilerError::Contract { .. } => "contract",
            ReconcilerError::InvalidTransition { .. } => "invalid_transition",
            ReconcilerError::Cluster(ClusterError::Conflict { .. }) => "conflict",
            ReconcilerError::Cluster(ClusterError::DeadlineExceeded) => "deadline_exceeded",
            ReconcilerError::Cluster(_) => "cluster",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_names_the_field() {
        let err = ReconcilerError::from(ValidationError::MissingField {
            dependency: "postgresql",
            secret: "default/acme-db".into(),
            field: "host".into(),
        });
        assert!(err.to_string().contains("'host'"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_classification() {
        let exhausted = ReconcilerError::BootstrapExhausted {
            job: "acme-db-init".into(),
            failures: 4,
            ceiling: 3,
        };
        assert!(exhausted.is_fatal());
        assert_eq!(exhausted.as_str(), "bootstrap_exhausted");

        let conflict = ReconcilerError::Cluster(ClusterError::Conflict {
            kind: "Secret".into(),
            name: "acme-jwt".into(),
        });
        assert!(conflict.is_conflict());
        assert!(!conflict.is_fatal());
    }
}
