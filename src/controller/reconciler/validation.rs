//! # Dependency Validation
//!
//! Checks that the externally managed bundles a project references exist in
//! the project namespace and carry every required field. Read-only and
//! fail-fast: the first unusable bundle stops the check.

use super::error::{ReconcilerError, ValidationError};
use crate::constants::{
    BASIC_AUTH_REQUIRED_KEYS, DATABASE_REQUIRED_KEYS, DEPENDENCY_DASHBOARD_AUTH,
    DEPENDENCY_POSTGRESQL, DEPENDENCY_S3, STORAGE_REQUIRED_KEYS,
};
use crate::controller::cluster::{within_deadline, ClusterApi};
use crate::crd::{SecretReference, SupabaseProject};
use crate::secrets::has_value;
use k8s_openapi::api::core::v1::Secret;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of checking one dependency bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub dependency: &'static str,
    /// `namespace/name` of the referenced bundle
    pub secret: String,
    pub available: bool,
    pub message: String,
}

struct Requirement<'a> {
    dependency: &'static str,
    reference: &'a SecretReference,
    required: &'static [&'static str],
}

fn requirements(project: &SupabaseProject) -> Vec<Requirement<'_>> {
    let mut requirements = vec![
        Requirement {
            dependency: DEPENDENCY_POSTGRESQL,
            reference: &project.spec.database.secret_ref,
            required: &DATABASE_REQUIRED_KEYS,
        },
        Requirement {
            dependency: DEPENDENCY_S3,
            reference: &project.spec.storage.secret_ref,
            required: &STORAGE_REQUIRED_KEYS,
        },
    ];

    if let Some(reference) = project
        .spec
        .studio
        .as_ref()
        .and_then(|studio| studio.dashboard_basic_auth_secret_ref.as_ref())
    {
        requirements.push(Requirement {
            dependency: DEPENDENCY_DASHBOARD_AUTH,
            reference,
            required: &BASIC_AUTH_REQUIRED_KEYS,
        });
    }

    requirements
}

/// First required key that is absent or empty
fn missing_field(secret: &Secret, required: &[&str]) -> Option<String> {
    required
        .iter()
        .find(|key| !has_value(secret, key))
        .map(|key| (*key).to_string())
}

/// Validate every referenced dependency bundle in order
///
/// One [`DependencyCheck`] is appended to `checks` per bundle inspected,
/// including the failing one.
pub async fn validate_dependencies<C: ClusterApi>(
    cluster: &C,
    project: &SupabaseProject,
    deadline: Instant,
    checks: &mut Vec<DependencyCheck>,
) -> Result<(), ReconcilerError> {
    let namespace = project.namespace_or_default();
    for requirement in requirements(project) {
        let name = requirement.reference.name.as_str();

        let (qualified, failure) = match requirement.reference.foreign_namespace(namespace) {
            Some(foreign) => {
                let qualified = format!("{foreign}/{name}");
                let error = ValidationError::ForeignNamespace {
                    dependency: requirement.dependency,
                    secret: qualified.clone(),
                    namespace: namespace.to_string(),
                };
                (qualified, Some(error))
            }
            None => {
                let qualified = format!("{namespace}/{name}");
                let secret: Option<Secret> =
                    within_deadline(deadline, cluster.get(namespace, name)).await?;
                let failure = match secret {
                    None => Some(ValidationError::BundleNotFound {
                        dependency: requirement.dependency,
                        secret: qualified.clone(),
                    }),
                    Some(secret) => missing_field(&secret, requirement.required).map(|field| {
                        ValidationError::MissingField {
                            dependency: requirement.dependency,
                            secret: qualified.clone(),
                            field,
                        }
                    }),
                };
                (qualified, failure)
            }
        };

        if let Some(error) = failure {
            checks.push(DependencyCheck {
                dependency: requirement.dependency,
                secret: qualified,
                available: false,
                message: error.to_string(),
            });
            return Err(error.into());
        }

        debug!(
            dependency = requirement.dependency,
            secret = %qualified,
            "dependency bundle validated"
        );
        checks.push(DependencyCheck {
            dependency: requirement.dependency,
            message: format!("Secret {qualified} validated"),
            secret: qualified,
            available: true,
        });
    }

    Ok(())
}
