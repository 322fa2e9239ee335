//! # Component Builders
//!
//! Pure, deterministic functions turning a declared project into the desired
//! Deployment, Service, and optional ConfigMap of each Supabase component.
//!
//! Builders never talk to the cluster. The convergence engine iterates
//! [`registry`] in dependency order and does the writes.

pub mod auth;
pub mod bootstrap;
pub mod kong;
pub mod meta;
pub mod postgrest;
pub mod realtime;
pub mod storage;
pub mod studio;

use crate::constants::{
    LABEL_COMPONENT, LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_NAME, LABEL_PART_OF, CONTROLLER_NAME,
    PART_OF_VALUE,
};
use crate::crd::{ComponentConfig, SupabaseProject};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecretKeySelector, Service, ServicePort, ServiceSpec, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from builders; surfaced to the reconciler as contract errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("project has no name")]
    MissingProjectName,

    #[error("replicas must be between 0 and 10, got {0}")]
    InvalidReplicas(i32),

    #[error("invalid {field}: {reason}")]
    InvalidOverride { field: String, reason: String },
}

/// Desired-state builder for one managed component
pub trait ComponentBuilder: Send + Sync {
    /// Component name, also the key in `status.components`
    fn name(&self) -> &'static str;

    /// Per-component readiness condition type
    fn condition_type(&self) -> &'static str;

    fn build_workload(&self, project: &SupabaseProject) -> Result<Deployment, BuildError>;

    fn build_endpoint(&self, project: &SupabaseProject) -> Result<Service, BuildError>;

    /// Auxiliary configuration created once alongside the workload
    fn build_config(&self, _project: &SupabaseProject) -> Result<Option<ConfigMap>, BuildError> {
        Ok(None)
    }
}

static REGISTRY: [&dyn ComponentBuilder; 7] = [
    &kong::KongBuilder,
    &auth::AuthBuilder,
    &postgrest::PostgrestBuilder,
    &realtime::RealtimeBuilder,
    &storage::StorageBuilder,
    &meta::MetaBuilder,
    &studio::StudioBuilder,
];

/// All components in convergence order: gateway, auth, REST, realtime, storage, meta, studio
pub fn registry() -> &'static [&'static dyn ComponentBuilder] {
    &REGISTRY
}

/// `<project>-<suffix>`
pub fn resource_name(project: &SupabaseProject, suffix: &str) -> Result<String, BuildError> {
    match project.metadata.name.as_deref() {
        Some(name) if !name.is_empty() => Ok(format!("{name}-{suffix}")),
        _ => Err(BuildError::MissingProjectName),
    }
}

/// Standard labels on every object the operator creates
pub fn labels(project: &SupabaseProject, name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), name.to_string()),
        (LABEL_INSTANCE.to_string(), project.name_or_empty().to_string()),
        (LABEL_COMPONENT.to_string(), component.to_string()),
        (LABEL_PART_OF.to_string(), PART_OF_VALUE.to_string()),
        (LABEL_MANAGED_BY.to_string(), CONTROLLER_NAME.to_string()),
    ])
}

pub(crate) fn object_meta(
    project: &SupabaseProject,
    name: String,
    labels: &BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(project.namespace_or_default().to_string()),
        labels: Some(labels.clone()),
        ..ObjectMeta::default()
    }
}

pub(crate) fn resolve_image(overrides: Option<&ComponentConfig>, default: &str) -> String {
    overrides
        .and_then(|c| c.image.as_deref())
        .filter(|image| !image.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Override when positive, 1 otherwise
pub(crate) fn resolve_replicas(overrides: Option<&ComponentConfig>) -> Result<i32, BuildError> {
    match overrides.and_then(|c| c.replicas) {
        Some(replicas) if !(0..=10).contains(&replicas) => {
            Err(BuildError::InvalidReplicas(replicas))
        }
        Some(replicas) if replicas > 0 => Ok(replicas),
        _ => Ok(1),
    }
}

/// `(memory, cpu)` pairs for requests and limits
pub(crate) struct DefaultResources {
    pub requests: (&'static str, &'static str),
    pub limits: (&'static str, &'static str),
}

pub(crate) fn resolve_resources(
    overrides: Option<&ComponentConfig>,
    defaults: &DefaultResources,
) -> ResourceRequirements {
    let to_quantities = |map: &BTreeMap<String, String>| {
        map.iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect::<BTreeMap<_, _>>()
    };

    if let Some(custom) = overrides.and_then(|c| c.resources.as_ref()) {
        return ResourceRequirements {
            requests: (!custom.requests.is_empty()).then(|| to_quantities(&custom.requests)),
            limits: (!custom.limits.is_empty()).then(|| to_quantities(&custom.limits)),
            ..ResourceRequirements::default()
        };
    }

    let pair = |(memory, cpu): (&str, &str)| {
        BTreeMap::from([
            ("memory".to_string(), Quantity(memory.to_string())),
            ("cpu".to_string(), Quantity(cpu.to_string())),
        ])
    };

    ResourceRequirements {
        requests: Some(pair(defaults.requests)),
        limits: Some(pair(defaults.limits)),
        ..ResourceRequirements::default()
    }
}

pub(crate) fn env_value(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

pub(crate) fn env_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..EnvVarSource::default()
        }),
    }
}

/// Database connection variables read from the project's database secret
pub(crate) fn database_env(project: &SupabaseProject, prefix: &str) -> Vec<EnvVar> {
    let secret = &project.spec.database.secret_ref.name;
    [
        ("HOST", "host"),
        ("PORT", "port"),
        ("NAME", "database"),
        ("USER", "username"),
        ("PASSWORD", "password"),
    ]
    .into_iter()
    .map(|(suffix, key)| env_secret(&format!("{prefix}{suffix}"), secret, key))
    .collect()
}

/// Connection URL expanded from the `DB_*` variables when the container starts
pub(crate) fn database_url(scheme: &str, user: &str, ssl_mode: &str) -> String {
    format!("{scheme}://{user}:$(DB_PASSWORD)@$(DB_HOST):$(DB_PORT)/$(DB_NAME)?sslmode={ssl_mode}")
}

/// Built-in environment followed by the user's `extraEnv`
pub(crate) fn with_extra_env(
    mut env: Vec<EnvVar>,
    overrides: Option<&ComponentConfig>,
) -> Vec<EnvVar> {
    if let Some(config) = overrides {
        env.extend(config.extra_env.iter().map(|e| env_value(&e.name, e.value.clone())));
    }
    env
}

pub(crate) fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..ContainerPort::default()
    }
}

/// Single-container Deployment selecting on `labels`
pub(crate) fn deployment(
    project: &SupabaseProject,
    name: String,
    labels: &BTreeMap<String, String>,
    replicas: i32,
    container: Container,
    volumes: Vec<Volume>,
) -> Deployment {
    Deployment {
        metadata: object_meta(project, name, labels),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// ClusterIP Service exposing `(name, port)` pairs
pub(crate) fn cluster_ip_service(
    project: &SupabaseProject,
    name: String,
    labels: &BTreeMap<String, String>,
    ports: &[(&str, i32)],
) -> Service {
    Service {
        metadata: object_meta(project, name, labels),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels.clone()),
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port)| ServicePort {
                        name: Some((*port_name).to_string()),
                        port: *port,
                        target_port: Some(IntOrString::Int(*port)),
                        protocol: Some("TCP".to_string()),
                        ..ServicePort::default()
                    })
                    .collect(),
            ),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// In-cluster DNS name of a component service
pub fn service_host(project: &SupabaseProject, suffix: &str) -> String {
    format!(
        "{}-{}.{}.svc",
        project.name_or_empty(),
        suffix,
        project.namespace_or_default()
    )
}


#[cfg(test)]
mod tests {
    use super::test_support::project;
    use super::*;
    use crate::crd::{EnvVarSpec, ResourceRequirementsSpec};

    #[test]
    fn test_registry_order() {
        let names: Vec<_> = registry().iter().map(|b| b.name()).collect();
        assert_eq!(
            names,
            ["kong", "auth", "postgrest", "realtime", "storage", "meta", "studio"]
        );
    }

    #[test]
    fn test_every_builder_is_deterministic() {
        let project = project("acme");
        for builder in registry() {
            assert_eq!(
                builder.build_workload(&project).unwrap(),
                builder.build_workload(&project).unwrap(),
                "{}",
                builder.name()
            );
            assert_eq!(
                builder.build_endpoint(&project).unwrap(),
                builder.build_endpoint(&project).unwrap()
            );
        }
    }

    #[test]
    fn test_every_builder_names_its_objects_after_the_project() {
        let project = project("acme");
        for builder in registry() {
            let deployment = builder.build_workload(&project).unwrap();
            let service = builder.build_endpoint(&project).unwrap();
            let expected = format!("acme-{}", builder.name());
            assert_eq!(deployment.metadata.name.as_deref(), Some(expected.as_str()));
            assert_eq!(service.metadata.name.as_deref(), Some(expected.as_str()));
            assert_eq!(deployment.metadata.namespace.as_deref(), Some("default"));
        }
    }

    #[test]
    fn test_unnamed_project_is_rejected() {
        let mut project = project("acme");
        project.metadata.name = None;
        for builder in registry() {
            assert_eq!(
                builder.build_workload(&project).unwrap_err(),
                BuildError::MissingProjectName
            );
        }
    }

    #[test]
    fn test_resolve_replicas() {
        let config = |replicas| ComponentConfig {
            replicas,
            ..ComponentConfig::default()
        };
        assert_eq!(resolve_replicas(None).unwrap(), 1);
        assert_eq!(resolve_replicas(Some(&config(Some(0)))).unwrap(), 1);
        assert_eq!(resolve_replicas(Some(&config(Some(3)))).unwrap(), 3);
        assert_eq!(
            resolve_replicas(Some(&config(Some(-1)))).unwrap_err(),
            BuildError::InvalidReplicas(-1)
        );
    }

    #[test]
    fn test_resource_overrides_replace_defaults() {
        let defaults = DefaultResources {
            requests: ("128Mi", "100m"),
            limits: ("256Mi", "200m"),
        };
        let default_resources = resolve_resources(None, &defaults);
        assert_eq!(
            default_resources.limits.unwrap()["memory"],
            Quantity("256Mi".to_string())
        );

        let custom = ComponentConfig {
            resources: Some(ResourceRequirementsSpec {
                requests: BTreeMap::from([("cpu".to_string(), "1".to_string())]),
                limits: BTreeMap::new(),
            }),
            ..ComponentConfig::default()
        };
        let resources = resolve_resources(Some(&custom), &defaults);
        assert_eq!(resources.requests.unwrap()["cpu"], Quantity("1".to_string()));
        assert!(resources.limits.is_none());
    }

    #[test]
    fn test_extra_env_is_appended() {
        let config = ComponentConfig {
            extra_env: vec![EnvVarSpec {
                name: "FOO".into(),
                value: "bar".into(),
            }],
            ..ComponentConfig::default()
        };
        let env = with_extra_env(vec![env_value("BASE", "1")], Some(&config));
        assert_eq!(env.len(), 2);
        assert_eq!(env[1].name, "FOO");
        assert_eq!(env[1].value.as_deref(), Some("bar"));
    }
}
