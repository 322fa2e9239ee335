//! # Component Convergence
//!
//! Applies each registered component in order: auxiliary config
//! (create-if-missing), workload (create, or overwrite the live spec),
//! endpoint (create-if-missing), then reads the workload back for status.
//!
//! The API server fills defaults into every Deployment spec, so the live
//! spec never equals the built one. A workload is overwritten when the
//! digest annotation of the applied spec is stale, or when a field the
//! builder sets was edited out of band.
//!
//! A build or write failure aborts the pass. A failed read-back only marks
//! that component's status unknown.

use super::error::ReconcilerError;
use super::owner_reference;
use crate::components::{registry, BuildError, ComponentBuilder};
use crate::constants::SPEC_HASH_ANNOTATION;
use crate::controller::cluster::{within_deadline, ClusterApi, ClusterError, ClusterResource};
use crate::crd::{ComponentStatus, SupabaseProject};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const COMPONENT_PHASE_RUNNING: &str = "Running";
pub const COMPONENT_PHASE_PENDING: &str = "Pending";
pub const COMPONENT_PHASE_UNKNOWN: &str = "Unknown";

/// Read-back of one converged component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentObservation {
    pub name: &'static str,
    pub condition_type: &'static str,
    pub status: ComponentStatus,
}

impl ComponentObservation {
    pub fn is_known(&self) -> bool {
        self.status.phase != COMPONENT_PHASE_UNKNOWN
    }
}

fn contract(builder: &dyn ComponentBuilder, error: BuildError) -> ReconcilerError {
    ReconcilerError::Contract {
        component: builder.name().to_string(),
        reason: error.to_string(),
    }
}

/// Stamp ownership and check the builder named the object
fn prepare<K: ClusterResource>(
    builder: &dyn ComponentBuilder,
    mut object: K,
    owner: &OwnerReference,
) -> Result<(K, String), ReconcilerError> {
    let name = object
        .meta()
        .name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ReconcilerError::Contract {
            component: builder.name().to_string(),
            reason: format!("{} has no name", K::kind(&())),
        })?;
    object.meta_mut().owner_references = Some(vec![owner.clone()]);
    Ok((object, name))
}

/// Create `object` unless an object with its name already exists
async fn ensure_created<C: ClusterApi, K: ClusterResource>(
    cluster: &C,
    namespace: &str,
    name: &str,
    object: &K,
    deadline: Instant,
) -> Result<bool, ReconcilerError> {
    let existing: Option<K> = within_deadline(deadline, cluster.get(namespace, name)).await?;
    if existing.is_some() {
        return Ok(false);
    }
    within_deadline(deadline, cluster.create(namespace, object)).await?;
    Ok(true)
}

/// Whether every field set in `desired` holds the same value in `live`
///
/// Fields only present in `live` are ignored. Lists must match in length.
fn fields_match(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(desired), Value::Object(live)) => desired
            .iter()
            .all(|(key, value)| live.get(key).is_some_and(|live| fields_match(value, live))),
        (Value::Array(desired), Value::Array(live)) => {
            desired.len() == live.len()
                && desired.iter().zip(live).all(|(d, l)| fields_match(d, l))
        }
        _ => desired == live,
    }
}

fn to_value(spec: Option<&DeploymentSpec>) -> Result<Value, ReconcilerError> {
    serde_json::to_value(spec)
        .map_err(|e| ReconcilerError::Cluster(ClusterError::Serialization(e.to_string())))
}

fn spec_digest(spec: &Value) -> String {
    format!("{:x}", md5::compute(spec.to_string()))
}

fn applied_digest(deployment: &Deployment) -> Option<&str> {
    deployment
        .metadata
        .annotations
        .as_ref()?
        .get(SPEC_HASH_ANNOTATION)
        .map(String::as_str)
}

/// Whether the live workload must be overwritten with `desired`
fn needs_update(
    live: &Deployment,
    desired: &Value,
    digest: &str,
) -> Result<bool, ReconcilerError> {
    if applied_digest(live) != Some(digest) {
        return Ok(true);
    }
    Ok(!fields_match(desired, &to_value(live.spec.as_ref())?))
}

async fn apply_workload<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    name: &str,
    mut desired: Deployment,
    deadline: Instant,
) -> Result<(), ReconcilerError> {
    let desired_spec = to_value(desired.spec.as_ref())?;
    let digest = spec_digest(&desired_spec);
    let live: Option<Deployment> = within_deadline(deadline, cluster.get(namespace, name)).await?;

    match live {
        None => {
            desired
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(SPEC_HASH_ANNOTATION.to_string(), digest);
            within_deadline(deadline, cluster.create(namespace, &desired)).await?;
            info!(deployment = name, "Created deployment");
        }
        Some(mut live) if needs_update(&live, &desired_spec, &digest)? => {
            live.spec = desired.spec;
            live.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(SPEC_HASH_ANNOTATION.to_string(), digest);
            within_deadline(deadline, cluster.replace(namespace, &live)).await?;
            info!(deployment = name, "Updated deployment spec");
        }
        Some(_) => debug!(deployment = name, "Deployment spec up to date"),
    }

    Ok(())
}

fn observe(
    builder: &dyn ComponentBuilder,
    deployment: Option<&Deployment>,
) -> ComponentObservation {
    let status = match deployment {
        Some(deployment) => {
            let replicas = deployment
                .spec
                .as_ref()
                .and_then(|spec| spec.replicas)
                .unwrap_or(0);
            let ready_replicas = deployment
                .status
                .as_ref()
                .and_then(|status| status.ready_replicas)
                .unwrap_or(0);
            let version = deployment
                .spec
                .as_ref()
                .and_then(|spec| spec.template.spec.as_ref())
                .and_then(|pod| pod.containers.first())
                .and_then(|container| container.image.clone())
                .unwrap_or_default();
            let ready = ready_replicas == replicas;

            ComponentStatus {
                phase: if ready {
                    COMPONENT_PHASE_RUNNING
                } else {
                    COMPONENT_PHASE_PENDING
                }
                .to_string(),
                ready,
                version,
                replicas,
                ready_replicas,
                ..ComponentStatus::default()
            }
        }
        None => ComponentStatus {
            phase: COMPONENT_PHASE_UNKNOWN.to_string(),
            ..ComponentStatus::default()
        },
    };

    ComponentObservation {
        name: builder.name(),
        condition_type: builder.condition_type(),
        status,
    }
}

async fn converge_one<C: ClusterApi>(
    cluster: &C,
    project: &SupabaseProject,
    builder: &dyn ComponentBuilder,
    owner: &OwnerReference,
    deadline: Instant,
) -> Result<ComponentObservation, ReconcilerError> {
    let namespace = project.namespace_or_default();

    if let Some(config) = builder.build_config(project).map_err(|e| contract(builder, e))? {
        let (config, name) = prepare(builder, config, owner)?;
        if ensure_created(cluster, namespace, &name, &config, deadline).await? {
            info!(config_map = %name, component = builder.name(), "Created component config");
        }
    }

    let workload = builder.build_workload(project).map_err(|e| contract(builder, e))?;
    let (workload, workload_name) = prepare(builder, workload, owner)?;
    apply_workload(cluster, namespace, &workload_name, workload, deadline).await?;

    let endpoint = builder.build_endpoint(project).map_err(|e| contract(builder, e))?;
    let (endpoint, endpoint_name) = prepare(builder, endpoint, owner)?;
    if ensure_created(cluster, namespace, &endpoint_name, &endpoint, deadline).await? {
        info!(service = %endpoint_name, component = builder.name(), "Created service");
    }

    let read_back: Result<Option<Deployment>, _> =
        within_deadline(deadline, cluster.get(namespace, &workload_name)).await;
    match read_back {
        Ok(deployment) => Ok(observe(builder, deployment.as_ref())),
        Err(e) => {
            warn!(component = builder.name(), error = %e, "Failed to read back deployment status");
            Ok(observe(builder, None))
        }
    }
}

/// Converge every registered component in order
pub async fn converge_components<C: ClusterApi>(
    cluster: &C,
    project: &SupabaseProject,
    deadline: Instant,
) -> Result<Vec<ComponentObservation>, ReconcilerError> {
    let owner = owner_reference(project)?;
    let mut observations = Vec::with_capacity(registry().len());

    for builder in registry() {
        let observation = converge_one(cluster, project, *builder, &owner, deadline).await?;
        debug!(
            component = observation.name,
            ready = observation.status.ready,
            replicas = observation.status.replicas,
            ready_replicas = observation.status.ready_replicas,
            "component converged"
        );
        observations.push(observation);
    }

    Ok(observations)
}
