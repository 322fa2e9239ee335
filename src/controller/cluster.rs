//! # Cluster Access
//!
//! The reconciler talks to the API server through [`ClusterApi`] only. The
//! production implementation wraps a `kube::Client`; tests drive the same
//! reconciler against an in-memory implementation.
//!
//! Every write carries the `resourceVersion` it was derived from, so a
//! concurrent writer turns into [`ClusterError::Conflict`] instead of a lost
//! update.

use crate::constants::CONTROLLER_NAME;
use crate::crd::{SupabaseProject, SupabaseProjectStatus};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, Recorder, Reporter};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::future::Future;
use thiserror::Error;
use tokio::time::Instant;

/// Errors returned by cluster calls
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("conflicting write to {kind} {name}, resource version is stale")]
    Conflict { kind: String, name: String },

    #[error("cluster call exceeded the reconciliation deadline")]
    DeadlineExceeded,

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ClusterError {
    /// Whether the failed call should be retried from a fresh read
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }

    fn from_kube(error: kube::Error, kind: &str, name: &str) -> Self {
        match error {
            kube::Error::Api(api_err) if api_err.code == 404 => ClusterError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(api_err) if api_err.code == 409 => ClusterError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(api_err) => ClusterError::Api {
                code: api_err.code,
                message: api_err.message,
            },
            kube::Error::SerdeError(e) => ClusterError::Serialization(e.to_string()),
            other => ClusterError::Transport(other.to_string()),
        }
    }
}

/// Namespaced Kubernetes objects the reconciler reads and writes
pub trait ClusterResource:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterResource for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// API server operations used by a reconciliation pass
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, ClusterError>;

    /// Create an object, failing with `Conflict` if it already exists
    async fn create<K: ClusterResource>(&self, namespace: &str, object: &K)
        -> Result<K, ClusterError>;

    /// Replace an object; `object.metadata.resourceVersion` must match the stored one
    async fn replace<K: ClusterResource>(
        &self,
        namespace: &str,
        object: &K,
    ) -> Result<K, ClusterError>;

    /// Delete an object; a missing object is not an error
    async fn delete<K: ClusterResource>(&self, namespace: &str, name: &str)
        -> Result<(), ClusterError>;

    /// Replace the project's status subresource, guarded by the project's resourceVersion
    ///
    /// The whole status is replaced: fields absent from `status` are removed.
    async fn update_project_status(
        &self,
        project: &SupabaseProject,
        status: &SupabaseProjectStatus,
    ) -> Result<SupabaseProject, ClusterError>;

    /// Replace the project's finalizer list, guarded by the project's resourceVersion
    async fn set_project_finalizers(
        &self,
        project: &SupabaseProject,
        finalizers: Vec<String>,
    ) -> Result<SupabaseProject, ClusterError>;

    /// Record a Kubernetes Event against the project
    async fn publish_event(&self, project: &SupabaseProject, event: &Event)
        -> Result<(), ClusterError>;
}

/// Run a cluster call against the pass deadline
pub async fn within_deadline<T, F>(deadline: Instant, call: F) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    tokio::time::timeout_at(deadline, call)
        .await
        .map_err(|_elapsed| ClusterError::DeadlineExceeded)?
}

/// [`ClusterApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    recorder: Recorder,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: ClusterResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_name<K: ClusterResource>(object: &K) -> String {
    object.meta().name.clone().unwrap_or_default()
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, ClusterError> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &K::kind(&()), name))
    }

    async fn create<K: ClusterResource>(
        &self,
        namespace: &str,
        object: &K,
    ) -> Result<K, ClusterError> {
        let name = object_name(object);
        self.api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| ClusterError::from_kube(e, &K::kind(&()), &name))
    }

    async fn replace<K: ClusterResource>(
        &self,
        namespace: &str,
        object: &K,
    ) -> Result<K, ClusterError> {
        let name = object_name(object);
        self.api::<K>(namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| ClusterError::from_kube(e, &K::kind(&()), &name))
    }

    async fn delete<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(ClusterError::from_kube(e, &K::kind(&()), name)),
        }
    }

    async fn update_project_status(
        &self,
        project: &SupabaseProject,
        status: &SupabaseProjectStatus,
    ) -> Result<SupabaseProject, ClusterError> {
        let name = project.name_or_empty();
        let mut updated = project.clone();
        updated.status = Some(status.clone());
        let data =
            serde_json::to_vec(&updated).map_err(|e| ClusterError::Serialization(e.to_string()))?;

        self.api::<SupabaseProject>(project.namespace_or_default())
            .replace_status(name, &PostParams::default(), data)
            .await
            .map_err(|e| ClusterError::from_kube(e, "SupabaseProject", name))
    }

    async fn set_project_finalizers(
        &self,
        project: &SupabaseProject,
        finalizers: Vec<String>,
    ) -> Result<SupabaseProject, ClusterError> {
        let name = project.name_or_empty();
        let patch = json!({
            "metadata": {
                "resourceVersion": project.metadata.resource_version,
                "finalizers": finalizers,
            }
        });

        self.api::<SupabaseProject>(project.namespace_or_default())
            .patch(name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch))
            .await
            .map_err(|e| ClusterError::from_kube(e, "SupabaseProject", name))
    }

    async fn publish_event(
        &self,
        project: &SupabaseProject,
        event: &Event,
    ) -> Result<(), ClusterError> {
        self.recorder
            .publish(event, &project.object_ref(&()))
            .await
            .map_err(|e| ClusterError::from_kube(e, "Event", project.name_or_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_within_deadline_passes_result_through() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = within_deadline(deadline, async { Ok::<_, ClusterError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_within_deadline_aborts_slow_call() {
        let deadline = Instant::now() + Duration::from_millis(10);
        let result = within_deadline(deadline, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ClusterError>(())
        })
        .await;
        assert_eq!(result, Err(ClusterError::DeadlineExceeded));
    }

    #[test]
    fn test_conflict_classification() {
        let conflict = ClusterError::Conflict {
            kind: "Secret".into(),
            name: "acme-jwt".into(),
        };
        assert!(conflict.is_conflict());
        assert!(!ClusterError::DeadlineExceeded.is_conflict());
    }
}
