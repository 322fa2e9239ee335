//! In-memory [`ClusterApi`] for driving the reconciler without an API server.
//!
//! Objects are stored as JSON keyed by `(kind, namespace, name)`. Every write
//! bumps a global resourceVersion, and replace/status/finalizer writes carrying
//! a stale resourceVersion fail with `Conflict`, like the real API server.

#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::runtime::events::{Event, EventType};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use supabase_operator::config::ControllerConfig;
use supabase_operator::controller::cluster::{ClusterApi, ClusterError, ClusterResource};
use supabase_operator::controller::reconciler::Reconciler;
use supabase_operator::crd::{
    DatabaseConfig, SecretReference, StorageConfig, SupabaseProject, SupabaseProjectSpec,
    SupabaseProjectStatus,
};

type Key = (String, String, String);

/// An Event published against a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub project: String,
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    resource_version: u64,
    writes: usize,
    /// Remaining forced conflicts per kind
    conflicts: BTreeMap<String, u32>,
    events: Vec<RecordedEvent>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn take_conflict(&mut self, kind: &str, name: &str) -> Result<(), ClusterError> {
        if let Some(remaining) = self.conflicts.get_mut(kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(conflict(kind, name));
            }
        }
        Ok(())
    }

    fn guarded(
        &mut self,
        key: &Key,
        resource_version: Option<&str>,
    ) -> Result<&mut Value, ClusterError> {
        let (kind, _, name) = key;
        let stored = self.objects.get_mut(key).ok_or_else(|| ClusterError::NotFound {
            kind: kind.clone(),
            name: name.clone(),
        })?;
        let current = stored["metadata"]["resourceVersion"].as_str();
        if resource_version.is_none() || resource_version != current {
            return Err(conflict(kind, name));
        }
        Ok(stored)
    }
}

fn conflict(kind: &str, name: &str) -> ClusterError {
    ClusterError::Conflict {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn key<K: ClusterResource>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn decode<K: ClusterResource>(value: &Value) -> Result<K, ClusterError> {
    serde_json::from_value(value.clone()).map_err(|e| ClusterError::Serialization(e.to_string()))
}

fn encode<K: ClusterResource>(object: &K) -> Result<Value, ClusterError> {
    serde_json::to_value(object).map_err(|e| ClusterError::Serialization(e.to_string()))
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if a user had created it
    pub fn insert<K: ClusterResource>(&self, object: K) {
        let mut state = self.state.lock().unwrap();
        let mut value = encode(&object).unwrap();
        let name = value["metadata"]["name"].as_str().unwrap().to_string();
        let namespace = value["metadata"]["namespace"]
            .as_str()
            .unwrap_or("default")
            .to_string();
        value["metadata"]["namespace"] = json!(namespace);
        value["metadata"]["resourceVersion"] = json!(state.next_version());
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = json!(uuid::Uuid::new_v4().to_string());
        }
        state.objects.insert(key::<K>(&namespace, &name), value);
    }

    pub fn object<K: ClusterResource>(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&key::<K>(namespace, name))
            .map(|value| decode(value).unwrap())
    }

    pub fn list<K: ClusterResource>(&self, namespace: &str) -> Vec<K> {
        let kind = K::kind(&()).to_string();
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, value)| decode(value).unwrap())
            .collect()
    }

    pub fn remove<K: ClusterResource>(&self, namespace: &str, name: &str) {
        self.state.lock().unwrap().objects.remove(&key::<K>(namespace, name));
    }

    /// Events published so far, oldest first
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn event_reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }

    /// Successful writes so far
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Fail the next `count` guarded writes to objects of `kind`
    pub fn inject_conflicts(&self, kind: &str, count: u32) {
        self.state
            .lock()
            .unwrap()
            .conflicts
            .insert(kind.to_string(), count);
    }

    /// Edit a stored object in place, bumping its resourceVersion
    pub fn mutate<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut Value),
    ) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let value = state
            .objects
            .get_mut(&key::<K>(namespace, name))
            .unwrap_or_else(|| panic!("{} {namespace}/{name} not stored", K::kind(&())));
        edit(value);
        value["metadata"]["resourceVersion"] = json!(version);
    }

    pub fn set_ready_replicas(&self, namespace: &str, deployment: &str, ready: i32) {
        self.mutate::<k8s_openapi::api::apps::v1::Deployment>(namespace, deployment, |value| {
            value["status"]["readyReplicas"] = json!(ready);
        });
    }

    /// Mark every stored deployment in `namespace` fully ready
    pub fn make_all_deployments_ready(&self, namespace: &str) {
        let deployments: Vec<k8s_openapi::api::apps::v1::Deployment> = self.list(namespace);
        for deployment in deployments {
            let replicas = deployment
                .spec
                .as_ref()
                .and_then(|spec| spec.replicas)
                .unwrap_or(1);
            let name = deployment.metadata.name.unwrap_or_default();
            self.set_ready_replicas(namespace, &name, replicas);
        }
    }

    pub fn set_job_counts(&self, namespace: &str, job: &str, succeeded: i32, failed: i32) {
        self.mutate::<k8s_openapi::api::batch::v1::Job>(namespace, job, |value| {
            value["status"]["succeeded"] = json!(succeeded);
            value["status"]["failed"] = json!(failed);
            value["status"]["active"] = json!(0);
        });
    }

    /// Simulate a spec edit: the API server bumps `metadata.generation`
    pub fn edit_project_spec(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut SupabaseProjectSpec),
    ) {
        let mut project: SupabaseProject = self.object(namespace, name).unwrap();
        edit(&mut project.spec);
        let spec = serde_json::to_value(&project.spec).unwrap();
        let generation = project.metadata.generation.unwrap_or(1) + 1;
        self.mutate::<SupabaseProject>(namespace, name, |value| {
            value["spec"] = spec;
            value["metadata"]["generation"] = json!(generation);
        });
    }

    pub fn mark_deleting(&self, namespace: &str, name: &str) {
        self.mutate::<SupabaseProject>(namespace, name, |value| {
            value["metadata"]["deletionTimestamp"] = json!("2025-01-01T00:00:00Z");
        });
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, ClusterError> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&key::<K>(namespace, name))
            .map(decode::<K>)
            .transpose()
    }

    async fn create<K: ClusterResource>(
        &self,
        namespace: &str,
        object: &K,
    ) -> Result<K, ClusterError> {
        let mut value = encode(object)?;
        let name = object.meta().name.clone().unwrap_or_default();
        let key = key::<K>(namespace, &name);

        let mut state = self.state.lock().unwrap();
        if state.objects.contains_key(&key) {
            return Err(conflict(&key.0, &name));
        }
        value["metadata"]["namespace"] = json!(namespace);
        value["metadata"]["resourceVersion"] = json!(state.next_version());
        value["metadata"]["uid"] = json!(uuid::Uuid::new_v4().to_string());
        state.objects.insert(key, value.clone());
        state.writes += 1;
        decode(&value)
    }

    async fn replace<K: ClusterResource>(
        &self,
        namespace: &str,
        object: &K,
    ) -> Result<K, ClusterError> {
        let mut value = encode(object)?;
        let name = object.meta().name.clone().unwrap_or_default();
        let key = key::<K>(namespace, &name);

        let mut state = self.state.lock().unwrap();
        state.take_conflict(&key.0, &name)?;
        let version = state.next_version();
        let stored = state.guarded(&key, object.meta().resource_version.as_deref())?;
        // Status is owned by the subresource
        let status = stored.get_mut("status").map(Value::take).unwrap_or(Value::Null);
        if let Some(fields) = value.as_object_mut() {
            if status.is_null() {
                fields.remove("status");
            } else {
                fields.insert("status".to_string(), status);
            }
        }
        value["metadata"]["resourceVersion"] = json!(version);
        *stored = value.clone();
        state.writes += 1;
        decode(&value)
    }

    async fn delete<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.objects.remove(&key::<K>(namespace, name)).is_some() {
            state.writes += 1;
        }
        Ok(())
    }

    /// Replaces the stored status wholesale, like a PUT to the status subresource
    async fn update_project_status(
        &self,
        project: &SupabaseProject,
        status: &SupabaseProjectStatus,
    ) -> Result<SupabaseProject, ClusterError> {
        let name = project.name_or_empty();
        let key = key::<SupabaseProject>(project.namespace_or_default(), name);

        let mut state = self.state.lock().unwrap();
        state.take_conflict(&key.0, name)?;
        let version = state.next_version();
        let stored = state.guarded(&key, project.metadata.resource_version.as_deref())?;
        stored["status"] =
            serde_json::to_value(status).map_err(|e| ClusterError::Serialization(e.to_string()))?;
        stored["metadata"]["resourceVersion"] = json!(version);
        let updated = stored.clone();
        state.writes += 1;
        decode(&updated)
    }

    async fn set_project_finalizers(
        &self,
        project: &SupabaseProject,
        finalizers: Vec<String>,
    ) -> Result<SupabaseProject, ClusterError> {
        let name = project.name_or_empty();
        let key = key::<SupabaseProject>(project.namespace_or_default(), name);

        let mut state = self.state.lock().unwrap();
        state.take_conflict(&key.0, name)?;
        let version = state.next_version();
        let stored = state.guarded(&key, project.metadata.resource_version.as_deref())?;
        let release = finalizers.is_empty() && !stored["metadata"]["deletionTimestamp"].is_null();
        stored["metadata"]["finalizers"] = json!(finalizers);
        stored["metadata"]["resourceVersion"] = json!(version);
        let updated = stored.clone();
        if release {
            state.objects.remove(&key);
        }
        state.writes += 1;
        decode(&updated)
    }

    async fn publish_event(
        &self,
        project: &SupabaseProject,
        event: &Event,
    ) -> Result<(), ClusterError> {
        self.state.lock().unwrap().events.push(RecordedEvent {
            project: project.name_or_empty().to_string(),
            warning: event.type_ == EventType::Warning,
            reason: event.reason.clone(),
            note: event.note.clone().unwrap_or_default(),
        });
        Ok(())
    }
}

pub const NAMESPACE: &str = "default";

pub fn project(name: &str) -> SupabaseProject {
    let mut project = SupabaseProject::new(
        name,
        SupabaseProjectSpec {
            project_id: name.to_string(),
            database: DatabaseConfig {
                secret_ref: SecretReference {
                    name: format!("{name}-db"),
                    namespace: None,
                },
                ssl_mode: "require".to_string(),
                max_connections: None,
            },
            storage: StorageConfig {
                secret_ref: SecretReference {
                    name: format!("{name}-s3"),
                    namespace: None,
                },
                force_path_style: true,
            },
            ..SupabaseProjectSpec::default()
        },
    );
    project.metadata.namespace = Some(NAMESPACE.to_string());
    project.metadata.generation = Some(1);
    project
}

pub fn secret(name: &str, entries: &[(&str, &str)]) -> Secret {
    let mut secret = Secret::default();
    secret.metadata.name = Some(name.to_string());
    secret.metadata.namespace = Some(NAMESPACE.to_string());
    secret.data = Some(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect(),
    );
    secret
}

pub fn database_secret(name: &str) -> Secret {
    secret(
        name,
        &[
            ("host", "db.example.internal"),
            ("port", "5432"),
            ("database", "postgres"),
            ("username", "supabase_admin"),
            ("password", "hunter2"),
        ],
    )
}

pub fn storage_secret(name: &str) -> Secret {
    secret(
        name,
        &[
            ("endpoint", "https://s3.example.internal"),
            ("region", "us-east-1"),
            ("bucket", "acme-storage"),
            ("accessKeyId", "AKIAEXAMPLE"),
            ("secretAccessKey", "secret"),
        ],
    )
}

/// A cluster holding project `name` and both dependency secrets
pub fn seeded_cluster(name: &str) -> FakeCluster {
    let cluster = FakeCluster::new();
    cluster.insert(database_secret(&format!("{name}-db")));
    cluster.insert(storage_secret(&format!("{name}-s3")));
    cluster.insert(project(name));
    cluster
}

pub fn reconciler(cluster: FakeCluster) -> Reconciler<FakeCluster> {
    Reconciler::new(cluster, ControllerConfig::default())
}

pub fn stored_project(reconciler: &Reconciler<FakeCluster>, name: &str) -> SupabaseProject {
    reconciler.cluster().object(NAMESPACE, name).unwrap()
}

pub fn stored_status(reconciler: &Reconciler<FakeCluster>, name: &str) -> SupabaseProjectStatus {
    stored_project(reconciler, name).status.unwrap_or_default()
}

/// Drive `name` from a fresh project to Running with every deployment ready
pub async fn drive_to_running(reconciler: &Reconciler<FakeCluster>, name: &str) {
    reconciler.reconcile_pass(NAMESPACE, name).await.unwrap();
    reconciler
        .cluster()
        .set_job_counts(NAMESPACE, &format!("{name}-db-init"), 1, 0);
    reconciler.reconcile_pass(NAMESPACE, name).await.unwrap();
    reconciler.cluster().make_all_deployments_ready(NAMESPACE);
    reconciler.reconcile_pass(NAMESPACE, name).await.unwrap();
}
