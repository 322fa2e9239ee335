//! # Custom Resource Definitions
//!
//! CRD types for the Supabase operator.
//!
//! A `SupabaseProject` declares one Supabase stack: where its external database
//! and object storage live, per-component overrides, and ingress preferences.
//! Everything under `.status` is written by the reconciler only.

mod status;

pub use status::*;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// SupabaseProject Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: supabase.strrl.dev/v1alpha1
/// kind: SupabaseProject
/// metadata:
///   name: acme
///   namespace: default
/// spec:
///   projectId: acme
///   database:
///     secretRef:
///       name: acme-db
///   storage:
///     secretRef:
///       name: acme-s3
///   kong:
///     replicas: 3
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "SupabaseProject",
    group = "supabase.strrl.dev",
    version = "v1alpha1",
    namespaced,
    status = "SupabaseProjectStatus",
    shortname = "sbp",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string",
        "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SupabaseProjectSpec {
    /// Stable project identifier
    pub project_id: String,
    /// External PostgreSQL connection
    pub database: DatabaseConfig,
    /// External S3-compatible storage connection
    pub storage: StorageConfig,
    /// API gateway overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kong: Option<ComponentConfig>,
    /// GoTrue auth service overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ComponentConfig>,
    /// PostgREST overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgrest: Option<ComponentConfig>,
    /// Realtime overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<ComponentConfig>,
    /// Storage API overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_api: Option<ComponentConfig>,
    /// postgres-meta overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ComponentConfig>,
    /// Studio overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub studio: Option<StudioConfig>,
    /// Ingress preferences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressConfig>,
}

/// Reference to a Secret in the project namespace
///
/// Workloads read the Secret through `secretKeyRef`, which only resolves in
/// the pod's own namespace, so a reference naming any other namespace is
/// rejected during dependency validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    /// Must equal the project namespace when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretReference {
    /// Namespace named by the reference when it is not `owner_namespace`
    pub fn foreign_namespace<'a>(&'a self, owner_namespace: &str) -> Option<&'a str> {
        self.namespace.as_deref().filter(|namespace| *namespace != owner_namespace)
    }
}

/// External database connection
///
/// The referenced secret must carry `host`, `port`, `database`, `username`
/// and `password`. `sslMode` is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub secret_ref: SecretReference,
    /// SSL mode used when the secret does not specify one
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    /// Maximum connections per component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<i32>,
}

fn default_ssl_mode() -> String {
    "require".to_string()
}

/// External S3-compatible storage connection
///
/// The referenced secret must carry `endpoint`, `region`, `bucket`,
/// `accessKeyId` and `secretAccessKey`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub secret_ref: SecretReference,
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

fn default_true() -> bool {
    true
}

/// Per-component override set
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    /// Container image, replacing the built-in default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Desired replica count (0 keeps the default of 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 10))]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirementsSpec>,
    /// Extra environment variables appended after the built-in ones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_env: Vec<EnvVarSpec>,
}

/// Studio overrides
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudioConfig {
    #[serde(flatten)]
    pub component: ComponentConfig,
    /// Public URL the dashboard is served from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Basic auth credentials protecting the dashboard route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_basic_auth_secret_ref: Option<SecretReference>,
}

/// Container resource requests and limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// Environment variable override
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Ingress preferences
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl SupabaseProject {
    /// Namespace of the project, `default` when unset
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Name of the project, empty when unset
    pub fn name_or_empty(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Status snapshot from the last persisted pass
    pub fn current_status(&self) -> SupabaseProjectStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Whether the object carries a deletion timestamp
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|entry| entry == finalizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_identity() {
        let crd = SupabaseProject::crd();
        assert_eq!(crd.spec.group, "supabase.strrl.dev");
        assert_eq!(crd.spec.names.kind, "SupabaseProject");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.versions[0].name, "v1alpha1");
    }

    #[test]
    fn test_spec_defaults_from_minimal_yaml() {
        let yaml = r"
projectId: acme
database:
  secretRef:
    name: acme-db
storage:
  secretRef:
    name: acme-s3
kong:
  replicas: 3
";
        let spec: SupabaseProjectSpec = serde_yaml::from_str(yaml).expect("valid spec");
        assert_eq!(spec.database.ssl_mode, "require");
        assert!(spec.storage.force_path_style);
        assert_eq!(spec.kong.and_then(|k| k.replicas), Some(3));
        assert!(spec.auth.is_none());
    }

    #[test]
    fn test_studio_config_flattens_component_fields() {
        let yaml = r"
image: supabase/studio:custom
publicUrl: https://studio.example.com
dashboardBasicAuthSecretRef:
  name: studio-auth
";
        let studio: StudioConfig = serde_yaml::from_str(yaml).expect("valid studio config");
        assert_eq!(studio.component.image.as_deref(), Some("supabase/studio:custom"));
        assert_eq!(
            studio.dashboard_basic_auth_secret_ref.map(|r| r.name),
            Some("studio-auth".to_string())
        );
    }

    #[test]
    fn test_secret_reference_foreign_namespace() {
        let local = SecretReference { name: "db".into(), namespace: None };
        let explicit = SecretReference { name: "db".into(), namespace: Some("team-a".into()) };
        let remote = SecretReference { name: "db".into(), namespace: Some("shared".into()) };
        assert_eq!(local.foreign_namespace("team-a"), None);
        assert_eq!(explicit.foreign_namespace("team-a"), None);
        assert_eq!(remote.foreign_namespace("team-a"), Some("shared"));
    }
}
