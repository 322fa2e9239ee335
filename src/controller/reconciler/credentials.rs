//! # Credential Lifecycle
//!
//! Creates the project's credential bundle on first use and heals bundles
//! missing derived values. Values already stored are never rewritten: every
//! running component holds tokens signed with the stored key.

use super::error::ReconcilerError;
use super::owner_reference;
use crate::components::labels;
use crate::constants::{ANON_KEY, JWT_SECRET_KEY, PG_META_CRYPTO_KEY, SERVICE_ROLE_KEY};
use crate::controller::cluster::{within_deadline, ClusterApi};
use crate::crd::SupabaseProject;
use crate::secrets::{
    credentials_secret_name, generate_random_key, issue_token, secret_value, TokenError, TokenRole,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// What the pass did to the credential bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOutcome {
    Created,
    /// Keys that were missing and have been filled in
    Healed(Vec<&'static str>),
    Unchanged,
}

impl From<TokenError> for ReconcilerError {
    fn from(error: TokenError) -> Self {
        ReconcilerError::CredentialGeneration(error.to_string())
    }
}

/// Values to write into the bundle, keyed by bundle key
type Entries = Vec<(&'static str, Zeroizing<String>)>;

fn fresh_bundle(issued_at: i64) -> Result<Entries, TokenError> {
    let signing_key = generate_random_key()?;
    let anon = Zeroizing::new(issue_token(&signing_key, TokenRole::Anon, issued_at)?);
    let service = Zeroizing::new(issue_token(&signing_key, TokenRole::ServiceRole, issued_at)?);
    let meta = generate_random_key()?;

    Ok(vec![
        (JWT_SECRET_KEY, signing_key),
        (ANON_KEY, anon),
        (SERVICE_ROLE_KEY, service),
        (PG_META_CRYPTO_KEY, meta),
    ])
}

/// Entries missing from an existing bundle
///
/// Without a signing key the stored tokens cannot be verified by anyone, so
/// a new key is generated and both tokens are re-issued from it.
fn missing_entries(existing: &Secret, issued_at: i64) -> Result<Entries, TokenError> {
    let mut entries = Entries::new();

    let signing_key = match secret_value(existing, JWT_SECRET_KEY) {
        Some(key) => Zeroizing::new(key),
        None => {
            let key = generate_random_key()?;
            entries.push((JWT_SECRET_KEY, key.clone()));
            entries.push((
                ANON_KEY,
                Zeroizing::new(issue_token(&key, TokenRole::Anon, issued_at)?),
            ));
            entries.push((
                SERVICE_ROLE_KEY,
                Zeroizing::new(issue_token(&key, TokenRole::ServiceRole, issued_at)?),
            ));
            key
        }
    };

    for (key, role) in [(ANON_KEY, TokenRole::Anon), (SERVICE_ROLE_KEY, TokenRole::ServiceRole)] {
        if entries.iter().any(|(entry, _)| *entry == key) || secret_value(existing, key).is_some() {
            continue;
        }
        entries.push((key, Zeroizing::new(issue_token(&signing_key, role, issued_at)?)));
    }

    if secret_value(existing, PG_META_CRYPTO_KEY).is_none() {
        entries.push((PG_META_CRYPTO_KEY, generate_random_key()?));
    }

    Ok(entries)
}

fn to_data(entries: &Entries) -> BTreeMap<String, ByteString> {
    entries
        .iter()
        .map(|(key, value)| ((*key).to_string(), ByteString(value.as_bytes().to_vec())))
        .collect()
}

/// Ensure the project's credential bundle exists and is complete
pub async fn ensure_credentials<C: ClusterApi>(
    cluster: &C,
    project: &SupabaseProject,
    deadline: Instant,
) -> Result<CredentialOutcome, ReconcilerError> {
    let namespace = project.namespace_or_default();
    let name = credentials_secret_name(project.name_or_empty());
    let issued_at = chrono::Utc::now().timestamp();

    let existing: Option<Secret> = within_deadline(deadline, cluster.get(namespace, &name)).await?;

    let Some(mut existing) = existing else {
        let entries = fresh_bundle(issued_at)?;
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels(project, "jwt", "secrets")),
                owner_references: Some(vec![owner_reference(project)?]),
                ..ObjectMeta::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(to_data(&entries)),
            ..Secret::default()
        };

        within_deadline(deadline, cluster.create(namespace, &secret)).await?;
        info!(secret = %name, "✅ Created credential bundle");
        return Ok(CredentialOutcome::Created);
    };

    let entries = missing_entries(&existing, issued_at)?;
    if entries.is_empty() {
        return Ok(CredentialOutcome::Unchanged);
    }

    let healed: Vec<&'static str> = entries.iter().map(|(key, _)| *key).collect();
    if healed.contains(&JWT_SECRET_KEY) {
        warn!(
            secret = %name,
            "Credential bundle had no signing key, generated a new key and re-issued tokens"
        );
    }

    let mut data = existing.data.take().unwrap_or_default();
    data.extend(to_data(&entries));
    existing.data = Some(data);

    within_deadline(deadline, cluster.replace(namespace, &existing)).await?;
    info!(secret = %name, keys = ?healed, "🔧 Healed credential bundle");
    Ok(CredentialOutcome::Healed(healed))
}
