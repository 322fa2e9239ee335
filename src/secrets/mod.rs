//! # Secrets
//!
//! Generation of project credential material: the signing key, the API tokens
//! derived from it, and the postgres-meta crypto key. Also the key lookups
//! shared by the dependency validator and the credential manager.

pub mod jwt;

pub use jwt::*;

use k8s_openapi::api::core::v1::Secret;

/// Name of the project's credential bundle
pub fn credentials_secret_name(project_name: &str) -> String {
    format!("{project_name}-jwt")
}

/// Non-empty value stored under `key`, from `data` or `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    let from_data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned());

    from_data
        .or_else(|| secret.string_data.as_ref().and_then(|data| data.get(key).cloned()))
        .filter(|value| !value.is_empty())
}

/// Whether `key` is present with a non-empty value
pub fn has_value(secret: &Secret, key: &str) -> bool {
    secret_value(secret, key).is_some()
}
