//! Credential Bundle Tests
//!
//! The bundle is generated once, never rotated by later passes, and healed
//! in place when keys go missing.

#[path = "integration/fake_cluster/mod.rs"]
mod fake_cluster;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fake_cluster::*;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;
use supabase_operator::controller::reconciler::Reconciler;
use supabase_operator::secrets::{secret_value, Claims};

fn bundle(reconciler: &Reconciler<FakeCluster>) -> Secret {
    reconciler.cluster().object(NAMESPACE, "acme-jwt").unwrap()
}

fn values(secret: &Secret) -> BTreeMap<String, String> {
    ["jwt-secret", "anon-key", "service-role-key", "pg-meta-crypto-key"]
        .into_iter()
        .filter_map(|key| secret_value(secret, key).map(|value| (key.to_string(), value)))
        .collect()
}

fn role_of(token: &str, signing_key: &str) -> String {
    let key = STANDARD.decode(signing_key).unwrap();
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&["supabase"]);
    decode::<Claims>(token, &DecodingKey::from_secret(&key), &validation)
        .unwrap()
        .claims
        .role
}

#[tokio::test]
async fn test_generated_bundle_is_complete_and_signed() {
    let reconciler = reconciler(seeded_cluster("acme"));
    reconciler.reconcile_pass(NAMESPACE, "acme").await.unwrap();

    let secret = bundle(&reconciler);
    assert_eq!(secret.type_.as_deref(), Some("Opaque"));
    let values = values(&secret);
    assert_eq!(values.len(), 4);
    assert_eq!(role_of(&values["anon-key"], &values["jwt-secret"]), "anon");
    assert_eq!(role_of(&values["service-role-key"], &values["jwt-secret"]), "service_role");

    let project = stored_project(&reconciler, "acme");
    let owner = &secret.metadata.owner_references.unwrap()[0];
    assert_eq!(Some(&owner.uid), project.metadata.uid.as_ref());
}

#[tokio::test]
async fn test_bundle_is_stable_across_passes() {
    let reconciler = reconciler(seeded_cluster("acme"));
    drive_to_running(&reconciler, "acme").await;
    let first = values(&bundle(&reconciler));

    for _ in 0..5 {
        reconciler.reconcile_pass(NAMESPACE, "acme").await.unwrap();
    }

    assert_eq!(values(&bundle(&reconciler)), first);
}

#[tokio::test]
async fn test_missing_tokens_are_healed_from_the_stored_key() {
    let cluster = seeded_cluster("acme");
    let signing_key = STANDARD.encode([7u8; 32]);
    cluster.insert(secret("acme-jwt", &[("jwt-secret", signing_key.as_str())]));
    let reconciler = reconciler(cluster);

    reconciler.reconcile_pass(NAMESPACE, "acme").await.unwrap();

    let values = values(&bundle(&reconciler));
    assert_eq!(values["jwt-secret"], signing_key);
    assert_eq!(role_of(&values["anon-key"], &signing_key), "anon");
    assert_eq!(role_of(&values["service-role-key"], &signing_key), "service_role");
    assert!(values.contains_key("pg-meta-crypto-key"));
}

#[tokio::test]
async fn test_missing_signing_key_reissues_tokens() {
    let cluster = seeded_cluster("acme");
    cluster.insert(secret(
        "acme-jwt",
        &[("anon-key", "stale"), ("service-role-key", "stale"), ("pg-meta-crypto-key", "meta")],
    ));
    let reconciler = reconciler(cluster);

    reconciler.reconcile_pass(NAMESPACE, "acme").await.unwrap();

    let values = values(&bundle(&reconciler));
    assert_ne!(values["anon-key"], "stale");
    assert_eq!(role_of(&values["anon-key"], &values["jwt-secret"]), "anon");
    assert_eq!(values["pg-meta-crypto-key"], "meta");
}
