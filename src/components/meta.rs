//! postgres-meta.

use super::{
    cluster_ip_service, container_port, database_env, deployment, env_secret, env_value, labels,
    resolve_image, resolve_replicas, resolve_resources, resource_name, with_extra_env, BuildError,
    ComponentBuilder, DefaultResources,
};
use crate::constants::{DEFAULT_META_IMAGE, META_PORT, PG_META_CRYPTO_KEY};
use crate::crd::SupabaseProject;
use crate::secrets::credentials_secret_name;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};

const NAME: &str = "meta";
const COMPONENT: &str = "metadata";

const RESOURCES: DefaultResources = DefaultResources {
    requests: ("64Mi", "50m"),
    limits: ("128Mi", "100m"),
};

#[derive(Debug, Clone, Copy)]
pub struct MetaBuilder;

impl ComponentBuilder for MetaBuilder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn condition_type(&self) -> &'static str {
        "MetaReady"
    }

    fn build_workload(&self, project: &SupabaseProject) -> Result<Deployment, BuildError> {
        let overrides = project.spec.meta.as_ref();
        let name = resource_name(project, NAME)?;
        let labels = labels(project, NAME, COMPONENT);

        let mut env = vec![env_value("PG_META_PORT", META_PORT.to_string())];
        env.extend(database_env(project, "PG_META_DB_"));
        env.extend([
            env_value("PG_META_DB_SSL_MODE", project.spec.database.ssl_mode.clone()),
            env_secret(
                "CRYPTO_KEY",
                &credentials_secret_name(project.name_or_empty()),
                PG_META_CRYPTO_KEY,
            ),
        ]);

        let container = Container {
            name: NAME.to_string(),
            image: Some(resolve_image(overrides, DEFAULT_META_IMAGE)),
            env: Some(with_extra_env(env, overrides)),
            ports: Some(vec![container_port("http", META_PORT)]),
            resources: Some(resolve_resources(overrides, &RESOURCES)),
            ..Container::default()
        };

        Ok(deployment(project, name, &labels, resolve_replicas(overrides)?, container, Vec::new()))
    }

    fn build_endpoint(&self, project: &SupabaseProject) -> Result<Service, BuildError> {
        Ok(cluster_ip_service(
            project,
            resource_name(project, NAME)?,
            &labels(project, NAME, COMPONENT),
            &[("http", META_PORT)],
        ))
    }
}
