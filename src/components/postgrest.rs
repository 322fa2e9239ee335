//! PostgREST.

use super::{
    cluster_ip_service, container_port, database_env, database_url, deployment, env_secret,
    env_value, labels, resolve_image, resolve_replicas, resolve_resources, resource_name,
    with_extra_env, BuildError, ComponentBuilder, DefaultResources,
};
use crate::constants::{DEFAULT_POSTGREST_IMAGE, JWT_SECRET_KEY, POSTGREST_PORT};
use crate::crd::SupabaseProject;
use crate::secrets::credentials_secret_name;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};

const NAME: &str = "postgrest";
const COMPONENT: &str = "rest-api";

const RESOURCES: DefaultResources = DefaultResources {
    requests: ("128Mi", "100m"),
    limits: ("256Mi", "200m"),
};

#[derive(Debug, Clone, Copy)]
pub struct PostgrestBuilder;

impl ComponentBuilder for PostgrestBuilder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn condition_type(&self) -> &'static str {
        "PostgRESTReady"
    }

    fn build_workload(&self, project: &SupabaseProject) -> Result<Deployment, BuildError> {
        let overrides = project.spec.postgrest.as_ref();
        let name = resource_name(project, NAME)?;
        let labels = labels(project, NAME, COMPONENT);
        let ssl_mode = &project.spec.database.ssl_mode;
        let jwt_secret = credentials_secret_name(project.name_or_empty());

        let mut env = database_env(project, "DB_");
        env.extend([
            env_value("PGRST_DB_URI", database_url("postgres", "authenticator", ssl_mode)),
            env_secret("PGRST_JWT_SECRET", &jwt_secret, JWT_SECRET_KEY),
            env_value("PGRST_DB_ANON_ROLE", "anon"),
            env_value("PGRST_DB_SCHEMAS", "public,storage,graphql_public"),
            env_value("PGRST_DB_EXTRA_SEARCH_PATH", "public"),
        ]);

        let container = Container {
            name: NAME.to_string(),
            image: Some(resolve_image(overrides, DEFAULT_POSTGREST_IMAGE)),
            env: Some(with_extra_env(env, overrides)),
            ports: Some(vec![container_port("http", POSTGREST_PORT)]),
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
            &[("http", POSTGREST_PORT)],
        ))
    }
}
