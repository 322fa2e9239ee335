//! Realtime.

use super::{
    cluster_ip_service, container_port, database_env, database_url, deployment, env_secret,
    env_value, labels, resolve_image, resolve_replicas, resolve_resources, resource_name,
    with_extra_env, BuildError, ComponentBuilder, DefaultResources,
};
use crate::constants::{DEFAULT_REALTIME_IMAGE, JWT_SECRET_KEY, REALTIME_PORT};
use crate::crd::SupabaseProject;
use crate::secrets::credentials_secret_name;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};

const NAME: &str = "realtime";
const COMPONENT: &str = "realtime";

const RESOURCES: DefaultResources = DefaultResources {
    requests: ("128Mi", "100m"),
    limits: ("256Mi", "200m"),
};

#[derive(Debug, Clone, Copy)]
pub struct RealtimeBuilder;

impl ComponentBuilder for RealtimeBuilder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn condition_type(&self) -> &'static str {
        "RealtimeReady"
    }

    fn build_workload(&self, project: &SupabaseProject) -> Result<Deployment, BuildError> {
        let overrides = project.spec.realtime.as_ref();
        let name = resource_name(project, NAME)?;
        let labels = labels(project, NAME, COMPONENT);
        let ssl_mode = &project.spec.database.ssl_mode;
        let jwt_secret = credentials_secret_name(project.name_or_empty());

        let mut env = database_env(project, "DB_");
        env.extend([
            env_value("DATABASE_URL", database_url("postgresql", "$(DB_USER)", ssl_mode)),
            env_secret("JWT_SECRET", &jwt_secret, JWT_SECRET_KEY),
            env_secret("SECRET_KEY_BASE", &jwt_secret, JWT_SECRET_KEY),
            env_value("APP_NAME", "realtime"),
            env_value("PORT", REALTIME_PORT.to_string()),
            env_value("RLIMIT_NOFILE", "10000"),
            env_value("SECURE_CHANNELS", "true"),
        ]);

        let container = Container {
            name: NAME.to_string(),
            image: Some(resolve_image(overrides, DEFAULT_REALTIME_IMAGE)),
            env: Some(with_extra_env(env, overrides)),
            ports: Some(vec![container_port("http", REALTIME_PORT)]),
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
            &[("http", REALTIME_PORT)],
        ))
    }
}
