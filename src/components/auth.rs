//! GoTrue auth service.

use super::{
    cluster_ip_service, container_port, database_url, deployment, env_secret, env_value, labels,
    resolve_image, resolve_replicas, resolve_resources, resource_name, with_extra_env, BuildError,
    ComponentBuilder, DefaultResources,
};
use crate::constants::{
    AUTH_JWT_EXP_SECS, AUTH_PORT, DEFAULT_AUTH_IMAGE, JWT_SECRET_KEY, KONG_PROXY_PORT,
};
use crate::crd::SupabaseProject;
use crate::secrets::credentials_secret_name;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};

const NAME: &str = "auth";
const COMPONENT: &str = "authentication";

const RESOURCES: DefaultResources = DefaultResources {
    requests: ("64Mi", "50m"),
    limits: ("128Mi", "100m"),
};

#[derive(Debug, Clone, Copy)]
pub struct AuthBuilder;

impl ComponentBuilder for AuthBuilder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn condition_type(&self) -> &'static str {
        "AuthReady"
    }

    fn build_workload(&self, project: &SupabaseProject) -> Result<Deployment, BuildError> {
        let overrides = project.spec.auth.as_ref();
        let name = resource_name(project, NAME)?;
        let labels = labels(project, NAME, COMPONENT);
        let db_secret = &project.spec.database.secret_ref.name;
        let ssl_mode = &project.spec.database.ssl_mode;
        let jwt_secret = credentials_secret_name(project.name_or_empty());
        let api_url = format!("http://{}:{KONG_PROXY_PORT}", resource_name(project, "kong")?);
        let site_url = project
            .spec
            .studio
            .as_ref()
            .and_then(|s| s.public_url.clone())
            .unwrap_or_else(|| api_url.clone());

        let env = vec![
            env_value("GOTRUE_API_HOST", "0.0.0.0"),
            env_value("GOTRUE_API_PORT", AUTH_PORT.to_string()),
            env_value("API_EXTERNAL_URL", format!("{api_url}/auth/v1")),
            env_value("GOTRUE_SITE_URL", site_url),
            env_value("GOTRUE_DB_DRIVER", "postgres"),
            env_secret("DB_HOST", db_secret, "host"),
            env_secret("DB_PORT", db_secret, "port"),
            env_secret("DB_NAME", db_secret, "database"),
            env_secret("DB_USER", db_secret, "username"),
            env_secret("DB_PASSWORD", db_secret, "password"),
            env_value(
                "GOTRUE_DB_DATABASE_URL",
                format!(
                    "{}&search_path=auth",
                    database_url("postgres", "$(DB_USER)", ssl_mode)
                ),
            ),
            env_secret("GOTRUE_JWT_SECRET", &jwt_secret, JWT_SECRET_KEY),
            env_value("GOTRUE_JWT_EXP", AUTH_JWT_EXP_SECS.to_string()),
            env_value("GOTRUE_JWT_AUD", "authenticated"),
            env_value("GOTRUE_JWT_DEFAULT_GROUP_NAME", "authenticated"),
            env_value("GOTRUE_JWT_ADMIN_ROLES", "service_role"),
            env_value("GOTRUE_DISABLE_SIGNUP", "false"),
        ];

        let container = Container {
            name: NAME.to_string(),
            image: Some(resolve_image(overrides, DEFAULT_AUTH_IMAGE)),
            env: Some(with_extra_env(env, overrides)),
            ports: Some(vec![container_port("http", AUTH_PORT)]),
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
            &[("http", AUTH_PORT)],
        ))
    }
}
