//! Studio admin console.

use super::{
    cluster_ip_service, container_port, deployment, env_secret, env_value, labels, resolve_image,
    resolve_replicas, resolve_resources, resource_name, with_extra_env, BuildError,
    ComponentBuilder, DefaultResources,
};
use crate::constants::{
    ANON_KEY, DEFAULT_STUDIO_IMAGE, JWT_SECRET_KEY, KONG_PROXY_PORT, META_PORT,
    PG_META_CRYPTO_KEY, SERVICE_ROLE_KEY, STUDIO_PORT,
};
use crate::crd::SupabaseProject;
use crate::secrets::credentials_secret_name;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};

const NAME: &str = "studio";
const COMPONENT: &str = "studio";

const RESOURCES: DefaultResources = DefaultResources {
    requests: ("256Mi", "100m"),
    limits: ("512Mi", "500m"),
};

#[derive(Debug, Clone, Copy)]
pub struct StudioBuilder;

impl ComponentBuilder for StudioBuilder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn condition_type(&self) -> &'static str {
        "StudioReady"
    }

    fn build_workload(&self, project: &SupabaseProject) -> Result<Deployment, BuildError> {
        let studio = project.spec.studio.as_ref();
        let overrides = studio.map(|s| &s.component);
        let name = resource_name(project, NAME)?;
        let labels = labels(project, NAME, COMPONENT);
        let jwt_secret = credentials_secret_name(project.name_or_empty());

        let api_url = format!("http://{}:{KONG_PROXY_PORT}", resource_name(project, "kong")?);
        let public_url = studio
            .and_then(|s| s.public_url.clone())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| api_url.clone());
        let meta_url = format!("http://{}:{META_PORT}", resource_name(project, "meta")?);

        let env = vec![
            env_value("PORT", STUDIO_PORT.to_string()),
            env_value("HOSTNAME", "0.0.0.0"),
            env_value("SUPABASE_URL", api_url),
            env_value("SUPABASE_PUBLIC_URL", public_url.clone()),
            env_value("NEXT_PUBLIC_SUPABASE_URL", public_url.clone()),
            env_value("NEXT_PUBLIC_GOTRUE_URL", format!("{public_url}/auth/v1")),
            env_value("NEXT_PUBLIC_SITE_URL", public_url),
            env_value("STUDIO_PG_META_URL", meta_url),
            env_value("NEXT_PUBLIC_ENABLE_LOGS", "false"),
            env_value("NEXT_ANALYTICS_BACKEND_PROVIDER", "postgres"),
            env_secret("POSTGRES_PASSWORD", &project.spec.database.secret_ref.name, "password"),
            env_secret("SUPABASE_ANON_KEY", &jwt_secret, ANON_KEY),
            env_secret("NEXT_PUBLIC_SUPABASE_ANON_KEY", &jwt_secret, ANON_KEY),
            env_secret("SUPABASE_SERVICE_KEY", &jwt_secret, SERVICE_ROLE_KEY),
            env_secret("AUTH_JWT_SECRET", &jwt_secret, JWT_SECRET_KEY),
            env_secret("PG_META_CRYPTO_KEY", &jwt_secret, PG_META_CRYPTO_KEY),
        ];

        let container = Container {
            name: NAME.to_string(),
            image: Some(resolve_image(overrides, DEFAULT_STUDIO_IMAGE)),
            env: Some(with_extra_env(env, overrides)),
            ports: Some(vec![container_port("http", STUDIO_PORT)]),
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
            &[("http", STUDIO_PORT)],
        ))
    }
}
