//! Storage API backed by the project's S3 bucket.

use super::{
    cluster_ip_service, container_port, database_env, deployment, env_secret, env_value, labels,
    resolve_image, resolve_replicas, resolve_resources, resource_name, with_extra_env, BuildError,
    ComponentBuilder, DefaultResources,
};
use crate::constants::{
    ANON_KEY, DEFAULT_STORAGE_API_IMAGE, JWT_SECRET_KEY, POSTGREST_PORT, SERVICE_ROLE_KEY,
    STORAGE_API_PORT,
};
use crate::crd::SupabaseProject;
use crate::secrets::credentials_secret_name;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};

const NAME: &str = "storage";
const COMPONENT: &str = "storage-api";

const RESOURCES: DefaultResources = DefaultResources {
    requests: ("64Mi", "50m"),
    limits: ("128Mi", "100m"),
};

#[derive(Debug, Clone, Copy)]
pub struct StorageBuilder;

impl ComponentBuilder for StorageBuilder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn condition_type(&self) -> &'static str {
        "StorageAPIReady"
    }

    fn build_workload(&self, project: &SupabaseProject) -> Result<Deployment, BuildError> {
        let overrides = project.spec.storage_api.as_ref();
        let name = resource_name(project, NAME)?;
        let labels = labels(project, NAME, COMPONENT);
        let jwt_secret = credentials_secret_name(project.name_or_empty());
        let s3_secret = &project.spec.storage.secret_ref.name;

        let mut env = vec![
            env_secret("ANON_KEY", &jwt_secret, ANON_KEY),
            env_secret("SERVICE_KEY", &jwt_secret, SERVICE_ROLE_KEY),
            env_secret("PGRST_JWT_SECRET", &jwt_secret, JWT_SECRET_KEY),
            env_value(
                "POSTGREST_URL",
                format!("http://{}:{POSTGREST_PORT}", resource_name(project, "postgrest")?),
            ),
        ];
        env.extend(database_env(project, "DB_"));
        env.extend([
            env_value("DB_SSL_MODE", project.spec.database.ssl_mode.clone()),
            env_value(
                "DATABASE_URL",
                "postgres://$(DB_USER):$(DB_PASSWORD)@$(DB_HOST):$(DB_PORT)/$(DB_NAME)",
            ),
            env_value("FILE_SIZE_LIMIT", "52428800"),
            env_value("STORAGE_BACKEND", "s3"),
            env_secret("GLOBAL_S3_BUCKET", s3_secret, "bucket"),
            env_secret("AWS_ACCESS_KEY_ID", s3_secret, "accessKeyId"),
            env_secret("AWS_SECRET_ACCESS_KEY", s3_secret, "secretAccessKey"),
            env_secret("AWS_DEFAULT_REGION", s3_secret, "region"),
            env_secret("GLOBAL_S3_ENDPOINT", s3_secret, "endpoint"),
            env_value(
                "GLOBAL_S3_FORCE_PATH_STYLE",
                project.spec.storage.force_path_style.to_string(),
            ),
        ]);

        let container = Container {
            name: NAME.to_string(),
            image: Some(resolve_image(overrides, DEFAULT_STORAGE_API_IMAGE)),
            env: Some(with_extra_env(env, overrides)),
            ports: Some(vec![container_port("http", STORAGE_API_PORT)]),
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
            &[("http", STORAGE_API_PORT)],
        ))
    }
}
