//! # Kong API Gateway
//!
//! DB-less Kong routing `/auth/v1`, `/rest/v1`, `/realtime/v1`, `/storage/v1`,
//! `/pg` and the dashboard to the project's services. The declarative config
//! lives in a ConfigMap and is rendered with the API keys at container start.

use super::{
    cluster_ip_service, container_port, deployment, env_secret, env_value, labels, object_meta,
    resolve_image, resolve_replicas, resolve_resources, resource_name, with_extra_env, BuildError,
    ComponentBuilder, DefaultResources,
};
use crate::constants::{
    ANON_KEY, AUTH_PORT, DEFAULT_KONG_IMAGE, KONG_ADMIN_PORT, KONG_PROXY_PORT, KONG_PROXY_TLS_PORT,
    META_PORT, POSTGREST_PORT, REALTIME_PORT, SERVICE_ROLE_KEY, STORAGE_API_PORT, STUDIO_PORT,
};
use crate::crd::{EndpointsStatus, SupabaseProject};
use crate::secrets::credentials_secret_name;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, Service, Volume, VolumeMount,
};
use std::collections::BTreeMap;
use std::fmt::Write;

const NAME: &str = "kong";
const COMPONENT: &str = "api-gateway";
const CONFIG_FILE: &str = "kong.yml";
const PLUGINS: &str = "request-transformer,cors,key-auth,acl,basic-auth";

const RESOURCES: DefaultResources = DefaultResources {
    requests: ("1Gi", "250m"),
    limits: ("2560Mi", "500m"),
};

#[derive(Debug, Clone, Copy)]
pub struct KongBuilder;

pub fn config_map_name(project: &SupabaseProject) -> Result<String, BuildError> {
    resource_name(project, "kong-config")
}

impl ComponentBuilder for KongBuilder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn condition_type(&self) -> &'static str {
        "KongReady"
    }

    fn build_workload(&self, project: &SupabaseProject) -> Result<Deployment, BuildError> {
        let overrides = project.spec.kong.as_ref();
        let name = resource_name(project, NAME)?;
        let labels = labels(project, NAME, COMPONENT);
        let jwt_secret = credentials_secret_name(project.name_or_empty());

        let mut env = vec![
            env_value("KONG_DATABASE", "off"),
            env_value("KONG_DECLARATIVE_CONFIG", "/tmp/kong.yml"),
            env_value("KONG_PROXY_ACCESS_LOG", "/dev/stdout"),
            env_value("KONG_ADMIN_ACCESS_LOG", "/dev/stdout"),
            env_value("KONG_PROXY_ERROR_LOG", "/dev/stderr"),
            env_value("KONG_ADMIN_ERROR_LOG", "/dev/stderr"),
            env_value("KONG_ADMIN_LISTEN", format!("0.0.0.0:{KONG_ADMIN_PORT}")),
            env_value("KONG_DNS_ORDER", "LAST,A,CNAME"),
            env_value("KONG_PLUGINS", PLUGINS),
            env_secret("SUPABASE_ANON_KEY", &jwt_secret, ANON_KEY),
            env_secret("SUPABASE_SERVICE_KEY", &jwt_secret, SERVICE_ROLE_KEY),
        ];

        match project
            .spec
            .studio
            .as_ref()
            .and_then(|s| s.dashboard_basic_auth_secret_ref.as_ref())
        {
            Some(secret_ref) => {
                env.push(env_secret("DASHBOARD_USERNAME", &secret_ref.name, "username"));
                env.push(env_secret("DASHBOARD_PASSWORD", &secret_ref.name, "password"));
            }
            None => {
                env.push(env_value("DASHBOARD_USERNAME", "supabase"));
                env.push(env_value(
                    "DASHBOARD_PASSWORD",
                    "this_password_is_insecure_and_should_be_updated",
                ));
            }
        }

        let container = Container {
            name: NAME.to_string(),
            image: Some(resolve_image(overrides, DEFAULT_KONG_IMAGE)),
            command: Some(vec![
                "bash".to_string(),
                "-lc".to_string(),
                concat!(
                    "eval \"echo \\\"$$(cat /etc/kong/kong.yml)\\\"\" > /tmp/kong.yml",
                    " && /docker-entrypoint.sh kong docker-start",
                )
                .to_string(),
            ]),
            env: Some(with_extra_env(env, overrides)),
            ports: Some(vec![
                container_port("proxy", KONG_PROXY_PORT),
                container_port("proxy-ssl", KONG_PROXY_TLS_PORT),
                container_port("admin", KONG_ADMIN_PORT),
            ]),
            resources: Some(resolve_resources(overrides, &RESOURCES)),
            volume_mounts: Some(vec![VolumeMount {
                name: "kong-config".to_string(),
                mount_path: "/etc/kong".to_string(),
                read_only: Some(true),
                ..VolumeMount::default()
            }]),
            ..Container::default()
        };

        let volume = Volume {
            name: "kong-config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name(project)?,
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        };

        Ok(deployment(
            project,
            name,
            &labels,
            resolve_replicas(overrides)?,
            container,
            vec![volume],
        ))
    }

    fn build_endpoint(&self, project: &SupabaseProject) -> Result<Service, BuildError> {
        Ok(cluster_ip_service(
            project,
            resource_name(project, NAME)?,
            &labels(project, NAME, COMPONENT),
            &[("proxy", KONG_PROXY_PORT), ("proxy-ssl", KONG_PROXY_TLS_PORT)],
        ))
    }

    fn build_config(&self, project: &SupabaseProject) -> Result<Option<ConfigMap>, BuildError> {
        let name = config_map_name(project)?;
        let labels = labels(project, NAME, COMPONENT);

        Ok(Some(ConfigMap {
            metadata: object_meta(project, name, &labels),
            data: Some(BTreeMap::from([(
                CONFIG_FILE.to_string(),
                declarative_config(project.name_or_empty()),
            )])),
            ..ConfigMap::default()
        }))
    }
}

struct Route {
    name: &'static str,
    upstream: String,
    path: &'static str,
    key_auth: bool,
    acl: bool,
}

/// Kong declarative config; `$VAR` placeholders are expanded by the container command
fn declarative_config(project: &str) -> String {
    let routes = [
        Route {
            name: "auth-v1-open",
            upstream: format!("http://{project}-auth:{AUTH_PORT}/verify"),
            path: "/auth/v1/verify",
            key_auth: false,
            acl: false,
        },
        Route {
            name: "auth-v1-open-callback",
            upstream: format!("http://{project}-auth:{AUTH_PORT}/callback"),
            path: "/auth/v1/callback",
            key_auth: false,
            acl: false,
        },
        Route {
            name: "auth-v1-open-authorize",
            upstream: format!("http://{project}-auth:{AUTH_PORT}/authorize"),
            path: "/auth/v1/authorize",
            key_auth: false,
            acl: false,
        },
        Route {
            name: "auth-v1",
            upstream: format!("http://{project}-auth:{AUTH_PORT}/"),
            path: "/auth/v1/",
            key_auth: true,
            acl: true,
        },
        Route {
            name: "rest-v1",
            upstream: format!("http://{project}-postgrest:{POSTGREST_PORT}/"),
            path: "/rest/v1/",
            key_auth: true,
            acl: true,
        },
        Route {
            name: "graphql-v1",
            upstream: format!("http://{project}-postgrest:{POSTGREST_PORT}/rpc/graphql"),
            path: "/graphql/v1",
            key_auth: true,
            acl: true,
        },
        Route {
            name: "realtime-v1-ws",
            upstream: format!("http://{project}-realtime:{REALTIME_PORT}/socket"),
            path: "/realtime/v1/",
            key_auth: true,
            acl: true,
        },
        Route {
            name: "realtime-v1-rest",
            upstream: format!("http://{project}-realtime:{REALTIME_PORT}/api"),
            path: "/realtime/v1/api",
            key_auth: true,
            acl: true,
        },
        Route {
            name: "storage-v1",
            upstream: format!("http://{project}-storage:{STORAGE_API_PORT}/"),
            path: "/storage/v1/",
            key_auth: false,
            acl: false,
        },
        Route {
            name: "meta",
            upstream: format!("http://{project}-meta:{META_PORT}/"),
            path: "/pg/",
            key_auth: true,
            acl: true,
        },
    ];

    let mut config = String::from(
        r"_format_version: '2.1'
_transform: true

consumers:
  - username: DASHBOARD
  - username: anon
    keyauth_credentials:
      - key: $SUPABASE_ANON_KEY
  - username: service_role
    keyauth_credentials:
      - key: $SUPABASE_SERVICE_KEY

acls:
  - consumer: anon
    group: anon
  - consumer: service_role
    group: admin

basicauth_credentials:
  - consumer: DASHBOARD
    username: $DASHBOARD_USERNAME
    password: $DASHBOARD_PASSWORD

services:
",
    );

    for route in &routes {
        let _ = write!(
            config,
            "  - name: {name}
    url: {url}
    routes:
      - name: {name}-all
        strip_path: true
        paths:
          - {path}
    plugins:
      - name: cors
",
            name = route.name,
            url = route.upstream,
            path = route.path,
        );
        if route.key_auth {
            config.push_str(
                "      - name: key-auth
        config:
          hide_credentials: false
",
            );
        }
        if route.acl {
            config.push_str(
                "      - name: acl
        config:
          hide_groups_header: true
          allow:
            - admin
            - anon
",
            );
        }
    }

    let _ = write!(
        config,
        "  - name: dashboard
    url: http://{project}-studio:{STUDIO_PORT}/
    routes:
      - name: dashboard-all
        strip_path: true
        paths:
          - /
    plugins:
      - name: cors
      - name: basic-auth
        config:
          hide_credentials: true
",
    );

    config
}

/// Service URLs reported on `status.endpoints`, all routed through the gateway
pub fn endpoints(project: &SupabaseProject) -> EndpointsStatus {
    let api = format!(
        "http://{}:{KONG_PROXY_PORT}",
        super::service_host(project, NAME)
    );
    EndpointsStatus {
        auth: Some(format!("{api}/auth/v1")),
        rest: Some(format!("{api}/rest/v1")),
        realtime: Some(format!("{api}/realtime/v1")),
        storage: Some(format!("{api}/storage/v1")),
        api: Some(api),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::project;
    use crate::crd::ComponentConfig;

    #[test]
    fn test_gateway_replica_override() {
        let mut project = project("acme");
        project.spec.kong = Some(ComponentConfig {
            replicas: Some(3),
            ..ComponentConfig::default()
        });
        let deployment = KongBuilder.build_workload(&project).unwrap();
        assert_eq!(deployment.spec.unwrap().replicas, Some(3));
    }

    #[test]
    fn test_default_image_and_config_volume() {
        let deployment = KongBuilder.build_workload(&project("acme")).unwrap();
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some(DEFAULT_KONG_IMAGE));
        let volume = &pod.volumes.unwrap()[0];
        assert_eq!(volume.config_map.as_ref().unwrap().name, "acme-kong-config");
    }

    #[test]
    fn test_declarative_config_routes_to_project_services() {
        let config_map = KongBuilder.build_config(&project("acme")).unwrap().unwrap();
        let config = &config_map.data.unwrap()[CONFIG_FILE];
        assert!(config.contains("http://acme-auth:9999/"));
        assert!(config.contains("http://acme-postgrest:3000/"));
        assert!(config.contains("http://acme-realtime:4000/socket"));
        assert!(config.contains("http://acme-storage:5000/"));
        assert!(config.contains("http://acme-studio:3000/"));
        assert!(config.contains("$SUPABASE_ANON_KEY"));
    }

    #[test]
    fn test_endpoints() {
        let endpoints = endpoints(&project("acme"));
        assert_eq!(endpoints.api.as_deref(), Some("http://acme-kong.default.svc:8000"));
        assert_eq!(
            endpoints.rest.as_deref(),
            Some("http://acme-kong.default.svc:8000/rest/v1")
        );
    }
}
