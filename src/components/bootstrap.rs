//! # Database Bootstrap
//!
//! The one-shot Job that prepares the external database for the components:
//! extensions, schemas, roles, and grants. Scripts ship in a ConfigMap
//! mounted at `/scripts` and run in order by `run-migrations.sh`.
//!
//! Every statement is idempotent, so a retried or re-created Job is safe.

use super::{
    database_env, database_url, env_secret, env_value, labels, object_meta, resource_name,
    BuildError,
};
use crate::constants::{AUTH_JWT_EXP_SECS, DB_INIT_IMAGE, DB_INIT_TTL_SECS, JWT_SECRET_KEY};
use crate::crd::SupabaseProject;
use crate::secrets::credentials_secret_name;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::fmt::Write;

const NAME: &str = "db-init";
const COMPONENT: &str = "database";
const SCRIPTS_VOLUME: &str = "init-scripts";
const SCRIPTS_PATH: &str = "/scripts";
const RUNNER: &str = "run-migrations.sh";

const EXTENSIONS: [&str; 4] = ["pgcrypto", "pgjwt", "uuid-ossp", "pg_stat_statements"];
const SCHEMAS: [&str; 3] = ["auth", "storage", "realtime"];
const ROLES: [(&str, &str); 3] = [
    ("authenticator", "NOLOGIN"),
    ("anon", "NOLOGIN"),
    ("service_role", "NOLOGIN BYPASSRLS"),
];

/// Name shared by the bootstrap Job and its scripts ConfigMap
pub fn job_name(project: &SupabaseProject) -> Result<String, BuildError> {
    resource_name(project, NAME)
}

/// Ordered `(file name, contents)` pairs of the SQL scripts
pub fn bootstrap_scripts() -> Vec<(&'static str, String)> {
    let extensions = EXTENSIONS
        .iter()
        .map(|ext| format!("CREATE EXTENSION IF NOT EXISTS \"{ext}\";\n"))
        .collect::<String>();

    let schemas = SCHEMAS
        .iter()
        .map(|schema| format!("CREATE SCHEMA IF NOT EXISTS {schema};\n"))
        .collect::<String>();

    let roles = ROLES
        .iter()
        .map(|(role, attrs)| {
            format!(
                "DO $$ BEGIN IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '{role}') \
                 THEN CREATE ROLE {role} {attrs}; END IF; END $$;\n"
            )
        })
        .collect::<String>();

    let mut grants = String::new();
    for schema in SCHEMAS {
        let _ = writeln!(grants, "GRANT USAGE ON SCHEMA {schema} TO authenticator;");
        for object in ["TABLES", "SEQUENCES", "FUNCTIONS"] {
            let _ = writeln!(
                grants,
                "GRANT ALL ON ALL {object} IN SCHEMA {schema} TO authenticator;"
            );
        }
    }
    grants.push_str("GRANT authenticator TO anon;\n");
    grants.push_str("GRANT authenticator TO service_role;\n");

    vec![
        ("00-extensions.sql", extensions),
        ("01-schemas.sql", schemas),
        ("02-roles.sql", roles),
        ("03-grants.sql", grants),
    ]
}

fn runner_script(files: &[&str]) -> String {
    let mut script = String::from(
        "#!/bin/bash\nset -e\n\n\
         echo \"Initializing database ${DB_NAME} at ${DB_HOST}:${DB_PORT}\"\n\n\
         SQL_FILES=(\n",
    );
    for file in files {
        let _ = writeln!(script, "  \"{file}\"");
    }
    script.push_str(
        ")\n\n\
         for sql_file in \"${SQL_FILES[@]}\"; do\n\
         \x20 echo \"Executing ${sql_file}\"\n\
         \x20 psql \"${DATABASE_URL}\" -v ON_ERROR_STOP=1 -f \"/scripts/${sql_file}\"\n\
         done\n\n\
         echo \"Database initialization complete\"\n",
    );
    script
}

/// ConfigMap holding the SQL scripts and the runner
pub fn build_scripts_config_map(project: &SupabaseProject) -> Result<ConfigMap, BuildError> {
    let name = job_name(project)?;
    let scripts = bootstrap_scripts();
    let files: Vec<&str> = scripts.iter().map(|(file, _)| *file).collect();
    let runner = runner_script(&files);

    let mut data: BTreeMap<String, String> = scripts
        .into_iter()
        .map(|(file, sql)| (file.to_string(), sql))
        .collect();
    data.insert(RUNNER.to_string(), runner);

    Ok(ConfigMap {
        metadata: object_meta(project, name, &labels(project, NAME, COMPONENT)),
        data: Some(data),
        ..ConfigMap::default()
    })
}

/// Bootstrap Job; the platform retries pods up to `retry_ceiling` times
pub fn build_job(project: &SupabaseProject, retry_ceiling: i32) -> Result<Job, BuildError> {
    let name = job_name(project)?;
    let labels = labels(project, NAME, COMPONENT);

    let mut env = database_env(project, "DB_");
    env.extend([
        env_value("DB_SSL_MODE", project.spec.database.ssl_mode.clone()),
        env_value(
            "DATABASE_URL",
            database_url("postgresql", "$(DB_USER)", "$(DB_SSL_MODE)"),
        ),
        env_value("PGPASSWORD", "$(DB_PASSWORD)"),
        env_secret(
            "JWT_SECRET",
            &credentials_secret_name(project.name_or_empty()),
            JWT_SECRET_KEY,
        ),
        env_value("JWT_EXP", AUTH_JWT_EXP_SECS.to_string()),
    ]);

    let container = Container {
        name: "init".to_string(),
        image: Some(DB_INIT_IMAGE.to_string()),
        command: Some(vec!["bash".to_string(), format!("{SCRIPTS_PATH}/{RUNNER}")]),
        env: Some(env),
        volume_mounts: Some(vec![VolumeMount {
            name: SCRIPTS_VOLUME.to_string(),
            mount_path: SCRIPTS_PATH.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        }]),
        ..Container::default()
    };

    Ok(Job {
        metadata: object_meta(project, name.clone(), &labels),
        spec: Some(JobSpec {
            backoff_limit: Some(retry_ceiling),
            ttl_seconds_after_finished: Some(DB_INIT_TTL_SECS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: SCRIPTS_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name,
                            ..ConfigMapVolumeSource::default()
                        }),
                        ..Volume::default()
                    }]),
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::project;

    #[test]
    fn test_scripts_are_ordered_and_idempotent() {
        let scripts = bootstrap_scripts();
        let files: Vec<_> = scripts.iter().map(|(f, _)| *f).collect();
        assert_eq!(
            files,
            ["00-extensions.sql", "01-schemas.sql", "02-roles.sql", "03-grants.sql"]
        );
        assert!(scripts[0].1.contains("CREATE EXTENSION IF NOT EXISTS \"pgjwt\";"));
        assert!(scripts[2].1.contains("CREATE ROLE service_role NOLOGIN BYPASSRLS"));
        assert!(scripts[2].1.contains("IF NOT EXISTS"));
        assert!(scripts[3].1.ends_with("GRANT authenticator TO service_role;\n"));
    }

    #[test]
    fn test_config_map_carries_runner() {
        let config_map = build_scripts_config_map(&project("acme")).unwrap();
        assert_eq!(config_map.metadata.name.as_deref(), Some("acme-db-init"));
        let data = config_map.data.unwrap();
        assert_eq!(data.len(), 5);
        let runner = &data["run-migrations.sh"];
        let first = runner.find("00-extensions.sql").unwrap();
        let last = runner.find("03-grants.sql").unwrap();
        assert!(first < last);
    }

    #[test]
    fn test_job_respects_retry_ceiling() {
        let job = build_job(&project("acme"), 3).unwrap();
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(3));
        assert_eq!(spec.ttl_seconds_after_finished, Some(600));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("postgres:15-alpine"));
        let env = container.env.as_ref().unwrap();
        let url = env.iter().find(|e| e.name == "DATABASE_URL").unwrap();
        assert!(url.value.as_deref().unwrap().ends_with("sslmode=$(DB_SSL_MODE)"));
        assert!(env.iter().any(|e| e.name == "JWT_SECRET"));
    }
}
