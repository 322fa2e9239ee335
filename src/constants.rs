//! # Constants
//!
//! Names, keys, and defaults shared across the operator.

/// Field manager and controller name
pub const CONTROLLER_NAME: &str = "supabase-operator";

/// Finalizer guarding project deletion
pub const FINALIZER: &str = "supabase.strrl.dev/finalizer";

/// Digest of the Deployment spec the controller last applied
pub const SPEC_HASH_ANNOTATION: &str = "supabase.strrl.dev/spec-hash";

// Credential bundle keys
pub const JWT_SECRET_KEY: &str = "jwt-secret";
pub const ANON_KEY: &str = "anon-key";
pub const SERVICE_ROLE_KEY: &str = "service-role-key";
pub const PG_META_CRYPTO_KEY: &str = "pg-meta-crypto-key";

/// Issuer claim of generated API tokens
pub const JWT_ISSUER: &str = "supabase";
/// Lifetime of generated API tokens (10 years)
pub const JWT_LIFETIME_SECS: i64 = 10 * 365 * 24 * 60 * 60;
/// Width of generated random keys in bytes
pub const RANDOM_KEY_BYTES: usize = 32;
/// Expiry handed to GoTrue for user sessions
pub const AUTH_JWT_EXP_SECS: u32 = 3600;

// Dependency bundle fields
pub const DATABASE_REQUIRED_KEYS: [&str; 5] = ["host", "port", "database", "username", "password"];
pub const STORAGE_REQUIRED_KEYS: [&str; 5] = [
    "endpoint",
    "region",
    "bucket",
    "accessKeyId",
    "secretAccessKey",
];
pub const BASIC_AUTH_REQUIRED_KEYS: [&str; 2] = ["username", "password"];

// Dependency status keys
pub const DEPENDENCY_POSTGRESQL: &str = "postgresql";
pub const DEPENDENCY_S3: &str = "s3";
pub const DEPENDENCY_DASHBOARD_AUTH: &str = "dashboardAuth";

// Bootstrap job defaults
pub const DB_INIT_IMAGE: &str = "postgres:15-alpine";
pub const DB_INIT_TTL_SECS: i32 = 600;
pub const DEFAULT_BOOTSTRAP_RETRY_CEILING: i32 = 3;

// Default component images
pub const DEFAULT_KONG_IMAGE: &str = "kong:2.8.1";
pub const DEFAULT_AUTH_IMAGE: &str = "supabase/gotrue:v2.180.0";
pub const DEFAULT_POSTGREST_IMAGE: &str = "postgrest/postgrest:v13.0.7";
pub const DEFAULT_REALTIME_IMAGE: &str = "supabase/realtime:v2.51.11";
pub const DEFAULT_STORAGE_API_IMAGE: &str = "supabase/storage-api:v1.28.0";
pub const DEFAULT_META_IMAGE: &str = "supabase/postgres-meta:v0.93.1";
pub const DEFAULT_STUDIO_IMAGE: &str = "supabase/studio:2025.10.01-sha-8460121";

// Component ports
pub const KONG_PROXY_PORT: i32 = 8000;
pub const KONG_PROXY_TLS_PORT: i32 = 8443;
pub const KONG_ADMIN_PORT: i32 = 8001;
pub const AUTH_PORT: i32 = 9999;
pub const POSTGREST_PORT: i32 = 3000;
pub const REALTIME_PORT: i32 = 4000;
pub const STORAGE_API_PORT: i32 = 5000;
pub const META_PORT: i32 = 8080;
pub const STUDIO_PORT: i32 = 3000;

// Labels
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const PART_OF_VALUE: &str = "supabase";

// Requeue defaults
pub const DEFAULT_DEPENDENCY_REQUEUE: &str = "30s";
pub const DEFAULT_SECRETS_REQUEUE: &str = "10s";
pub const DEFAULT_BOOTSTRAP_REQUEUE: &str = "10s";
pub const DEFAULT_COMPONENTS_REQUEUE: &str = "10s";
pub const DEFAULT_CONFLICT_REQUEUE: &str = "2s";
pub const DEFAULT_JOB_STARTED_REQUEUE: &str = "5s";
pub const DEFAULT_JOB_RUNNING_REQUEUE: &str = "5s";
pub const DEFAULT_RESYNC_INTERVAL: &str = "5m";
pub const DEFAULT_RECONCILE_TIMEOUT: &str = "30s";

/// Error-policy Fibonacci backoff bounds (seconds)
pub const DEFAULT_ERROR_BACKOFF_MIN_SECS: u64 = 5;
pub const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 300;
/// Requeue used when the backoff state cannot be read
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 30;

// Server defaults
pub const DEFAULT_METRICS_PORT: u16 = 8080;
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Delay before the watch stream is polled again after an unclassified error
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
/// Upper bound of the watch backoff after API server throttling (ms)
pub const DEFAULT_WATCH_MAX_BACKOFF_MS: u64 = 30_000;
/// Initial watch backoff after API server throttling (ms)
pub const DEFAULT_WATCH_INITIAL_BACKOFF_MS: u64 = 1_000;
