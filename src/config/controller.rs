//! # Controller Configuration
//!
//! Requeue delays, pass deadline, and bootstrap retry ceiling.

use super::{env_var_or_default, parse_kubernetes_duration};
use crate::constants::{
    DEFAULT_BOOTSTRAP_REQUEUE, DEFAULT_BOOTSTRAP_RETRY_CEILING, DEFAULT_COMPONENTS_REQUEUE,
    DEFAULT_CONFLICT_REQUEUE, DEFAULT_DEPENDENCY_REQUEUE, DEFAULT_JOB_RUNNING_REQUEUE,
    DEFAULT_JOB_STARTED_REQUEUE, DEFAULT_RECONCILE_TIMEOUT, DEFAULT_RESYNC_INTERVAL,
    DEFAULT_SECRETS_REQUEUE,
};
use std::time::Duration;
use tracing::warn;

/// Reconciler configuration
///
/// Failing steps requeue with step-specific delays: dependencies wait longest
/// since they need operator action, secrets and bootstrap failures are usually
/// transient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Requeue after a dependency validation failure
    pub dependency_requeue: Duration,
    /// Requeue after a credential failure
    pub secrets_requeue: Duration,
    /// Requeue after a recoverable bootstrap failure or a failed job still within its ceiling
    pub bootstrap_requeue: Duration,
    /// Requeue after a component convergence failure
    pub components_requeue: Duration,
    /// Requeue after an optimistic-concurrency conflict
    pub conflict_requeue: Duration,
    /// Requeue after the bootstrap job was just created
    pub job_started_requeue: Duration,
    /// Requeue while the bootstrap job is still active
    pub job_running_requeue: Duration,
    /// Periodic resync of a Running project
    pub resync_interval: Duration,
    /// Deadline for all cluster calls in one pass
    pub reconcile_timeout: Duration,
    /// Observed job failures tolerated before bootstrap is declared exhausted
    pub bootstrap_retry_ceiling: i32,
    /// Restrict the watch to one namespace
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            dependency_requeue: default_duration(DEFAULT_DEPENDENCY_REQUEUE),
            secrets_requeue: default_duration(DEFAULT_SECRETS_REQUEUE),
            bootstrap_requeue: default_duration(DEFAULT_BOOTSTRAP_REQUEUE),
            components_requeue: default_duration(DEFAULT_COMPONENTS_REQUEUE),
            conflict_requeue: default_duration(DEFAULT_CONFLICT_REQUEUE),
            job_started_requeue: default_duration(DEFAULT_JOB_STARTED_REQUEUE),
            job_running_requeue: default_duration(DEFAULT_JOB_RUNNING_REQUEUE),
            resync_interval: default_duration(DEFAULT_RESYNC_INTERVAL),
            reconcile_timeout: default_duration(DEFAULT_RECONCILE_TIMEOUT),
            bootstrap_retry_ceiling: DEFAULT_BOOTSTRAP_RETRY_CEILING,
            watch_namespace: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            dependency_requeue: duration_from_env("DEPENDENCY_REQUEUE", DEFAULT_DEPENDENCY_REQUEUE),
            secrets_requeue: duration_from_env("SECRETS_REQUEUE", DEFAULT_SECRETS_REQUEUE),
            bootstrap_requeue: duration_from_env("BOOTSTRAP_REQUEUE", DEFAULT_BOOTSTRAP_REQUEUE),
            components_requeue: duration_from_env("COMPONENTS_REQUEUE", DEFAULT_COMPONENTS_REQUEUE),
            conflict_requeue: duration_from_env("CONFLICT_REQUEUE", DEFAULT_CONFLICT_REQUEUE),
            job_started_requeue: duration_from_env(
                "JOB_STARTED_REQUEUE",
                DEFAULT_JOB_STARTED_REQUEUE,
            ),
            job_running_requeue: duration_from_env(
                "JOB_RUNNING_REQUEUE",
                DEFAULT_JOB_RUNNING_REQUEUE,
            ),
            resync_interval: duration_from_env("RESYNC_INTERVAL", DEFAULT_RESYNC_INTERVAL),
            reconcile_timeout: duration_from_env("RECONCILE_TIMEOUT", DEFAULT_RECONCILE_TIMEOUT),
            bootstrap_retry_ceiling: env_var_or_default(
                "BOOTSTRAP_RETRY_CEILING",
                DEFAULT_BOOTSTRAP_RETRY_CEILING,
            )
            .max(0),
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.trim().is_empty()),
        }
    }
}

fn default_duration(value: &str) -> Duration {
    parse_kubernetes_duration(value).unwrap_or(Duration::from_secs(10))
}

fn duration_from_env(key: &str, default: &str) -> Duration {
    match std::env::var(key) {
        Ok(raw) => parse_kubernetes_duration(&raw).unwrap_or_else(|e| {
            warn!("Ignoring {}={:?}: {}, using default {}", key, raw, e, default);
            default_duration(default)
        }),
        Err(_) => default_duration(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.dependency_requeue, Duration::from_secs(30));
        assert_eq!(config.secrets_requeue, Duration::from_secs(10));
        assert_eq!(config.bootstrap_requeue, Duration::from_secs(10));
        assert_eq!(config.job_started_requeue, Duration::from_secs(5));
        assert_eq!(config.job_running_requeue, Duration::from_secs(5));
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert_eq!(config.reconcile_timeout, Duration::from_secs(30));
        assert_eq!(config.bootstrap_retry_ceiling, 3);
    }

    #[test]
    fn test_dependency_failures_retry_slower_than_transient_steps() {
        let config = ControllerConfig::default();
        assert!(config.dependency_requeue > config.secrets_requeue);
        assert!(config.dependency_requeue > config.bootstrap_requeue);
        assert!(config.conflict_requeue < config.secrets_requeue);
    }

    #[test]
    fn test_invalid_env_duration_falls_back() {
        assert_eq!(
            duration_from_env("SUPABASE_OPERATOR_TEST_UNSET_DURATION", "7s"),
            Duration::from_secs(7)
        );
    }
}
