//! # Error Policy
//!
//! Handling of passes that could not record their outcome, and of watch
//! stream errors.

use crate::constants;
use crate::controller::cluster::ClusterApi;
use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::SupabaseProject;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a failed pass with per-resource Fibonacci backoff
///
/// Conflicts retry after the short conflict delay from a fresh read; every
/// other error advances the resource's backoff.
pub fn handle_reconciliation_error<C: ClusterApi>(
    obj: Arc<SupabaseProject>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler<C>>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("default");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {}", name, error);
    metrics::increment_reconciliation_errors();

    if error.is_conflict() {
        let delay = ctx.config().conflict_requeue;
        info!(
            "🔄 Conflicting write, retrying from a fresh read in {}s",
            delay.as_secs()
        );
        metrics::increment_requeues_total("conflict");
        return Action::requeue(delay);
    }

    let resource_key = format!("{namespace}/{name}");
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key).or_insert_with(|| {
                BackoffState::new(
                    constants::DEFAULT_ERROR_BACKOFF_MIN_SECS,
                    constants::DEFAULT_ERROR_BACKOFF_MAX_SECS,
                )
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, trigger source: {})",
        backoff_seconds, error_count, "error-backoff"
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s, trigger source: error-backoff)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// How the watch loop should treat a stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

pub fn classify_watch_error(error: &str) -> WatchErrorKind {
    if error.contains("401") || error.contains("Unauthorized") || error.contains("WatchFailed") {
        WatchErrorKind::Unauthorized
    } else if error.contains("410")
        || error.contains("too old resource version")
        || error.contains("Expired")
        || error.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error.contains("429")
        || error.contains("storage is (re)initializing")
        || error.contains("TooManyRequests")
    {
        WatchErrorKind::Throttled
    } else if error.contains("ObjectNotFound")
        || (error.contains("404") && error.contains("not found"))
    {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Log a watch stream error and pause when the API server asks for it
pub async fn handle_watch_stream_error(error: &str, backoff: &AtomicU64, max_backoff_ms: u64) {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error) {
        WatchErrorKind::Unauthorized => {
            error!(
                "❌ Watch authentication failed (401 Unauthorized) - {}",
                "RBAC may have been revoked or token expired"
            );
            error!("🔍 Diagnostics:");
            error!("   1. Verify the operator ClusterRole still exists:");
            error!("      kubectl get clusterrole supabase-operator");
            error!("   2. Verify RBAC permissions are still active:");
            error!(
                "      kubectl auth can-i list supabaseprojects --all-namespaces --as={}",
                "system:serviceaccount:supabase-system:supabase-operator"
            );
            warn!(
                "⏳ Waiting {}s before polling the watch again",
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS
            );
            let delay = Duration::from_secs(constants::DEFAULT_WATCH_RESTART_DELAY_SECS);
            tokio::time::sleep(delay).await;
        }
        WatchErrorKind::Expired => {
            warn!("Watch resource version expired (410) - the watch will restart");
        }
        WatchErrorKind::Throttled => {
            let current = backoff.load(Ordering::Relaxed);
            warn!("API server throttling (429), backing off for {}ms", current);
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
        }
        WatchErrorKind::NotFound => {
            warn!("Resource not found (likely deleted), continuing watch");
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error);
        }
    }
}
