//! # Watch Loop
//!
//! Drives the reconciler from a kube-runtime controller watching
//! SupabaseProject and every resource kind the operator owns.

use crate::constants;
use crate::controller::cluster::KubeCluster;
use crate::controller::reconciler::{NextAction, Reconciler, ReconcilerError};
use crate::crd::SupabaseProject;
use crate::observability::metrics;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::{watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, Instrument};

/// Run one reconciliation pass and translate its outcome into a requeue
pub async fn reconcile(
    obj: Arc<SupabaseProject>,
    ctx: Arc<Reconciler<KubeCluster>>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let pass_id = uuid::Uuid::new_v4();

    let span = tracing::info_span!(
        "controller.reconcile",
        resource.name = %name,
        resource.namespace = %namespace,
        pass.id = %pass_id
    );

    async move {
        metrics::increment_reconciliations();
        let started = std::time::Instant::now();

        let result = ctx.reconcile_pass(&namespace, &name).await;
        metrics::observe_reconciliation_duration(started.elapsed().as_secs_f64());

        let report = result?;
        ctx.reset_backoff(&format!("{namespace}/{name}"));

        let action = match report.next {
            NextAction::Done | NextAction::AwaitChange => Action::await_change(),
            NextAction::RequeueAfter(delay) => Action::requeue(delay),
        };
        debug!(phases = ?report.phase_trail, ?action, "Pass complete");
        Ok(action)
    }
    .instrument(span)
    .await
}

/// Watch projects and owned resources until a shutdown signal arrives
pub async fn run_watch_loop(
    client: Client,
    projects: Api<SupabaseProject>,
    reconciler: Arc<Reconciler<KubeCluster>>,
) {
    let watch_namespace = reconciler.config().watch_namespace.clone();
    let owned_config = watcher::Config::default().labels(&format!(
        "{}={}",
        constants::LABEL_MANAGED_BY,
        constants::CONTROLLER_NAME
    ));

    let throttle_backoff = Arc::new(AtomicU64::new(constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS));

    Controller::new(projects, watcher::Config::default())
        .owns(owned_api::<Deployment>(&client, watch_namespace.as_deref()), owned_config.clone())
        .owns(owned_api::<Service>(&client, watch_namespace.as_deref()), owned_config.clone())
        .owns(owned_api::<Job>(&client, watch_namespace.as_deref()), owned_config.clone())
        .owns(owned_api::<Secret>(&client, watch_namespace.as_deref()), owned_config.clone())
        .owns(owned_api::<ConfigMap>(&client, watch_namespace.as_deref()), owned_config)
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error::<KubeCluster>, reconciler)
        .for_each(|result| {
            let throttle_backoff = throttle_backoff.clone();
            async move {
                match result {
                    Ok((object, action)) => {
                        throttle_backoff
                            .store(constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS, Ordering::Relaxed);
                        debug!(resource = %object, ?action, "Reconciled");
                    }
                    Err(e) => {
                        handle_watch_stream_error(
                            &e.to_string(),
                            &throttle_backoff,
                            constants::DEFAULT_WATCH_MAX_BACKOFF_MS,
                        )
                        .await;
                    }
                }
            }
        })
        .await;

    info!("Watch loop stopped, operator shutting down");
}

fn owned_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}
