//! # Initialization
//!
//! Operator startup: rustls provider, tracing, metrics, the health server,
//! the Kubernetes client, and the reconciler context.

use crate::config::{load_config, ServerConfig};
use crate::controller::cluster::KubeCluster;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::SupabaseProject;
use crate::observability;
use crate::runtime::watch_loop::reconcile;
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for SupabaseProject, scoped to the watch namespace when one is set
    pub projects: Api<SupabaseProject>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler<KubeCluster>>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

/// Initialize the operator runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any rustls connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err(anyhow::anyhow!("Failed to install rustls crypto provider"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "supabase_operator=info".into()),
        )
        .init();

    info!("Starting Supabase Operator v{}", env!("CARGO_PKG_VERSION"));

    let (controller_config, server_config) = load_config();
    info!(
        resync_interval = ?controller_config.resync_interval,
        reconcile_timeout = ?controller_config.reconcile_timeout,
        bootstrap_retry_ceiling = controller_config.bootstrap_retry_ceiling,
        watch_namespace = controller_config.watch_namespace.as_deref().unwrap_or("<all>"),
        "Loaded operator configuration"
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_state_clone = server_state.clone();
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let projects: Api<SupabaseProject> = match controller_config.watch_namespace.as_deref() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };

    let reconciler = Arc::new(Reconciler::new(
        KubeCluster::new(client.clone()),
        controller_config,
    ));

    reconcile_existing_resources(&projects, &reconciler).await?;

    info!("Operator initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        projects,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to bind
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = std::time::Duration::from_secs(server_config.startup_timeout_secs);
    let poll_interval = std::time::Duration::from_millis(server_config.poll_interval_ms);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready() {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Reconcile projects that exist before the watch starts
///
/// Fails only when the CRD cannot be listed at all; individual pass errors
/// are logged and left to the watch loop.
async fn reconcile_existing_resources(
    projects: &Api<SupabaseProject>,
    reconciler: &Arc<Reconciler<KubeCluster>>,
) -> Result<()> {
    let existing_resources_span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.reconcile_existing",
        operation = "reconcile_existing_resources"
    );
    let _guard = existing_resources_span.enter();

    let list = match projects.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            warn!("SupabaseProject CRD is not queryable yet: {}", e);
            warn!("Install the CRD with: cargo run --bin crdgen | kubectl apply -f -");
            return Err(anyhow::anyhow!("SupabaseProject CRD is not queryable: {e}"));
        }
    };

    info!(
        "CRD is queryable, found {} existing SupabaseProject resources",
        list.items.len()
    );
    if list.items.is_empty() {
        return Ok(());
    }

    let mut resources_by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in &list.items {
        let namespace = item.metadata.namespace.clone().unwrap_or_else(|| "default".into());
        let name = item.metadata.name.clone().unwrap_or_else(|| "unknown".into());
        resources_by_namespace.entry(namespace).or_default().push(name);
    }

    info!("Supabase Operator - Startup Resource Summary");
    info!("Resource Kind: SupabaseProject");
    info!("Total Resources: {}", list.items.len());
    info!("Namespaces: {}", resources_by_namespace.len());
    for (namespace, resources) in &mut resources_by_namespace {
        resources.sort();
        info!("Namespace: {}", namespace);
        info!(
            "  Resources ({}): {}",
            resources.len(),
            if resources.len() <= 3 {
                resources.join(", ")
            } else {
                format!("{}, ... ({} total)", resources[..3].join(", "), resources.len())
            }
        );
    }

    for item in &list.items {
        let name = item.metadata.name.as_deref().unwrap_or("unknown");
        let namespace = item.metadata.namespace.as_deref().unwrap_or("default");

        let resource_span = tracing::span!(
            tracing::Level::INFO,
            "controller.startup.reconcile_resource",
            resource.name = name,
            resource.namespace = namespace,
            resource.kind = "SupabaseProject"
        );
        let _resource_guard = resource_span.enter();

        match reconcile(Arc::new(item.clone()), reconciler.clone()).await {
            Ok(_action) => {
                info!(
                    resource.name = name,
                    resource.namespace = namespace,
                    "reconciliation.success"
                );
            }
            Err(e) => {
                error!(
                    resource.name = name,
                    resource.namespace = namespace,
                    error = %e,
                    "reconciliation.error"
                );
            }
        }
    }

    Ok(())
}
