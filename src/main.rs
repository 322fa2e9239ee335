//! # Supabase Operator
//!
//! Operator binary: initializes the runtime and runs the watch loop until a
//! shutdown signal arrives.

use anyhow::Result;
use supabase_operator::runtime::{initialize, run_watch_loop};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init_result = initialize().await?;

    info!(
        ready = init_result.server_state.is_ready(),
        "Probe server up, handing over to the watch loop"
    );

    run_watch_loop(
        init_result.client,
        init_result.projects,
        init_result.reconciler,
    )
    .await;

    Ok(())
}
