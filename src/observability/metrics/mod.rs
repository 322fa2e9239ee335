//! # Metrics
//!
//! Prometheus metrics exposed on `/metrics`.
//!
//! Counters are process-global statics registered once at startup with
//! [`register_metrics`]; call sites use the `increment_*`/`observe_*`
//! functions.

mod controller_metrics;
mod registry;

pub use controller_metrics::*;
pub use registry::REGISTRY;

use anyhow::Result;

/// Register every metric with the shared registry
pub fn register_metrics() -> Result<()> {
    controller_metrics::register_controller_metrics()?;
    Ok(())
}
