//! # Observability
//!
//! Prometheus metrics for the reconciler and the watch loop.

pub mod metrics;
