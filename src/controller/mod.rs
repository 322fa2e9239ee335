//! # Controller
//!
//! Cluster access, the reconciler state machine, error backoff, and the
//! health/metrics server.

pub mod backoff;
pub mod cluster;
pub mod reconciler;
pub mod server;
