//! # Supabase Operator
//!
//! A Kubernetes operator that turns a `SupabaseProject` into a running
//! Supabase stack backed by an external PostgreSQL database and S3-compatible
//! object storage.
//!
//! ## Overview
//!
//! Each reconciliation pass walks the project through:
//!
//! 1. **Dependency validation** - the referenced database and storage secrets carry every
//!    required field
//! 2. **Credentials** - a JWT secret and the anon/service-role API tokens, generated once and
//!    healed in place
//! 3. **Database bootstrap** - a one-shot Job that installs extensions, schemas, roles, and grants
//! 4. **Components** - Deployments and Services for Kong, GoTrue, PostgREST, Realtime,
//!    Storage API, postgres-meta, and Studio
//!
//! Progress is reported on `.status` through a phase, Kubernetes-style
//! conditions, per-component status, and per-dependency status.

pub mod components;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
pub mod secrets;

pub use crd::*;
