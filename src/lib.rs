//! # Pylon
//!
//! Pylon is a Kubernetes ingress control plane for the Envoy proxy. It
//! watches declarative routing objects — Ingress, the HTTPProxy custom
//! resource with cross-namespace delegation, and Gateway-API HTTPRoutes —
//! and compiles them into a consistent Envoy configuration served over the
//! aggregated discovery protocol (ADS/xDS).
//!
//! ## Architecture
//!
//! ```text
//! change feed → ObjectStore → HoldoffNotifier → DAG builder
//!                                                   ↓
//!                       translators → caches → SnapshotCursor → xDS streams
//! ```
//!
//! ## Core Components
//!
//! - **ObjectStore**: mirror of the watched platform objects
//! - **DAG builder**: pure translation of a store snapshot into virtual
//!   hosts, routes, clusters, and secrets, with per-object status
//! - **Translators**: visitors rendering the DAG into Envoy v3 resources
//! - **SnapshotCursor**: monotonic versioning over the artefact caches
//! - **xDS server**: tonic-based state-of-the-world discovery services

pub mod cache;
pub mod cli;
pub mod config;
pub mod controller;
pub mod dag;
pub mod debug;
pub mod envoy;
pub mod errors;
pub mod model;
pub mod observability;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod xds;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use controller::{Controller, ObjectEvent};
pub use errors::{Error, PylonError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
