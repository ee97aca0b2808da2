//! # Contour xDS
//!
//! An Envoy xDS control plane that watches Kubernetes-shaped HTTPProxy and
//! Ingress objects and serves Envoy listener/route/cluster/endpoint/secret
//! configuration over gRPC.
//!
//! ## Architecture
//!
//! ```text
//! Kubernetes objects -> Object Cache -> Event Handler -> DAG Builder -> Translator -> Resource Caches -> xDS Server -> Envoy
//!                                            |                                                               ^
//!                                            +-------------------------> Status Writer ----------------------+
//! ```
//!
//! ## Core Components
//!
//! - **Object Cache** (`cache`): in-memory mirror of the watched Kubernetes objects
//! - **DAG Builder** (`dag`): normalizes CRDs into a validated routing graph
//! - **Translator** (`translator`): pure `Dag -> Envoy resource` mapping
//! - **Resource Caches** (`xds::cache`): versioned, per-type xDS resource stores
//! - **xDS Server** (`xds`): tonic-based gRPC server implementing SotW discovery
//! - **Event Handler** (`events`): coalesces cache notifications into rebuild cycles
//! - **Status Writer** (`status_writer`): best-effort status reconciliation

pub mod cache;
pub mod config;
pub mod dag;
pub mod errors;
pub mod events;
pub mod k8s;
pub mod status_writer;
pub mod translator;
pub mod xds;

pub use config::ControlPlaneConfig;
pub use errors::{ControlPlaneError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
