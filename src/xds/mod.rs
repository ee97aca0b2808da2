//! Envoy xDS (eXtended Discovery Service) transport.
//!
//! Provides the gRPC server implementing Envoy's SotW discovery protocols —
//! ADS, plus standalone CDS/RDS/LDS/EDS/SDS for non-aggregated clients — and
//! the versioned [`cache::ResourceCache`] each of them serves from.

pub mod cache;
pub mod server;
pub mod stream;

use crate::config::XdsConfig;
use crate::errors::{ControlPlaneError, Result};
use cache::XdsCaches;
use std::future::Future;
use std::sync::Arc;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing::info;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryServiceServer;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryServiceServer;

pub use server::{
    AggregatedDiscoveryServiceImpl, ClusterDiscoveryServiceImpl, EndpointDiscoveryServiceImpl,
    ListenerDiscoveryServiceImpl, RouteDiscoveryServiceImpl, SecretDiscoveryServiceImpl,
};

/// Starts the xDS gRPC server and runs until `shutdown_signal` resolves.
///
/// Every service shares the same [`XdsCaches`] bundle — the Event Handler is
/// the only writer, these services and the streams they spawn are readers.
pub async fn serve<F>(config: XdsConfig, caches: Arc<XdsCaches>, shutdown_signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config
        .bind_address()
        .parse()
        .map_err(|e| ControlPlaneError::config(format!("invalid xDS bind address: {e}")))?;

    let mut builder = Server::builder();
    if let Some(tls_config) = build_server_tls_config(&config)? {
        builder = builder
            .tls_config(tls_config)
            .map_err(|e| ControlPlaneError::config(format!("failed to apply xDS TLS configuration: {e}")))?;
    }

    let ads = AggregatedDiscoveryServiceImpl::new(caches.clone());
    let cds = ClusterDiscoveryServiceImpl::new(caches.clusters.clone());
    let rds = RouteDiscoveryServiceImpl::new(caches.routes.clone());
    let lds = ListenerDiscoveryServiceImpl::new(caches.listeners.clone());
    let eds = EndpointDiscoveryServiceImpl::new(caches.endpoints.clone());
    let sds = SecretDiscoveryServiceImpl::new(caches.secrets.clone());

    info!(address = %addr, "starting xDS server");

    builder
        .add_service(AggregatedDiscoveryServiceServer::new(ads))
        .add_service(ClusterDiscoveryServiceServer::new(cds))
        .add_service(RouteDiscoveryServiceServer::new(rds))
        .add_service(ListenerDiscoveryServiceServer::new(lds))
        .add_service(EndpointDiscoveryServiceServer::new(eds))
        .add_service(SecretDiscoveryServiceServer::new(sds))
        .serve_with_shutdown(addr, shutdown_signal)
        .await
        .map_err(|e| ControlPlaneError::internal(format!("xDS server failed: {e}")))?;

    info!("xDS server shut down");
    Ok(())
}

fn build_server_tls_config(config: &XdsConfig) -> Result<Option<ServerTlsConfig>> {
    let tls = match &config.tls {
        Some(tls) => tls,
        None => return Ok(None),
    };

    let cert_bytes = std::fs::read(&tls.cert_path)
        .map_err(|e| ControlPlaneError::config(format!("failed to read xDS TLS certificate '{}': {e}", tls.cert_path)))?;
    let key_bytes = std::fs::read(&tls.key_path)
        .map_err(|e| ControlPlaneError::config(format!("failed to read xDS TLS private key '{}': {e}", tls.key_path)))?;

    let identity = Identity::from_pem(cert_bytes, key_bytes);
    let mut server_tls_config = ServerTlsConfig::new().identity(identity);

    if let Some(ca_path) = &tls.client_ca_path {
        let ca_bytes = std::fs::read(ca_path)
            .map_err(|e| ControlPlaneError::config(format!("failed to read xDS client CA '{ca_path}': {e}")))?;
        server_tls_config = server_tls_config.client_ca_root(Certificate::from_pem(ca_bytes));
    }

    Ok(Some(server_tls_config))
}
