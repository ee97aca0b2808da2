//! Per-type and aggregated xDS gRPC service implementations.
//!
//! One small struct per Envoy discovery service, each holding only what it
//! needs to serve a stream; every method body delegates straight into
//! [`crate::xds::stream`]. Delta xDS is unimplemented on every service —
//! Envoy is only ever pointed at this control plane in SotW mode.

use crate::xds::cache::{ClusterCache, EndpointCache, ListenerCache, RouteCache, SecretCache, XdsCaches};
use crate::xds::stream;
use std::sync::Arc;
use tonic::{Request, Response, Status};

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryService;
use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryService;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryService;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryService;

type DiscoveryResultStream = tokio_stream::wrappers::ReceiverStream<Result<DiscoveryResponse, Status>>;
type DeltaResultStream = tokio_stream::wrappers::ReceiverStream<Result<DeltaDiscoveryResponse, Status>>;

fn delta_unimplemented<T>() -> Result<Response<T>, Status> {
    Err(Status::unimplemented("delta xDS is not supported by this control plane"))
}

/// Aggregated Discovery Service: a single bidi stream multiplexing all five
/// resource types, the transport Envoy is expected to use against this
/// control plane.
#[derive(Debug)]
pub struct AggregatedDiscoveryServiceImpl {
    caches: Arc<XdsCaches>,
}

impl AggregatedDiscoveryServiceImpl {
    pub fn new(caches: Arc<XdsCaches>) -> Self {
        Self { caches }
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AggregatedDiscoveryServiceImpl {
    type StreamAggregatedResourcesStream = DiscoveryResultStream;
    type DeltaAggregatedResourcesStream = DiscoveryResultStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let in_stream = request.into_inner();
        let out_stream = stream::run_ads_loop(self.caches.clone(), in_stream);
        Ok(Response::new(out_stream))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        delta_unimplemented()
    }
}

/// Cluster Discovery Service implementation.
#[derive(Debug)]
pub struct ClusterDiscoveryServiceImpl {
    cache: Arc<ClusterCache>,
}

impl ClusterDiscoveryServiceImpl {
    pub fn new(cache: Arc<ClusterCache>) -> Self {
        Self { cache }
    }
}

#[tonic::async_trait]
impl ClusterDiscoveryService for ClusterDiscoveryServiceImpl {
    type StreamClustersStream = DiscoveryResultStream;
    type DeltaClustersStream = DeltaResultStream;

    async fn stream_clusters(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamClustersStream>, Status> {
        let in_stream = request.into_inner();
        let out_stream = stream::run_stream_loop(self.cache.clone(), in_stream, "CDS");
        Ok(Response::new(out_stream))
    }

    async fn delta_clusters(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaClustersStream>, Status> {
        delta_unimplemented()
    }
}

/// Route Discovery Service implementation.
#[derive(Debug)]
pub struct RouteDiscoveryServiceImpl {
    cache: Arc<RouteCache>,
}

impl RouteDiscoveryServiceImpl {
    pub fn new(cache: Arc<RouteCache>) -> Self {
        Self { cache }
    }
}

#[tonic::async_trait]
impl RouteDiscoveryService for RouteDiscoveryServiceImpl {
    type StreamRoutesStream = DiscoveryResultStream;
    type DeltaRoutesStream = DeltaResultStream;

    async fn stream_routes(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamRoutesStream>, Status> {
        let in_stream = request.into_inner();
        let out_stream = stream::run_stream_loop(self.cache.clone(), in_stream, "RDS");
        Ok(Response::new(out_stream))
    }

    async fn delta_routes(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaRoutesStream>, Status> {
        delta_unimplemented()
    }
}

/// Listener Discovery Service implementation.
#[derive(Debug)]
pub struct ListenerDiscoveryServiceImpl {
    cache: Arc<ListenerCache>,
}

impl ListenerDiscoveryServiceImpl {
    pub fn new(cache: Arc<ListenerCache>) -> Self {
        Self { cache }
    }
}

#[tonic::async_trait]
impl ListenerDiscoveryService for ListenerDiscoveryServiceImpl {
    type StreamListenersStream = DiscoveryResultStream;
    type DeltaListenersStream = DeltaResultStream;

    async fn stream_listeners(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamListenersStream>, Status> {
        let in_stream = request.into_inner();
        let out_stream = stream::run_stream_loop(self.cache.clone(), in_stream, "LDS");
        Ok(Response::new(out_stream))
    }

    async fn delta_listeners(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaListenersStream>, Status> {
        delta_unimplemented()
    }
}

/// Endpoint Discovery Service implementation.
#[derive(Debug)]
pub struct EndpointDiscoveryServiceImpl {
    cache: Arc<EndpointCache>,
}

impl EndpointDiscoveryServiceImpl {
    pub fn new(cache: Arc<EndpointCache>) -> Self {
        Self { cache }
    }
}

#[tonic::async_trait]
impl EndpointDiscoveryService for EndpointDiscoveryServiceImpl {
    type StreamEndpointsStream = DiscoveryResultStream;
    type DeltaEndpointsStream = DeltaResultStream;

    async fn stream_endpoints(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamEndpointsStream>, Status> {
        let in_stream = request.into_inner();
        let out_stream = stream::run_stream_loop(self.cache.clone(), in_stream, "EDS");
        Ok(Response::new(out_stream))
    }

    async fn delta_endpoints(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaEndpointsStream>, Status> {
        delta_unimplemented()
    }
}

/// Secret Discovery Service implementation.
#[derive(Debug)]
pub struct SecretDiscoveryServiceImpl {
    cache: Arc<SecretCache>,
}

impl SecretDiscoveryServiceImpl {
    pub fn new(cache: Arc<SecretCache>) -> Self {
        Self { cache }
    }
}

#[tonic::async_trait]
impl SecretDiscoveryService for SecretDiscoveryServiceImpl {
    type StreamSecretsStream = DiscoveryResultStream;
    type DeltaSecretsStream = DeltaResultStream;

    async fn stream_secrets(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamSecretsStream>, Status> {
        let in_stream = request.into_inner();
        let out_stream = stream::run_stream_loop(self.cache.clone(), in_stream, "SDS");
        Ok(Response::new(out_stream))
    }

    async fn delta_secrets(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaSecretsStream>, Status> {
        delta_unimplemented()
    }
}
