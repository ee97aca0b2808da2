//! The DAG output model: a flattened, validated representation of
//! every routable virtual host, ready for translation into xDS resources.
//! Modeled as sum types in the same style as a hand-rolled routing domain,
//! rather than re-using the Kubernetes spec shapes directly — the DAG is a
//! different, simpler grammar than the CRDs it is built from.

use std::collections::BTreeMap;
use std::time::Duration;

/// The full output of one DAG build: every virtual host the cluster should
/// serve, plus the clusters/endpoints they route to and a status table for
/// every source object that was visited.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    pub virtual_hosts: Vec<VirtualHost>,
    pub clusters: BTreeMap<String, Cluster>,
    pub secrets: BTreeMap<String, ResolvedSecret>,
    pub statuses: Vec<ObjectStatus>,
}

#[derive(Debug, Clone)]
pub struct VirtualHost {
    pub fqdn: String,
    pub tls: Option<VirtualHostTls>,
    pub routes: Vec<Route>,
    pub tcp_proxy: Option<TcpProxy>,
}

#[derive(Debug, Clone)]
pub struct VirtualHostTls {
    /// Absent only when `passthrough` is set — the certificate then lives
    /// in the backend, not at the edge.
    pub secret: Option<SecretRef>,
    pub minimum_protocol_version: TlsProtocolVersion,
    pub passthrough: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsProtocolVersion {
    #[default]
    Auto,
    Tls12,
    Tls13,
}

/// A secret, named the way the translator will look it up in the SDS cache:
/// `<namespace>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A secret's resolved key material, carried on the DAG itself as a
/// resolved cert+key blob keyed by (namespace, name), so the Translator
/// never has to reach back into the Object Cache.
#[derive(Debug, Clone)]
pub struct ResolvedSecret {
    pub secret_ref: SecretRef,
    pub material: SecretMaterial,
}

#[derive(Debug, Clone)]
pub enum SecretMaterial {
    TlsKeyPair { cert: Vec<u8>, key: Vec<u8> },
    CaBundle { ca_cert: Vec<u8> },
}

/// A single resolved route: one or more match conditions, materialized by
/// concatenating the path prefixes of every inclusion on the path from the
/// root.
#[derive(Debug, Clone)]
pub struct Route {
    pub r#match: RouteMatch,
    pub action: RouteAction,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_policy: Option<TimeoutPolicy>,
    pub enable_websockets: bool,
    pub permit_insecure: bool,
    pub mirror: Option<RouteTarget>,
}

#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub path: PathMatchStrategy,
    pub headers: Vec<HeaderMatcher>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatchStrategy {
    Prefix(String),
    Exact(String),
}

impl PathMatchStrategy {
    /// Specificity used to order routes so the most specific match wins:
    /// longer prefixes and exact matches sort first.
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            PathMatchStrategy::Exact(p) => (1, p.len()),
            PathMatchStrategy::Prefix(p) => (0, p.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatcher {
    pub name: String,
    pub op: HeaderMatchOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderMatchOp {
    Exact(String),
    Presence,
    Contains(String),
    NotContains(String),
}

#[derive(Debug, Clone)]
pub enum RouteAction {
    Forward(Vec<WeightedCluster>),
    Rewrite { prefix: String, target: Vec<WeightedCluster> },
    DirectResponse { status: u32 },
}

#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub cluster: String,
}

#[derive(Debug, Clone)]
pub struct WeightedCluster {
    pub cluster: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub num_retries: u32,
    pub per_try_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutPolicy {
    pub request_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TcpProxy {
    pub targets: Vec<WeightedCluster>,
}

/// A resolved upstream cluster: one per `(namespace, service, port)` plus
/// the TLS context that makes it distinct, named content-addressably so
/// that identical upstreams collapse onto the same xDS resource (see
/// DESIGN.md for the naming scheme).
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub namespace: String,
    pub service: String,
    pub port: u16,
    pub upstream_tls: Option<UpstreamTlsContext>,
    pub load_balancer_policy: LoadBalancerPolicy,
    pub circuit_breakers: CircuitBreakers,
    pub health_check: Option<HealthCheck>,
    /// `Some` for an `ExternalName` Service: a STRICT_DNS cluster that skips
    /// endpoint resolution entirely.
    pub external_name: Option<String>,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTlsContext {
    pub sni: Option<String>,
    pub ca_secret: Option<SecretRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadBalancerPolicy {
    #[default]
    RoundRobin,
    WeightedLeastRequest,
    Random,
    Cookie,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreakers {
    pub max_connections: Option<u32>,
    pub max_pending_requests: Option<u32>,
    pub max_requests: Option<u32>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub path: String,
    pub interval: Duration,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub address: std::net::IpAddr,
    pub port: u16,
}

/// Per-object build outcome, carried back to the Status Writer.
#[derive(Debug, Clone)]
pub struct ObjectStatus {
    pub namespace: String,
    pub name: String,
    pub kind: ObjectStatusKind,
    pub condition: StatusCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatusKind {
    HttpProxy,
    Ingress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCondition {
    Valid,
    Orphaned,
    Invalid { reason: String, message: String },
}
