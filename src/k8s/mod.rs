//! Input object types consumed from the Object Cache.
//!
//! Modeled as plain serde structs with a manual [`meta::Resource`] trait
//! rather than `kube::CustomResource` derives, since the Kubernetes client
//! is out of scope for this crate (see DESIGN.md).

pub mod delegation;
pub mod endpoints;
pub mod httpproxy;
pub mod ingress;
pub mod meta;
pub mod secret;
pub mod service;

pub use delegation::{CertDelegation, TlsCertificateDelegation, TlsCertificateDelegationSpec};
pub use endpoints::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints};
pub use httpproxy::{
    ConditionSpec, HeaderOp, HealthCheckPolicySpec, HttpProxy, HttpProxySpec, IncludeSpec,
    LoadBalancerPolicySpec, MirrorSpec, PathRewritePolicySpec, RetryPolicySpec, RouteServiceSpec,
    RouteSpec, TcpProxySpec, TimeoutPolicySpec, UpstreamValidationSpec, VirtualHostSpec,
    VirtualHostTlsSpec,
};
pub use ingress::{Ingress, IngressBackend, IngressPath, IngressPathType, IngressRule, IngressSpec, IngressTls};
pub use meta::{Kind, ObjectKey, ObjectMeta, Resource};
pub use secret::{Secret, SecretData};
pub use service::{CircuitBreakerAnnotations, Service, ServicePort, ServiceSpec, ServiceType, UpstreamProtocol};

/// Ingress annotations mapped onto DAG fields.
pub mod annotations {
    pub const NUM_RETRIES: &str = "projectcontour.io/num-retries";
    pub const PER_TRY_TIMEOUT: &str = "projectcontour.io/per-try-timeout";
    pub const RESPONSE_TIMEOUT: &str = "projectcontour.io/response-timeout";
    pub const RETRY_ON: &str = "projectcontour.io/retry-on";
    pub const TLS_MINIMUM_PROTOCOL_VERSION: &str = "projectcontour.io/tls-minimum-protocol-version";
    pub const WEBSOCKET_ROUTES: &str = "projectcontour.io/websocket-routes";
}
