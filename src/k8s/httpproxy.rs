//! HTTPProxy CRD types (root and non-root).
//!
//! Both the `projectcontour.io/v1` and `contour.heptio.com/v1beta1` group/
//! version pairs are normalized into this single representation before the
//! DAG builder ever sees an object (see DESIGN.md, Open Question 1); the
//! parsing step that performs that normalization lives with the informer
//! layer and is out of scope here — this type is the common target shape.

use super::meta::{Kind, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProxy {
    pub metadata: ObjectMeta,
    pub spec: HttpProxySpec,
}

impl Resource for HttpProxy {
    const KIND: Kind = Kind::HttpProxy;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl HttpProxy {
    /// A root proxy declares a `virtualhost`; everything else is a
    /// candidate for inclusion by some root, or an orphan if none includes it.
    pub fn is_root(&self) -> bool {
        self.spec.virtualhost.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProxySpec {
    pub virtualhost: Option<VirtualHostSpec>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub includes: Vec<IncludeSpec>,
    pub tcpproxy: Option<TcpProxySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualHostSpec {
    pub fqdn: String,
    pub tls: Option<VirtualHostTlsSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualHostTlsSpec {
    /// Absent when `passthrough` is set.
    #[serde(rename = "secretName")]
    pub secret_name: Option<String>,
    #[serde(rename = "minimumProtocolVersion", default)]
    pub minimum_protocol_version: Option<String>,
    #[serde(default)]
    pub passthrough: bool,
}

/// One edge in the inclusion DAG: includes `name` (optionally in another
/// `namespace`) under the accumulated `conditions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeSpec {
    pub name: String,
    pub namespace: Option<String>,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub services: Vec<RouteServiceSpec>,
    pub timeout_policy: Option<TimeoutPolicySpec>,
    pub retry_policy: Option<RetryPolicySpec>,
    pub health_check_policy: Option<HealthCheckPolicySpec>,
    pub load_balancer_policy: Option<LoadBalancerPolicySpec>,
    pub path_rewrite_policy: Option<PathRewritePolicySpec>,
    pub mirror: Option<MirrorSpec>,
    #[serde(default)]
    pub permit_insecure: bool,
    #[serde(default)]
    pub enable_websockets: bool,
}

/// A single match condition. Conditions within one route are combined
/// by logical AND.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionSpec {
    Prefix(String),
    ExactPath(String),
    Header { name: String, op: HeaderOp },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderOp {
    Exact(String),
    Presence,
    Contains(String),
    NotContains(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteServiceSpec {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub weight: u32,
    /// Upstream TLS validation (CA bundle + expected SAN). The referenced
    /// Service must carry the matching `upstream-protocol.tls` annotation
    /// on the port or the proxy is marked invalid.
    pub validation: Option<UpstreamValidationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamValidationSpec {
    #[serde(rename = "caSecret")]
    pub ca_secret: String,
    #[serde(rename = "subjectName")]
    pub subject_name: String,
}

/// Both historical spellings (`request`/`response`) are accepted onto the
/// same field — see DESIGN.md Open Question 2 for what happens if both are
/// present in the source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutPolicySpec {
    #[serde(alias = "request", alias = "response")]
    pub timeout: Option<String>,
    pub idle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicySpec {
    #[serde(default)]
    pub count: u32,
    pub per_try_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckPolicySpec {
    #[serde(default = "default_interval")]
    pub interval_seconds: u32,
    #[serde(default = "default_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_threshold")]
    pub healthy_threshold: u32,
    pub path: Option<String>,
}

fn default_interval() -> u32 {
    5
}

fn default_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerPolicySpec {
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRewritePolicySpec {
    pub replace_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSpec {
    pub service: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpProxySpec {
    #[serde(default)]
    pub services: Vec<RouteServiceSpec>,
    pub include: Option<IncludeSpec>,
}
