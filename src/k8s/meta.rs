//! Shared object identity types.
//!
//! Input objects are modeled as plain serde-derived structs carrying an
//! [`ObjectMeta`], following the manual `Resource`/`Metadata` trait pattern
//! used for hand-rolled CRD types rather than a `kube::CustomResource` derive
//! (the Kubernetes client is out of scope for this crate).

use serde::{Deserialize, Serialize};

/// Kubernetes object kind this crate reads from the Object Cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Ingress,
    HttpProxy,
    Service,
    Endpoints,
    Secret,
    TlsCertificateDelegation,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Ingress => "Ingress",
            Kind::HttpProxy => "HTTPProxy",
            Kind::Service => "Service",
            Kind::Endpoints => "Endpoints",
            Kind::Secret => "Secret",
            Kind::TlsCertificateDelegation => "TLSCertificateDelegation",
        }
    }
}

/// `(namespace, name)` identity used as the Object Cache's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Subset of Kubernetes object metadata this crate reads.
///
/// `creation_timestamp` drives the duplicate-FQDN tie-break;
/// `uid` gives a stable identity independent of name reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub creation_timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub annotations: std::collections::BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// A value taken from the Object Cache, tagged with its kind and metadata.
/// Entities themselves are immutable once stored.
pub trait Resource {
    const KIND: Kind;
    fn meta(&self) -> &ObjectMeta;
}
