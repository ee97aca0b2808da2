//! TLSCertificateDelegation — authorizes secrets in one namespace to be
//! referenced from others.

use super::meta::{Kind, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsCertificateDelegation {
    pub metadata: ObjectMeta,
    pub spec: TlsCertificateDelegationSpec,
}

impl Resource for TlsCertificateDelegation {
    const KIND: Kind = Kind::TlsCertificateDelegation;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsCertificateDelegationSpec {
    pub delegations: Vec<CertDelegation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertDelegation {
    pub secret_name: String,
    /// Namespaces this secret may be referenced from. `"*"` means any.
    pub target_namespaces: Vec<String>,
}

impl TlsCertificateDelegation {
    /// Whether this delegation (living in `self.metadata.namespace`) permits
    /// `consumer_namespace` to reference `secret_name`.
    pub fn permits(&self, secret_name: &str, consumer_namespace: &str) -> bool {
        self.spec.delegations.iter().any(|d| {
            d.secret_name == secret_name
                && (d.target_namespaces.iter().any(|ns| ns == "*" || ns == consumer_namespace))
        })
    }
}
