//! Service objects and the annotations that parameterize upstream behavior.

use super::meta::{Kind, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
}

impl Resource for Service {
    const KIND: Kind = Kind::Service;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
    pub external_name: Option<String>,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterIp,
    ExternalName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
}

/// Upstream protocol declared via `projectcontour.io/upstream-protocol.*`
/// annotations, per port or port name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpstreamProtocol {
    H2,
    H2c,
    Tls,
}

/// Circuit-breaker thresholds parsed from the `max-connections` /
/// `max-pending-requests` / `max-requests` / `max-retries` annotations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerAnnotations {
    pub max_connections: Option<u32>,
    pub max_pending_requests: Option<u32>,
    pub max_requests: Option<u32>,
    pub max_retries: Option<u32>,
}

impl Service {
    /// Resolve the upstream protocol for a given port/port-name, reading the
    /// `projectcontour.io/upstream-protocol.{h2,h2c,tls}` annotations. A port
    /// selector is a comma-separated list of port numbers or names.
    pub fn upstream_protocol(&self, port: u16, port_name: Option<&str>) -> Option<UpstreamProtocol> {
        const ANNOTATIONS: [(&str, UpstreamProtocol); 3] = [
            ("projectcontour.io/upstream-protocol.h2", UpstreamProtocol::H2),
            ("projectcontour.io/upstream-protocol.h2c", UpstreamProtocol::H2c),
            ("projectcontour.io/upstream-protocol.tls", UpstreamProtocol::Tls),
        ];
        for (key, protocol) in ANNOTATIONS {
            if let Some(value) = self.metadata.annotations.get(key) {
                if value.split(',').map(str::trim).any(|selector| {
                    selector == port.to_string() || Some(selector) == port_name
                }) {
                    return Some(protocol);
                }
            }
        }
        None
    }

    pub fn circuit_breaker_annotations(&self) -> CircuitBreakerAnnotations {
        let parse = |key: &str| self.metadata.annotations.get(key).and_then(|v| v.parse().ok());
        CircuitBreakerAnnotations {
            max_connections: parse("projectcontour.io/max-connections"),
            max_pending_requests: parse("projectcontour.io/max-pending-requests"),
            max_requests: parse("projectcontour.io/max-requests"),
            max_retries: parse("projectcontour.io/max-retries"),
        }
    }
}
