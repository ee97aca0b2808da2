//! Ingress objects, lowered as simple root HTTPProxies by the DAG builder.

use super::meta::{Kind, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingress {
    pub metadata: ObjectMeta,
    pub spec: IngressSpec,
}

impl Resource for Ingress {
    const KIND: Kind = Kind::Ingress;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressSpec {
    #[serde(default)]
    pub tls: Vec<IngressTls>,
    #[serde(default)]
    pub rules: Vec<IngressRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressTls {
    #[serde(default)]
    pub hosts: Vec<String>,
    pub secret_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressRule {
    pub host: String,
    pub http: IngressHttpRuleValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressHttpRuleValue {
    pub paths: Vec<IngressPath>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressPath {
    pub path: String,
    #[serde(default)]
    pub path_type: IngressPathType,
    pub backend: IngressBackend,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum IngressPathType {
    #[default]
    Prefix,
    Exact,
    ImplementationSpecific,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressBackend {
    pub service_name: String,
    pub service_port: u16,
}
