//! Endpoints/EndpointSlice objects — concrete upstream `IP:port` sets per
//! Service port.

use super::meta::{Kind, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subsets: Vec<EndpointSubset>,
}

impl Resource for Endpoints {
    const KIND: Kind = Kind::Endpoints;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSubset {
    #[serde(default)]
    pub addresses: Vec<EndpointAddress>,
    #[serde(default)]
    pub ports: Vec<EndpointPort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub ip: IpAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointPort {
    pub name: Option<String>,
    pub port: u16,
}

impl Endpoints {
    /// The ready `ip:port` addresses for a given Service port. Absence of
    /// matches is not an error; the caller emits an empty Cluster.
    pub fn ready_addresses(&self, port: u16, port_name: Option<&str>) -> Vec<(IpAddr, u16)> {
        let mut result = Vec::new();
        for subset in &self.subsets {
            let matching_port = subset
                .ports
                .iter()
                .find(|p| p.port == port || (port_name.is_some() && p.name.as_deref() == port_name));
            let Some(matching_port) = matching_port else { continue };
            for address in &subset.addresses {
                result.push((address.ip, matching_port.port));
            }
        }
        result
    }
}
