//! Renders a [`Dag`] into named Envoy xDS resources, one function per type
//! URL. Every function is a pure `Dag -> Vec<NamedResource>`: given
//! the same DAG, translation always yields the same resource set.

use crate::dag::model::{
    Cluster, Dag, LoadBalancerPolicy, PathMatchStrategy, ResolvedSecret, Route, RouteAction,
    SecretMaterial, TcpProxy, VirtualHost,
};
use envoy_types::pb::envoy::config::cluster::v3::cluster::{ClusterDiscoveryType, DiscoveryType, LbPolicy};
use envoy_types::pb::envoy::config::cluster::v3::{
    circuit_breakers, Cluster as EnvoyCluster, CircuitBreakers as EnvoyCircuitBreakers,
};
use envoy_types::pb::envoy::config::core::v3::health_check::{HealthChecker, HttpHealthCheck};
use envoy_types::pb::envoy::config::core::v3::{
    address, config_source, socket_address, Address, AggregatedConfigSource, ConfigSource, HealthCheck as EnvoyHealthCheck,
    SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint as EnvoyEndpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter, filter_chain_match::ConnectionSourceType, Filter, FilterChain, FilterChainMatch, Listener,
};
use envoy_types::pb::envoy::config::route::v3::{
    route, route::Action as RouteActionOneof, route_action, route_match, RouteAction as EnvoyRouteAction,
    RouteConfiguration, RouteMatch as EnvoyRouteMatch, VirtualHost as EnvoyVirtualHost,
    WeightedCluster as EnvoyWeightedCluster,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier as TcpClusterSpecifier, TcpProxy as EnvoyTcpProxy, WeightedCluster as TcpWeightedCluster,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context, secret, CommonTlsContext, DownstreamTlsContext, Secret as EnvoySecret, SdsSecretConfig,
    TlsCertificate, UpstreamTlsContext as EnvoyUpstreamTlsContext,
};
use envoy_types::pb::google::protobuf::{Any, Duration as PbDuration};
use prost::Message;
use route::Route as EnvoyRoute;
use route_match::PathSpecifier;
use tracing::debug;

/// A named resource as handed to a [`crate::xds::cache::ResourceCache`]'s
/// `SetAll`.
#[derive(Debug, Clone)]
pub struct NamedResource {
    pub name: String,
    pub resource: Any,
}

/// Envoy-facing listen ports. Distinct from the xDS gRPC bind address in
/// `ControlPlaneConfig` — these are the ports Envoy itself will accept
/// downstream traffic on.
#[derive(Debug, Clone, Copy)]
pub struct TranslatorConfig {
    pub insecure_port: u32,
    pub secure_port: u32,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self { insecure_port: 8080, secure_port: 8443 }
    }
}

const INSECURE_ROUTE_CONFIG: &str = "ingress_http";
const SECURE_ROUTE_CONFIG: &str = "ingress_https";

fn any_of(type_url: &str, message: impl Message) -> Any {
    Any { type_url: type_url.to_string(), value: message.encode_to_vec() }
}

fn ads_config_source() -> ConfigSource {
    ConfigSource {
        config_source_specifier: Some(config_source::ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        resource_api_version: 0,
        ..Default::default()
    }
}

fn socket_address_of(address_str: &str, port: u32) -> Address {
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            address: address_str.to_string(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(port)),
            protocol: 0,
            ..Default::default()
        })),
    }
}

/// LDS: exactly two listeners. `ingress_https` carries one SNI-matched
/// filter chain per secure VirtualHost (TLS-terminating or TCP passthrough).
pub fn build_listeners(dag: &Dag, config: &TranslatorConfig) -> Vec<NamedResource> {
    let http_conn_manager = |route_config_name: &str| HttpConnectionManager {
        stat_prefix: route_config_name.to_string(),
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            config_source: Some(ads_config_source()),
            route_config_name: route_config_name.to_string(),
        })),
        http_filters: vec![HttpFilter {
            name: "envoy.filters.http.router".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };

    let insecure = Listener {
        name: "ingress_http".to_string(),
        address: Some(socket_address_of("0.0.0.0", config.insecure_port)),
        filter_chains: vec![FilterChain {
            filters: vec![Filter {
                name: "envoy.filters.network.http_connection_manager".to_string(),
                config_type: Some(filter::ConfigType::TypedConfig(any_of(
                    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager",
                    http_conn_manager(INSECURE_ROUTE_CONFIG),
                ))),
            }],
            ..Default::default()
        }],
        ..Default::default()
    };

    let mut secure_chains = Vec::new();
    for vh in dag.virtual_hosts.iter().filter(|vh| vh.tls.is_some()) {
        let tls = vh.tls.as_ref().expect("filtered by tls.is_some()");
        let filter_chain_match = FilterChainMatch {
            server_names: vec![vh.fqdn.clone()],
            connection_source_type: ConnectionSourceType::Any as i32,
            ..Default::default()
        };

        let filters = if let Some(tcp_proxy) = &vh.tcp_proxy {
            vec![tcp_proxy_filter(tcp_proxy)]
        } else {
            vec![Filter {
                name: "envoy.filters.network.http_connection_manager".to_string(),
                config_type: Some(filter::ConfigType::TypedConfig(any_of(
                    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager",
                    http_conn_manager(SECURE_ROUTE_CONFIG),
                ))),
            }]
        };

        let transport_socket = (!tls.passthrough).then(|| downstream_transport_socket(tls));

        secure_chains.push(FilterChain { filter_chain_match: Some(filter_chain_match), filters, transport_socket, ..Default::default() });
    }

    let secure = Listener {
        name: "ingress_https".to_string(),
        address: Some(socket_address_of("0.0.0.0", config.secure_port)),
        filter_chains: secure_chains,
        ..Default::default()
    };

    debug!(insecure_chains = 1, secure_chains = secure.filter_chains.len(), "built listeners");

    vec![
        NamedResource { name: insecure.name.clone(), resource: any_of("type.googleapis.com/envoy.config.listener.v3.Listener", insecure) },
        NamedResource { name: secure.name.clone(), resource: any_of("type.googleapis.com/envoy.config.listener.v3.Listener", secure) },
    ]
}

fn downstream_transport_socket(tls: &crate::dag::model::VirtualHostTls) -> TransportSocket {
    let sds_name = tls.secret.as_ref().map(|s| s.to_string()).unwrap_or_default();
    let common = CommonTlsContext {
        tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
            name: sds_name,
            sds_config: Some(ads_config_source()),
        }],
        ..Default::default()
    };
    let ctx = DownstreamTlsContext { common_tls_context: Some(common), ..Default::default() };
    TransportSocket {
        name: "envoy.transport_sockets.tls".to_string(),
        config_type: Some(envoy_types::pb::envoy::config::core::v3::transport_socket::ConfigType::TypedConfig(any_of(
            "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext",
            ctx,
        ))),
    }
}

fn tcp_proxy_filter(tcp_proxy: &TcpProxy) -> Filter {
    let cluster_specifier = if tcp_proxy.targets.len() == 1 {
        TcpClusterSpecifier::Cluster(tcp_proxy.targets[0].cluster.clone())
    } else {
        TcpClusterSpecifier::WeightedClusters(envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::tcp_proxy::WeightedCluster {
            clusters: tcp_proxy
                .targets
                .iter()
                .map(|t| TcpWeightedCluster { name: t.cluster.clone(), weight: t.weight })
                .collect(),
        })
    };
    Filter {
        name: "envoy.filters.network.tcp_proxy".to_string(),
        config_type: Some(filter::ConfigType::TypedConfig(any_of(
            "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy",
            EnvoyTcpProxy {
                stat_prefix: "tcp_passthrough".to_string(),
                cluster_specifier: Some(cluster_specifier),
                ..Default::default()
            },
        ))),
    }
}

/// RDS: one RouteConfiguration per listener. `ingress_http` carries
/// every insecure VirtualHost plus the insecure-permitted routes of secure
/// ones; `ingress_https` carries the full route list of every
/// TLS-terminating VirtualHost.
pub fn build_routes(dag: &Dag) -> Vec<NamedResource> {
    let insecure_hosts: Vec<EnvoyVirtualHost> = dag
        .virtual_hosts
        .iter()
        .filter(|vh| vh.tcp_proxy.is_none())
        .filter_map(|vh| {
            let routes: Vec<&Route> = if vh.tls.is_none() {
                vh.routes.iter().collect()
            } else {
                vh.routes.iter().filter(|r| r.permit_insecure).collect()
            };
            (!routes.is_empty()).then(|| envoy_virtual_host(vh, &routes))
        })
        .collect();

    let secure_hosts: Vec<EnvoyVirtualHost> = dag
        .virtual_hosts
        .iter()
        .filter(|vh| vh.tls.is_some() && vh.tcp_proxy.is_none())
        .filter_map(|vh| {
            let routes: Vec<&Route> = vh.routes.iter().collect();
            (!routes.is_empty()).then(|| envoy_virtual_host(vh, &routes))
        })
        .collect();

    let insecure = RouteConfiguration { name: INSECURE_ROUTE_CONFIG.to_string(), virtual_hosts: insecure_hosts, ..Default::default() };
    let secure = RouteConfiguration { name: SECURE_ROUTE_CONFIG.to_string(), virtual_hosts: secure_hosts, ..Default::default() };

    vec![
        NamedResource { name: insecure.name.clone(), resource: any_of("type.googleapis.com/envoy.config.route.v3.RouteConfiguration", insecure) },
        NamedResource { name: secure.name.clone(), resource: any_of("type.googleapis.com/envoy.config.route.v3.RouteConfiguration", secure) },
    ]
}

fn envoy_virtual_host(vh: &VirtualHost, routes: &[&Route]) -> EnvoyVirtualHost {
    EnvoyVirtualHost {
        name: vh.fqdn.clone(),
        domains: vec![vh.fqdn.clone()],
        routes: routes.iter().map(|r| envoy_route(r)).collect(),
        ..Default::default()
    }
}

fn envoy_route(route: &Route) -> EnvoyRoute {
    let path_specifier = match &route.r#match.path {
        PathMatchStrategy::Prefix(p) => PathSpecifier::Prefix(p.clone()),
        PathMatchStrategy::Exact(p) => PathSpecifier::Path(p.clone()),
    };

    let action = match &route.action {
        RouteAction::Forward(targets) | RouteAction::Rewrite { target: targets, .. } => {
            let prefix_rewrite = match &route.action {
                RouteAction::Rewrite { prefix, .. } => prefix.clone(),
                _ => String::new(),
            };
            let cluster_specifier = if targets.len() == 1 {
                route_action::ClusterSpecifier::Cluster(targets[0].cluster.clone())
            } else {
                route_action::ClusterSpecifier::WeightedClusters(envoy_types::pb::envoy::config::route::v3::WeightedCluster {
                    clusters: targets
                        .iter()
                        .map(|t| EnvoyWeightedCluster {
                            name: t.cluster.clone(),
                            weight: Some(t.weight),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                })
            };
            RouteActionOneof::Route(EnvoyRouteAction {
                cluster_specifier: Some(cluster_specifier),
                prefix_rewrite,
                timeout: route.timeout_policy.and_then(|t| t.request_timeout).map(duration_proto),
                idle_timeout: route.timeout_policy.and_then(|t| t.idle_timeout).map(duration_proto),
                retry_policy: route.retry_policy.map(retry_policy_proto),
                ..Default::default()
            })
        }
        RouteAction::DirectResponse { status } => RouteActionOneof::DirectResponse(route::DirectResponseAction {
            status: *status,
            ..Default::default()
        }),
    };

    EnvoyRoute {
        r#match: Some(EnvoyRouteMatch { path_specifier: Some(path_specifier), headers: Vec::new(), ..Default::default() }),
        action: Some(action),
        ..Default::default()
    }
}

fn duration_proto(d: std::time::Duration) -> PbDuration {
    PbDuration { seconds: d.as_secs() as i64, nanos: d.subsec_nanos() as i32 }
}

fn retry_policy_proto(policy: crate::dag::model::RetryPolicy) -> route::RetryPolicy {
    route::RetryPolicy {
        retry_on: "5xx".to_string(),
        num_retries: Some(policy.num_retries),
        per_try_timeout: policy.per_try_timeout.map(duration_proto),
        ..Default::default()
    }
}

/// CDS: one Cluster per content-addressed entry in `dag.clusters`.
pub fn build_clusters(dag: &Dag) -> Vec<NamedResource> {
    dag.clusters
        .values()
        .map(|cluster| {
            let envoy_cluster = envoy_cluster(cluster);
            NamedResource {
                name: cluster.name.clone(),
                resource: any_of("type.googleapis.com/envoy.config.cluster.v3.Cluster", envoy_cluster),
            }
        })
        .collect()
}

fn envoy_cluster(cluster: &Cluster) -> EnvoyCluster {
    let cluster_discovery_type = if let Some(external_name) = &cluster.external_name {
        let _ = external_name;
        ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32)
    } else {
        ClusterDiscoveryType::Type(DiscoveryType::Eds as i32)
    };

    let lb_policy = match cluster.load_balancer_policy {
        LoadBalancerPolicy::RoundRobin => LbPolicy::RoundRobin,
        LoadBalancerPolicy::WeightedLeastRequest => LbPolicy::LeastRequest,
        LoadBalancerPolicy::Random => LbPolicy::Random,
        LoadBalancerPolicy::Cookie => LbPolicy::RingHash,
    };

    let circuit_breakers = (cluster.circuit_breakers.max_connections.is_some()
        || cluster.circuit_breakers.max_pending_requests.is_some()
        || cluster.circuit_breakers.max_requests.is_some()
        || cluster.circuit_breakers.max_retries.is_some())
    .then(|| EnvoyCircuitBreakers {
        thresholds: vec![circuit_breakers::Thresholds {
            max_connections: cluster.circuit_breakers.max_connections.map(u32_value),
            max_pending_requests: cluster.circuit_breakers.max_pending_requests.map(u32_value),
            max_requests: cluster.circuit_breakers.max_requests.map(u32_value),
            max_retries: cluster.circuit_breakers.max_retries.map(u32_value),
            ..Default::default()
        }],
        ..Default::default()
    });

    let health_checks = cluster
        .health_check
        .as_ref()
        .map(|hc| {
            vec![EnvoyHealthCheck {
                interval: Some(duration_proto(hc.interval)),
                unhealthy_threshold: Some(u32_value(hc.unhealthy_threshold)),
                healthy_threshold: Some(u32_value(hc.healthy_threshold)),
                health_checker: Some(HealthChecker::HttpHealthCheck(HttpHealthCheck {
                    path: hc.path.clone(),
                    ..Default::default()
                })),
                ..Default::default()
            }]
        })
        .unwrap_or_default();

    let transport_socket = cluster.upstream_tls.as_ref().map(upstream_transport_socket);

    EnvoyCluster {
        name: cluster.name.clone(),
        cluster_discovery_type: Some(cluster_discovery_type),
        lb_policy: lb_policy as i32,
        connect_timeout: Some(PbDuration { seconds: 5, nanos: 0 }),
        eds_cluster_config: cluster.external_name.is_none().then(|| {
            envoy_types::pb::envoy::config::cluster::v3::cluster::EdsClusterConfig {
                eds_config: Some(ads_config_source()),
                service_name: cluster.name.clone(),
            }
        }),
        circuit_breakers,
        health_checks,
        transport_socket,
        ..Default::default()
    }
}

fn u32_value(v: u32) -> envoy_types::pb::google::protobuf::UInt32Value {
    envoy_types::pb::google::protobuf::UInt32Value { value: v }
}

fn upstream_transport_socket(tls: &crate::dag::model::UpstreamTlsContext) -> TransportSocket {
    let common = CommonTlsContext {
        validation_context_type: tls.ca_secret.as_ref().map(|ca_secret| {
            common_tls_context::ValidationContextType::ValidationContextSdsSecretConfig(SdsSecretConfig {
                name: ca_secret.to_string(),
                sds_config: Some(ads_config_source()),
            })
        }),
        ..Default::default()
    };
    let ctx = EnvoyUpstreamTlsContext {
        common_tls_context: Some(common),
        sni: tls.sni.clone().unwrap_or_default(),
        ..Default::default()
    };
    TransportSocket {
        name: "envoy.transport_sockets.tls".to_string(),
        config_type: Some(envoy_types::pb::envoy::config::core::v3::transport_socket::ConfigType::TypedConfig(any_of(
            "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext",
            ctx,
        ))),
    }
}

/// EDS: one ClusterLoadAssignment per in-cluster Cluster. `ExternalName`
/// services skip endpoint resolution entirely and therefore have no entry.
pub fn build_endpoints(dag: &Dag) -> Vec<NamedResource> {
    dag.clusters
        .values()
        .filter(|c| c.external_name.is_none())
        .map(|cluster| {
            let cla = ClusterLoadAssignment {
                cluster_name: cluster.name.clone(),
                endpoints: vec![LocalityLbEndpoints {
                    lb_endpoints: cluster
                        .endpoints
                        .iter()
                        .map(|ep| LbEndpoint {
                            host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(EnvoyEndpoint {
                                address: Some(socket_address_of(&ep.address.to_string(), ep.port as u32)),
                                ..Default::default()
                            })),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }],
                ..Default::default()
            };
            NamedResource {
                name: cluster.name.clone(),
                resource: any_of("type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment", cla),
            }
        })
        .collect()
}

/// SDS: one Secret per referenced TLS material.
pub fn build_secrets(dag: &Dag) -> Vec<NamedResource> {
    dag.secrets
        .values()
        .map(|resolved| {
            let name = resolved.secret_ref.to_string();
            let secret = envoy_secret(&name, resolved);
            NamedResource {
                name,
                resource: any_of("type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret", secret),
            }
        })
        .collect()
}

fn envoy_secret(name: &str, resolved: &ResolvedSecret) -> EnvoySecret {
    use envoy_types::pb::envoy::config::core::v3::{data_source, DataSource};
    let secret_type = match &resolved.material {
        SecretMaterial::TlsKeyPair { cert, key } => secret::Type::TlsCertificate(TlsCertificate {
            certificate_chain: Some(DataSource { specifier: Some(data_source::Specifier::InlineBytes(cert.clone())) }),
            private_key: Some(DataSource { specifier: Some(data_source::Specifier::InlineBytes(key.clone())) }),
            ..Default::default()
        }),
        SecretMaterial::CaBundle { ca_cert } => {
            secret::Type::ValidationContext(envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::CertificateValidationContext {
                trusted_ca: Some(DataSource { specifier: Some(data_source::Specifier::InlineBytes(ca_cert.clone())) }),
                ..Default::default()
            })
        }
    };
    EnvoySecret { name: name.to_string(), r#type: Some(secret_type) }
}
