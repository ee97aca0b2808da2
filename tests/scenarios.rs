//! End-to-end scenario tests wired through Object Cache -> DAG Builder ->
//! Translator -> Resource Caches, without a network layer in front of them.
//! Each scenario here corresponds to one of the six testable properties
//! that drove this crate's design.

use contour_xds::cache::ObjectCache;
use contour_xds::dag::{self, BuilderConfig};
use contour_xds::dag::model::StatusCondition;
use contour_xds::k8s::*;
use contour_xds::translator::{self, TranslatorConfig};
use contour_xds::xds::cache::XdsCaches;
use chrono::{DateTime, TimeZone, Utc};
use envoy_types::pb::envoy::config::cluster::v3::Cluster as EnvoyCluster;
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use prost::Message;

fn meta_at(namespace: &str, name: &str, created: DateTime<Utc>) -> ObjectMeta {
    ObjectMeta {
        namespace: namespace.to_string(),
        name: name.to_string(),
        uid: format!("{namespace}-{name}"),
        creation_timestamp: created,
        annotations: Default::default(),
    }
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    meta_at(namespace, name, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
}

fn route_service(name: &str, port: u16, weight: u32) -> RouteServiceSpec {
    RouteServiceSpec { name: name.to_string(), port, weight, validation: None }
}

fn route(conditions: Vec<ConditionSpec>, services: Vec<RouteServiceSpec>) -> RouteSpec {
    RouteSpec {
        conditions,
        services,
        timeout_policy: None,
        retry_policy: None,
        health_check_policy: None,
        load_balancer_policy: None,
        path_rewrite_policy: None,
        mirror: None,
        permit_insecure: false,
        enable_websockets: false,
    }
}

fn cluster_ip_service(namespace: &str, name: &str, port: u16) -> Service {
    Service {
        metadata: meta(namespace, name),
        spec: ServiceSpec { service_type: ServiceType::ClusterIp, external_name: None, ports: vec![ServicePort { name: None, port }] },
    }
}

fn endpoints(namespace: &str, name: &str, port: u16, ips: &[&str]) -> Endpoints {
    Endpoints {
        metadata: meta(namespace, name),
        subsets: vec![EndpointSubset {
            addresses: ips.iter().map(|ip| EndpointAddress { ip: ip.parse().unwrap() }).collect(),
            ports: vec![EndpointPort { name: None, port }],
        }],
    }
}

/// Builds the Dag and every translated resource set for the given object
/// cache, the same pipeline `EventHandler::run_cycle` drives in-process.
struct Built {
    dag: contour_xds::dag::model::Dag,
    xds: XdsCaches,
}

fn build_all(cache: &ObjectCache, config: &BuilderConfig) -> Built {
    let snapshot = cache.snapshot();
    let outcome = dag::build(&snapshot, config);
    let xds = XdsCaches::default();
    xds.publish_all(
        translator::build_listeners(&outcome.dag, &TranslatorConfig::default()),
        translator::build_routes(&outcome.dag),
        translator::build_clusters(&outcome.dag),
        translator::build_endpoints(&outcome.dag),
        translator::build_secrets(&outcome.dag),
    );
    Built { dag: outcome.dag, xds }
}

fn route_config(built: &Built, name: &str) -> RouteConfiguration {
    let resource = built.xds.routes.contents().into_iter().find(|r| r.name == name).expect("route config present");
    RouteConfiguration::decode(resource.resource.value.as_slice()).unwrap()
}

fn decode_cluster(value: &[u8]) -> EnvoyCluster {
    EnvoyCluster::decode(value).unwrap()
}

#[tokio::test]
async fn scenario_a_simple_route() {
    let (notify_tx, _notify_rx) = tokio::sync::mpsc::channel(16);
    let cache = ObjectCache::new(notify_tx);

    cache.upsert_http_proxy(HttpProxy {
        metadata: meta("default", "basic"),
        spec: HttpProxySpec {
            virtualhost: Some(VirtualHostSpec { fqdn: "foo.bar.com".into(), tls: None }),
            routes: vec![route(vec![ConditionSpec::Prefix("/".into())], vec![route_service("s1", 80, 0)])],
            includes: vec![],
            tcpproxy: None,
        },
    });
    cache.upsert_service(cluster_ip_service("default", "s1", 80));
    cache.upsert_endpoints(endpoints("default", "s1", 80, &["10.0.0.1", "10.0.0.2"]));

    let built = build_all(&cache, &BuilderConfig::default());

    assert_eq!(built.dag.virtual_hosts.len(), 1);
    assert_eq!(built.xds.listeners.contents().len(), 2, "one listener for 80, one for 443");

    let insecure = route_config(&built, "ingress_http");
    assert_eq!(insecure.virtual_hosts.len(), 1);
    assert_eq!(insecure.virtual_hosts[0].name, "foo.bar.com");
    assert_eq!(insecure.virtual_hosts[0].routes.len(), 1);

    let cluster_name = built.dag.clusters.keys().next().expect("one cluster").clone();
    assert!(cluster_name.starts_with("default/s1/80/"));
    assert_eq!(built.xds.clusters.contents().len(), 1);

    let cluster_resource = built.xds.clusters.contents().into_iter().find(|r| r.name == cluster_name).expect("cluster present");
    let cluster = decode_cluster(&cluster_resource.resource.value);
    assert_eq!(cluster.name, cluster_name);

    let endpoint_resource = built.xds.endpoints.contents().into_iter().find(|r| r.name == cluster_name).expect("cla present");
    let cla = ClusterLoadAssignment::decode(endpoint_resource.resource.value.as_slice()).unwrap();
    let total_addresses: usize = cla.endpoints.iter().map(|locality| locality.lb_endpoints.len()).sum();
    assert_eq!(total_addresses, 2, "both endpoints materialize onto the cluster's CLA");
}

#[tokio::test]
async fn scenario_b_inclusion_with_prefix_concat() {
    let (notify_tx, _notify_rx) = tokio::sync::mpsc::channel(16);
    let cache = ObjectCache::new(notify_tx);

    cache.upsert_http_proxy(HttpProxy {
        metadata: meta("default", "root"),
        spec: HttpProxySpec {
            virtualhost: Some(VirtualHostSpec { fqdn: "root.bar.com".into(), tls: None }),
            routes: vec![],
            includes: vec![IncludeSpec {
                name: "svc2".into(),
                namespace: Some("default".into()),
                conditions: vec![ConditionSpec::Prefix("/service2".into())],
            }],
            tcpproxy: None,
        },
    });
    cache.upsert_http_proxy(HttpProxy {
        metadata: meta("default", "svc2"),
        spec: HttpProxySpec {
            virtualhost: None,
            routes: vec![
                route(vec![ConditionSpec::Prefix("/".into())], vec![route_service("s2", 80, 0)]),
                route(vec![ConditionSpec::Prefix("/blog".into())], vec![route_service("blog", 80, 0)]),
            ],
            includes: vec![],
            tcpproxy: None,
        },
    });
    for (name, port) in [("s2", 80u16), ("blog", 80u16)] {
        cache.upsert_service(cluster_ip_service("default", name, port));
        cache.upsert_endpoints(endpoints("default", name, port, &["10.0.1.1"]));
    }

    let built = build_all(&cache, &BuilderConfig::default());
    let insecure = route_config(&built, "ingress_http");
    assert_eq!(insecure.virtual_hosts.len(), 1);
    let routes = &insecure.virtual_hosts[0].routes;
    assert_eq!(routes.len(), 2, "two concatenated routes");

    use envoy_types::pb::envoy::config::route::v3::route_match::PathSpecifier;
    let prefixes: Vec<String> = routes
        .iter()
        .map(|r| match r.r#match.as_ref().unwrap().path_specifier.as_ref().unwrap() {
            PathSpecifier::Prefix(p) => p.clone(),
            other => panic!("unexpected path specifier: {other:?}"),
        })
        .collect();
    assert_eq!(prefixes, vec!["/service2/blog".to_string(), "/service2".to_string()], "longer prefix sorts first");
}

#[tokio::test]
async fn scenario_c_duplicate_fqdn_tie_break() {
    let (notify_tx, _notify_rx) = tokio::sync::mpsc::channel(16);
    let cache = ObjectCache::new(notify_tx);

    let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let younger = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    cache.upsert_http_proxy(HttpProxy {
        metadata: meta_at("default", "first", older),
        spec: HttpProxySpec {
            virtualhost: Some(VirtualHostSpec { fqdn: "dup.com".into(), tls: None }),
            routes: vec![route(vec![ConditionSpec::Prefix("/".into())], vec![route_service("s1", 80, 0)])],
            includes: vec![],
            tcpproxy: None,
        },
    });
    cache.upsert_http_proxy(HttpProxy {
        metadata: meta_at("default", "second", younger),
        spec: HttpProxySpec {
            virtualhost: Some(VirtualHostSpec { fqdn: "dup.com".into(), tls: None }),
            routes: vec![route(vec![ConditionSpec::Prefix("/".into())], vec![route_service("s1", 80, 0)])],
            includes: vec![],
            tcpproxy: None,
        },
    });
    cache.upsert_service(cluster_ip_service("default", "s1", 80));
    cache.upsert_endpoints(endpoints("default", "s1", 80, &["10.0.0.1"]));

    let built = build_all(&cache, &BuilderConfig::default());

    let dup_hosts: Vec<_> = built.dag.virtual_hosts.iter().filter(|vh| vh.fqdn == "dup.com").collect();
    assert_eq!(dup_hosts.len(), 1, "exactly one VirtualHost survives for the duplicated FQDN");

    let first_status = built.dag.statuses.iter().find(|s| s.name == "first").expect("status for first");
    assert_eq!(first_status.condition, StatusCondition::Valid);

    let second_status = built.dag.statuses.iter().find(|s| s.name == "second").expect("status for second");
    match &second_status.condition {
        StatusCondition::Invalid { reason, .. } => assert!(reason.to_lowercase().contains("duplicate")),
        other => panic!("expected the younger proxy to be invalid, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_d_tls_delegation() {
    let (notify_tx, _notify_rx) = tokio::sync::mpsc::channel(16);
    let cache = ObjectCache::new(notify_tx);

    cache.upsert_http_proxy(HttpProxy {
        metadata: meta("app", "secure"),
        spec: HttpProxySpec {
            virtualhost: Some(VirtualHostSpec {
                fqdn: "secure.bar.com".into(),
                tls: Some(VirtualHostTlsSpec {
                    secret_name: Some("admin/wildcard".into()),
                    minimum_protocol_version: None,
                    passthrough: false,
                }),
            }),
            routes: vec![route(vec![ConditionSpec::Prefix("/".into())], vec![route_service("s1", 80, 0)])],
            includes: vec![],
            tcpproxy: None,
        },
    });
    cache.upsert_service(cluster_ip_service("app", "s1", 80));
    cache.upsert_endpoints(endpoints("app", "s1", 80, &["10.0.2.1"]));
    cache.upsert_secret(Secret {
        metadata: meta("admin", "wildcard"),
        data: SecretData::TlsKeyPair { cert: b"cert-bytes".to_vec(), key: b"key-bytes".to_vec() },
    });
    cache.upsert_delegation(TlsCertificateDelegation {
        metadata: meta("admin", "delegation"),
        spec: TlsCertificateDelegationSpec {
            delegations: vec![CertDelegation { secret_name: "wildcard".into(), target_namespaces: vec!["app".into()] }],
        },
    });

    let built = build_all(&cache, &BuilderConfig::default());
    let vh = built.dag.virtual_hosts.iter().find(|vh| vh.fqdn == "secure.bar.com").expect("secure vhost present");
    assert!(vh.tls.is_some());
    assert!(!built.xds.secrets.contents().is_empty(), "SDS emits the delegated secret");

    // Narrow the delegation to a namespace this proxy does not live in.
    cache.upsert_delegation(TlsCertificateDelegation {
        metadata: meta("admin", "delegation"),
        spec: TlsCertificateDelegationSpec {
            delegations: vec![CertDelegation { secret_name: "wildcard".into(), target_namespaces: vec!["other".into()] }],
        },
    });

    let built = build_all(&cache, &BuilderConfig::default());
    let status = built.dag.statuses.iter().find(|s| s.name == "secure").expect("status for secure");
    assert!(matches!(status.condition, StatusCondition::Invalid { .. }), "revoked delegation invalidates the proxy");
}

#[tokio::test]
async fn scenario_e_weighted_split() {
    let (notify_tx, _notify_rx) = tokio::sync::mpsc::channel(16);
    let cache = ObjectCache::new(notify_tx);

    cache.upsert_http_proxy(HttpProxy {
        metadata: meta("default", "weighted"),
        spec: HttpProxySpec {
            virtualhost: Some(VirtualHostSpec { fqdn: "weighted.bar.com".into(), tls: None }),
            routes: vec![route(
                vec![ConditionSpec::Prefix("/".into())],
                vec![route_service("s1", 80, 10), route_service("s2", 80, 90)],
            )],
            includes: vec![],
            tcpproxy: None,
        },
    });
    for name in ["s1", "s2"] {
        cache.upsert_service(cluster_ip_service("default", name, 80));
        cache.upsert_endpoints(endpoints("default", name, 80, &["10.0.3.1"]));
    }

    let built = build_all(&cache, &BuilderConfig::default());
    let insecure = route_config(&built, "ingress_http");
    let weighted = insecure.virtual_hosts[0].routes[0].action.as_ref().unwrap();
    use envoy_types::pb::envoy::config::route::v3::{route::Action, route_action::ClusterSpecifier};
    let Action::Route(route_action) = weighted else { panic!("expected a route action") };
    let ClusterSpecifier::WeightedClusters(weighted_clusters) = route_action.cluster_specifier.as_ref().unwrap() else {
        panic!("expected weighted clusters")
    };
    let weights: Vec<u32> = weighted_clusters.clusters.iter().map(|c| c.weight.unwrap_or_default()).collect();
    assert_eq!(weights, vec![10, 90]);

    // No explicit weights: even split.
    let (notify_tx2, _notify_rx2) = tokio::sync::mpsc::channel(16);
    let cache2 = ObjectCache::new(notify_tx2);
    cache2.upsert_http_proxy(HttpProxy {
        metadata: meta("default", "even"),
        spec: HttpProxySpec {
            virtualhost: Some(VirtualHostSpec { fqdn: "even.bar.com".into(), tls: None }),
            routes: vec![route(
                vec![ConditionSpec::Prefix("/".into())],
                vec![route_service("s1", 80, 0), route_service("s2", 80, 0)],
            )],
            includes: vec![],
            tcpproxy: None,
        },
    });
    for name in ["s1", "s2"] {
        cache2.upsert_service(cluster_ip_service("default", name, 80));
        cache2.upsert_endpoints(endpoints("default", name, 80, &["10.0.3.1"]));
    }
    let built2 = build_all(&cache2, &BuilderConfig::default());
    let insecure2 = route_config(&built2, "ingress_http");
    let action2 = insecure2.virtual_hosts[0].routes[0].action.as_ref().unwrap();
    let Action::Route(route_action2) = action2 else { panic!("expected a route action") };
    let ClusterSpecifier::WeightedClusters(weighted2) = route_action2.cluster_specifier.as_ref().unwrap() else {
        panic!("expected weighted clusters")
    };
    let weights2: Vec<u32> = weighted2.clusters.iter().map(|c| c.weight.unwrap_or_default()).collect();
    assert_eq!(weights2, vec![1, 1]);
}

#[tokio::test]
async fn scenario_f_inclusion_cycle() {
    let (notify_tx, _notify_rx) = tokio::sync::mpsc::channel(16);
    let cache = ObjectCache::new(notify_tx);

    // "root" is the root VirtualHost; it includes "a", which includes "b",
    // which includes "a" again — the cycle sits among the included proxies,
    // not the root itself.
    cache.upsert_http_proxy(HttpProxy {
        metadata: meta("default", "root"),
        spec: HttpProxySpec {
            virtualhost: Some(VirtualHostSpec { fqdn: "root.bar.com".into(), tls: None }),
            routes: vec![],
            includes: vec![IncludeSpec { name: "a".into(), namespace: Some("default".into()), conditions: vec![] }],
            tcpproxy: None,
        },
    });
    cache.upsert_http_proxy(HttpProxy {
        metadata: meta("default", "a"),
        spec: HttpProxySpec {
            virtualhost: None,
            routes: vec![],
            includes: vec![IncludeSpec { name: "b".into(), namespace: Some("default".into()), conditions: vec![] }],
            tcpproxy: None,
        },
    });
    cache.upsert_http_proxy(HttpProxy {
        metadata: meta("default", "b"),
        spec: HttpProxySpec {
            virtualhost: None,
            routes: vec![],
            includes: vec![IncludeSpec { name: "a".into(), namespace: Some("default".into()), conditions: vec![] }],
            tcpproxy: None,
        },
    });
    // An unrelated, well-formed proxy must build normally alongside the cycle.
    cache.upsert_http_proxy(HttpProxy {
        metadata: meta("default", "healthy"),
        spec: HttpProxySpec {
            virtualhost: Some(VirtualHostSpec { fqdn: "healthy.bar.com".into(), tls: None }),
            routes: vec![route(vec![ConditionSpec::Prefix("/".into())], vec![route_service("s1", 80, 0)])],
            includes: vec![],
            tcpproxy: None,
        },
    });
    cache.upsert_service(cluster_ip_service("default", "s1", 80));
    cache.upsert_endpoints(endpoints("default", "s1", 80, &["10.0.4.1"]));

    let built = build_all(&cache, &BuilderConfig::default());

    assert_eq!(built.dag.virtual_hosts.len(), 2, "the cycle's own root still builds, just with no routes");
    let root_vh = built.dag.virtual_hosts.iter().find(|vh| vh.fqdn == "root.bar.com").expect("root vhost present");
    assert!(root_vh.routes.is_empty(), "neither cycle member contributes routes");
    let healthy_vh = built.dag.virtual_hosts.iter().find(|vh| vh.fqdn == "healthy.bar.com").expect("unrelated proxy builds normally");
    assert_eq!(healthy_vh.routes.len(), 1);

    for name in ["a", "b"] {
        let status = built.dag.statuses.iter().find(|s| s.name == name).expect("status recorded for cycle member");
        match &status.condition {
            StatusCondition::Invalid { reason, .. } => assert!(reason.contains("IncludeCycle") || reason.to_lowercase().contains("cycle")),
            other => panic!("expected {name} to be marked invalid for an include cycle, got {other:?}"),
        }
    }
}
