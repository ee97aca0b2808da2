//! Transforms an [`ObjectCacheSnapshot`] into a [`Dag`] plus a per-object
//! status table. The build is total: malformed input never aborts
//! the build, it only produces `Invalid`/`Orphaned` status entries.

use crate::cache::ObjectCacheSnapshot;
use crate::dag::model::*;
use crate::k8s::{
    annotations, CircuitBreakerAnnotations, ConditionSpec, HeaderOp, HttpProxy, Ingress, ObjectKey,
    RouteServiceSpec, RouteSpec, ServiceType, UpstreamProtocol,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct BuilderConfig {
    /// Namespaces permitted to own a root VirtualHost. Empty means
    /// unrestricted.
    pub root_namespaces: Vec<String>,
}

impl BuilderConfig {
    fn permits_root(&self, namespace: &str) -> bool {
        self.root_namespaces.is_empty() || self.root_namespaces.iter().any(|ns| ns == namespace)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceCounts {
    pub valid: u64,
    pub invalid: u64,
    pub orphaned: u64,
    pub root: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BuildMetrics {
    pub per_namespace: BTreeMap<String, NamespaceCounts>,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub dag: Dag,
    pub metrics: BuildMetrics,
}

/// Merged conditions accumulated along an inclusion path.
#[derive(Debug, Clone, Default)]
struct AccumulatedConditions {
    prefix: String,
    exact_path: Option<String>,
    headers: Vec<HeaderMatcher>,
}

impl AccumulatedConditions {
    fn extend(&self, conditions: &[ConditionSpec]) -> Self {
        let mut next = self.clone();
        for condition in conditions {
            match condition {
                ConditionSpec::Prefix(p) => {
                    let trimmed = p.strip_suffix('/').unwrap_or(p);
                    next.prefix.push_str(trimmed);
                }
                ConditionSpec::ExactPath(p) => next.exact_path = Some(p.clone()),
                ConditionSpec::Header { name, op } => {
                    next.headers.push(HeaderMatcher { name: name.clone(), op: lower_header_op(op) })
                }
            }
        }
        next
    }

    /// Dedup key for the visited-set: identical accumulated
    /// conditions reaching the same proxy need not be expanded twice.
    fn dedup_key(&self) -> String {
        let mut headers: Vec<String> =
            self.headers.iter().map(|h| format!("{}:{:?}", h.name, h.op)).collect();
        headers.sort();
        format!("{}|{:?}|{}", self.prefix, self.exact_path, headers.join(","))
    }

    fn has_duplicate_header_names(&self) -> bool {
        let mut names: Vec<&str> = self.headers.iter().map(|h| h.name.as_str()).collect();
        names.sort();
        names.windows(2).any(|w| w[0] == w[1])
    }

    fn into_route_match(self) -> RouteMatch {
        let path = match self.exact_path {
            Some(p) => PathMatchStrategy::Exact(p),
            None => PathMatchStrategy::Prefix(if self.prefix.is_empty() { "/".into() } else { self.prefix }),
        };
        RouteMatch { path, headers: self.headers }
    }
}

fn lower_header_op(op: &HeaderOp) -> HeaderMatchOp {
    match op {
        HeaderOp::Exact(v) => HeaderMatchOp::Exact(v.clone()),
        HeaderOp::Presence => HeaderMatchOp::Presence,
        HeaderOp::Contains(v) => HeaderMatchOp::Contains(v.clone()),
        HeaderOp::NotContains(v) => HeaderMatchOp::NotContains(v.clone()),
    }
}

/// A fully resolved route, ready for cluster/endpoint attachment.
struct LeafRoute {
    owner: ObjectKey,
    r#match: RouteMatch,
    spec: RouteSpec,
}

struct BuildCtx<'a> {
    snapshot: &'a ObjectCacheSnapshot,
    config: &'a BuilderConfig,
    statuses: Vec<ObjectStatus>,
    clusters: BTreeMap<String, Cluster>,
    secrets: BTreeMap<String, ResolvedSecret>,
    visited_proxies: HashSet<ObjectKey>,
}

pub fn build(snapshot: &ObjectCacheSnapshot, config: &BuilderConfig) -> BuildOutcome {
    let mut ctx = BuildCtx {
        snapshot,
        config,
        statuses: Vec::new(),
        clusters: BTreeMap::new(),
        secrets: BTreeMap::new(),
        visited_proxies: HashSet::new(),
    };

    let mut virtual_hosts = Vec::new();

    // Collect roots, grouped by FQDN, tie-broken by creation timestamp.
    for (fqdn, winner) in collect_roots(&mut ctx) {
        if let Some(vh) = build_virtual_host(&mut ctx, &fqdn, winner) {
            virtual_hosts.push(vh);
        }
    }

    // Step 7: Ingress objects lowered as simple root HTTPProxies.
    for ingress in ctx.snapshot.ingresses.values() {
        virtual_hosts.extend(lower_ingress(&mut ctx, ingress));
    }

    // Step 8: orphan detection — any HTTPProxy never visited during inclusion.
    for (key, proxy) in &ctx.snapshot.httpproxies {
        if !proxy.is_root() && !ctx.visited_proxies.contains(key) {
            ctx.statuses.push(ObjectStatus {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                kind: ObjectStatusKind::HttpProxy,
                condition: StatusCondition::Orphaned,
            });
        }
    }

    for vh in &mut virtual_hosts {
        order_routes(&mut vh.routes);
    }

    let metrics = emit_metrics(&ctx.statuses, &virtual_hosts);
    info!(
        namespaces = metrics.per_namespace.len(),
        virtual_hosts = virtual_hosts.len(),
        clusters = ctx.clusters.len(),
        "dag build complete"
    );

    BuildOutcome {
        dag: Dag { virtual_hosts, clusters: ctx.clusters, secrets: ctx.secrets, statuses: ctx.statuses },
        metrics,
    }
}

/// Step 1: group root HTTPProxies by FQDN and apply the duplicate-host
/// tie-break (oldest `creationTimestamp`, then lexicographic namespace/name).
fn collect_roots(ctx: &mut BuildCtx) -> Vec<(String, HttpProxy)> {
    let mut by_fqdn: HashMap<String, Vec<&HttpProxy>> = HashMap::new();
    for proxy in ctx.snapshot.httpproxies.values() {
        if !proxy.is_root() {
            continue;
        }
        if !ctx.config.permits_root(&proxy.metadata.namespace) {
            continue;
        }
        let fqdn = proxy.spec.virtualhost.as_ref().expect("is_root implies virtualhost").fqdn.clone();
        by_fqdn.entry(fqdn).or_default().push(proxy.as_ref());
    }

    let mut winners = Vec::new();
    for (fqdn, mut candidates) in by_fqdn {
        candidates.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.metadata.namespace.cmp(&b.metadata.namespace))
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });
        let (winner, losers) = candidates.split_first().expect("non-empty group");
        for loser in losers {
            ctx.statuses.push(ObjectStatus {
                namespace: loser.metadata.namespace.clone(),
                name: loser.metadata.name.clone(),
                kind: ObjectStatusKind::HttpProxy,
                condition: StatusCondition::Invalid {
                    reason: "DuplicateHost".into(),
                    message: format!("fqdn {fqdn} already owned by {}/{}", winner.metadata.namespace, winner.metadata.name),
                },
            });
        }
        ctx.visited_proxies.insert(winner.metadata.key());
        winners.push((fqdn, (*winner).clone()));
    }
    winners
}

fn build_virtual_host(ctx: &mut BuildCtx, fqdn: &str, root: HttpProxy) -> Option<VirtualHost> {
    let owner = root.metadata.key();

    // A root-level TCPProxy overrides HTTP routes entirely.
    if let Some(tcpproxy) = &root.spec.tcpproxy {
        if !root.spec.routes.is_empty() {
            ctx.statuses.push(invalid(&owner, ObjectStatusKind::HttpProxy, "RoutesIgnored", "tcpproxy present; http routes dropped"));
        }
        let targets = resolve_weighted_targets(ctx, &owner, &tcpproxy.services, LoadBalancerPolicy::default(), None);
        let tls = match resolve_tls(ctx, &root) {
            Ok(tls) => tls,
            Err(_) => None,
        };
        ctx.statuses.push(valid(&owner, ObjectStatusKind::HttpProxy));
        return Some(VirtualHost {
            fqdn: fqdn.to_string(),
            tls,
            routes: Vec::new(),
            tcp_proxy: Some(TcpProxy { targets }),
        });
    }

    // Step 2: TLS resolution, with the insecure-fallback rule.
    let tls = match resolve_tls(ctx, &root) {
        Ok(tls) => tls,
        Err(reason) => {
            let any_insecure = root.spec.routes.iter().any(|r| r.permit_insecure);
            ctx.statuses.push(invalid(&owner, ObjectStatusKind::HttpProxy, "TLSError", &reason));
            if !any_insecure {
                return None;
            }
            None
        }
    };

    // Step 3: inclusion expansion via DFS.
    let mut leaves = Vec::new();
    let mut path = vec![owner.clone()];
    expand_includes(ctx, &root, AccumulatedConditions::default(), &mut path, &mut leaves);

    // Step 4/5/6: materialize routes.
    let mut routes = Vec::new();
    for leaf in leaves {
        if let Some(route) = materialize_route(ctx, &leaf) {
            routes.push(route);
        }
    }

    ctx.statuses.push(valid(&owner, ObjectStatusKind::HttpProxy));
    Some(VirtualHost { fqdn: fqdn.to_string(), tls, routes, tcp_proxy: None })
}

/// Step 2. Returns `Err(reason)` when resolution fails; the caller decides
/// the insecure-fallback policy.
fn resolve_tls(ctx: &mut BuildCtx, root: &HttpProxy) -> Result<Option<VirtualHostTls>, String> {
    let Some(tls_spec) = &root.spec.virtualhost.as_ref().unwrap().tls else {
        return Ok(None);
    };
    if tls_spec.passthrough {
        return Ok(Some(VirtualHostTls {
            secret: None,
            minimum_protocol_version: parse_tls_version(tls_spec.minimum_protocol_version.as_deref()),
            passthrough: true,
        }));
    }
    let Some(secret_ref) = &tls_spec.secret_name else {
        return Err("no secretName and passthrough not set".into());
    };
    let (secret_ns, secret_name) = split_secret_ref(secret_ref, &root.metadata.namespace);

    if secret_ns != root.metadata.namespace {
        let permitted = ctx.snapshot.delegations.values().any(|d| {
            d.metadata.namespace == secret_ns && d.permits(&secret_name, &root.metadata.namespace)
        });
        if !permitted {
            return Err(format!("secret {secret_ns}/{secret_name} not delegated to {}", root.metadata.namespace));
        }
    }

    let key = ObjectKey::new(secret_ns.clone(), secret_name.clone());
    let Some(secret) = ctx.snapshot.secrets.get(&key).cloned() else {
        return Err(format!("secret {key} not found"));
    };

    let secret_ref = SecretRef { namespace: secret_ns, name: secret_name };
    register_secret(ctx, secret_ref.clone(), &secret.data);

    Ok(Some(VirtualHostTls {
        secret: Some(secret_ref),
        minimum_protocol_version: parse_tls_version(tls_spec.minimum_protocol_version.as_deref()),
        passthrough: false,
    }))
}

fn register_secret(ctx: &mut BuildCtx, secret_ref: SecretRef, data: &crate::k8s::SecretData) {
    let material = match data {
        crate::k8s::SecretData::TlsKeyPair { cert, key } => SecretMaterial::TlsKeyPair { cert: cert.clone(), key: key.clone() },
        crate::k8s::SecretData::CaBundle { ca_cert } => SecretMaterial::CaBundle { ca_cert: ca_cert.clone() },
    };
    ctx.secrets.insert(secret_ref.to_string(), ResolvedSecret { secret_ref, material });
}

fn split_secret_ref(reference: &str, default_namespace: &str) -> (String, String) {
    match reference.split_once('/') {
        Some((ns, name)) => (ns.to_string(), name.to_string()),
        None => (default_namespace.to_string(), reference.to_string()),
    }
}

fn parse_tls_version(value: Option<&str>) -> TlsProtocolVersion {
    match value {
        Some("1.2") => TlsProtocolVersion::Tls12,
        Some("1.3") => TlsProtocolVersion::Tls13,
        _ => TlsProtocolVersion::Auto,
    }
}

/// Step 3: DFS over `includes`, concatenating path conditions and unioning
/// header conditions. A node revisited on the current path is a cycle:
/// every node on the cycle is marked invalid and the subtree
/// is dropped. A node already fully expanded with identical accumulated
/// conditions is skipped (diamond-shaped inclusion).
fn expand_includes(
    ctx: &mut BuildCtx,
    proxy: &HttpProxy,
    accumulated: AccumulatedConditions,
    path: &mut Vec<ObjectKey>,
    leaves: &mut Vec<LeafRoute>,
) {
    let owner = proxy.metadata.key();

    for route in &proxy.spec.routes {
        let merged = accumulated.extend(&route.conditions);
        leaves.push(LeafRoute { owner: owner.clone(), r#match: merged.into_route_match(), spec: route.clone() });
    }

    for include in &proxy.spec.includes {
        let child_namespace = include.namespace.clone().unwrap_or_else(|| owner.namespace.clone());
        let child_key = ObjectKey::new(child_namespace, include.name.clone());

        if path.contains(&child_key) {
            let cycle_start = path.iter().position(|k| *k == child_key).unwrap();
            for node in &path[cycle_start..] {
                ctx.statuses.push(invalid(node, ObjectStatusKind::HttpProxy, "IncludeCycle", "inclusion cycle detected"));
            }
            continue;
        }

        let Some(child) = ctx.snapshot.httpproxies.get(&child_key).cloned() else {
            ctx.statuses.push(invalid(&owner, ObjectStatusKind::HttpProxy, "IncludeNotFound", &format!("include {child_key} not found")));
            continue;
        };

        ctx.visited_proxies.insert(child_key.clone());
        let child_conditions = accumulated.extend(&include.conditions);
        path.push(child_key);
        expand_includes(ctx, &child, child_conditions, path, leaves);
        path.pop();
    }
}

/// Steps 4 and 6 combined: merges conditions, resolves services into
/// clusters, and applies validation invariants. Returns `None` when the
/// route is rejected, after recording the failure status.
fn materialize_route(ctx: &mut BuildCtx, leaf: &LeafRoute) -> Option<Route> {
    if has_duplicate_header_names(&leaf.r#match.headers) {
        ctx.statuses.push(invalid(&leaf.owner, ObjectStatusKind::HttpProxy, "DuplicateHeaderCondition", "repeated exact-header condition"));
        return None;
    }
    if let PathMatchStrategy::Prefix(p) = &leaf.r#match.path {
        if !p.starts_with('/') {
            ctx.statuses.push(invalid(&leaf.owner, ObjectStatusKind::HttpProxy, "MalformedPrefix", "merged prefix is not well-formed"));
            return None;
        }
    }

    let load_balancer_policy = parse_load_balancer_policy(ctx, &leaf.owner, leaf.spec.load_balancer_policy.as_ref());
    let health_check = parse_health_check(ctx, &leaf.owner, leaf.spec.health_check_policy.as_ref());

    let targets = resolve_weighted_targets(ctx, &leaf.owner, &leaf.spec.services, load_balancer_policy, health_check.as_ref());
    if targets.is_empty() {
        return None;
    }

    let action = match &leaf.spec.path_rewrite_policy {
        Some(rewrite) if rewrite.replace_prefix.is_some() => {
            RouteAction::Rewrite { prefix: rewrite.replace_prefix.clone().unwrap(), target: targets }
        }
        _ => RouteAction::Forward(targets),
    };

    let retry_policy = leaf.spec.retry_policy.as_ref().map(|r| RetryPolicy {
        num_retries: r.count,
        per_try_timeout: r.per_try_timeout.as_deref().and_then(|t| parse_duration(t).ok().flatten()),
    });

    let timeout_policy = leaf.spec.timeout_policy.as_ref().map(|t| TimeoutPolicy {
        request_timeout: t.timeout.as_deref().and_then(|v| parse_duration(v).ok().flatten()),
        idle_timeout: t.idle.as_deref().and_then(|v| parse_duration(v).ok().flatten()),
    });

    let mirror = leaf.spec.mirror.as_ref().map(|m| RouteTarget {
        cluster: register_cluster(ctx, &leaf.owner, &leaf.owner.namespace, &m.service, m.port, LoadBalancerPolicy::default(), None, None),
    });

    Some(Route {
        r#match: leaf.r#match.clone(),
        action,
        retry_policy,
        timeout_policy,
        enable_websockets: leaf.spec.enable_websockets,
        permit_insecure: leaf.spec.permit_insecure,
        mirror,
    })
}

fn has_duplicate_header_names(headers: &[HeaderMatcher]) -> bool {
    let mut names: Vec<&str> = headers.iter().map(|h| h.name.as_str()).collect();
    names.sort();
    names.windows(2).any(|w| w[0] == w[1])
}

/// Invariant 7: weights normalize to an even split when the total is zero.
fn resolve_weighted_targets(
    ctx: &mut BuildCtx,
    owner: &ObjectKey,
    services: &[RouteServiceSpec],
    load_balancer_policy: LoadBalancerPolicy,
    health_check: Option<&HealthCheck>,
) -> Vec<WeightedCluster> {
    let total: u32 = services.iter().map(|s| s.weight).sum();
    services
        .iter()
        .map(|svc| {
            let weight = if total == 0 { 1 } else { svc.weight };
            WeightedCluster {
                cluster: register_cluster(
                    ctx,
                    owner,
                    &owner.namespace,
                    &svc.name,
                    svc.port,
                    load_balancer_policy,
                    health_check.cloned(),
                    svc.validation.as_ref(),
                ),
                weight,
            }
        })
        .collect()
}

/// Validates `loadBalancerPolicy.strategy` against the four
/// accepted names, falling back to the default and recording an `Invalid`
/// status for anything else.
fn parse_load_balancer_policy(
    ctx: &mut BuildCtx,
    owner: &ObjectKey,
    spec: Option<&crate::k8s::LoadBalancerPolicySpec>,
) -> LoadBalancerPolicy {
    let Some(spec) = spec else { return LoadBalancerPolicy::default() };
    match spec.strategy.as_str() {
        "RoundRobin" => LoadBalancerPolicy::RoundRobin,
        "WeightedLeastRequest" => LoadBalancerPolicy::WeightedLeastRequest,
        "Random" => LoadBalancerPolicy::Random,
        "Cookie" => LoadBalancerPolicy::Cookie,
        other => {
            ctx.statuses.push(invalid(
                owner,
                ObjectStatusKind::HttpProxy,
                "InvalidLoadBalancerPolicy",
                &format!("unknown load balancer strategy {other:?}"),
            ));
            LoadBalancerPolicy::default()
        }
    }
}

/// Requires `intervalSeconds ≥ 1`, thresholds `≥ 1`. An out-of-range
/// policy is dropped (the cluster gets no health check) with an `Invalid`
/// status rather than rejecting the whole route.
fn parse_health_check(
    ctx: &mut BuildCtx,
    owner: &ObjectKey,
    spec: Option<&crate::k8s::HealthCheckPolicySpec>,
) -> Option<HealthCheck> {
    let spec = spec?;
    if spec.interval_seconds < 1 || spec.unhealthy_threshold < 1 || spec.healthy_threshold < 1 {
        ctx.statuses.push(invalid(
            owner,
            ObjectStatusKind::HttpProxy,
            "InvalidHealthCheckPolicy",
            "intervalSeconds and thresholds must be >= 1",
        ));
        return None;
    }
    Some(HealthCheck {
        path: spec.path.clone().unwrap_or_else(|| "/".to_string()),
        interval: Duration::from_secs(spec.interval_seconds as u64),
        unhealthy_threshold: spec.unhealthy_threshold,
        healthy_threshold: spec.healthy_threshold,
    })
}

/// Registers (or reuses) the Cluster for `(namespace, service, port)`,
/// returning its content-addressed name. `load_balancer_policy`
/// and `health_check` are route-level fields folded into the cluster
/// identity since two routes to the same service with different health
/// checks are logically distinct clusters — one Cluster per unique
/// `(namespace, service, port, load-balancer policy, health check)` tuple.
///
/// `validation` is the route-level `services[].validation` request for
/// upstream TLS validation (CA + expected SAN). The referenced Service
/// must carry the matching `upstream-protocol.tls` annotation for
/// validation to take effect; when it's requested but absent, `owner` is
/// marked invalid and the cluster is built without upstream TLS rather
/// than dropped (the build stays total).
fn register_cluster(
    ctx: &mut BuildCtx,
    owner: &ObjectKey,
    namespace: &str,
    service_name: &str,
    port: u16,
    load_balancer_policy: LoadBalancerPolicy,
    health_check: Option<HealthCheck>,
    validation: Option<&crate::k8s::UpstreamValidationSpec>,
) -> String {
    let service_key = ObjectKey::new(namespace.to_string(), service_name.to_string());
    let service = ctx.snapshot.services.get(&service_key).cloned();

    let upstream_protocol = service.as_ref().and_then(|s| s.upstream_protocol(port, None));
    let has_tls_annotation = matches!(upstream_protocol, Some(UpstreamProtocol::Tls));

    let upstream_tls = if let Some(validation) = validation {
        if !has_tls_annotation {
            ctx.statuses.push(invalid(
                owner,
                ObjectStatusKind::HttpProxy,
                "UpstreamValidationWithoutTlsAnnotation",
                &format!("service {namespace}/{service_name} port {port} requests upstream validation but lacks the upstream-protocol.tls annotation"),
            ));
            has_tls_annotation.then(|| UpstreamTlsContext { sni: None, ca_secret: None })
        } else {
            let ca_secret = ObjectKey::new(namespace.to_string(), validation.ca_secret.clone());
            let ca_ref = ctx.snapshot.secrets.get(&ca_secret).cloned().map(|secret| {
                let secret_ref = SecretRef { namespace: namespace.to_string(), name: validation.ca_secret.clone() };
                register_secret(ctx, secret_ref.clone(), &secret.data);
                secret_ref
            });
            Some(UpstreamTlsContext { sni: Some(validation.subject_name.clone()), ca_secret: ca_ref })
        }
    } else {
        has_tls_annotation.then(|| UpstreamTlsContext { sni: None, ca_secret: None })
    };
    let circuit_breakers = service
        .as_ref()
        .map(|s| s.circuit_breaker_annotations())
        .map(to_circuit_breakers)
        .unwrap_or_default();

    let external_name = service.as_ref().and_then(|s| match s.spec.service_type {
        ServiceType::ExternalName => s.spec.external_name.clone(),
        ServiceType::ClusterIp => None,
    });

    let name = crate::dag::naming::cluster_name(namespace, service_name, port, upstream_tls.as_ref(), load_balancer_policy, health_check.as_ref());

    if ctx.clusters.contains_key(&name) {
        return name;
    }

    // Step 5: endpoint attachment, skipped entirely for ExternalName services.
    let endpoints = if external_name.is_some() {
        Vec::new()
    } else {
        ctx.snapshot
            .endpoints
            .get(&service_key)
            .map(|e| e.ready_addresses(port, None).into_iter().map(|(address, port)| Endpoint { address, port }).collect())
            .unwrap_or_default()
    };

    ctx.clusters.insert(
        name.clone(),
        Cluster {
            name: name.clone(),
            namespace: namespace.to_string(),
            service: service_name.to_string(),
            port,
            upstream_tls,
            load_balancer_policy,
            circuit_breakers,
            health_check,
            external_name,
            endpoints,
        },
    );
    name
}

fn to_circuit_breakers(a: CircuitBreakerAnnotations) -> CircuitBreakers {
    CircuitBreakers {
        max_connections: a.max_connections,
        max_pending_requests: a.max_pending_requests,
        max_requests: a.max_requests,
        max_retries: a.max_retries,
    }
}

/// Parses a Contour-style duration literal. `"0s"` and `"infinity"` both
/// mean "no timeout" (`Ok(None)`); negative values are rejected.
fn parse_duration(value: &str) -> Result<Option<Duration>, String> {
    if value.eq_ignore_ascii_case("infinity") {
        return Ok(None);
    }
    if let Some(stripped) = value.strip_prefix('-') {
        let _ = stripped;
        return Err(format!("negative duration {value}"));
    }
    let (number, unit) = value
        .find(|c: char| c.is_alphabetic())
        .map(|idx| value.split_at(idx))
        .ok_or_else(|| format!("missing unit in duration {value}"))?;
    let number: f64 = number.parse().map_err(|_| format!("invalid duration {value}"))?;
    let millis = match unit {
        "ms" => number,
        "s" => number * 1_000.0,
        "m" => number * 60_000.0,
        "h" => number * 3_600_000.0,
        other => return Err(format!("unknown duration unit {other}")),
    };
    if millis == 0.0 {
        Ok(None)
    } else {
        Ok(Some(Duration::from_millis(millis as u64)))
    }
}

/// Step 7: lowers an Ingress into one root VirtualHost per `host` rule, one
/// Route per path (`pathType: Exact` maps to an exact match, everything
/// else to prefix).
fn lower_ingress(ctx: &mut BuildCtx, ingress: &Ingress) -> Vec<VirtualHost> {
    let owner = ingress.metadata.key();
    if !ctx.config.permits_root(&owner.namespace) {
        return Vec::new();
    }

    let tls_secret = ingress.spec.tls.first().and_then(|t| {
        let secret_ref = SecretRef { namespace: owner.namespace.clone(), name: t.secret_name.clone() };
        let key = ObjectKey::new(secret_ref.namespace.clone(), secret_ref.name.clone());
        let secret = ctx.snapshot.secrets.get(&key)?.clone();
        register_secret(ctx, secret_ref.clone(), &secret.data);
        Some(secret_ref)
    });

    let num_retries: Option<u32> = ingress.metadata.annotations.get(annotations::NUM_RETRIES).and_then(|v| v.parse().ok());
    let per_try_timeout = ingress
        .metadata
        .annotations
        .get(annotations::PER_TRY_TIMEOUT)
        .and_then(|v| parse_duration(v).ok())
        .flatten();
    let request_timeout = ingress
        .metadata
        .annotations
        .get(annotations::RESPONSE_TIMEOUT)
        .and_then(|v| parse_duration(v).ok())
        .flatten();
    let enable_websockets = ingress.metadata.annotations.get(annotations::WEBSOCKET_ROUTES).is_some();
    let min_tls_version = parse_tls_version(ingress.metadata.annotations.get(annotations::TLS_MINIMUM_PROTOCOL_VERSION).map(String::as_str));

    let retry_policy = num_retries.map(|n| RetryPolicy { num_retries: n, per_try_timeout });
    let timeout_policy = request_timeout.map(|t| TimeoutPolicy { request_timeout: Some(t), idle_timeout: None });

    let mut by_host: HashMap<String, Vec<Route>> = HashMap::new();
    for rule in &ingress.spec.rules {
        let mut routes = Vec::new();
        for path in &rule.http.paths {
            let strategy = match path.path_type {
                crate::k8s::IngressPathType::Exact => PathMatchStrategy::Exact(path.path.clone()),
                _ => PathMatchStrategy::Prefix(path.path.clone()),
            };
            let cluster = register_cluster(
                ctx,
                &owner,
                &owner.namespace,
                &path.backend.service_name,
                path.backend.service_port,
                LoadBalancerPolicy::default(),
                None,
                None,
            );
            routes.push(Route {
                r#match: RouteMatch { path: strategy, headers: Vec::new() },
                action: RouteAction::Forward(vec![WeightedCluster { cluster, weight: 1 }]),
                retry_policy,
                timeout_policy,
                enable_websockets,
                permit_insecure: tls_secret.is_none(),
                mirror: None,
            });
        }
        by_host.entry(rule.host.clone()).or_default().extend(routes);
    }

    ctx.statuses.push(valid(&owner, ObjectStatusKind::Ingress));

    by_host
        .into_iter()
        .map(|(fqdn, mut routes)| {
            order_routes(&mut routes);
            VirtualHost {
                fqdn,
                tls: tls_secret.clone().map(|secret| VirtualHostTls {
                    secret: Some(secret),
                    minimum_protocol_version: min_tls_version,
                    passthrough: false,
                }),
                routes,
                tcp_proxy: None,
            }
        })
        .collect()
}

/// Routes sort by decreasing prefix length, then by number of header
/// conditions (more specific first), then lexicographically as a stable
/// final tie-break.
fn order_routes(routes: &mut [Route]) {
    routes.sort_by(|a, b| {
        b.r#match
            .path
            .specificity()
            .cmp(&a.r#match.path.specificity())
            .then_with(|| b.r#match.headers.len().cmp(&a.r#match.headers.len()))
            .then_with(|| format!("{:?}", a.r#match).cmp(&format!("{:?}", b.r#match)))
    });
}

fn invalid(key: &ObjectKey, kind: ObjectStatusKind, reason: &str, message: &str) -> ObjectStatus {
    warn!(namespace = %key.namespace, name = %key.name, reason, message, "object invalid");
    ObjectStatus {
        namespace: key.namespace.clone(),
        name: key.name.clone(),
        kind,
        condition: StatusCondition::Invalid { reason: reason.to_string(), message: message.to_string() },
    }
}

fn valid(key: &ObjectKey, kind: ObjectStatusKind) -> ObjectStatus {
    ObjectStatus { namespace: key.namespace.clone(), name: key.name.clone(), kind, condition: StatusCondition::Valid }
}

/// Step 9: per-namespace Valid/Invalid/Orphaned/Root/Total counts.
fn emit_metrics(statuses: &[ObjectStatus], virtual_hosts: &[VirtualHost]) -> BuildMetrics {
    let mut per_namespace: BTreeMap<String, NamespaceCounts> = BTreeMap::new();
    for status in statuses {
        let counts = per_namespace.entry(status.namespace.clone()).or_default();
        counts.total += 1;
        match &status.condition {
            StatusCondition::Valid => counts.valid += 1,
            StatusCondition::Orphaned => counts.orphaned += 1,
            StatusCondition::Invalid { .. } => counts.invalid += 1,
        }
    }
    let _ = virtual_hosts;
    BuildMetrics { per_namespace }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ObjectCache;
    use crate::k8s::*;
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    fn meta_at(namespace: &str, name: &str, seconds: i64) -> ObjectMeta {
        ObjectMeta {
            namespace: namespace.into(),
            name: name.into(),
            uid: format!("{namespace}-{name}"),
            creation_timestamp: Utc.timestamp_opt(seconds, 0).unwrap(),
            annotations: Default::default(),
        }
    }

    fn snapshot(cache: &ObjectCache) -> ObjectCacheSnapshot {
        cache.snapshot()
    }

    fn new_cache() -> ObjectCache {
        let (tx, _rx) = mpsc::channel(16);
        ObjectCache::new(tx)
    }

    fn service(namespace: &str, name: &str, port: u16) -> Service {
        Service {
            metadata: meta_at(namespace, name, 0),
            spec: ServiceSpec { service_type: ServiceType::ClusterIp, external_name: None, ports: vec![ServicePort { name: None, port }] },
        }
    }

    fn simple_root(namespace: &str, name: &str, fqdn: &str, seconds: i64, service_name: &str, port: u16) -> HttpProxy {
        HttpProxy {
            metadata: meta_at(namespace, name, seconds),
            spec: HttpProxySpec {
                virtualhost: Some(VirtualHostSpec { fqdn: fqdn.into(), tls: None }),
                routes: vec![RouteSpec {
                    conditions: vec![ConditionSpec::Prefix("/".into())],
                    services: vec![RouteServiceSpec { name: service_name.into(), port, weight: 0, validation: None }],
                    timeout_policy: None,
                    retry_policy: None,
                    health_check_policy: None,
                    load_balancer_policy: None,
                    path_rewrite_policy: None,
                    mirror: None,
                    permit_insecure: false,
                    enable_websockets: false,
                }],
                includes: vec![],
                tcpproxy: None,
            },
        }
    }

    #[test]
    fn simple_route_resolves_to_one_virtual_host() {
        let cache = new_cache();
        cache.upsert_service(service("default", "s1", 80));
        cache.upsert_http_proxy(simple_root("default", "root", "foo.example.com", 0, "s1", 80));

        let outcome = build(&snapshot(&cache), &BuilderConfig::default());
        assert_eq!(outcome.dag.virtual_hosts.len(), 1);
        assert_eq!(outcome.dag.virtual_hosts[0].fqdn, "foo.example.com");
        assert_eq!(outcome.dag.virtual_hosts[0].routes.len(), 1);
    }

    #[test]
    fn duplicate_fqdn_keeps_oldest_and_marks_the_rest_invalid() {
        let cache = new_cache();
        cache.upsert_service(service("default", "s1", 80));
        cache.upsert_http_proxy(simple_root("default", "old", "foo.example.com", 10, "s1", 80));
        cache.upsert_http_proxy(simple_root("default", "new", "foo.example.com", 20, "s1", 80));

        let outcome = build(&snapshot(&cache), &BuilderConfig::default());
        assert_eq!(outcome.dag.virtual_hosts.len(), 1);
        let loser = outcome
            .dag
            .statuses
            .iter()
            .find(|s| s.name == "new" && matches!(s.condition, StatusCondition::Invalid { .. }))
            .expect("loser marked invalid");
        assert!(matches!(&loser.condition, StatusCondition::Invalid{reason, ..} if reason == "DuplicateHost"));
    }

    #[test]
    fn inclusion_concatenates_prefixes() {
        let cache = new_cache();
        cache.upsert_service(service("default", "s1", 80));

        let mut root = simple_root("default", "root", "foo.example.com", 0, "s1", 80);
        root.spec.routes.clear();
        root.spec.includes.push(IncludeSpec {
            name: "child".into(),
            namespace: None,
            conditions: vec![ConditionSpec::Prefix("/api".into())],
        });
        cache.upsert_http_proxy(root);

        cache.upsert_http_proxy(HttpProxy {
            metadata: meta_at("default", "child", 0),
            spec: HttpProxySpec {
                virtualhost: None,
                routes: vec![RouteSpec {
                    conditions: vec![ConditionSpec::Prefix("/v1".into())],
                    services: vec![RouteServiceSpec { name: "s1".into(), port: 80, weight: 0, validation: None }],
                    timeout_policy: None,
                    retry_policy: None,
                    health_check_policy: None,
                    load_balancer_policy: None,
                    path_rewrite_policy: None,
                    mirror: None,
                    permit_insecure: false,
                    enable_websockets: false,
                }],
                includes: vec![],
                tcpproxy: None,
            },
        });

        let outcome = build(&snapshot(&cache), &BuilderConfig::default());
        let vh = &outcome.dag.virtual_hosts[0];
        assert_eq!(vh.routes.len(), 1);
        assert_eq!(vh.routes[0].r#match.path, PathMatchStrategy::Prefix("/api/v1".into()));
    }

    #[test]
    fn inclusion_cycle_is_detected_and_dropped() {
        let cache = new_cache();
        let mut root = simple_root("default", "root", "foo.example.com", 0, "s1", 80);
        root.spec.routes.clear();
        root.spec.includes.push(IncludeSpec { name: "a".into(), namespace: None, conditions: vec![] });
        cache.upsert_http_proxy(root);

        cache.upsert_http_proxy(HttpProxy {
            metadata: meta_at("default", "a", 0),
            spec: HttpProxySpec {
                virtualhost: None,
                routes: vec![],
                includes: vec![IncludeSpec { name: "b".into(), namespace: None, conditions: vec![] }],
                tcpproxy: None,
            },
        });
        cache.upsert_http_proxy(HttpProxy {
            metadata: meta_at("default", "b", 0),
            spec: HttpProxySpec {
                virtualhost: None,
                routes: vec![],
                includes: vec![IncludeSpec { name: "a".into(), namespace: None, conditions: vec![] }],
                tcpproxy: None,
            },
        });

        let outcome = build(&snapshot(&cache), &BuilderConfig::default());
        assert_eq!(outcome.dag.virtual_hosts[0].routes.len(), 0);
        assert!(outcome
            .dag
            .statuses
            .iter()
            .any(|s| matches!(&s.condition, StatusCondition::Invalid{reason, ..} if reason == "IncludeCycle")));
    }

    #[test]
    fn tls_via_delegation_resolves() {
        let cache = new_cache();
        cache.upsert_service(service("app", "s1", 80));
        cache.upsert_secret(Secret {
            metadata: meta_at("admin", "wildcard", 0),
            data: SecretData::TlsKeyPair { cert: vec![1], key: vec![2] },
        });
        cache.upsert_delegation(TlsCertificateDelegation {
            metadata: meta_at("admin", "delegate-wildcard", 0),
            spec: TlsCertificateDelegationSpec {
                delegations: vec![CertDelegation { secret_name: "wildcard".into(), target_namespaces: vec!["app".into()] }],
            },
        });

        let mut root = simple_root("app", "root", "foo.example.com", 0, "s1", 80);
        root.spec.virtualhost = Some(VirtualHostSpec {
            fqdn: "foo.example.com".into(),
            tls: Some(VirtualHostTlsSpec { secret_name: Some("admin/wildcard".into()), minimum_protocol_version: None, passthrough: false }),
        });
        cache.upsert_http_proxy(root);

        let outcome = build(&snapshot(&cache), &BuilderConfig::default());
        let vh = &outcome.dag.virtual_hosts[0];
        assert!(vh.tls.is_some());
        assert_eq!(vh.tls.as_ref().unwrap().secret.as_ref().unwrap().name, "wildcard");
    }

    #[test]
    fn upstream_validation_without_tls_annotation_marks_invalid() {
        let cache = new_cache();
        cache.upsert_service(service("default", "s1", 80));

        let mut root = simple_root("default", "root", "foo.example.com", 0, "s1", 80);
        root.spec.routes[0].services[0].validation =
            Some(UpstreamValidationSpec { ca_secret: "ca".into(), subject_name: "s1.internal".into() });
        cache.upsert_http_proxy(root);

        let outcome = build(&snapshot(&cache), &BuilderConfig::default());
        assert!(outcome
            .dag
            .statuses
            .iter()
            .any(|s| matches!(&s.condition, StatusCondition::Invalid{reason, ..} if reason == "UpstreamValidationWithoutTlsAnnotation")));
        let cluster = outcome.dag.clusters.values().next().expect("one cluster registered");
        assert!(cluster.upstream_tls.is_none());
    }

    #[test]
    fn upstream_validation_with_tls_annotation_resolves_ca_and_sni() {
        let cache = new_cache();
        let mut svc = service("default", "s1", 80);
        svc.metadata.annotations.insert("projectcontour.io/upstream-protocol.tls".into(), "80".into());
        cache.upsert_service(svc);
        cache.upsert_secret(Secret {
            metadata: meta_at("default", "ca", 0),
            data: SecretData::CaBundle { ca_cert: vec![9] },
        });

        let mut root = simple_root("default", "root", "foo.example.com", 0, "s1", 80);
        root.spec.routes[0].services[0].validation =
            Some(UpstreamValidationSpec { ca_secret: "ca".into(), subject_name: "s1.internal".into() });
        cache.upsert_http_proxy(root);

        let outcome = build(&snapshot(&cache), &BuilderConfig::default());
        let cluster = outcome.dag.clusters.values().next().expect("one cluster registered");
        let tls = cluster.upstream_tls.as_ref().expect("upstream tls resolved");
        assert_eq!(tls.sni.as_deref(), Some("s1.internal"));
        assert_eq!(tls.ca_secret.as_ref().unwrap().name, "ca");
    }

    #[test]
    fn zero_weight_services_split_evenly() {
        let cache = new_cache();
        cache.upsert_service(service("default", "s1", 80));
        cache.upsert_service(service("default", "s2", 80));

        let mut root = simple_root("default", "root", "foo.example.com", 0, "s1", 80);
        root.spec.routes[0].services.push(RouteServiceSpec { name: "s2".into(), port: 80, weight: 0, validation: None });
        cache.upsert_http_proxy(root);

        let outcome = build(&snapshot(&cache), &BuilderConfig::default());
        let RouteAction::Forward(targets) = &outcome.dag.virtual_hosts[0].routes[0].action else {
            panic!("expected forward action");
        };
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].weight, targets[1].weight);
    }

    #[test]
    fn root_namespace_policy_excludes_other_namespaces() {
        let cache = new_cache();
        cache.upsert_service(service("other", "s1", 80));
        cache.upsert_http_proxy(simple_root("other", "root", "foo.example.com", 0, "s1", 80));

        let config = BuilderConfig { root_namespaces: vec!["default".into()] };
        let outcome = build(&snapshot(&cache), &config);
        assert!(outcome.dag.virtual_hosts.is_empty());
    }

    #[test]
    fn orphaned_non_root_proxy_is_marked() {
        let cache = new_cache();
        cache.upsert_http_proxy(HttpProxy {
            metadata: meta_at("default", "floating", 0),
            spec: HttpProxySpec { virtualhost: None, routes: vec![], includes: vec![], tcpproxy: None },
        });

        let outcome = build(&snapshot(&cache), &BuilderConfig::default());
        assert!(outcome.dag.statuses.iter().any(|s| s.name == "floating" && s.condition == StatusCondition::Orphaned));
    }

    #[test]
    fn duration_parsing_accepts_infinity_and_rejects_negative() {
        assert_eq!(parse_duration("infinity").unwrap(), None);
        assert_eq!(parse_duration("0s").unwrap(), None);
        assert!(parse_duration("-5s").is_err());
        assert_eq!(parse_duration("500ms").unwrap(), Some(Duration::from_millis(500)));
    }
}
