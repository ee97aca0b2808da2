//! # Object Cache
//!
//! An in-memory mirror of the Kubernetes objects this crate cares about,
//! keyed by `(kind, namespace, name)`, plus a reverse index from
//! Secret/Service references to the HTTPProxy/Ingress objects that consume
//! them. The informer layer that feeds `on_add`/`on_update`/`on_delete` is
//! out of scope; this cache only specifies the contract those calls must
//! honor.

use crate::k8s::{
    Endpoints, HttpProxy, Ingress, ObjectKey, Secret, Service, TlsCertificateDelegation,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Emitted after any mutation that changed the cache contents, to wake the
/// Event Handler. The handler only needs to know "something changed",
/// not what — the next rebuild reads a fresh snapshot regardless.
#[derive(Debug, Clone, Copy)]
pub struct CacheNotification;

#[derive(Default)]
struct ObjectCacheInner {
    ingresses: HashMap<ObjectKey, Arc<Ingress>>,
    httpproxies: HashMap<ObjectKey, Arc<HttpProxy>>,
    services: HashMap<ObjectKey, Arc<Service>>,
    endpoints: HashMap<ObjectKey, Arc<Endpoints>>,
    secrets: HashMap<ObjectKey, Arc<Secret>>,
    delegations: HashMap<ObjectKey, Arc<TlsCertificateDelegation>>,

    /// secret ObjectKey -> consuming HTTPProxy/Ingress ObjectKeys.
    secret_consumers: HashMap<ObjectKey, HashSet<ObjectKey>>,
    /// service ObjectKey -> consuming HTTPProxy/Ingress ObjectKeys.
    service_consumers: HashMap<ObjectKey, HashSet<ObjectKey>>,
}

/// An immutable, cheaply-cloned view of the cache at a point in time. Every
/// map entry is an `Arc` clone, so taking a snapshot never deep-copies an
/// object body: readers obtain an atomic snapshot.
#[derive(Clone, Default)]
pub struct ObjectCacheSnapshot {
    pub ingresses: HashMap<ObjectKey, Arc<Ingress>>,
    pub httpproxies: HashMap<ObjectKey, Arc<HttpProxy>>,
    pub services: HashMap<ObjectKey, Arc<Service>>,
    pub endpoints: HashMap<ObjectKey, Arc<Endpoints>>,
    pub secrets: HashMap<ObjectKey, Arc<Secret>>,
    pub delegations: HashMap<ObjectKey, Arc<TlsCertificateDelegation>>,
}

/// Shared mutable state guarded by a single coarse lock, held only for the
/// duration of a map/reverse-index update.
pub struct ObjectCache {
    inner: RwLock<ObjectCacheInner>,
    notify: mpsc::Sender<CacheNotification>,
}

impl ObjectCache {
    pub fn new(notify: mpsc::Sender<CacheNotification>) -> Self {
        Self { inner: RwLock::new(ObjectCacheInner::default()), notify }
    }

    fn signal(&self) {
        let _ = self.notify.try_send(CacheNotification);
    }

    pub fn snapshot(&self) -> ObjectCacheSnapshot {
        let inner = self.inner.read().expect("object cache lock poisoned");
        ObjectCacheSnapshot {
            ingresses: inner.ingresses.clone(),
            httpproxies: inner.httpproxies.clone(),
            services: inner.services.clone(),
            endpoints: inner.endpoints.clone(),
            secrets: inner.secrets.clone(),
            delegations: inner.delegations.clone(),
        }
    }

    pub fn upsert_http_proxy(&self, proxy: HttpProxy) {
        let key = proxy.metadata.key();
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        reindex_consumers(&mut inner.service_consumers, &key, service_refs(&proxy));
        reindex_consumers(&mut inner.secret_consumers, &key, secret_refs(&proxy));
        inner.httpproxies.insert(key, Arc::new(proxy));
        drop(inner);
        self.signal();
    }

    pub fn delete_http_proxy(&self, key: &ObjectKey) {
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.httpproxies.remove(key);
        reindex_consumers(&mut inner.service_consumers, key, Vec::new());
        reindex_consumers(&mut inner.secret_consumers, key, Vec::new());
        drop(inner);
        self.signal();
    }

    pub fn upsert_ingress(&self, ingress: Ingress) {
        let key = ingress.metadata.key();
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        let secrets: Vec<ObjectKey> = ingress
            .spec
            .tls
            .iter()
            .map(|tls| ObjectKey::new(ingress.metadata.namespace.clone(), tls.secret_name.clone()))
            .collect();
        reindex_consumers(&mut inner.secret_consumers, &key, secrets);
        inner.ingresses.insert(key, Arc::new(ingress));
        drop(inner);
        self.signal();
    }

    pub fn delete_ingress(&self, key: &ObjectKey) {
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.ingresses.remove(key);
        reindex_consumers(&mut inner.secret_consumers, key, Vec::new());
        drop(inner);
        self.signal();
    }

    pub fn upsert_service(&self, service: Service) {
        let key = service.metadata.key();
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.services.insert(key, Arc::new(service));
        drop(inner);
        self.signal();
    }

    pub fn delete_service(&self, key: &ObjectKey) {
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.services.remove(key);
        drop(inner);
        self.signal();
    }

    pub fn upsert_endpoints(&self, endpoints: Endpoints) {
        let key = endpoints.metadata.key();
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.endpoints.insert(key, Arc::new(endpoints));
        drop(inner);
        self.signal();
    }

    pub fn delete_endpoints(&self, key: &ObjectKey) {
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.endpoints.remove(key);
        drop(inner);
        self.signal();
    }

    pub fn upsert_secret(&self, secret: Secret) {
        let key = secret.metadata.key();
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.secrets.insert(key, Arc::new(secret));
        drop(inner);
        self.signal();
    }

    pub fn delete_secret(&self, key: &ObjectKey) {
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.secrets.remove(key);
        drop(inner);
        self.signal();
    }

    pub fn upsert_delegation(&self, delegation: TlsCertificateDelegation) {
        let key = delegation.metadata.key();
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.delegations.insert(key, Arc::new(delegation));
        drop(inner);
        self.signal();
    }

    pub fn delete_delegation(&self, key: &ObjectKey) {
        let mut inner = self.inner.write().expect("object cache lock poisoned");
        inner.delegations.remove(key);
        drop(inner);
        self.signal();
    }

    /// HTTPProxy/Ingress objects that reference `secret`, via the reverse index.
    pub fn secret_consumers(&self, secret: &ObjectKey) -> HashSet<ObjectKey> {
        let inner = self.inner.read().expect("object cache lock poisoned");
        inner.secret_consumers.get(secret).cloned().unwrap_or_default()
    }

    /// HTTPProxy/Ingress objects that reference `service`, via the reverse index.
    pub fn service_consumers(&self, service: &ObjectKey) -> HashSet<ObjectKey> {
        let inner = self.inner.read().expect("object cache lock poisoned");
        inner.service_consumers.get(service).cloned().unwrap_or_default()
    }
}

fn reindex_consumers(
    index: &mut HashMap<ObjectKey, HashSet<ObjectKey>>,
    consumer: &ObjectKey,
    referenced: Vec<ObjectKey>,
) {
    for consumers in index.values_mut() {
        consumers.remove(consumer);
    }
    for reference in referenced {
        index.entry(reference).or_default().insert(consumer.clone());
    }
}

fn service_refs(proxy: &HttpProxy) -> Vec<ObjectKey> {
    let namespace = &proxy.metadata.namespace;
    proxy
        .spec
        .routes
        .iter()
        .flat_map(|r| r.services.iter())
        .chain(proxy.spec.tcpproxy.iter().flat_map(|t| t.services.iter()))
        .map(|svc| ObjectKey::new(namespace.clone(), svc.name.clone()))
        .collect()
}

fn secret_refs(proxy: &HttpProxy) -> Vec<ObjectKey> {
    proxy
        .spec
        .virtualhost
        .as_ref()
        .and_then(|vh| vh.tls.as_ref())
        .and_then(|tls| tls.secret_name.as_deref())
        .map(|secret_ref| parse_secret_ref(secret_ref, &proxy.metadata.namespace))
        .into_iter()
        .collect()
}

/// Secret references may be `name` (same namespace) or `namespace/name`.
fn parse_secret_ref(reference: &str, default_namespace: &str) -> ObjectKey {
    match reference.split_once('/') {
        Some((ns, name)) => ObjectKey::new(ns, name),
        None => ObjectKey::new(default_namespace, reference),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{HttpProxySpec, ObjectMeta, RouteServiceSpec, RouteSpec, VirtualHostSpec};
    use chrono::Utc;

    fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: format!("{namespace}-{name}"),
            creation_timestamp: Utc::now(),
            annotations: Default::default(),
        }
    }

    fn cache() -> (ObjectCache, mpsc::Receiver<CacheNotification>) {
        let (tx, rx) = mpsc::channel(16);
        (ObjectCache::new(tx), rx)
    }

    #[test]
    fn snapshot_reflects_upsert_and_delete() {
        let (cache, _rx) = cache();
        let key = ObjectKey::new("default", "root");
        let proxy = HttpProxy {
            metadata: meta("default", "root"),
            spec: HttpProxySpec {
                virtualhost: Some(VirtualHostSpec { fqdn: "foo.bar.com".into(), tls: None }),
                routes: vec![RouteSpec {
                    conditions: vec![],
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
        };

        cache.upsert_http_proxy(proxy);
        assert!(cache.snapshot().httpproxies.contains_key(&key));
        assert!(cache.service_consumers(&ObjectKey::new("default", "s1")).contains(&key));

        cache.delete_http_proxy(&key);
        assert!(!cache.snapshot().httpproxies.contains_key(&key));
        assert!(cache.service_consumers(&ObjectKey::new("default", "s1")).is_empty());
    }

    #[tokio::test]
    async fn mutation_signals_event_handler() {
        let (cache, mut rx) = cache();
        cache.upsert_service(Service {
            metadata: meta("default", "s1"),
            spec: crate::k8s::ServiceSpec {
                service_type: crate::k8s::ServiceType::ClusterIp,
                external_name: None,
                ports: vec![],
            },
        });
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn secret_ref_same_namespace_defaults() {
        let key = parse_secret_ref("wildcard", "app");
        assert_eq!(key, ObjectKey::new("app", "wildcard"));
    }

    #[test]
    fn secret_ref_cross_namespace() {
        let key = parse_secret_ref("admin/wildcard", "app");
        assert_eq!(key, ObjectKey::new("admin", "wildcard"));
    }
}
