//! Generic versioned resource cache: one instance per xDS type URL.
//!
//! A monotonic version counter bumped under a lock, paired with a
//! `broadcast` channel that wakes every subscribed stream. Generalized with
//! a type parameter instead of duplicating the struct per resource kind.

use crate::translator::NamedResource;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// One version-stamped snapshot of a cache's contents.
#[derive(Clone)]
struct CacheState {
    version: u64,
    resources: HashMap<String, NamedResource>,
}

impl Default for CacheState {
    fn default() -> Self {
        Self { version: 0, resources: HashMap::new() }
    }
}

/// A versioned, thread-safe store for one xDS resource type.
/// `R` is unused at runtime — it exists to keep five cache instances
/// (LDS/RDS/CDS/EDS/SDS) from being interchangeable at the type level.
pub struct ResourceCache<R> {
    type_url: &'static str,
    state: RwLock<CacheState>,
    notify: broadcast::Sender<u64>,
    _marker: std::marker::PhantomData<fn() -> R>,
}

impl<R> ResourceCache<R> {
    pub fn new(type_url: &'static str) -> Self {
        let (notify, _) = broadcast::channel(16);
        Self { type_url, state: RwLock::new(CacheState::default()), notify, _marker: std::marker::PhantomData }
    }

    pub fn type_url(&self) -> &'static str {
        self.type_url
    }

    pub fn current_version(&self) -> u64 {
        self.state.read().expect("resource cache lock poisoned").version
    }

    /// Atomically replaces the cache's contents. Bumps the version and
    /// notifies subscribers only if the resource set actually changed
    /// (by name+encoded bytes), matching "if any resource changed".
    pub fn set_all(&self, resources: Vec<NamedResource>) {
        if self.stage(resources) {
            self.notify_subscribers();
        }
    }

    /// Writes new contents and bumps the version if changed, without
    /// notifying subscribers. Pairs with [`Self::notify_subscribers`] so a
    /// caller publishing several caches together can write all of them
    /// before waking any subscriber (§5: a subscriber that observes one
    /// cache at version N must be able to assume every other cache it
    /// depends on is already at version >= N).
    fn stage(&self, resources: Vec<NamedResource>) -> bool {
        let mut state = self.state.write().expect("resource cache lock poisoned");
        let new_map: HashMap<String, NamedResource> =
            resources.into_iter().map(|r| (r.name.clone(), r)).collect();

        if maps_equal(&state.resources, &new_map) {
            return false;
        }

        state.resources = new_map;
        state.version += 1;
        true
    }

    /// Wakes subscribers with the cache's current version. Only meaningful
    /// after a [`Self::stage`] call reported a change.
    fn notify_subscribers(&self) {
        let _ = self.notify.send(self.current_version());
    }

    pub fn contents(&self) -> Vec<NamedResource> {
        self.state.read().expect("resource cache lock poisoned").resources.values().cloned().collect()
    }

    /// Filtered snapshot preserving request order; names absent from the
    /// cache are silently skipped (not an error).
    pub fn query(&self, names: &[String]) -> Vec<NamedResource> {
        let state = self.state.read().expect("resource cache lock poisoned");
        names.iter().filter_map(|name| state.resources.get(name).cloned()).collect()
    }

    /// Registers interest in versions past `last_seen_version`. If the
    /// cache has already advanced, resolves immediately with the current
    /// version; otherwise waits for the next `set_all` that changes state.
    pub async fn wait_for_update(&self, last_seen_version: u64) -> u64 {
        let current = self.current_version();
        if current > last_seen_version {
            return current;
        }
        let mut receiver = self.notify.subscribe();
        loop {
            match receiver.recv().await {
                Ok(version) if version > last_seen_version => return version,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => return self.current_version(),
                Err(broadcast::error::RecvError::Closed) => return self.current_version(),
            }
        }
    }
}

fn maps_equal(a: &HashMap<String, NamedResource>, b: &HashMap<String, NamedResource>) -> bool {
    a.len() == b.len()
        && a.iter().all(|(name, resource)| b.get(name).is_some_and(|other| other.resource.value == resource.resource.value))
}

pub type ListenerCache = ResourceCache<ListenerMarker>;
pub type RouteCache = ResourceCache<RouteMarker>;
pub type ClusterCache = ResourceCache<ClusterMarker>;
pub type EndpointCache = ResourceCache<EndpointMarker>;
pub type SecretCache = ResourceCache<SecretMarker>;

pub struct ListenerMarker;
pub struct RouteMarker;
pub struct ClusterMarker;
pub struct EndpointMarker;
pub struct SecretMarker;

pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str = "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const SECRET_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// The five parallel resource caches, wired together as the
/// single fan-out point between the Event Handler and the xDS Server.
pub struct XdsCaches {
    pub listeners: Arc<ListenerCache>,
    pub routes: Arc<RouteCache>,
    pub clusters: Arc<ClusterCache>,
    pub endpoints: Arc<EndpointCache>,
    pub secrets: Arc<SecretCache>,
}

impl Default for XdsCaches {
    fn default() -> Self {
        Self {
            listeners: Arc::new(ListenerCache::new(LISTENER_TYPE_URL)),
            routes: Arc::new(RouteCache::new(ROUTE_TYPE_URL)),
            clusters: Arc::new(ClusterCache::new(CLUSTER_TYPE_URL)),
            endpoints: Arc::new(EndpointCache::new(ENDPOINT_TYPE_URL)),
            secrets: Arc::new(SecretCache::new(SECRET_TYPE_URL)),
        }
    }
}

impl XdsCaches {
    /// Publishes a full translation cycle's output across all five caches
    /// as one unit: every cache's new contents are staged first, and only
    /// once all five are written does any of them notify its subscribers.
    /// This keeps §5's cross-cache version guarantee intact — a stream
    /// woken by one cache's new version can rely on the other four having
    /// already advanced to at least that version.
    pub fn publish_all(
        &self,
        listeners: Vec<NamedResource>,
        routes: Vec<NamedResource>,
        clusters: Vec<NamedResource>,
        endpoints: Vec<NamedResource>,
        secrets: Vec<NamedResource>,
    ) {
        let changed = [
            self.listeners.stage(listeners),
            self.routes.stage(routes),
            self.clusters.stage(clusters),
            self.endpoints.stage(endpoints),
            self.secrets.stage(secrets),
        ];

        if changed[0] {
            self.listeners.notify_subscribers();
        }
        if changed[1] {
            self.routes.notify_subscribers();
        }
        if changed[2] {
            self.clusters.notify_subscribers();
        }
        if changed[3] {
            self.endpoints.notify_subscribers();
        }
        if changed[4] {
            self.secrets.notify_subscribers();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::google::protobuf::Any;

    fn resource(name: &str, value: Vec<u8>) -> NamedResource {
        NamedResource { name: name.to_string(), resource: Any { type_url: LISTENER_TYPE_URL.to_string(), value } }
    }

    #[test]
    fn set_all_bumps_version_only_on_change() {
        let cache: ListenerCache = ResourceCache::new(LISTENER_TYPE_URL);
        assert_eq!(cache.current_version(), 0);

        cache.set_all(vec![resource("a", vec![1])]);
        assert_eq!(cache.current_version(), 1);

        cache.set_all(vec![resource("a", vec![1])]);
        assert_eq!(cache.current_version(), 1, "identical contents must not bump version");

        cache.set_all(vec![resource("a", vec![2])]);
        assert_eq!(cache.current_version(), 2);
    }

    #[test]
    fn query_preserves_request_order_and_skips_missing() {
        let cache: ListenerCache = ResourceCache::new(LISTENER_TYPE_URL);
        cache.set_all(vec![resource("a", vec![1]), resource("b", vec![2])]);

        let result = cache.query(&["b".to_string(), "missing".to_string(), "a".to_string()]);
        let names: Vec<&str> = result.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn wait_for_update_resolves_immediately_if_already_current() {
        let cache: ListenerCache = ResourceCache::new(LISTENER_TYPE_URL);
        cache.set_all(vec![resource("a", vec![1])]);
        let version = cache.wait_for_update(0).await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn wait_for_update_wakes_on_next_change() {
        let cache = Arc::new(ResourceCache::<ListenerMarker>::new(LISTENER_TYPE_URL));
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.wait_for_update(0).await })
        };
        tokio::task::yield_now().await;
        cache.set_all(vec![resource("a", vec![1])]);
        let version = waiter.await.unwrap();
        assert_eq!(version, 1);
    }
}
