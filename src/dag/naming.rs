//! Content-addressed resource names: `<namespace>/<service>/<port>/<hash>`.
//! The hash folds in every field that makes two otherwise-identical
//! `(namespace, service, port)` tuples produce distinct Envoy clusters (today:
//! upstream TLS context, load-balancer policy, and health check), so
//! unrelated routes that reference the same plain HTTP backend collapse onto
//! one cluster, matching the translator's requirement that rendering stay
//! pure.
//!
//! `std::collections::hash_map::DefaultHasher` is not used here: its output
//! is an implementation detail that can change across compiler versions, and
//! names need to stay reproducible across process restarts given the same
//! DAG. A fixed-seed FNV-1a hash is used instead — stable, and simple enough
//! not to justify a new dependency for it.

use crate::dag::model::{HealthCheck, LoadBalancerPolicy, UpstreamTlsContext};

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= *byte as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_str(&mut self, value: &str) {
        self.write(value.as_bytes());
        self.write(&[0]);
    }

    fn write_opt_str(&mut self, value: Option<&str>) {
        match value {
            Some(v) => self.write_str(v),
            None => self.write(&[0xff]),
        }
    }
}

pub fn cluster_name(
    namespace: &str,
    service: &str,
    port: u16,
    upstream_tls: Option<&UpstreamTlsContext>,
    load_balancer_policy: LoadBalancerPolicy,
    health_check: Option<&HealthCheck>,
) -> String {
    let mut hasher = Fnv1a::new();
    match upstream_tls {
        Some(tls) => {
            hasher.write(&[1]);
            hasher.write_opt_str(tls.sni.as_deref());
            hasher.write_opt_str(tls.ca_secret.as_ref().map(|s| s.to_string()).as_deref());
        }
        None => hasher.write(&[0]),
    }
    hasher.write(&[load_balancer_policy as u8]);
    match health_check {
        Some(hc) => {
            hasher.write(&[1]);
            hasher.write_str(&hc.path);
            hasher.write(&hc.interval.as_millis().to_le_bytes());
            hasher.write(&hc.unhealthy_threshold.to_le_bytes());
            hasher.write(&hc.healthy_threshold.to_le_bytes());
        }
        None => hasher.write(&[0]),
    }
    format!("{namespace}/{service}/{port}/{:016x}", hasher.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_identical_names() {
        let a = cluster_name("default", "web", 80, None, LoadBalancerPolicy::RoundRobin, None);
        let b = cluster_name("default", "web", 80, None, LoadBalancerPolicy::RoundRobin, None);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_tls_context_changes_the_name() {
        let plain = cluster_name("default", "web", 443, None, LoadBalancerPolicy::RoundRobin, None);
        let tls = cluster_name(
            "default",
            "web",
            443,
            Some(&UpstreamTlsContext { sni: Some("web.internal".into()), ca_secret: None }),
            LoadBalancerPolicy::RoundRobin,
            None,
        );
        assert_ne!(plain, tls);
    }

    #[test]
    fn distinct_load_balancer_policy_changes_the_name() {
        let round_robin = cluster_name("default", "web", 80, None, LoadBalancerPolicy::RoundRobin, None);
        let random = cluster_name("default", "web", 80, None, LoadBalancerPolicy::Random, None);
        assert_ne!(round_robin, random);
    }
}
