//! SotW (State of the World) xDS stream loop.
//!
//! One long-lived task per incoming gRPC stream, selecting between inbound
//! `DiscoveryRequest`s and cache version changes, with ACK/NACK detection
//! by nonce. Delta xDS is out of scope here — Envoy is only ever served
//! SotW.
//!
//! [`run_stream_loop`] serves one resource type over its own dedicated
//! stream. [`run_ads_loop`] serves all five over one multiplexed ADS stream,
//! racing a `wait_for_update` future per cache instead of one.

use crate::xds::cache::{
    ResourceCache, XdsCaches, CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL,
    ROUTE_TYPE_URL, SECRET_TYPE_URL,
};
use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tonic::Status;
use tracing::{debug, info, warn};

/// Version and nonce most recently sent for a type_url, kept only to
/// recognize the client's next ACK/NACK.
#[derive(Clone)]
struct LastSent {
    nonce: String,
}

fn is_ack(request: &DiscoveryRequest, last: Option<&LastSent>) -> bool {
    match last {
        Some(last) => {
            !request.response_nonce.is_empty()
                && request.response_nonce == last.nonce
                && request.error_detail.is_none()
        }
        None => false,
    }
}

fn build_response<R>(cache: &ResourceCache<R>, resource_names: &[String]) -> DiscoveryResponse {
    let version = cache.current_version();
    let resources = if resource_names.is_empty() { cache.contents() } else { cache.query(resource_names) };
    DiscoveryResponse {
        version_info: version.to_string(),
        resources: resources.into_iter().map(|r| r.resource).collect(),
        type_url: cache.type_url().to_string(),
        nonce: version.to_string(),
        canary: false,
        control_plane: None,
        resource_errors: Vec::new(),
    }
}

/// Runs the SotW loop for one resource type over its own dedicated stream.
pub fn run_stream_loop<R: 'static>(
    cache: Arc<ResourceCache<R>>,
    mut in_stream: tonic::Streaming<DiscoveryRequest>,
    label: &'static str,
) -> ReceiverStream<Result<DiscoveryResponse, Status>> {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let mut last_sent: Option<LastSent> = None;
        let mut last_names: Vec<String> = Vec::new();
        let mut seen_version = 0u64;

        loop {
            tokio::select! {
                request = in_stream.next() => {
                    match request {
                        Some(Ok(request)) => {
                            let node_id = request.node.as_ref().map(|n| n.id.clone());
                            if is_ack(&request, last_sent.as_ref()) {
                                debug!(stream = label, node_id = ?node_id, "ACK, no response needed");
                                continue;
                            }
                            if let Some(detail) = request.error_detail.as_ref() {
                                warn!(
                                    stream = label,
                                    node_id = ?node_id,
                                    code = detail.code,
                                    message = %detail.message,
                                    "NACK received from Envoy"
                                );
                            }

                            last_names = request.resource_names.clone();
                            let response = build_response(&cache, &last_names);
                            seen_version = cache.current_version();
                            last_sent = Some(LastSent { nonce: response.nonce.clone() });

                            info!(stream = label, version = %response.version_info, resource_count = response.resources.len(), "sending discovery response");
                            if tx.send(Ok(response)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(status)) => {
                            warn!(stream = label, error = %status, "discovery stream error");
                            let _ = tx.send(Err(status)).await;
                            break;
                        }
                        None => {
                            info!(stream = label, "discovery stream closed by client");
                            break;
                        }
                    }
                }
                version = cache.wait_for_update(seen_version) => {
                    seen_version = version;
                    let response = build_response(&cache, &last_names);
                    last_sent = Some(LastSent { nonce: response.nonce.clone() });
                    info!(stream = label, version = %response.version_info, resource_count = response.resources.len(), "pushing updated snapshot");
                    if tx.send(Ok(response)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    ReceiverStream::new(rx)
}

fn respond_for_type(caches: &XdsCaches, type_url: &str, names: &[String]) -> Option<DiscoveryResponse> {
    match type_url {
        LISTENER_TYPE_URL => Some(build_response(caches.listeners.as_ref(), names)),
        ROUTE_TYPE_URL => Some(build_response(caches.routes.as_ref(), names)),
        CLUSTER_TYPE_URL => Some(build_response(caches.clusters.as_ref(), names)),
        ENDPOINT_TYPE_URL => Some(build_response(caches.endpoints.as_ref(), names)),
        SECRET_TYPE_URL => Some(build_response(caches.secrets.as_ref(), names)),
        _ => None,
    }
}

/// Per-type state an ADS stream needs to track independently, since one
/// bidi stream multiplexes requests and push updates for all five types.
#[derive(Default)]
struct AdsTypeState {
    seen_version: u64,
    last_names: Vec<String>,
}

/// Runs the aggregated (ADS) loop: one bidirectional stream carrying
/// interleaved LDS/RDS/CDS/EDS/SDS requests, each dispatched by `type_url`
/// to the matching cache, plus a push watch on all five caches at once,
/// forking one task per type over the same bidi stream.
pub fn run_ads_loop(
    caches: Arc<XdsCaches>,
    mut in_stream: tonic::Streaming<DiscoveryRequest>,
) -> ReceiverStream<Result<DiscoveryResponse, Status>> {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut last_sent: HashMap<String, LastSent> = HashMap::new();
        let mut subscribed: HashSet<String> = HashSet::new();
        let mut per_type: HashMap<&'static str, AdsTypeState> = [
            LISTENER_TYPE_URL,
            ROUTE_TYPE_URL,
            CLUSTER_TYPE_URL,
            ENDPOINT_TYPE_URL,
            SECRET_TYPE_URL,
        ]
        .into_iter()
        .map(|type_url| (type_url, AdsTypeState::default()))
        .collect();

        loop {
            tokio::select! {
                request = in_stream.next() => {
                    match request {
                        Some(Ok(request)) => {
                            let type_url = request.type_url.clone();
                            if is_ack(&request, last_sent.get(&type_url)) {
                                debug!(stream = "ADS", type_url = %type_url, "ACK, no response needed");
                                continue;
                            }
                            if let Some(detail) = request.error_detail.as_ref() {
                                warn!(stream = "ADS", type_url = %type_url, code = detail.code, message = %detail.message, "NACK received from Envoy");
                            }

                            let response = match respond_for_type(&caches, &type_url, &request.resource_names) {
                                Some(response) => response,
                                None => {
                                    let status = Status::invalid_argument(format!("unsupported type URL: {type_url}"));
                                    let _ = tx.send(Err(status)).await;
                                    continue;
                                }
                            };

                            subscribed.insert(type_url.clone());
                            if let Some(state) = per_type.get_mut(type_url.as_str()) {
                                state.seen_version = response.version_info.parse().unwrap_or(state.seen_version);
                                state.last_names = request.resource_names.clone();
                            }
                            last_sent.insert(type_url.clone(), LastSent { nonce: response.nonce.clone() });

                            info!(stream = "ADS", type_url = %type_url, resource_count = response.resources.len(), "sending discovery response");
                            if tx.send(Ok(response)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(status)) => {
                            warn!(stream = "ADS", error = %status, "discovery stream error");
                            let _ = tx.send(Err(status)).await;
                            break;
                        }
                        None => {
                            info!(stream = "ADS", "discovery stream closed by client");
                            break;
                        }
                    }
                }
                version = caches.listeners.wait_for_update(per_type[LISTENER_TYPE_URL].seen_version) => {
                    push_if_subscribed(&tx, caches.listeners.as_ref(), LISTENER_TYPE_URL, version, &subscribed, &mut per_type, &mut last_sent).await;
                }
                version = caches.routes.wait_for_update(per_type[ROUTE_TYPE_URL].seen_version) => {
                    push_if_subscribed(&tx, caches.routes.as_ref(), ROUTE_TYPE_URL, version, &subscribed, &mut per_type, &mut last_sent).await;
                }
                version = caches.clusters.wait_for_update(per_type[CLUSTER_TYPE_URL].seen_version) => {
                    push_if_subscribed(&tx, caches.clusters.as_ref(), CLUSTER_TYPE_URL, version, &subscribed, &mut per_type, &mut last_sent).await;
                }
                version = caches.endpoints.wait_for_update(per_type[ENDPOINT_TYPE_URL].seen_version) => {
                    push_if_subscribed(&tx, caches.endpoints.as_ref(), ENDPOINT_TYPE_URL, version, &subscribed, &mut per_type, &mut last_sent).await;
                }
                version = caches.secrets.wait_for_update(per_type[SECRET_TYPE_URL].seen_version) => {
                    push_if_subscribed(&tx, caches.secrets.as_ref(), SECRET_TYPE_URL, version, &subscribed, &mut per_type, &mut last_sent).await;
                }
            }

            if tx.is_closed() {
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}

#[allow(clippy::too_many_arguments)]
async fn push_if_subscribed<R>(
    tx: &mpsc::Sender<Result<DiscoveryResponse, Status>>,
    cache: &ResourceCache<R>,
    type_url: &'static str,
    version: u64,
    subscribed: &HashSet<String>,
    per_type: &mut HashMap<&'static str, AdsTypeState>,
    last_sent: &mut HashMap<String, LastSent>,
) {
    if let Some(state) = per_type.get_mut(type_url) {
        state.seen_version = version;
        if !subscribed.contains(type_url) {
            return;
        }
        let response = build_response(cache, &state.last_names);
        last_sent.insert(type_url.to_string(), LastSent { nonce: response.nonce.clone() });
        info!(stream = "ADS", type_url = %type_url, resource_count = response.resources.len(), "pushing updated snapshot");
        let _ = tx.send(Ok(response)).await;
    }
}
