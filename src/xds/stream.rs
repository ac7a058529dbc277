//! Per-stream state for the state-of-the-world discovery protocol.
//!
//! Each stream tracks, per type URL, the subscription set, the last nonce it
//! sent, and the last content it sent. Requests are classified as initial,
//! ACK, NACK, or stale against that state; snapshot advances push only the
//! types whose filtered content actually changed.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use envoy_types::pb::google::protobuf::Any;
use tracing::{debug, trace, warn};

use crate::cache::{placeholder, ConfigSnapshot, ResourceType, PUSH_ORDER};
use crate::observability::metrics::{counters, Counters};

/// Resource-name subscription of one type on one stream.
///
/// The protocol distinguishes a legacy empty-list wildcard from an explicit
/// `*` entry; both subscribe to everything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceNames {
    EmptyWildcard,
    Wildcard(BTreeSet<String>),
    Explicit(BTreeSet<String>),
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self::EmptyWildcard
    }
}

impl FromIterator<String> for ResourceNames {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let mut names = BTreeSet::new();
        let mut wildcard = false;
        for name in iter {
            if name == "*" {
                wildcard = true;
            } else {
                names.insert(name);
            }
        }
        if wildcard {
            Self::Wildcard(names)
        } else {
            Self::Explicit(names)
        }
    }
}

impl ResourceNames {
    /// Interpret a request's name list against the previous subscription:
    /// an empty list keeps the legacy wildcard only if the stream never
    /// subscribed explicitly.
    fn from_names(previous: &Self, names: Vec<String>) -> Self {
        if names.is_empty() && matches!(previous, Self::EmptyWildcard) {
            Self::EmptyWildcard
        } else {
            Self::from_iter(names)
        }
    }

    fn is_wildcard(&self) -> bool {
        matches!(self, Self::EmptyWildcard | Self::Wildcard(_))
    }
}

#[derive(Debug, Default)]
struct TypeState {
    subscription: ResourceNames,
    last_nonce: Option<String>,
    last_sent_version: Option<u64>,
    last_sent: Option<Vec<Any>>,
}

/// Identifier shared by log lines of one stream.
static STREAM_IDS: AtomicU64 = AtomicU64::new(1);

/// The server-side state machine of a single discovery stream.
#[derive(Debug)]
pub struct StreamState {
    id: u64,
    node_id: Option<String>,
    nonce_counter: u64,
    types: HashMap<ResourceType, TypeState>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            id: STREAM_IDS.fetch_add(1, Ordering::Relaxed),
            node_id: None,
            nonce_counter: 0,
            types: HashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Process one request against the current snapshot, returning the
    /// response to send, if any.
    pub fn handle_request(
        &mut self,
        request: &DiscoveryRequest,
        snapshot: &ConfigSnapshot,
    ) -> Option<DiscoveryResponse> {
        if self.node_id.is_none() {
            if let Some(node) = &request.node {
                self.node_id = Some(node.id.clone());
            }
        }

        let Some(resource_type) = ResourceType::from_type_url(&request.type_url) else {
            warn!(
                stream = self.id,
                type_url = %request.type_url,
                "request for unknown type URL"
            );
            return None;
        };

        let state = self.types.entry(resource_type).or_default();
        let initial = request.response_nonce.is_empty();

        if !initial {
            if state.last_nonce.as_deref() != Some(request.response_nonce.as_str()) {
                trace!(
                    stream = self.id,
                    nonce = %request.response_nonce,
                    "ignoring request with stale nonce"
                );
                return None;
            }
            if let Some(error) = &request.error_detail {
                Counters::incr(&counters().nacks);
                warn!(
                    stream = self.id,
                    type_url = %request.type_url,
                    version = %request.version_info,
                    error = %error.message,
                    "peer rejected configuration"
                );
                return None;
            }
            debug!(
                stream = self.id,
                type_url = %request.type_url,
                version = %request.version_info,
                "peer acknowledged configuration"
            );
        }

        let subscription =
            ResourceNames::from_names(&state.subscription, request.resource_names.clone());
        let subscription_changed = subscription != state.subscription;
        state.subscription = subscription;

        let never_sent = state.last_sent.is_none();
        if !(initial || subscription_changed || never_sent) {
            return None;
        }

        let resources = filter(snapshot, resource_type, &state.subscription);
        if !initial && !never_sent && state.last_sent.as_ref() == Some(&resources) {
            return None;
        }

        Some(self.build_response(resource_type, snapshot.version, resources))
    }

    /// React to a snapshot advance: push every subscribed type whose
    /// filtered content differs from what was last sent, in the fixed
    /// type order.
    pub fn handle_snapshot(&mut self, snapshot: &ConfigSnapshot) -> Vec<DiscoveryResponse> {
        let mut responses = Vec::new();
        for resource_type in PUSH_ORDER {
            let Some(state) = self.types.get(&resource_type) else { continue };
            if state.last_sent.is_none() {
                // The peer has not asked for this type yet.
                continue;
            }
            if state.last_sent_version == Some(snapshot.version) {
                continue;
            }
            let resources = filter(snapshot, resource_type, &state.subscription);
            if state.last_sent.as_ref() == Some(&resources) {
                continue;
            }
            responses.push(self.build_response(resource_type, snapshot.version, resources));
        }
        responses
    }

    fn build_response(
        &mut self,
        resource_type: ResourceType,
        version: u64,
        resources: Vec<Any>,
    ) -> DiscoveryResponse {
        self.nonce_counter += 1;
        let nonce = format!("{}-{}", self.id, self.nonce_counter);

        let state = self.types.entry(resource_type).or_default();
        state.last_nonce = Some(nonce.clone());
        state.last_sent_version = Some(version);
        state.last_sent = Some(resources.clone());

        debug!(
            stream = self.id,
            type_url = resource_type.type_url(),
            version,
            count = resources.len(),
            "sending discovery response"
        );

        DiscoveryResponse {
            version_info: version.to_string(),
            resources,
            type_url: resource_type.type_url().to_string(),
            nonce,
            ..Default::default()
        }
    }
}

/// Filter a snapshot's resources of one type down to a subscription.
/// Unknown explicit names become empty placeholders so the peer's watch
/// completes instead of stalling.
fn filter(
    snapshot: &ConfigSnapshot,
    resource_type: ResourceType,
    subscription: &ResourceNames,
) -> Vec<Any> {
    let all = snapshot.resources(resource_type);
    if subscription.is_wildcard() {
        return all.iter().map(|r| r.resource.clone()).collect();
    }
    let ResourceNames::Explicit(names) = subscription else { unreachable!() };
    names
        .iter()
        .map(|name| {
            all.iter()
                .find(|r| &r.name == name)
                .map(|r| r.resource.clone())
                .unwrap_or_else(|| placeholder(resource_type, name).resource)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use envoy_types::pb::envoy::config::core::v3::Node;
    use envoy_types::pb::google::rpc::Status as RpcStatus;

    use crate::cache::{Caches, SnapshotCursor};
    use crate::envoy::{BuiltResource, CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL};

    use super::*;

    fn resource(name: &str, payload: &[u8]) -> BuiltResource {
        BuiltResource {
            name: name.to_string(),
            resource: Any { type_url: CLUSTER_TYPE_URL.to_string(), value: payload.to_vec() },
        }
    }

    fn snapshot_with(resources: Vec<BuiltResource>) -> ConfigSnapshot {
        let caches = Caches::new();
        for r in resources {
            caches.clusters.add(r);
        }
        let cursor = SnapshotCursor::new(caches);
        cursor.publish();
        ConfigSnapshot::clone(&cursor.current())
    }

    fn request(type_url: &str, version: &str, nonce: &str, names: &[&str]) -> DiscoveryRequest {
        DiscoveryRequest {
            type_url: type_url.to_string(),
            version_info: version.to_string(),
            response_nonce: nonce.to_string(),
            resource_names: names.iter().map(|s| s.to_string()).collect(),
            node: Some(Node { id: "envoy-1".to_string(), ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn test_initial_request_gets_current_snapshot() {
        let snapshot = snapshot_with(vec![resource("demo/app/80", b"x")]);
        let mut state = StreamState::new();

        let response = state
            .handle_request(&request(CLUSTER_TYPE_URL, "", "", &[]), &snapshot)
            .expect("initial request must be answered");
        assert_eq!(response.version_info, "1");
        assert_eq!(response.resources.len(), 1);
        assert_eq!(state.node_id(), Some("envoy-1"));
    }

    #[test]
    fn test_ack_produces_no_response() {
        let snapshot = snapshot_with(vec![resource("demo/app/80", b"x")]);
        let mut state = StreamState::new();
        let response =
            state.handle_request(&request(CLUSTER_TYPE_URL, "", "", &[]), &snapshot).unwrap();

        let ack = request(CLUSTER_TYPE_URL, &response.version_info, &response.nonce, &[]);
        assert!(state.handle_request(&ack, &snapshot).is_none());
    }

    #[test]
    fn test_nack_keeps_last_version() {
        let snapshot = snapshot_with(vec![resource("demo/app/80", b"x")]);
        let mut state = StreamState::new();
        let response =
            state.handle_request(&request(CLUSTER_TYPE_URL, "", "", &[]), &snapshot).unwrap();

        let mut nack = request(CLUSTER_TYPE_URL, "0", &response.nonce, &[]);
        nack.error_detail =
            Some(RpcStatus { code: 3, message: "bad config".to_string(), details: vec![] });
        assert!(state.handle_request(&nack, &snapshot).is_none());
    }

    #[test]
    fn test_stale_nonce_ignored() {
        let snapshot = snapshot_with(vec![resource("demo/app/80", b"x")]);
        let mut state = StreamState::new();
        let response =
            state.handle_request(&request(CLUSTER_TYPE_URL, "", "", &[]), &snapshot).unwrap();

        let stale = request(CLUSTER_TYPE_URL, &response.version_info, "bogus-nonce", &[]);
        assert!(state.handle_request(&stale, &snapshot).is_none());
    }

    #[test]
    fn test_snapshot_advance_pushes_changed_types_in_order() {
        let caches = Caches::new();
        let cursor = SnapshotCursor::new(caches.clone());
        caches.clusters.add(resource("demo/app/80", b"1"));
        cursor.publish();

        let mut state = StreamState::new();
        let snapshot = ConfigSnapshot::clone(&cursor.current());
        state.handle_request(&request(CLUSTER_TYPE_URL, "", "", &[]), &snapshot).unwrap();
        state.handle_request(&request(ENDPOINT_TYPE_URL, "", "", &[]), &snapshot).unwrap();

        // Change both caches; the next snapshot push must order endpoints
        // before clusters.
        caches.clusters.add(resource("demo/app/80", b"2"));
        caches.endpoints.add(BuiltResource {
            name: "demo/app/".to_string(),
            resource: Any { type_url: ENDPOINT_TYPE_URL.to_string(), value: vec![9] },
        });
        cursor.publish();

        let responses = state.handle_snapshot(&cursor.current());
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].type_url, ENDPOINT_TYPE_URL);
        assert_eq!(responses[1].type_url, CLUSTER_TYPE_URL);
        assert!(responses.iter().all(|r| r.version_info == "2"));
    }

    #[test]
    fn test_unchanged_content_not_repushed() {
        let caches = Caches::new();
        let cursor = SnapshotCursor::new(caches.clone());
        caches.clusters.add(resource("demo/app/80", b"1"));
        cursor.publish();

        let mut state = StreamState::new();
        state
            .handle_request(
                &request(CLUSTER_TYPE_URL, "", "", &[]),
                &cursor.current(),
            )
            .unwrap();

        // A new version with identical cluster content: nothing to push.
        caches.endpoints.add(BuiltResource {
            name: "demo/app/".to_string(),
            resource: Any { type_url: ENDPOINT_TYPE_URL.to_string(), value: vec![1] },
        });
        cursor.publish();
        assert!(state.handle_snapshot(&cursor.current()).is_empty());
    }

    #[test]
    fn test_explicit_subscription_filters_and_placeholders() {
        let snapshot = snapshot_with(vec![
            resource("demo/a/80", b"a"),
            resource("demo/b/80", b"b"),
        ]);
        let mut state = StreamState::new();

        let response = state
            .handle_request(
                &request(CLUSTER_TYPE_URL, "", "", &["demo/b/80", "demo/missing/80"]),
                &snapshot,
            )
            .unwrap();
        assert_eq!(response.resources.len(), 2);

        // The missing name decodes as an empty cluster carrying its name.
        use prost::Message;
        let placeholder_cluster =
            envoy_types::pb::envoy::config::cluster::v3::Cluster::decode(
                response.resources[1].value.as_slice(),
            )
            .unwrap();
        assert_eq!(placeholder_cluster.name, "demo/missing/80");
    }

    #[test]
    fn test_subscription_change_triggers_response() {
        let snapshot = snapshot_with(vec![
            resource("demo/a/80", b"a"),
            resource("demo/b/80", b"b"),
        ]);
        let mut state = StreamState::new();
        let first = state
            .handle_request(&request(CLUSTER_TYPE_URL, "", "", &["demo/a/80"]), &snapshot)
            .unwrap();
        assert_eq!(first.resources.len(), 1);

        // ACK that also widens the subscription.
        let second = state
            .handle_request(
                &request(CLUSTER_TYPE_URL, "1", &first.nonce, &["demo/a/80", "demo/b/80"]),
                &snapshot,
            )
            .expect("subscription change must be answered");
        assert_eq!(second.resources.len(), 2);
    }

    #[test]
    fn test_per_stream_versions_monotonic_per_type() {
        let caches = Caches::new();
        let cursor = SnapshotCursor::new(caches.clone());
        let mut state = StreamState::new();
        let mut last = 0u64;

        for round in 0..3u8 {
            caches.clusters.add(resource("demo/app/80", &[round]));
            cursor.publish();
            let responses = if round == 0 {
                state
                    .handle_request(&request(CLUSTER_TYPE_URL, "", "", &[]), &cursor.current())
                    .into_iter()
                    .collect::<Vec<_>>()
            } else {
                state.handle_snapshot(&cursor.current())
            };
            let version: u64 = responses[0].version_info.parse().unwrap();
            assert!(version > last, "peer-observed version must strictly increase");
            last = version;
        }
    }

    #[test]
    fn test_wildcard_semantics() {
        let previous = ResourceNames::EmptyWildcard;
        assert_eq!(
            ResourceNames::from_names(&previous, vec![]),
            ResourceNames::EmptyWildcard
        );

        let explicit = ResourceNames::from_names(&previous, vec!["a".to_string()]);
        assert!(matches!(explicit, ResourceNames::Explicit(_)));

        // Once explicit, an empty list means "no names", not wildcard.
        assert_eq!(
            ResourceNames::from_names(&explicit, vec![]),
            ResourceNames::Explicit(BTreeSet::new())
        );

        let wildcard = ResourceNames::from_names(&previous, vec!["*".to_string()]);
        assert!(wildcard.is_wildcard());
    }
}
