//! The snapshot cursor: one monotonic version over all five caches.

use std::sync::{Arc, Mutex};

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::HoldoffConfig;
use crate::envoy::{
    BuiltResource, CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL,
    SECRET_TYPE_URL,
};
use crate::observability::metrics::{counters, Counters};
use crate::store::HoldoffNotifier;

use super::Caches;

/// The xDS resource types served by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Endpoint,
    Cluster,
    Route,
    Listener,
    Secret,
}

/// The order responses are pushed within one version: endpoints before the
/// clusters that reference them, clusters and routes before listeners.
pub const PUSH_ORDER: [ResourceType; 5] = [
    ResourceType::Endpoint,
    ResourceType::Cluster,
    ResourceType::Route,
    ResourceType::Listener,
    ResourceType::Secret,
];

impl ResourceType {
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Endpoint => ENDPOINT_TYPE_URL,
            ResourceType::Cluster => CLUSTER_TYPE_URL,
            ResourceType::Route => ROUTE_TYPE_URL,
            ResourceType::Listener => LISTENER_TYPE_URL,
            ResourceType::Secret => SECRET_TYPE_URL,
        }
    }

    pub fn from_type_url(url: &str) -> Option<ResourceType> {
        match url {
            ENDPOINT_TYPE_URL => Some(ResourceType::Endpoint),
            CLUSTER_TYPE_URL => Some(ResourceType::Cluster),
            ROUTE_TYPE_URL => Some(ResourceType::Route),
            LISTENER_TYPE_URL => Some(ResourceType::Listener),
            SECRET_TYPE_URL => Some(ResourceType::Secret),
            _ => None,
        }
    }
}

/// A consistent view of all five caches under one version.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub version: u64,
    endpoints: Vec<BuiltResource>,
    clusters: Vec<BuiltResource>,
    routes: Vec<BuiltResource>,
    listeners: Vec<BuiltResource>,
    secrets: Vec<BuiltResource>,
}

impl ConfigSnapshot {
    /// All resources of one type, sorted by name.
    pub fn resources(&self, resource_type: ResourceType) -> &[BuiltResource] {
        match resource_type {
            ResourceType::Endpoint => &self.endpoints,
            ResourceType::Cluster => &self.clusters,
            ResourceType::Route => &self.routes,
            ResourceType::Listener => &self.listeners,
            ResourceType::Secret => &self.secrets,
        }
    }
}

/// Aggregates cache contents under a monotonically increasing version and
/// fans snapshots out to the xDS streams over a watch channel (capacity one,
/// newest wins).
#[derive(Debug)]
pub struct SnapshotCursor {
    caches: Arc<Caches>,
    version: Mutex<u64>,
    tx: watch::Sender<Arc<ConfigSnapshot>>,
}

impl SnapshotCursor {
    pub fn new(caches: Arc<Caches>) -> Arc<Self> {
        let (tx, _) = watch::channel(Arc::new(ConfigSnapshot::default()));
        Arc::new(Self { caches, version: Mutex::new(0), tx })
    }

    /// Subscribe to snapshot publications. The receiver always observes the
    /// newest snapshot; intermediate versions may be skipped.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.tx.subscribe()
    }

    /// The most recently published snapshot.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.tx.borrow().clone()
    }

    /// Assemble and publish a new snapshot, advancing the version by one.
    pub fn publish(&self) {
        let snapshot = {
            let mut version = self.version.lock().expect("cursor lock poisoned");
            *version += 1;
            Arc::new(ConfigSnapshot {
                version: *version,
                endpoints: self.caches.endpoints.contents(),
                clusters: self.caches.clusters.contents(),
                routes: self.caches.routes.contents(),
                listeners: self.caches.listeners.contents(),
                secrets: self.caches.secrets.contents(),
            })
        };
        Counters::incr(&counters().snapshots_published);
        debug!(version = snapshot.version, "published configuration snapshot");
        let _ = self.tx.send(snapshot);
    }

    /// The current version without publishing.
    pub fn version(&self) -> u64 {
        *self.version.lock().expect("cursor lock poisoned")
    }

    /// Wire the caches' dirty signals into a holdoff worker that publishes
    /// coalesced snapshots. One logical update (a build touching several
    /// caches) becomes one version bump.
    pub fn start(self: &Arc<Self>, holdoff: HoldoffConfig) -> JoinHandle<()> {
        let (tx, rx) = mpsc::unbounded_channel::<()>();

        self.caches.endpoints.set_dirty_signal(tx.clone());
        self.caches.clusters.set_dirty_signal(tx.clone());
        self.caches.routes.set_dirty_signal(tx.clone());
        self.caches.listeners.set_dirty_signal(tx.clone());
        self.caches.secrets.set_dirty_signal(tx);

        spawn_publisher(self.clone(), holdoff, rx)
    }
}

fn spawn_publisher(
    cursor: Arc<SnapshotCursor>,
    holdoff: HoldoffConfig,
    mut dirty: mpsc::UnboundedReceiver<()>,
) -> JoinHandle<()> {
    let (notifier, handle) = HoldoffNotifier::spawn(holdoff, move || {
        let cursor = cursor.clone();
        async move {
            cursor.publish();
        }
    });
    tokio::spawn(async move {
        while dirty.recv().await.is_some() {
            notifier.notify();
        }
    });
    handle
}

/// An empty placeholder of the given type, handed out when a peer
/// subscribes to a name no build has produced yet.
pub fn placeholder(resource_type: ResourceType, name: &str) -> BuiltResource {
    match resource_type {
        ResourceType::Endpoint => empty_load_assignment(name),
        ResourceType::Cluster => empty_cluster(name),
        ResourceType::Route => empty_route_configuration(name),
        ResourceType::Listener => empty_listener(name),
        ResourceType::Secret => empty_secret(name),
    }
}

pub(super) fn empty_load_assignment(name: &str) -> BuiltResource {
    BuiltResource::encode(
        name,
        ENDPOINT_TYPE_URL,
        &ClusterLoadAssignment { cluster_name: name.to_string(), ..Default::default() },
    )
}

pub(super) fn empty_cluster(name: &str) -> BuiltResource {
    BuiltResource::encode(
        name,
        CLUSTER_TYPE_URL,
        &Cluster { name: name.to_string(), ..Default::default() },
    )
}

pub(super) fn empty_route_configuration(name: &str) -> BuiltResource {
    BuiltResource::encode(
        name,
        ROUTE_TYPE_URL,
        &RouteConfiguration { name: name.to_string(), ..Default::default() },
    )
}

pub(super) fn empty_listener(name: &str) -> BuiltResource {
    BuiltResource::encode(
        name,
        LISTENER_TYPE_URL,
        &Listener { name: name.to_string(), ..Default::default() },
    )
}

pub(super) fn empty_secret(name: &str) -> BuiltResource {
    BuiltResource::encode(
        name,
        SECRET_TYPE_URL,
        &Secret { name: name.to_string(), ..Default::default() },
    )
}
