//! Typed resource caches and the versioned snapshot cursor.
//!
//! Each xDS resource type has one cache of name → built artefact. Caches
//! short-circuit writes that do not change the stored bytes, so replayed
//! events cost no snapshot version. Any effective mutation signals the
//! [`SnapshotCursor`], which assembles all five caches under a single
//! monotonically increasing version.

mod cursor;

pub use cursor::{placeholder, ConfigSnapshot, ResourceType, SnapshotCursor, PUSH_ORDER};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use crate::envoy::BuiltResource;

/// A function producing an empty placeholder for a queried-but-unknown name.
pub type PlaceholderFn = fn(&str) -> BuiltResource;

/// A thread-safe cache of built resources for one type URL.
#[derive(Debug)]
pub struct ResourceCache {
    type_url: &'static str,
    entries: Mutex<BTreeMap<String, BuiltResource>>,
    dirty: Mutex<Option<mpsc::UnboundedSender<()>>>,
    placeholder: PlaceholderFn,
}

impl ResourceCache {
    pub fn new(type_url: &'static str, placeholder: PlaceholderFn) -> Self {
        Self {
            type_url,
            entries: Mutex::new(BTreeMap::new()),
            dirty: Mutex::new(None),
            placeholder,
        }
    }

    pub fn type_url(&self) -> &'static str {
        self.type_url
    }

    /// Attach the dirty signal consumed by the snapshot cursor.
    pub(crate) fn set_dirty_signal(&self, tx: mpsc::UnboundedSender<()>) {
        *self.dirty.lock().expect("cache lock poisoned") = Some(tx);
    }

    /// Insert or replace an entry. Returns whether the cache changed; a
    /// byte-identical write is a no-op and does not advance the snapshot.
    pub fn add(&self, resource: BuiltResource) -> bool {
        let changed = {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            match entries.get(&resource.name) {
                Some(existing) if existing == &resource => false,
                _ => {
                    entries.insert(resource.name.clone(), resource);
                    true
                }
            }
        };
        if changed {
            self.notify();
        }
        changed
    }

    /// Remove the named entry if present.
    pub fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            entries.remove(name).is_some()
        };
        if removed {
            self.notify();
        }
        removed
    }

    /// Replace the whole cache contents, diffing against the old state.
    pub fn replace_all(&self, resources: Vec<BuiltResource>) -> bool {
        let new_entries: BTreeMap<String, BuiltResource> =
            resources.into_iter().map(|r| (r.name.clone(), r)).collect();
        let changed = {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            if *entries == new_entries {
                false
            } else {
                *entries = new_entries;
                true
            }
        };
        if changed {
            self.notify();
        }
        changed
    }

    /// Sorted copy of every entry.
    pub fn contents(&self) -> Vec<BuiltResource> {
        self.entries.lock().expect("cache lock poisoned").values().cloned().collect()
    }

    /// The named entries, in sorted order; unknown names become empty
    /// placeholders so a peer's watch never dangles.
    pub fn query(&self, names: &[String]) -> Vec<BuiltResource> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        let mut sorted: Vec<&String> = names.iter().collect();
        sorted.sort();
        sorted.dedup();
        sorted
            .into_iter()
            .map(|name| {
                entries.get(name).cloned().unwrap_or_else(|| (self.placeholder)(name))
            })
            .collect()
    }

    fn notify(&self) {
        trace!(type_url = self.type_url, "cache changed");
        if let Some(tx) = self.dirty.lock().expect("cache lock poisoned").as_ref() {
            let _ = tx.send(());
        }
    }
}

/// The five caches backing the xDS server.
#[derive(Debug)]
pub struct Caches {
    pub endpoints: ResourceCache,
    pub clusters: ResourceCache,
    pub routes: ResourceCache,
    pub listeners: ResourceCache,
    pub secrets: ResourceCache,
}

impl Caches {
    pub fn new() -> Arc<Self> {
        use crate::envoy::{
            CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL,
            SECRET_TYPE_URL,
        };
        Arc::new(Self {
            endpoints: ResourceCache::new(ENDPOINT_TYPE_URL, cursor::empty_load_assignment),
            clusters: ResourceCache::new(CLUSTER_TYPE_URL, cursor::empty_cluster),
            routes: ResourceCache::new(ROUTE_TYPE_URL, cursor::empty_route_configuration),
            listeners: ResourceCache::new(LISTENER_TYPE_URL, cursor::empty_listener),
            secrets: ResourceCache::new(SECRET_TYPE_URL, cursor::empty_secret),
        })
    }

    pub fn by_type(&self, resource_type: ResourceType) -> &ResourceCache {
        match resource_type {
            ResourceType::Endpoint => &self.endpoints,
            ResourceType::Cluster => &self.clusters,
            ResourceType::Route => &self.routes,
            ResourceType::Listener => &self.listeners,
            ResourceType::Secret => &self.secrets,
        }
    }
}
