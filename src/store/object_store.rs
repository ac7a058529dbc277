//! In-memory store of watched platform objects.
//!
//! The store mirrors the platform's object set, keyed by (kind, namespace,
//! name). Informers are external; they deliver events through [`upsert`] and
//! [`remove`]. All maps live behind a single lock and snapshots are shallow
//! copies of `Arc`ed objects.
//!
//! [`upsert`]: ObjectStore::upsert
//! [`remove`]: ObjectStore::remove

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::errors::{PylonError, Result};
use crate::model::{
    annotations, Endpoints, Gateway, HttpProxy, HttpRoute, Ingress, Namespace, Object, ObjectKind,
    NamespacedName, Secret, Service, TlsCertificateDelegation,
};

/// Outcome of applying an event to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The object was stored and differs from what was present.
    Updated,
    /// The event replayed the version already present.
    Unchanged,
    /// The object does not match the configured ingress class.
    Filtered,
}

#[derive(Debug, Default, Clone)]
struct StoreInner {
    services: BTreeMap<NamespacedName, Arc<Service>>,
    endpoints: BTreeMap<NamespacedName, Arc<Endpoints>>,
    secrets: BTreeMap<NamespacedName, Arc<Secret>>,
    ingresses: BTreeMap<NamespacedName, Arc<Ingress>>,
    proxies: BTreeMap<NamespacedName, Arc<HttpProxy>>,
    delegations: BTreeMap<NamespacedName, Arc<TlsCertificateDelegation>>,
    httproutes: BTreeMap<NamespacedName, Arc<HttpRoute>>,
    gateways: BTreeMap<NamespacedName, Arc<Gateway>>,
    namespaces: BTreeMap<NamespacedName, Arc<Namespace>>,
}

/// A frozen view of the store contents, taken under the store lock.
#[derive(Debug, Default, Clone)]
pub struct StoreSnapshot {
    pub services: BTreeMap<NamespacedName, Arc<Service>>,
    pub endpoints: BTreeMap<NamespacedName, Arc<Endpoints>>,
    pub secrets: BTreeMap<NamespacedName, Arc<Secret>>,
    pub ingresses: BTreeMap<NamespacedName, Arc<Ingress>>,
    pub proxies: BTreeMap<NamespacedName, Arc<HttpProxy>>,
    pub delegations: BTreeMap<NamespacedName, Arc<TlsCertificateDelegation>>,
    pub httproutes: BTreeMap<NamespacedName, Arc<HttpRoute>>,
    pub gateways: BTreeMap<NamespacedName, Arc<Gateway>>,
    pub namespaces: BTreeMap<NamespacedName, Arc<Namespace>>,
}

/// Thread-safe store of the latest observed version of every watched object.
#[derive(Debug)]
pub struct ObjectStore {
    ingress_class: String,
    inner: Mutex<StoreInner>,
}

impl ObjectStore {
    /// Create a store filtering routing objects to the given ingress class.
    pub fn new(ingress_class: impl Into<String>) -> Self {
        Self { ingress_class: ingress_class.into(), inner: Mutex::new(StoreInner::default()) }
    }

    /// Apply an add or update event.
    ///
    /// Fails with a conflict error when the incoming object's resource
    /// version is older than the stored one (stale event replay). Returns
    /// [`UpsertOutcome::Filtered`] for routing objects whose class
    /// annotation does not match the configured class.
    pub fn upsert(&self, object: Object) -> Result<UpsertOutcome> {
        if !self.interesting(&object) {
            trace!(object = %object.object_ref(), "dropping object for foreign ingress class");
            return Ok(UpsertOutcome::Filtered);
        }

        let key = object.meta().namespaced_name();
        let version = object.meta().resource_version;
        let mut inner = self.inner.lock().expect("object store lock poisoned");

        macro_rules! upsert_kind {
            ($map:expr, $obj:expr, $kind:literal) => {{
                match $map.get(&key) {
                    Some(existing) if existing.meta.resource_version > version => {
                        return Err(PylonError::conflict(
                            format!(
                                "resource version {version} of {key} is older than stored {}",
                                existing.meta.resource_version
                            ),
                            $kind,
                        ));
                    }
                    Some(existing) if existing.meta.resource_version == version => {
                        Ok(UpsertOutcome::Unchanged)
                    }
                    _ => {
                        $map.insert(key.clone(), Arc::new($obj));
                        Ok(UpsertOutcome::Updated)
                    }
                }
            }};
        }

        let outcome_result: Result<UpsertOutcome> = match object {
            Object::Service(o) => upsert_kind!(inner.services, o, "Service"),
            Object::Endpoints(o) => upsert_kind!(inner.endpoints, o, "Endpoints"),
            Object::Secret(o) => upsert_kind!(inner.secrets, o, "Secret"),
            Object::Ingress(o) => upsert_kind!(inner.ingresses, o, "Ingress"),
            Object::HttpProxy(o) => upsert_kind!(inner.proxies, o, "HTTPProxy"),
            Object::TlsCertificateDelegation(o) => {
                upsert_kind!(inner.delegations, o, "TLSCertificateDelegation")
            }
            Object::HttpRoute(o) => upsert_kind!(inner.httproutes, o, "HTTPRoute"),
            Object::Gateway(o) => upsert_kind!(inner.gateways, o, "Gateway"),
            Object::Namespace(o) => upsert_kind!(inner.namespaces, o, "Namespace"),
        };
        let outcome = outcome_result?;

        if outcome == UpsertOutcome::Updated {
            debug!(key = %key, "stored object");
        }
        Ok(outcome)
    }

    /// Apply a delete event. Returns whether an object was removed.
    pub fn remove(&self, kind: ObjectKind, key: &NamespacedName) -> bool {
        let mut inner = self.inner.lock().expect("object store lock poisoned");
        let removed = match kind {
            ObjectKind::Service => inner.services.remove(key).is_some(),
            ObjectKind::Endpoints => inner.endpoints.remove(key).is_some(),
            ObjectKind::Secret => inner.secrets.remove(key).is_some(),
            ObjectKind::Ingress => inner.ingresses.remove(key).is_some(),
            ObjectKind::HttpProxy => inner.proxies.remove(key).is_some(),
            ObjectKind::TlsCertificateDelegation => inner.delegations.remove(key).is_some(),
            ObjectKind::HttpRoute => inner.httproutes.remove(key).is_some(),
            ObjectKind::Gateway => inner.gateways.remove(key).is_some(),
            ObjectKind::Namespace => inner.namespaces.remove(key).is_some(),
        };
        if removed {
            debug!(kind = %kind, key = %key, "removed object");
        }
        removed
    }

    /// Take a consistent shallow copy of the store contents.
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock().expect("object store lock poisoned");
        StoreSnapshot {
            services: inner.services.clone(),
            endpoints: inner.endpoints.clone(),
            secrets: inner.secrets.clone(),
            ingresses: inner.ingresses.clone(),
            proxies: inner.proxies.clone(),
            delegations: inner.delegations.clone(),
            httproutes: inner.httproutes.clone(),
            gateways: inner.gateways.clone(),
            namespaces: inner.namespaces.clone(),
        }
    }

    /// Class filtering applies to the routing objects; dependency kinds are
    /// always interesting.
    fn interesting(&self, object: &Object) -> bool {
        match object.kind() {
            ObjectKind::Ingress | ObjectKind::HttpProxy => {
                annotations::class_matches(object.meta(), &self.ingress_class)
            }
            _ => true,
        }
    }
}
