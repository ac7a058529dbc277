//! Wiring of the control-plane core: object store, holdoff notifier, DAG
//! builds, translators, caches, and status write-back.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{Caches, SnapshotCursor};
use crate::config::AppConfig;
use crate::dag::{self, BuilderConfig};
use crate::debug::SharedDag;
use crate::envoy::{
    clusters_from_dag, listeners_from_dag, routes_from_dag, secrets_from_dag, EndpointsTranslator,
};
use crate::errors::Result;
use crate::model::{NamespacedName, Object, ObjectKind};
use crate::status::{StatusSink, StatusWriter};
use crate::store::{HoldoffNotifier, ObjectStore, UpsertOutcome};

/// A change-feed event, as delivered by the platform informers.
#[derive(Debug, Clone)]
pub enum ObjectEvent {
    Upsert(Object),
    Remove(ObjectKind, NamespacedName),
}

/// The assembled control-plane core.
///
/// Informers are external; they drive the controller through [`apply`].
/// Everything downstream — coalesced builds, cache updates, snapshot
/// versions, xDS pushes — follows from those events.
///
/// [`apply`]: Controller::apply
pub struct Controller {
    store: Arc<ObjectStore>,
    notifier: HoldoffNotifier,
    endpoints: Arc<EndpointsTranslator>,
    caches: Arc<Caches>,
    cursor: Arc<SnapshotCursor>,
    shared_dag: SharedDag,
    workers: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Assemble the core and start its background workers.
    pub fn new(config: &AppConfig, status_sink: Arc<dyn StatusSink>) -> Self {
        let caches = Caches::new();
        let cursor = SnapshotCursor::new(caches.clone());
        // The cursor's quiet window is wider than the build window so the
        // cache writes of the build triggered by the same event burst land
        // in a single snapshot version.
        let cursor_holdoff = crate::config::HoldoffConfig {
            delay: config.holdoff.delay * 2,
            max_delay: config.holdoff.max_delay,
        };
        let cursor_worker = cursor.start(cursor_holdoff);

        let store = Arc::new(ObjectStore::new(config.ingress.ingress_class.clone()));
        let endpoints = Arc::new(EndpointsTranslator::new(caches.clone()));
        let shared_dag = SharedDag::new();
        let (status_writer, status_worker) = StatusWriter::spawn(status_sink);

        let builder_config =
            BuilderConfig { root_namespaces: config.ingress.root_namespaces.clone() };
        let envoy_config = config.envoy.clone();

        let build_store = store.clone();
        let build_caches = caches.clone();
        let build_dag = shared_dag.clone();
        let (notifier, build_worker) = HoldoffNotifier::spawn(config.holdoff.clone(), move || {
            let store = build_store.clone();
            let caches = build_caches.clone();
            let shared_dag = build_dag.clone();
            let builder_config = builder_config.clone();
            let envoy_config = envoy_config.clone();
            let status_writer = status_writer.clone();
            async move {
                let snapshot = store.snapshot();
                let (dag, statuses) = dag::build(&snapshot, &builder_config);
                let dag = Arc::new(dag);

                // Each translator replaces its cache; unchanged artefacts
                // short-circuit so replays stay version-neutral.
                caches.secrets.replace_all(secrets_from_dag(&dag));
                caches.clusters.replace_all(clusters_from_dag(&dag));
                caches.routes.replace_all(routes_from_dag(&dag));
                caches.listeners.replace_all(listeners_from_dag(&dag, &envoy_config));

                shared_dag.store(dag);
                status_writer.submit(statuses);
                debug!("build cycle complete");
            }
        });

        info!("control-plane core assembled");

        Self {
            store,
            notifier,
            endpoints,
            caches,
            cursor,
            shared_dag,
            workers: vec![cursor_worker, status_worker, build_worker],
        }
    }

    /// Apply one change-feed event.
    ///
    /// Endpoints events bypass the DAG and touch only the load-assignment
    /// cache; every other kind schedules a coalesced rebuild.
    pub fn apply(&self, event: ObjectEvent) -> Result<()> {
        match event {
            ObjectEvent::Upsert(object) => {
                let kind = object.kind();
                let endpoints_object = match &object {
                    Object::Endpoints(e) => Some(Arc::new(e.clone())),
                    _ => None,
                };
                match self.store.upsert(object)? {
                    UpsertOutcome::Updated => match endpoints_object {
                        Some(endpoints) => self.endpoints.upsert(endpoints),
                        None => self.notifier.notify(),
                    },
                    UpsertOutcome::Unchanged | UpsertOutcome::Filtered => {
                        debug!(kind = %kind, "event produced no store change");
                    }
                }
            }
            ObjectEvent::Remove(kind, key) => {
                if self.store.remove(kind, &key) {
                    match kind {
                        ObjectKind::Endpoints => self.endpoints.remove(&key),
                        _ => self.notifier.notify(),
                    }
                }
            }
        }
        Ok(())
    }

    /// The snapshot cursor feeding the xDS server.
    pub fn cursor(&self) -> Arc<SnapshotCursor> {
        self.cursor.clone()
    }

    /// The most recent DAG, for the diagnostics endpoints.
    pub fn shared_dag(&self) -> SharedDag {
        self.shared_dag.clone()
    }

    /// Direct access to the artefact caches.
    pub fn caches(&self) -> Arc<Caches> {
        self.caches.clone()
    }

    /// Stop the background workers. In-flight builds finish first; callers
    /// should await the handles only after dropping every event source.
    pub fn shutdown(self) -> Vec<JoinHandle<()>> {
        self.workers
    }
}
