//! Diagnostics HTTP endpoints: liveness and a GraphViz view of the DAG.

use std::future::Future;
use std::sync::{Arc, RwLock};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tracing::info;

use crate::dag::{render_dot, Dag};
use crate::errors::{PylonError, Result};
use crate::observability::metrics::{counters, Counters};

/// Handle to the most recent DAG, swapped in by the build worker and read
/// by the diagnostics endpoints.
#[derive(Debug, Clone, Default)]
pub struct SharedDag {
    inner: Arc<RwLock<Arc<Dag>>>,
}

impl SharedDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, dag: Arc<Dag>) {
        *self.inner.write().expect("dag lock poisoned") = dag;
    }

    pub fn load(&self) -> Arc<Dag> {
        self.inner.read().expect("dag lock poisoned").clone()
    }
}

#[derive(Debug, Serialize)]
struct CounterSnapshot {
    dag_builds: u64,
    invalid_roots: u64,
    orphaned_proxies: u64,
    delegation_denials: u64,
    invalid_secrets: u64,
    snapshots_published: u64,
    open_streams: u64,
    nacks: u64,
    status_write_failures: u64,
    generated_at: chrono::DateTime<chrono::Utc>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn debug_dag(State(dag): State<SharedDag>) -> impl IntoResponse {
    let dot = render_dot(&dag.load());
    ([(header::CONTENT_TYPE, "text/vnd.graphviz")], dot)
}

async fn debug_counters() -> impl IntoResponse {
    let c = counters();
    let snapshot = CounterSnapshot {
        dag_builds: Counters::get(&c.dag_builds),
        invalid_roots: Counters::get(&c.invalid_roots),
        orphaned_proxies: Counters::get(&c.orphaned_proxies),
        delegation_denials: Counters::get(&c.delegation_denials),
        invalid_secrets: Counters::get(&c.invalid_secrets),
        snapshots_published: Counters::get(&c.snapshots_published),
        open_streams: Counters::get(&c.open_streams),
        nacks: Counters::get(&c.nacks),
        status_write_failures: Counters::get(&c.status_write_failures),
        generated_at: chrono::Utc::now(),
    };
    match serde_json::to_string_pretty(&snapshot) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Build the diagnostics router.
pub fn router(dag: SharedDag) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/debug/dag", get(debug_dag))
        .route("/debug/counters", get(debug_counters))
        .with_state(dag)
}

/// Serve the diagnostics endpoints until the shutdown signal resolves.
pub async fn start_debug_server<F>(
    dag: SharedDag,
    bind_address: String,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| PylonError::transport(format!("debug endpoint failed to bind: {e}")))?;

    info!(address = %bind_address, "starting diagnostics endpoint");

    axum::serve(listener, router(dag))
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| PylonError::transport(format!("debug endpoint failed: {e}")))
}
