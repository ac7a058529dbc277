//! Control plane counters.
//!
//! A small set of process-wide counters incremented on the paths the error
//! policy cares about. The diagnostics endpoint snapshots them; full metrics
//! registration lives outside the control-plane core.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter set.
#[derive(Debug, Default)]
pub struct Counters {
    /// Completed DAG builds.
    pub dag_builds: AtomicU64,
    /// Roots marked Invalid in the most recent build cycle (cumulative).
    pub invalid_roots: AtomicU64,
    /// HTTPProxies reported Orphaned (cumulative).
    pub orphaned_proxies: AtomicU64,
    /// TLS secret references denied by delegation rules.
    pub delegation_denials: AtomicU64,
    /// TLS secrets rejected for invalid PEM payloads.
    pub invalid_secrets: AtomicU64,
    /// Snapshot versions published.
    pub snapshots_published: AtomicU64,
    /// Currently open xDS streams.
    pub open_streams: AtomicU64,
    /// NACKs received from peers.
    pub nacks: AtomicU64,
    /// Status writes that failed and will be retried next build.
    pub status_write_failures: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

static COUNTERS: Counters = Counters {
    dag_builds: AtomicU64::new(0),
    invalid_roots: AtomicU64::new(0),
    orphaned_proxies: AtomicU64::new(0),
    delegation_denials: AtomicU64::new(0),
    invalid_secrets: AtomicU64::new(0),
    snapshots_published: AtomicU64::new(0),
    open_streams: AtomicU64::new(0),
    nacks: AtomicU64::new(0),
    status_write_failures: AtomicU64::new(0),
};

/// Access the process-wide counter set.
pub fn counters() -> &'static Counters {
    &COUNTERS
}
