//! Status write-back.
//!
//! Statuses computed by the builder are pushed onto a dedicated task so the
//! build loop never blocks on the platform API. Only the newest status per
//! object is kept; failed writes are logged and superseded by the next
//! build's output.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dag::Status;
use crate::errors::Result;
use crate::model::ObjectRef;
use crate::observability::metrics::{counters, Counters};

/// The seam to the platform client: applies one status to the object's
/// status sub-resource, merging against the live object.
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    async fn apply(&self, status: &Status) -> Result<()>;
}

/// A sink that drops all statuses, for deployments running without
/// write-back permission.
#[derive(Debug, Default)]
pub struct NullStatusSink;

#[async_trait]
impl StatusSink for NullStatusSink {
    async fn apply(&self, status: &Status) -> Result<()> {
        debug!(object = %status.object, condition = status.condition.as_str(), "status discarded");
        Ok(())
    }
}

/// Buffers build statuses towards a [`StatusSink`], newest-wins per object.
#[derive(Debug, Clone)]
pub struct StatusWriter {
    tx: mpsc::UnboundedSender<Vec<Status>>,
}

impl StatusWriter {
    /// Spawn the writer task.
    pub fn spawn(sink: Arc<dyn StatusSink>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Status>>();

        let handle = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let mut pending: HashMap<ObjectRef, Status> = HashMap::new();
                for status in batch {
                    pending.insert(status.object.clone(), status);
                }
                // Later batches supersede queued writes for the same object.
                while let Ok(batch) = rx.try_recv() {
                    for status in batch {
                        pending.insert(status.object.clone(), status);
                    }
                }

                let mut ordered: Vec<Status> = pending.into_values().collect();
                ordered.sort_by(|a, b| a.object.cmp(&b.object));
                for status in ordered {
                    if let Err(e) = sink.apply(&status).await {
                        Counters::incr(&counters().status_write_failures);
                        warn!(
                            object = %status.object,
                            error = %e,
                            "status write failed; will retry after the next build"
                        );
                    }
                }
            }
        });

        (Self { tx }, handle)
    }

    /// Queue the statuses of one build.
    pub fn submit(&self, statuses: Vec<Status>) {
        if statuses.is_empty() {
            return;
        }
        // A send error means the writer stopped; statuses regenerate on the
        // next build anyway.
        let _ = self.tx.send(statuses);
    }
}
