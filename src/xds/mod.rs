//! Envoy xDS (eXtended Discovery Service) server.
//!
//! Serves the aggregated discovery service plus the five discrete
//! state-of-the-world services over gRPC.

mod service;
mod stream;

pub use service::DiscoveryService;
pub use stream::{ResourceNames, StreamState};

use std::future::Future;
use std::sync::Arc;

use tonic::transport::Server;
use tracing::info;

use crate::cache::SnapshotCursor;
use crate::config::XdsConfig;
use crate::errors::{PylonError, Result};

/// Start the xDS gRPC server with graceful shutdown.
pub async fn start_xds_server<F>(
    cursor: Arc<SnapshotCursor>,
    config: XdsConfig,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config
        .bind_address()
        .parse()
        .map_err(|e| PylonError::config(format!("Invalid xDS address: {e}")))?;

    let discovery = DiscoveryService::new(cursor);

    info!(address = %addr, "starting xDS server");

    Server::builder()
        .add_service(service::ads::Ads(discovery.clone()).into_server())
        .add_service(service::cds::Cds(discovery.clone()).into_server())
        .add_service(service::eds::Eds(discovery.clone()).into_server())
        .add_service(service::lds::Lds(discovery.clone()).into_server())
        .add_service(service::rds::Rds(discovery.clone()).into_server())
        .add_service(service::sds::Sds(discovery).into_server())
        .serve_with_shutdown(addr, shutdown_signal)
        .await
        .map_err(|e| {
            let message = e.to_string();
            if message.contains("Address already in use") || message.contains("bind") {
                PylonError::transport(format!(
                    "xDS server failed to bind to {addr}: the port is already in use"
                ))
            } else {
                PylonError::transport(format!("xDS server failed: {e}"))
            }
        })
}
