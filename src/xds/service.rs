//! tonic service implementations for the aggregated and discrete discovery
//! services.
//!
//! Every stream runs the same loop: read requests, answer from the current
//! snapshot, and push when the snapshot cursor advances. The cursor fans out
//! through a watch channel, so a slow stream only ever observes the newest
//! snapshot.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};

use crate::cache::{ResourceType, SnapshotCursor};
use crate::observability::metrics::{counters, Counters};

use super::stream::StreamState;

/// Stream type returned by every discovery service.
pub type DiscoveryStream = ReceiverStream<Result<DiscoveryResponse, Status>>;
/// Stream type of the unimplemented delta variants.
pub type DeltaStream = ReceiverStream<Result<DeltaDiscoveryResponse, Status>>;

/// Shared state behind all discovery services.
#[derive(Debug, Clone)]
pub struct DiscoveryService {
    cursor: Arc<SnapshotCursor>,
}

impl DiscoveryService {
    pub fn new(cursor: Arc<SnapshotCursor>) -> Self {
        Self { cursor }
    }

    /// Spawn the stream task shared by ADS and the discrete services. For a
    /// discrete service `fixed_type` pins the type URL; requests that name a
    /// different type are ignored.
    fn open_stream(
        &self,
        mut requests: Streaming<DiscoveryRequest>,
        fixed_type: Option<ResourceType>,
    ) -> DiscoveryStream {
        let (tx, rx) = mpsc::channel::<Result<DiscoveryResponse, Status>>(16);
        let cursor = self.cursor.clone();

        tokio::spawn(async move {
            let mut state = StreamState::new();
            let mut snapshots = cursor.subscribe();
            Counters::incr(&counters().open_streams);
            info!(stream = state.id(), "discovery stream started");

            'stream: loop {
                tokio::select! {
                    request = requests.next() => {
                        match request {
                            Some(Ok(mut request)) => {
                                if let Some(fixed) = fixed_type {
                                    if request.type_url.is_empty() {
                                        request.type_url = fixed.type_url().to_string();
                                    } else if request.type_url != fixed.type_url() {
                                        warn!(
                                            stream = state.id(),
                                            got = %request.type_url,
                                            expected = fixed.type_url(),
                                            "request for foreign type URL on discrete stream"
                                        );
                                        continue;
                                    }
                                }
                                let snapshot = snapshots.borrow().clone();
                                if let Some(response) = state.handle_request(&request, &snapshot) {
                                    if tx.send(Ok(response)).await.is_err() {
                                        break 'stream;
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                debug!(stream = state.id(), error = %e, "stream receive error");
                                break 'stream;
                            }
                            None => break 'stream,
                        }
                    }
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            // The cursor is gone; the process is shutting down.
                            break 'stream;
                        }
                        let snapshot = snapshots.borrow_and_update().clone();
                        for response in state.handle_snapshot(&snapshot) {
                            if tx.send(Ok(response)).await.is_err() {
                                break 'stream;
                            }
                        }
                    }
                }
            }

            Counters::decr(&counters().open_streams);
            info!(
                stream = state.id(),
                node_id = state.node_id().unwrap_or("unknown"),
                "discovery stream ended"
            );
        });

        ReceiverStream::new(rx)
    }

    fn delta_unimplemented(&self) -> Status {
        Status::unimplemented("incremental xDS is not supported; use state-of-the-world")
    }

    /// Answer a unary fetch from the current snapshot.
    #[allow(clippy::result_large_err)]
    fn fetch(
        &self,
        request: &DiscoveryRequest,
        resource_type: ResourceType,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        if request.type_url != resource_type.type_url() {
            return Err(Status::invalid_argument(format!(
                "unexpected type URL {}",
                request.type_url
            )));
        }
        let snapshot = self.cursor.current();
        let mut state = StreamState::new();
        match state.handle_request(request, &snapshot) {
            Some(response) => Ok(Response::new(response)),
            None => Err(Status::not_found("client is already up to date")),
        }
    }
}

pub mod ads {
    //! Aggregated discovery: all five types multiplexed on one stream.

    use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::{
        AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
    };

    use super::*;

    #[derive(Debug, Clone)]
    pub struct Ads(pub DiscoveryService);

    impl Ads {
        pub fn into_server(self) -> AggregatedDiscoveryServiceServer<Ads> {
            AggregatedDiscoveryServiceServer::new(self)
        }
    }

    #[tonic::async_trait]
    impl AggregatedDiscoveryService for Ads {
        type StreamAggregatedResourcesStream = DiscoveryStream;
        type DeltaAggregatedResourcesStream = DeltaStream;

        async fn stream_aggregated_resources(
            &self,
            request: Request<Streaming<DiscoveryRequest>>,
        ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
            Ok(Response::new(self.0.open_stream(request.into_inner(), None)))
        }

        async fn delta_aggregated_resources(
            &self,
            _request: Request<Streaming<DeltaDiscoveryRequest>>,
        ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
            Err(self.0.delta_unimplemented())
        }
    }
}

macro_rules! discrete_service {
    (
        $doc:literal,
        $module:ident,
        $wrapper:ident,
        $trait_path:path,
        $server_path:path,
        $resource_type:expr,
        $stream_fn:ident,
        $stream_assoc:ident,
        $delta_fn:ident,
        $delta_assoc:ident,
        $fetch_fn:ident
    ) => {
        #[doc = $doc]
        pub mod $module {
            use super::*;
            use $server_path as Server;

            #[derive(Debug, Clone)]
            pub struct $wrapper(pub DiscoveryService);

            impl $wrapper {
                pub fn into_server(self) -> Server<$wrapper> {
                    Server::new(self)
                }
            }

            #[tonic::async_trait]
            impl $trait_path for $wrapper {
                type $stream_assoc = DiscoveryStream;
                type $delta_assoc = DeltaStream;

                async fn $stream_fn(
                    &self,
                    request: Request<Streaming<DiscoveryRequest>>,
                ) -> Result<Response<Self::$stream_assoc>, Status> {
                    Ok(Response::new(
                        self.0.open_stream(request.into_inner(), Some($resource_type)),
                    ))
                }

                async fn $delta_fn(
                    &self,
                    _request: Request<Streaming<DeltaDiscoveryRequest>>,
                ) -> Result<Response<Self::$delta_assoc>, Status> {
                    Err(self.0.delta_unimplemented())
                }

                async fn $fetch_fn(
                    &self,
                    request: Request<DiscoveryRequest>,
                ) -> Result<Response<DiscoveryResponse>, Status> {
                    let mut request = request.into_inner();
                    if request.type_url.is_empty() {
                        request.type_url = $resource_type.type_url().to_string();
                    }
                    self.0.fetch(&request, $resource_type)
                }
            }
        }
    };
}

discrete_service!(
    "Cluster discovery.",
    cds,
    Cds,
    envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService,
    envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer,
    ResourceType::Cluster,
    stream_clusters,
    StreamClustersStream,
    delta_clusters,
    DeltaClustersStream,
    fetch_clusters
);

discrete_service!(
    "Endpoint discovery.",
    eds,
    Eds,
    envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryService,
    envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer,
    ResourceType::Endpoint,
    stream_endpoints,
    StreamEndpointsStream,
    delta_endpoints,
    DeltaEndpointsStream,
    fetch_endpoints
);

discrete_service!(
    "Listener discovery.",
    lds,
    Lds,
    envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService,
    envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer,
    ResourceType::Listener,
    stream_listeners,
    StreamListenersStream,
    delta_listeners,
    DeltaListenersStream,
    fetch_listeners
);

discrete_service!(
    "Route discovery.",
    rds,
    Rds,
    envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryService,
    envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryServiceServer,
    ResourceType::Route,
    stream_routes,
    StreamRoutesStream,
    delta_routes,
    DeltaRoutesStream,
    fetch_routes
);

discrete_service!(
    "Secret discovery.",
    sds,
    Sds,
    envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryService,
    envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryServiceServer,
    ResourceType::Secret,
    stream_secrets,
    StreamSecretsStream,
    delta_secrets,
    DeltaSecretsStream,
    fetch_secrets
);

#[cfg(test)]
mod tests {
    use crate::cache::Caches;

    use super::*;

    #[test]
    fn test_service_construction() {
        let caches = Caches::new();
        let cursor = SnapshotCursor::new(caches);
        let service = DiscoveryService::new(cursor);

        // Each wrapper converts into its tonic server type.
        let _ = ads::Ads(service.clone()).into_server();
        let _ = cds::Cds(service.clone()).into_server();
        let _ = eds::Eds(service.clone()).into_server();
        let _ = lds::Lds(service.clone()).into_server();
        let _ = rds::Rds(service.clone()).into_server();
        let _ = sds::Sds(service).into_server();
    }
}
