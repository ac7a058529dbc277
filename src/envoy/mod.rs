//! Translation of the DAG into Envoy v3 resources.
//!
//! Each translator visits the DAG and produces the artefacts of one xDS
//! resource type, encoded as `envoy-types` protobufs.

pub mod bootstrap;
mod cluster;
mod endpoints;
mod listener;
mod route;
mod secret;

pub use cluster::clusters_from_dag;
pub use endpoints::EndpointsTranslator;
pub use listener::listeners_from_dag;
pub use route::routes_from_dag;
pub use secret::secrets_from_dag;

use envoy_types::pb::envoy::config::core::v3::{
    address, config_source::ConfigSourceSpecifier, socket_address::PortSpecifier, Address,
    AggregatedConfigSource, ConfigSource, SocketAddress,
};
use envoy_types::pb::google::protobuf::{Any, Duration as PbDuration};
use prost::Message;

use crate::model::annotations::Timeout;

/// Type URL for Cluster (CDS).
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
/// Type URL for RouteConfiguration (RDS).
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
/// Type URL for Listener (LDS).
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
/// Type URL for ClusterLoadAssignment (EDS).
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
/// Type URL for Secret (SDS).
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// Name of the insecure route configuration and listener.
pub const INGRESS_HTTP: &str = "ingress_http";
/// Name of the secure route configuration and listener.
pub const INGRESS_HTTPS: &str = "ingress_https";

/// A built Envoy resource along with its cache name.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    /// Encode a protobuf message under the given type URL.
    pub fn encode<M: Message>(name: impl Into<String>, type_url: &str, message: &M) -> Self {
        Self { name: name.into(), resource: any(type_url, message) }
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }

    pub fn into_any(self) -> Any {
        self.resource
    }
}

/// Pack a message into `google.protobuf.Any`.
pub fn any<M: Message>(type_url: &str, message: &M) -> Any {
    Any { type_url: type_url.to_string(), value: message.encode_to_vec() }
}

/// A socket address proto for a host/port pair.
pub fn socket_address(address: &str, port: u32) -> Address {
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            address: address.to_string(),
            port_specifier: Some(PortSpecifier::PortValue(port)),
            ..Default::default()
        })),
    }
}

/// The config source pointing resource fetches back at the ADS stream.
pub fn ads_config_source() -> ConfigSource {
    ConfigSource {
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(
            AggregatedConfigSource::default(),
        )),
        ..Default::default()
    }
}

/// Convert a parsed timeout into the proto form. `Default` leaves the field
/// unset; `Infinite` maps to an explicit zero, which disables the timeout.
pub fn timeout_to_proto(timeout: Timeout) -> Option<PbDuration> {
    match timeout {
        Timeout::Default => None,
        Timeout::Infinite => Some(PbDuration { seconds: 0, nanos: 0 }),
        Timeout::Duration(d) => Some(PbDuration {
            seconds: d.as_secs() as i64,
            nanos: d.subsec_nanos() as i32,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_built_resource_encodes_type_url() {
        let cluster = envoy_types::pb::envoy::config::cluster::v3::Cluster {
            name: "demo/app/80".to_string(),
            ..Default::default()
        };
        let built = BuiltResource::encode("demo/app/80", CLUSTER_TYPE_URL, &cluster);
        assert_eq!(built.name, "demo/app/80");
        assert_eq!(built.type_url(), CLUSTER_TYPE_URL);
        assert!(!built.resource.value.is_empty());
    }

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_to_proto(Timeout::Default), None);
        assert_eq!(
            timeout_to_proto(Timeout::Infinite),
            Some(PbDuration { seconds: 0, nanos: 0 })
        );
        assert_eq!(
            timeout_to_proto(Timeout::Duration(Duration::from_millis(1500))),
            Some(PbDuration { seconds: 1, nanos: 500_000_000 })
        );
    }

    #[test]
    fn test_socket_address() {
        let addr = socket_address("0.0.0.0", 8080);
        match addr.address {
            Some(address::Address::SocketAddress(sa)) => {
                assert_eq!(sa.address, "0.0.0.0");
                assert_eq!(sa.port_specifier, Some(PortSpecifier::PortValue(8080)));
            }
            other => panic!("unexpected address: {other:?}"),
        }
    }
}
