//! LDS translator: the insecure and secure listeners, with one filter
//! chain per secure virtual host keyed by SNI.

use envoy_types::pb::envoy::config::accesslog::v3::{
    access_log::ConfigType as AccessLogConfigType, AccessLog,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType as FilterConfigType, listener_filter::ConfigType as ListenerFilterConfigType,
    Filter, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};
use envoy_types::pb::envoy::extensions::access_loggers::file::v3::FileAccessLog;
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::listener::proxy_protocol::v3::ProxyProtocol;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    http_filter::ConfigType as HttpFilterConfigType,
    HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier as TcpClusterSpecifier, TcpProxy,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::tcp_proxy::WeightedCluster as TcpWeightedCluster;
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::tcp_proxy::weighted_cluster::ClusterWeight as TcpClusterWeight;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, DownstreamTlsContext, SdsSecretConfig, TlsParameters,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::tls_parameters::TlsProtocol;
use envoy_types::pb::envoy::config::core::v3::{
    transport_socket::ConfigType as TransportConfigType, TransportSocket,
};

use crate::config::EnvoyConfig;
use crate::dag::{Dag, SecureVirtualHost, TcpProxyTarget};
use crate::model::annotations::TlsVersion;

use super::{
    ads_config_source, any, socket_address, BuiltResource, INGRESS_HTTP, INGRESS_HTTPS,
    LISTENER_TYPE_URL,
};

const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const ROUTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
const PROXY_PROTOCOL_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.proxy_protocol.v3.ProxyProtocol";
const FILE_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog";
const DOWNSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

/// Produce the listener set for the DAG: `ingress_http` when any insecure
/// virtual host has routes, `ingress_https` when any secure host exists.
pub fn listeners_from_dag(dag: &Dag, config: &EnvoyConfig) -> Vec<BuiltResource> {
    let mut out = Vec::new();

    if !dag.virtual_hosts.is_empty() {
        let mut listener = Listener {
            name: INGRESS_HTTP.to_string(),
            address: Some(socket_address(&config.http_address, config.http_port.into())),
            filter_chains: vec![FilterChain {
                filters: vec![http_connection_manager(
                    INGRESS_HTTP,
                    &config.http_access_log,
                )],
                ..Default::default()
            }],
            ..Default::default()
        };
        if config.use_proxy_protocol {
            listener.listener_filters = vec![proxy_protocol_filter()];
        }
        out.push(BuiltResource::encode(INGRESS_HTTP, LISTENER_TYPE_URL, &listener));
    }

    if !dag.secure_hosts.is_empty() {
        let mut listener_filters = Vec::new();
        if config.use_proxy_protocol {
            listener_filters.push(proxy_protocol_filter());
        }
        // SNI routing and passthrough detection both need the inspector.
        listener_filters.push(ListenerFilter {
            name: "envoy.filters.listener.tls_inspector".to_string(),
            config_type: Some(ListenerFilterConfigType::TypedConfig(any(
                TLS_INSPECTOR_TYPE_URL,
                &TlsInspector::default(),
            ))),
            ..Default::default()
        });

        let filter_chains = dag
            .secure_hosts
            .values()
            .map(|svh| secure_filter_chain(svh, config))
            .collect();

        let listener = Listener {
            name: INGRESS_HTTPS.to_string(),
            address: Some(socket_address(&config.https_address, config.https_port.into())),
            listener_filters,
            filter_chains,
            ..Default::default()
        };
        out.push(BuiltResource::encode(INGRESS_HTTPS, LISTENER_TYPE_URL, &listener));
    }

    out
}

fn secure_filter_chain(svh: &SecureVirtualHost, config: &EnvoyConfig) -> FilterChain {
    let mut chain = FilterChain {
        filter_chain_match: Some(FilterChainMatch {
            server_names: vec![svh.fqdn().to_string()],
            ..Default::default()
        }),
        ..Default::default()
    };

    if let Some(tcp) = &svh.tcp_proxy {
        chain.filters = vec![tcp_proxy_filter(tcp, &config.https_access_log)];
    } else {
        chain.filters =
            vec![http_connection_manager(INGRESS_HTTPS, &config.https_access_log)];
    }

    if svh.passthrough {
        // Passthrough terminates nothing; match on the TLS transport
        // protocol and forward the raw stream.
        if let Some(m) = chain.filter_chain_match.as_mut() {
            m.transport_protocol = "tls".to_string();
        }
        return chain;
    }

    if let Some(secret) = &svh.secret {
        let tls_context = DownstreamTlsContext {
            common_tls_context: Some(CommonTlsContext {
                tls_params: Some(TlsParameters {
                    tls_minimum_protocol_version: tls_protocol(svh.min_tls_version) as i32,
                    ..Default::default()
                }),
                tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
                    name: secret.sds_name(),
                    sds_config: Some(ads_config_source()),
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        chain.transport_socket = Some(TransportSocket {
            name: "envoy.transport_sockets.tls".to_string(),
            config_type: Some(TransportConfigType::TypedConfig(any(
                DOWNSTREAM_TLS_CONTEXT_TYPE_URL,
                &tls_context,
            ))),
        });
    }

    chain
}

fn tls_protocol(version: TlsVersion) -> TlsProtocol {
    match version {
        TlsVersion::V1_1 => TlsProtocol::TlSv11,
        TlsVersion::V1_2 => TlsProtocol::TlSv12,
        TlsVersion::V1_3 => TlsProtocol::TlSv13,
    }
}

fn http_connection_manager(route_config_name: &str, access_log_path: &str) -> Filter {
    let hcm = HttpConnectionManager {
        stat_prefix: route_config_name.to_string(),
        codec_type: CodecType::Auto as i32,
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            route_config_name: route_config_name.to_string(),
            config_source: Some(ads_config_source()),
        })),
        http_filters: vec![HttpFilter {
            name: "envoy.filters.http.router".to_string(),
            config_type: Some(HttpFilterConfigType::TypedConfig(any(
                ROUTER_TYPE_URL,
                &Router::default(),
            ))),
            ..Default::default()
        }],
        access_log: file_access_log(access_log_path),
        ..Default::default()
    };

    Filter {
        name: "envoy.filters.network.http_connection_manager".to_string(),
        config_type: Some(FilterConfigType::TypedConfig(any(HCM_TYPE_URL, &hcm))),
    }
}

fn tcp_proxy_filter(tcp: &TcpProxyTarget, access_log_path: &str) -> Filter {
    let cluster_specifier = if tcp.clusters.len() == 1 {
        TcpClusterSpecifier::Cluster(tcp.clusters[0].cluster_name())
    } else {
        TcpClusterSpecifier::WeightedClusters(TcpWeightedCluster {
            clusters: tcp
                .clusters
                .iter()
                .map(|c| TcpClusterWeight {
                    name: c.cluster_name(),
                    weight: c.weight.max(1),
                    ..Default::default()
                })
                .collect(),
        })
    };

    let proxy = TcpProxy {
        stat_prefix: "ingress_tcp".to_string(),
        cluster_specifier: Some(cluster_specifier),
        access_log: file_access_log(access_log_path),
        ..Default::default()
    };

    Filter {
        name: "envoy.filters.network.tcp_proxy".to_string(),
        config_type: Some(FilterConfigType::TypedConfig(any(TCP_PROXY_TYPE_URL, &proxy))),
    }
}

fn file_access_log(path: &str) -> Vec<AccessLog> {
    if path.is_empty() {
        return Vec::new();
    }
    vec![AccessLog {
        name: "envoy.access_loggers.file".to_string(),
        config_type: Some(AccessLogConfigType::TypedConfig(any(
            FILE_ACCESS_LOG_TYPE_URL,
            &FileAccessLog { path: path.to_string(), ..Default::default() },
        ))),
        ..Default::default()
    }]
}

fn proxy_protocol_filter() -> ListenerFilter {
    ListenerFilter {
        name: "envoy.filters.listener.proxy_protocol".to_string(),
        config_type: Some(ListenerFilterConfigType::TypedConfig(any(
            PROXY_PROTOCOL_TYPE_URL,
            &ProxyProtocol::default(),
        ))),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use prost::Message;

    use crate::dag::{
        Cluster, DagSecret, LbStrategy, PathCondition, Route, ServicePortTarget, VirtualHost,
    };
    use crate::model::annotations::ClusterLimits;

    use super::*;

    fn insecure_dag() -> Dag {
        let mut dag = Dag::default();
        let mut vh = VirtualHost::new("example.com", 80);
        let route = Route::new(PathCondition::Prefix("/".to_string()), vec![]);
        vh.routes.insert(route.condition_key(), route);
        dag.virtual_hosts.insert("example.com".to_string(), vh);
        dag
    }

    fn secure_dag() -> Dag {
        let mut dag = insecure_dag();
        let mut svh = SecureVirtualHost::new("example.com");
        svh.secret = Some(Arc::new(DagSecret {
            namespace: "demo".into(),
            name: "tls".into(),
            cert_pem: String::new(),
            key_pem: String::new(),
        }));
        let route = Route::new(PathCondition::Prefix("/".to_string()), vec![]);
        svh.host.routes.insert(route.condition_key(), route);
        dag.secure_hosts.insert("example.com".to_string(), svh);
        dag
    }

    fn decode(resource: &BuiltResource) -> Listener {
        Listener::decode(resource.resource.value.as_slice()).unwrap()
    }

    #[test]
    fn test_empty_dag_emits_no_listeners() {
        assert!(listeners_from_dag(&Dag::default(), &EnvoyConfig::default()).is_empty());
    }

    #[test]
    fn test_insecure_listener_only() {
        let resources = listeners_from_dag(&insecure_dag(), &EnvoyConfig::default());
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, INGRESS_HTTP);

        let listener = decode(&resources[0]);
        assert_eq!(listener.filter_chains.len(), 1);
        assert!(listener.listener_filters.is_empty());
    }

    #[test]
    fn test_secure_listener_with_sni_chains() {
        let resources = listeners_from_dag(&secure_dag(), &EnvoyConfig::default());
        assert_eq!(resources.len(), 2);
        let https = decode(&resources[1]);

        assert_eq!(https.listener_filters.len(), 1);
        assert_eq!(https.listener_filters[0].name, "envoy.filters.listener.tls_inspector");

        let chain = &https.filter_chains[0];
        assert_eq!(
            chain.filter_chain_match.as_ref().unwrap().server_names,
            vec!["example.com"]
        );
        assert!(chain.transport_socket.is_some());
    }

    #[test]
    fn test_min_tls_version_flows_into_chain() {
        let mut dag = secure_dag();
        dag.secure_hosts.get_mut("example.com").unwrap().min_tls_version = TlsVersion::V1_3;
        let resources = listeners_from_dag(&dag, &EnvoyConfig::default());
        let https = decode(&resources[1]);

        let socket = https.filter_chains[0].transport_socket.as_ref().unwrap();
        let Some(TransportConfigType::TypedConfig(packed)) = &socket.config_type else {
            panic!("expected typed config");
        };
        let tls = DownstreamTlsContext::decode(packed.value.as_slice()).unwrap();
        let params = tls.common_tls_context.unwrap().tls_params.unwrap();
        assert_eq!(params.tls_minimum_protocol_version, TlsProtocol::TlSv13 as i32);
    }

    #[test]
    fn test_proxy_protocol_filter_enabled_by_config() {
        let config = EnvoyConfig { use_proxy_protocol: true, ..Default::default() };
        let resources = listeners_from_dag(&insecure_dag(), &config);
        let listener = decode(&resources[0]);
        assert_eq!(listener.listener_filters.len(), 1);
        assert_eq!(listener.listener_filters[0].name, "envoy.filters.listener.proxy_protocol");
    }

    #[test]
    fn test_tcp_proxy_chain() {
        let mut dag = Dag::default();
        let mut svh = SecureVirtualHost::new("tcp.example.com");
        svh.secret = Some(Arc::new(DagSecret {
            namespace: "demo".into(),
            name: "tls".into(),
            cert_pem: String::new(),
            key_pem: String::new(),
        }));
        svh.tcp_proxy = Some(TcpProxyTarget {
            clusters: vec![Cluster {
                upstream: ServicePortTarget {
                    namespace: "demo".into(),
                    service: "db".into(),
                    port_name: String::new(),
                    port_number: 5432,
                    external_name: None,
                    protocol: Default::default(),
                },
                weight: 1,
                lb_strategy: LbStrategy::RoundRobin,
                health_check: None,
                validation: None,
                limits: ClusterLimits::default(),
            }],
        });
        dag.secure_hosts.insert("tcp.example.com".to_string(), svh);

        let resources = listeners_from_dag(&dag, &EnvoyConfig::default());
        assert_eq!(resources.len(), 1);
        let listener = decode(&resources[0]);
        assert_eq!(listener.filter_chains[0].filters[0].name, "envoy.filters.network.tcp_proxy");
    }

    #[test]
    fn test_passthrough_chain_has_no_transport_socket() {
        let mut dag = Dag::default();
        let mut svh = SecureVirtualHost::new("pass.example.com");
        svh.passthrough = true;
        svh.tcp_proxy = Some(TcpProxyTarget { clusters: vec![] });
        dag.secure_hosts.insert("pass.example.com".to_string(), svh);

        let resources = listeners_from_dag(&dag, &EnvoyConfig::default());
        let listener = decode(&resources[0]);
        let chain = &listener.filter_chains[0];
        assert!(chain.transport_socket.is_none());
        assert_eq!(chain.filter_chain_match.as_ref().unwrap().transport_protocol, "tls");
    }
}
