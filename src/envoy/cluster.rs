//! CDS translator: one Cluster per unique (service, port, policy) tuple
//! referenced by the DAG.

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::cluster::v3::circuit_breakers::Thresholds;
use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    ClusterDiscoveryType, DiscoveryType, EdsClusterConfig, LbPolicy,
};
use envoy_types::pb::envoy::config::cluster::v3::{CircuitBreakers, Cluster as EnvoyCluster};
use envoy_types::pb::envoy::config::core::v3::health_check::{HealthChecker, HttpHealthCheck};
use envoy_types::pb::envoy::config::core::v3::{
    transport_socket::ConfigType as TransportConfigType, HealthCheck, TransportSocket,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, CertificateValidationContext, CommonTlsContext,
    UpstreamTlsContext,
};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::http_protocol_options::{
    explicit_http_config::ProtocolConfig, ExplicitHttpConfig, UpstreamProtocolOptions,
};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::HttpProtocolOptions;
use envoy_types::pb::envoy::config::core::v3::{
    data_source::Specifier, DataSource, Http2ProtocolOptions,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, StringMatcher,
};
use envoy_types::pb::google::protobuf::{Any, Duration as PbDuration, UInt32Value};

use crate::dag::{Cluster, Dag, LbStrategy, UpstreamValidationContext};
use crate::model::annotations::ClusterLimits;

use super::{ads_config_source, any, socket_address, BuiltResource, CLUSTER_TYPE_URL};

const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
const UPSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";

/// Produce one Cluster resource per unique cluster name in the DAG.
pub fn clusters_from_dag(dag: &Dag) -> Vec<BuiltResource> {
    let mut unique: BTreeMap<String, &Cluster> = BTreeMap::new();
    for cluster in dag.clusters() {
        unique.entry(cluster.cluster_name()).or_insert(cluster);
    }

    unique
        .into_iter()
        .map(|(name, cluster)| {
            let envoy_cluster = envoy_cluster(&name, cluster);
            BuiltResource::encode(name, CLUSTER_TYPE_URL, &envoy_cluster)
        })
        .collect()
}

fn envoy_cluster(name: &str, cluster: &Cluster) -> EnvoyCluster {
    let mut out = EnvoyCluster {
        name: name.to_string(),
        connect_timeout: Some(PbDuration { seconds: 2, nanos: 0 }),
        lb_policy: lb_policy(cluster.lb_strategy) as i32,
        ..Default::default()
    };

    match &cluster.upstream.external_name {
        Some(external) => {
            // ExternalName services resolve through DNS with a static
            // endpoint on the service port.
            out.cluster_discovery_type =
                Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32));
            out.load_assignment = Some(ClusterLoadAssignment {
                cluster_name: name.to_string(),
                endpoints: vec![LocalityLbEndpoints {
                    lb_endpoints: vec![LbEndpoint {
                        host_identifier: Some(HostIdentifier::Endpoint(Endpoint {
                            address: Some(socket_address(
                                external,
                                cluster.upstream.port_number as u32,
                            )),
                            ..Default::default()
                        })),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            });
        }
        None => {
            out.cluster_discovery_type =
                Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32));
            out.eds_cluster_config = Some(EdsClusterConfig {
                eds_config: Some(ads_config_source()),
                service_name: cluster.upstream.eds_name(),
            });
        }
    }

    if let Some(thresholds) = circuit_breakers(&cluster.limits) {
        out.circuit_breakers = Some(CircuitBreakers {
            thresholds: vec![thresholds],
            ..Default::default()
        });
    }

    if let Some(hc) = &cluster.health_check {
        out.health_checks = vec![HealthCheck {
            timeout: Some(PbDuration { seconds: hc.timeout_seconds.max(1), nanos: 0 }),
            interval: Some(PbDuration { seconds: hc.interval_seconds.max(1), nanos: 0 }),
            unhealthy_threshold: Some(UInt32Value {
                value: non_zero(hc.unhealthy_threshold_count, 3),
            }),
            healthy_threshold: Some(UInt32Value {
                value: non_zero(hc.healthy_threshold_count, 2),
            }),
            health_checker: Some(HealthChecker::HttpHealthCheck(HttpHealthCheck {
                path: hc.path.clone(),
                host: hc.host.clone(),
                ..Default::default()
            })),
            ..Default::default()
        }];
        // Removed endpoints drain immediately instead of lingering until
        // the next health check round.
        out.ignore_health_on_host_removal = true;
    }

    if cluster.upstream.protocol.uses_http2() {
        out.typed_extension_protocol_options.insert(
            "envoy.extensions.upstreams.http.v3.HttpProtocolOptions".to_string(),
            http2_protocol_options(),
        );
    }

    if cluster.upstream.protocol.uses_tls() {
        out.transport_socket = Some(upstream_tls_socket(
            cluster.validation.as_ref(),
            cluster.upstream.external_name.as_deref(),
        ));
    }

    out
}

fn lb_policy(strategy: LbStrategy) -> LbPolicy {
    match strategy {
        LbStrategy::WeightedLeastRequest => LbPolicy::LeastRequest,
        LbStrategy::Random => LbPolicy::Random,
        // Cookie affinity is implemented with the ring-hash balancer.
        LbStrategy::Cookie => LbPolicy::RingHash,
        LbStrategy::RoundRobin => LbPolicy::RoundRobin,
    }
}

/// Thresholds are attached only when at least one limit is set.
fn circuit_breakers(limits: &ClusterLimits) -> Option<Thresholds> {
    if limits.is_unset() {
        return None;
    }
    Some(Thresholds {
        max_connections: non_zero_u32(limits.max_connections),
        max_pending_requests: non_zero_u32(limits.max_pending_requests),
        max_requests: non_zero_u32(limits.max_requests),
        max_retries: non_zero_u32(limits.max_retries),
        ..Default::default()
    })
}

fn non_zero_u32(value: u32) -> Option<UInt32Value> {
    (value != 0).then_some(UInt32Value { value })
}

fn non_zero(value: u32, fallback: u32) -> u32 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

fn http2_protocol_options() -> Any {
    let options = HttpProtocolOptions {
        upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(
            ExplicitHttpConfig {
                protocol_config: Some(ProtocolConfig::Http2ProtocolOptions(
                    Http2ProtocolOptions::default(),
                )),
            },
        )),
        ..Default::default()
    };
    any(HTTP_PROTOCOL_OPTIONS_TYPE_URL, &options)
}

fn upstream_tls_socket(
    validation: Option<&UpstreamValidationContext>,
    sni: Option<&str>,
) -> TransportSocket {
    let mut common = CommonTlsContext::default();
    if let Some(validation) = validation {
        #[allow(deprecated)]
        let context = CertificateValidationContext {
            trusted_ca: Some(DataSource {
                specifier: Some(Specifier::InlineString(validation.ca_pem.clone())),
                ..Default::default()
            }),
            match_typed_subject_alt_names: vec![
                envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::SubjectAltNameMatcher {
                    san_type: envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::subject_alt_name_matcher::SanType::Dns as i32,
                    matcher: Some(StringMatcher {
                        match_pattern: Some(MatchPattern::Exact(validation.subject_name.clone())),
                        ..Default::default()
                    }),
                    oid: String::new(),
                },
            ],
            ..Default::default()
        };
        common.validation_context_type = Some(ValidationContextType::ValidationContext(context));
    }

    let tls = UpstreamTlsContext {
        common_tls_context: Some(common),
        sni: sni.unwrap_or_default().to_string(),
        ..Default::default()
    };

    TransportSocket {
        name: "envoy.transport_sockets.tls".to_string(),
        config_type: Some(TransportConfigType::TypedConfig(any(
            UPSTREAM_TLS_CONTEXT_TYPE_URL,
            &tls,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use crate::dag::{ServicePortTarget, UpstreamProtocol};
    use crate::model::HealthCheckPolicy;

    use super::*;

    fn dag_with_cluster(cluster: Cluster) -> Dag {
        let mut dag = Dag::default();
        let mut vh = crate::dag::VirtualHost::new("example.com", 80);
        let route = crate::dag::Route::new(
            crate::dag::PathCondition::Prefix("/".to_string()),
            vec![cluster],
        );
        vh.routes.insert(route.condition_key(), route);
        dag.virtual_hosts.insert("example.com".to_string(), vh);
        dag
    }

    fn base_cluster() -> Cluster {
        Cluster {
            upstream: ServicePortTarget {
                namespace: "demo".into(),
                service: "app".into(),
                port_name: "http".into(),
                port_number: 80,
                external_name: None,
                protocol: UpstreamProtocol::Http1,
            },
            weight: 1,
            lb_strategy: LbStrategy::RoundRobin,
            health_check: None,
            validation: None,
            limits: ClusterLimits::default(),
        }
    }

    fn decode(resource: &BuiltResource) -> EnvoyCluster {
        EnvoyCluster::decode(resource.resource.value.as_slice()).unwrap()
    }

    #[test]
    fn test_eds_cluster_with_service_name() {
        let dag = dag_with_cluster(base_cluster());
        let resources = clusters_from_dag(&dag);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "demo/app/80");

        let cluster = decode(&resources[0]);
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32))
        );
        assert_eq!(cluster.eds_cluster_config.unwrap().service_name, "demo/app/http");
    }

    #[test]
    fn test_external_name_uses_strict_dns() {
        let mut input = base_cluster();
        input.upstream.external_name = Some("app.external.example".to_string());
        let dag = dag_with_cluster(input);

        let cluster = decode(&clusters_from_dag(&dag)[0]);
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32))
        );
        assert!(cluster.eds_cluster_config.is_none());
        assert!(cluster.load_assignment.is_some());
    }

    #[test]
    fn test_lb_policy_mapping() {
        assert_eq!(lb_policy(LbStrategy::WeightedLeastRequest), LbPolicy::LeastRequest);
        assert_eq!(lb_policy(LbStrategy::Random), LbPolicy::Random);
        assert_eq!(lb_policy(LbStrategy::Cookie), LbPolicy::RingHash);
        assert_eq!(lb_policy(LbStrategy::RoundRobin), LbPolicy::RoundRobin);
    }

    #[test]
    fn test_circuit_breakers_only_when_limits_set() {
        let dag = dag_with_cluster(base_cluster());
        let cluster = decode(&clusters_from_dag(&dag)[0]);
        assert!(cluster.circuit_breakers.is_none());

        let mut limited = base_cluster();
        limited.limits = ClusterLimits { max_connections: 1024, ..Default::default() };
        let dag = dag_with_cluster(limited);
        let cluster = decode(&clusters_from_dag(&dag)[0]);
        let thresholds = &cluster.circuit_breakers.unwrap().thresholds[0];
        assert_eq!(thresholds.max_connections.as_ref().map(|v| v.value), Some(1024));
        assert!(thresholds.max_requests.is_none());
    }

    #[test]
    fn test_health_check_sets_drain_on_removal() {
        let mut input = base_cluster();
        input.health_check = Some(HealthCheckPolicy {
            path: "/healthz".to_string(),
            interval_seconds: 10,
            timeout_seconds: 2,
            ..Default::default()
        });
        let dag = dag_with_cluster(input);

        let resources = clusters_from_dag(&dag);
        assert_eq!(resources[0].name, "demo/app/80/hc");
        let cluster = decode(&resources[0]);
        assert!(cluster.ignore_health_on_host_removal);
        let hc = &cluster.health_checks[0];
        match hc.health_checker.as_ref().unwrap() {
            HealthChecker::HttpHealthCheck(http) => assert_eq!(http.path, "/healthz"),
            other => panic!("unexpected health checker: {other:?}"),
        }
    }

    #[test]
    fn test_h2c_gets_http2_options_without_tls() {
        let mut input = base_cluster();
        input.upstream.protocol = UpstreamProtocol::H2c;
        let dag = dag_with_cluster(input);
        let cluster = decode(&clusters_from_dag(&dag)[0]);
        assert!(cluster
            .typed_extension_protocol_options
            .contains_key("envoy.extensions.upstreams.http.v3.HttpProtocolOptions"));
        assert!(cluster.transport_socket.is_none());
    }

    #[test]
    fn test_h2_gets_http2_options_and_tls() {
        let mut input = base_cluster();
        input.upstream.protocol = UpstreamProtocol::H2;
        let dag = dag_with_cluster(input);
        let cluster = decode(&clusters_from_dag(&dag)[0]);
        assert!(cluster
            .typed_extension_protocol_options
            .contains_key("envoy.extensions.upstreams.http.v3.HttpProtocolOptions"));
        let socket = cluster.transport_socket.unwrap();
        assert_eq!(socket.name, "envoy.transport_sockets.tls");
    }

    #[test]
    fn test_upstream_validation_renders_ca_and_san() {
        let mut input = base_cluster();
        input.upstream.protocol = UpstreamProtocol::Tls;
        input.validation = Some(UpstreamValidationContext {
            ca_pem: "-----BEGIN CERTIFICATE-----".to_string(),
            subject_name: "backend.example.com".to_string(),
        });
        let dag = dag_with_cluster(input);
        let cluster = decode(&clusters_from_dag(&dag)[0]);

        let socket = cluster.transport_socket.unwrap();
        let Some(TransportConfigType::TypedConfig(packed)) = socket.config_type else {
            panic!("expected typed config");
        };
        let tls = UpstreamTlsContext::decode(packed.value.as_slice()).unwrap();
        let common = tls.common_tls_context.unwrap();
        match common.validation_context_type.unwrap() {
            ValidationContextType::ValidationContext(ctx) => {
                assert!(ctx.trusted_ca.is_some());
                assert_eq!(ctx.match_typed_subject_alt_names.len(), 1);
            }
            other => panic!("unexpected validation context: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_tuples_deduplicate() {
        let mut dag = Dag::default();
        let mut vh = crate::dag::VirtualHost::new("example.com", 80);
        for path in ["/a", "/b"] {
            let route = crate::dag::Route::new(
                crate::dag::PathCondition::Prefix(path.to_string()),
                vec![base_cluster()],
            );
            vh.routes.insert(route.condition_key(), route);
        }
        dag.virtual_hosts.insert("example.com".to_string(), vh);

        assert_eq!(clusters_from_dag(&dag).len(), 1);
    }
}
