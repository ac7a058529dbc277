//! Bootstrap configuration for the managed proxy.
//!
//! The `bootstrap` subcommand writes the minimal static configuration a
//! proxy instance needs to reach this control plane; everything else is
//! delivered dynamically over ADS.

use serde::{Deserialize, Serialize};

use crate::errors::{PylonError, Result};

/// Options accepted by the bootstrap generator.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Address of the xDS management server.
    pub xds_address: String,
    /// Port of the xDS management server.
    pub xds_port: u16,
    /// Admin interface address.
    pub admin_address: String,
    /// Admin interface port.
    pub admin_port: u16,
    /// Access log path for the admin interface.
    pub admin_access_log: String,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            xds_address: "127.0.0.1".to_string(),
            xds_port: 8001,
            admin_address: "127.0.0.1".to_string(),
            admin_port: 9001,
            admin_access_log: "/dev/null".to_string(),
        }
    }
}

/// Root of the generated bootstrap document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bootstrap {
    pub admin: Admin,
    pub static_resources: StaticResources,
    pub dynamic_resources: DynamicResources,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admin {
    pub access_log_path: String,
    pub address: AddressDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressDoc {
    pub socket_address: SocketAddressDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketAddressDoc {
    pub address: String,
    pub port_value: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticResources {
    pub clusters: Vec<ClusterDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDoc {
    pub name: String,
    pub connect_timeout: String,
    pub r#type: String,
    pub lb_policy: String,
    pub typed_extension_protocol_options: serde_json::Value,
    pub load_assignment: LoadAssignmentDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadAssignmentDoc {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityEndpointsDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalityEndpointsDoc {
    pub lb_endpoints: Vec<LbEndpointDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbEndpointDoc {
    pub endpoint: EndpointDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDoc {
    pub address: AddressDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicResources {
    pub ads_config: AdsConfigDoc,
    pub cds_config: ConfigSourceDoc,
    pub lds_config: ConfigSourceDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdsConfigDoc {
    pub api_type: String,
    pub transport_api_version: String,
    pub grpc_services: Vec<GrpcServiceDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcServiceDoc {
    pub envoy_grpc: EnvoyGrpcDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvoyGrpcDoc {
    pub cluster_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSourceDoc {
    pub ads: serde_json::Value,
    pub resource_api_version: String,
}

/// The name of the static cluster pointing back at this control plane.
const XDS_CLUSTER: &str = "xds_cluster";

/// Build the bootstrap document for the given options.
pub fn bootstrap(options: &BootstrapOptions) -> Bootstrap {
    Bootstrap {
        admin: Admin {
            access_log_path: options.admin_access_log.clone(),
            address: AddressDoc {
                socket_address: SocketAddressDoc {
                    address: options.admin_address.clone(),
                    port_value: options.admin_port,
                },
            },
        },
        static_resources: StaticResources {
            clusters: vec![ClusterDoc {
                name: XDS_CLUSTER.to_string(),
                connect_timeout: "5s".to_string(),
                r#type: "STRICT_DNS".to_string(),
                lb_policy: "ROUND_ROBIN".to_string(),
                // The management connection must speak HTTP/2 for gRPC.
                typed_extension_protocol_options: serde_json::json!({
                    "envoy.extensions.upstreams.http.v3.HttpProtocolOptions": {
                        "@type": "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions",
                        "explicit_http_config": {"http2_protocol_options": {}}
                    }
                }),
                load_assignment: LoadAssignmentDoc {
                    cluster_name: XDS_CLUSTER.to_string(),
                    endpoints: vec![LocalityEndpointsDoc {
                        lb_endpoints: vec![LbEndpointDoc {
                            endpoint: EndpointDoc {
                                address: AddressDoc {
                                    socket_address: SocketAddressDoc {
                                        address: options.xds_address.clone(),
                                        port_value: options.xds_port,
                                    },
                                },
                            },
                        }],
                    }],
                },
            }],
        },
        dynamic_resources: DynamicResources {
            ads_config: AdsConfigDoc {
                api_type: "GRPC".to_string(),
                transport_api_version: "V3".to_string(),
                grpc_services: vec![GrpcServiceDoc {
                    envoy_grpc: EnvoyGrpcDoc { cluster_name: XDS_CLUSTER.to_string() },
                }],
            },
            cds_config: ConfigSourceDoc {
                ads: serde_json::json!({}),
                resource_api_version: "V3".to_string(),
            },
            lds_config: ConfigSourceDoc {
                ads: serde_json::json!({}),
                resource_api_version: "V3".to_string(),
            },
        },
    }
}

/// Render the bootstrap document as YAML or JSON.
pub fn render(options: &BootstrapOptions, json: bool) -> Result<String> {
    let doc = bootstrap(options);
    if json {
        serde_json::to_string_pretty(&doc).map_err(PylonError::from)
    } else {
        serde_yaml::to_string(&doc)
            .map_err(|e| PylonError::config(format!("failed to render bootstrap YAML: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_references_xds_cluster() {
        let doc = bootstrap(&BootstrapOptions::default());
        assert_eq!(doc.static_resources.clusters[0].name, XDS_CLUSTER);
        assert_eq!(
            doc.dynamic_resources.ads_config.grpc_services[0].envoy_grpc.cluster_name,
            XDS_CLUSTER
        );
    }

    #[test]
    fn test_render_yaml_and_json() {
        let options = BootstrapOptions { xds_port: 9999, ..Default::default() };
        let yaml = render(&options, false).unwrap();
        assert!(yaml.contains("port_value: 9999"));
        assert!(yaml.contains("xds_cluster"));

        let json = render(&options, true).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["dynamic_resources"]["ads_config"]["api_type"], "GRPC");
    }
}
