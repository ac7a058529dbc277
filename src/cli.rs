//! # Command Line Interface
//!
//! Subcommands of the `pylon` binary: the control plane itself (`serve`),
//! the bootstrap generator, the shutdown-manager sidecar, and an ad-hoc xDS
//! client for poking at a running control plane.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{load_config, AppConfig};
use crate::controller::Controller;
use crate::envoy::bootstrap::{render, BootstrapOptions};
use crate::shutdown::{run_shutdown_manager, ShutdownManagerOptions};
use crate::status::NullStatusSink;

#[derive(Parser)]
#[command(name = "pylon")]
#[command(about = "Pylon Kubernetes ingress control plane for Envoy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "pylon.yml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the xDS API
    Serve {
        /// xDS gRPC API address
        #[arg(long)]
        xds_address: Option<String>,

        /// xDS gRPC API port
        #[arg(long)]
        xds_port: Option<u16>,

        /// Ingress class to watch
        #[arg(long = "ingress-class-name")]
        ingress_class: Option<String>,

        /// Namespaces allowed to hold root HTTPProxies (comma separated)
        #[arg(long = "root-namespaces", value_delimiter = ',')]
        root_namespaces: Option<Vec<String>>,

        /// Envoy HTTP access log path
        #[arg(long = "envoy-http-access-log")]
        http_access_log: Option<String>,

        /// Envoy HTTPS access log path
        #[arg(long = "envoy-https-access-log")]
        https_access_log: Option<String>,

        /// Enable the PROXY protocol on all listeners
        #[arg(long = "use-proxy-protocol")]
        use_proxy_protocol: bool,

        /// Diagnostics HTTP address
        #[arg(long = "debug-http-address")]
        debug_address: Option<String>,

        /// Diagnostics HTTP port
        #[arg(long = "debug-http-port")]
        debug_port: Option<u16>,
    },

    /// Write the proxy bootstrap configuration
    Bootstrap {
        /// Output path; `-` writes to stdout
        #[arg(default_value = "-")]
        path: String,

        /// xDS management server address
        #[arg(long, default_value = "127.0.0.1")]
        xds_address: String,

        /// xDS management server port
        #[arg(long, default_value_t = 8001)]
        xds_port: u16,

        /// Proxy admin interface address
        #[arg(long, default_value = "127.0.0.1")]
        admin_address: String,

        /// Proxy admin interface port
        #[arg(long, default_value_t = 9001)]
        admin_port: u16,

        /// Emit JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Run the proxy drain sidecar
    ShutdownManager {
        /// Sidecar HTTP port
        #[arg(long, default_value_t = 8090)]
        http_port: u16,

        /// Proxy admin interface address
        #[arg(long, default_value = "127.0.0.1")]
        envoy_admin_address: String,

        /// Proxy admin interface port
        #[arg(long, default_value_t = 9001)]
        envoy_admin_port: u16,

        /// Open-connection threshold for completing shutdown
        #[arg(long, default_value_t = 0)]
        min_open_connections: u64,

        /// Poll interval in seconds while draining
        #[arg(long, default_value_t = 5)]
        check_interval_seconds: u64,
    },

    /// Issue a one-shot discovery request against a running control plane
    Cli {
        /// Control plane endpoint
        #[arg(long, default_value = "http://127.0.0.1:8001")]
        endpoint: String,

        /// Resource type: listener, route, cluster, endpoint, or secret
        resource: String,

        /// Resource names to request (empty for wildcard)
        names: Vec<String>,

        /// Node identifier presented to the control plane
        #[arg(long, default_value = "pylon-cli")]
        node_id: String,
    },
}

/// Parse arguments and dispatch. Usage errors exit with status 2 (clap's
/// default); fatal runtime errors bubble up for `main` to report.
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    crate::observability::logging::init_logging(&config.observability)?;

    match cli.command {
        Commands::Serve {
            xds_address,
            xds_port,
            ingress_class,
            root_namespaces,
            http_access_log,
            https_access_log,
            use_proxy_protocol,
            debug_address,
            debug_port,
        } => {
            if let Some(address) = xds_address {
                config.xds.bind_address = address;
            }
            if let Some(port) = xds_port {
                config.xds.port = port;
            }
            if let Some(class) = ingress_class {
                config.ingress.ingress_class = class;
            }
            if let Some(namespaces) = root_namespaces {
                config.ingress.root_namespaces = namespaces;
            }
            if let Some(path) = http_access_log {
                config.envoy.http_access_log = path;
            }
            if let Some(path) = https_access_log {
                config.envoy.https_access_log = path;
            }
            if use_proxy_protocol {
                config.envoy.use_proxy_protocol = true;
            }
            if let Some(address) = debug_address {
                config.debug.bind_address = address;
            }
            if let Some(port) = debug_port {
                config.debug.port = port;
            }
            config.validate()?;

            run_serve(config).await?;
        }

        Commands::Bootstrap { path, xds_address, xds_port, admin_address, admin_port, json } => {
            let options = BootstrapOptions {
                xds_address,
                xds_port,
                admin_address,
                admin_port,
                ..Default::default()
            };
            let rendered = render(&options, json)?;
            if path == "-" {
                print!("{rendered}");
            } else {
                std::fs::write(&path, rendered)?;
                info!(path = %path, "wrote bootstrap configuration");
            }
        }

        Commands::ShutdownManager {
            http_port,
            envoy_admin_address,
            envoy_admin_port,
            min_open_connections,
            check_interval_seconds,
        } => {
            run_shutdown_manager(ShutdownManagerOptions {
                http_port,
                envoy_admin_address,
                envoy_admin_port,
                min_open_connections,
                check_interval: Duration::from_secs(check_interval_seconds),
                ..Default::default()
            })
            .await?;
        }

        Commands::Cli { endpoint, resource, names, node_id } => {
            run_discovery_probe(endpoint, resource, names, node_id).await?;
        }
    }

    Ok(())
}

/// Run the `serve` subcommand: the full control plane.
async fn run_serve(config: AppConfig) -> anyhow::Result<()> {
    info!(
        xds = %config.xds.bind_address(),
        debug = %config.debug.bind_address(),
        ingress_class = %config.ingress.ingress_class,
        "starting control plane"
    );

    // Status write-back needs the platform client, which attaches through
    // the StatusSink seam; stand-alone serving discards statuses.
    let controller = Controller::new(&config, Arc::new(NullStatusSink));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut xds_shutdown = shutdown_rx.clone();
    let xds_task = tokio::spawn(crate::xds::start_xds_server(
        controller.cursor(),
        config.xds.clone(),
        async move {
            let _ = xds_shutdown.changed().await;
        },
    ));

    let mut debug_shutdown = shutdown_rx.clone();
    let debug_task = tokio::spawn(crate::debug::start_debug_server(
        controller.shared_dag(),
        config.debug.bind_address(),
        async move {
            let _ = debug_shutdown.changed().await;
        },
    ));

    let mut wait_shutdown = shutdown_rx;
    let _ = wait_shutdown.changed().await;

    // Drain open streams, bounded by the configured deadline.
    match tokio::time::timeout(config.xds.drain_deadline, xds_task).await {
        Ok(result) => {
            result??;
        }
        Err(_) => warn!(
            deadline = ?config.xds.drain_deadline,
            "drain deadline exceeded; abandoning open streams"
        ),
    }
    debug_task.abort();
    for worker in controller.shutdown() {
        worker.abort();
    }

    info!("control plane stopped");
    Ok(())
}

/// The `cli` subcommand: open an ADS stream, send one request, print the
/// first response.
async fn run_discovery_probe(
    endpoint: String,
    resource: String,
    names: Vec<String>,
    node_id: String,
) -> anyhow::Result<()> {
    use envoy_types::pb::envoy::config::core::v3::Node;
    use envoy_types::pb::envoy::service::discovery::v3::
        aggregated_discovery_service_client::AggregatedDiscoveryServiceClient;
    use envoy_types::pb::envoy::service::discovery::v3::DiscoveryRequest;

    let type_url = match resource.as_str() {
        "cluster" | "cds" => crate::envoy::CLUSTER_TYPE_URL,
        "endpoint" | "eds" => crate::envoy::ENDPOINT_TYPE_URL,
        "listener" | "lds" => crate::envoy::LISTENER_TYPE_URL,
        "route" | "rds" => crate::envoy::ROUTE_TYPE_URL,
        "secret" | "sds" => crate::envoy::SECRET_TYPE_URL,
        other => anyhow::bail!("unknown resource type '{other}'"),
    };

    let channel = tonic::transport::Channel::from_shared(endpoint)?.connect().await?;
    let mut client = AggregatedDiscoveryServiceClient::new(channel);

    let request = DiscoveryRequest {
        type_url: type_url.to_string(),
        resource_names: names,
        node: Some(Node { id: node_id, ..Default::default() }),
        ..Default::default()
    };

    let outbound = tokio_stream::once(request);
    let mut inbound =
        client.stream_aggregated_resources(outbound).await?.into_inner();

    match tokio_stream::StreamExt::next(&mut inbound).await {
        Some(Ok(response)) => {
            println!("version: {}", response.version_info);
            println!("nonce:   {}", response.nonce);
            println!("type:    {}", response.type_url);
            println!("resources ({}):", response.resources.len());
            for resource in &response.resources {
                println!("  - {} ({} bytes)", resource.type_url, resource.value.len());
            }
        }
        Some(Err(status)) => anyhow::bail!("stream error: {status}"),
        None => println!("no response (empty configuration)"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_flag_parsing() {
        let cli = Cli::try_parse_from([
            "pylon",
            "serve",
            "--xds-port",
            "9001",
            "--ingress-class-name",
            "internal",
            "--root-namespaces",
            "infra,edge",
            "--use-proxy-protocol",
        ])
        .unwrap();

        match cli.command {
            Commands::Serve { xds_port, ingress_class, root_namespaces, use_proxy_protocol, .. } => {
                assert_eq!(xds_port, Some(9001));
                assert_eq!(ingress_class.as_deref(), Some("internal"));
                assert_eq!(
                    root_namespaces,
                    Some(vec!["infra".to_string(), "edge".to_string()])
                );
                assert!(use_proxy_protocol);
            }
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn test_bootstrap_defaults() {
        let cli = Cli::try_parse_from(["pylon", "bootstrap"]).unwrap();
        match cli.command {
            Commands::Bootstrap { path, xds_port, json, .. } => {
                assert_eq!(path, "-");
                assert_eq!(xds_port, 8001);
                assert!(!json);
            }
            _ => panic!("expected bootstrap command"),
        }
    }

    #[test]
    fn test_usage_error_is_reported() {
        assert!(Cli::try_parse_from(["pylon"]).is_err());
        assert!(Cli::try_parse_from(["pylon", "unknown-subcommand"]).is_err());
    }

    #[test]
    fn test_cli_subcommand_parsing() {
        let cli =
            Cli::try_parse_from(["pylon", "cli", "cluster", "demo/app/80", "--node-id", "probe"])
                .unwrap();
        match cli.command {
            Commands::Cli { resource, names, node_id, .. } => {
                assert_eq!(resource, "cluster");
                assert_eq!(names, vec!["demo/app/80".to_string()]);
                assert_eq!(node_id, "probe");
            }
            _ => panic!("expected cli command"),
        }
    }
}
