//! Shutdown-manager sidecar.
//!
//! Runs next to the proxy and coordinates graceful drain: on `/shutdown` it
//! fails the proxy's health check via the admin interface, then blocks until
//! the number of active downstream connections falls below the configured
//! threshold before reporting completion to the orchestrator's preStop hook.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::{debug, info, warn};

use crate::errors::{PylonError, Result};

/// Options of the shutdown-manager subcommand.
#[derive(Debug, Clone)]
pub struct ShutdownManagerOptions {
    /// Bind address of the sidecar HTTP endpoint.
    pub http_address: String,
    /// Bind port of the sidecar HTTP endpoint.
    pub http_port: u16,
    /// Address of the proxy's admin interface.
    pub envoy_admin_address: String,
    /// Port of the proxy's admin interface.
    pub envoy_admin_port: u16,
    /// Open-connection threshold below which shutdown may proceed.
    pub min_open_connections: u64,
    /// Poll interval while waiting for connections to drain.
    pub check_interval: Duration,
}

impl Default for ShutdownManagerOptions {
    fn default() -> Self {
        Self {
            http_address: "0.0.0.0".to_string(),
            http_port: 8090,
            envoy_admin_address: "127.0.0.1".to_string(),
            envoy_admin_port: 9001,
            min_open_connections: 0,
            check_interval: Duration::from_secs(5),
        }
    }
}

impl ShutdownManagerOptions {
    fn admin_url(&self, path: &str) -> String {
        format!("http://{}:{}{path}", self.envoy_admin_address, self.envoy_admin_port)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn shutdown(State(options): State<ShutdownManagerOptions>) -> (StatusCode, &'static str) {
    info!("shutdown requested; failing proxy health checks");
    let client = reqwest::Client::new();

    if let Err(e) = client.post(options.admin_url("/healthcheck/fail")).send().await {
        warn!(error = %e, "failed to fail proxy health checks");
        return (StatusCode::INTERNAL_SERVER_ERROR, "healthcheck/fail request failed");
    }

    loop {
        match open_connections(&client, &options).await {
            Ok(open) if open <= options.min_open_connections => {
                info!(open, "connections drained; proceeding with shutdown");
                return (StatusCode::OK, "ok");
            }
            Ok(open) => {
                debug!(
                    open,
                    threshold = options.min_open_connections,
                    "waiting for connections to drain"
                );
            }
            Err(e) => {
                warn!(error = %e, "failed to read connection stats");
            }
        }
        tokio::time::sleep(options.check_interval).await;
    }
}

/// Sum the active downstream connections over all listeners from the admin
/// stats output.
async fn open_connections(
    client: &reqwest::Client,
    options: &ShutdownManagerOptions,
) -> Result<u64> {
    let body = client
        .get(options.admin_url("/stats"))
        .send()
        .await
        .map_err(|e| PylonError::transport(format!("stats request failed: {e}")))?
        .text()
        .await
        .map_err(|e| PylonError::transport(format!("stats body unreadable: {e}")))?;

    Ok(parse_open_connections(&body))
}

fn parse_open_connections(stats: &str) -> u64 {
    stats
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            if !name.trim().ends_with("downstream_cx_active") {
                return None;
            }
            // Internal admin and health listeners do not hold user traffic.
            if name.contains("admin") || name.contains("health") {
                return None;
            }
            value.trim().parse::<u64>().ok()
        })
        .sum()
}

/// Run the shutdown-manager HTTP endpoint.
pub async fn run_shutdown_manager(options: ShutdownManagerOptions) -> Result<()> {
    let bind = format!("{}:{}", options.http_address, options.http_port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| PylonError::transport(format!("shutdown-manager failed to bind: {e}")))?;

    info!(address = %bind, "starting shutdown-manager");

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/shutdown", get(shutdown))
        .with_state(options);

    axum::serve(listener, app)
        .await
        .map_err(|e| PylonError::transport(format!("shutdown-manager failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open_connections() {
        let stats = "\
http.ingress_http.downstream_cx_active: 4
http.ingress_https.downstream_cx_active: 3
http.admin.downstream_cx_active: 1
listener.health.downstream_cx_active: 2
http.ingress_http.downstream_cx_total: 900
";
        assert_eq!(parse_open_connections(stats), 7);
    }

    #[test]
    fn test_parse_handles_garbage() {
        assert_eq!(parse_open_connections(""), 0);
        assert_eq!(parse_open_connections("not a stats line"), 0);
        assert_eq!(parse_open_connections("x.downstream_cx_active: nan"), 0);
    }

    #[test]
    fn test_admin_url() {
        let options = ShutdownManagerOptions::default();
        assert_eq!(options.admin_url("/stats"), "http://127.0.0.1:9001/stats");
    }
}
