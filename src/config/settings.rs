//! # Configuration Settings
//!
//! Defines the configuration structure for the Pylon control plane.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PylonError, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// xDS server configuration
    #[serde(default)]
    pub xds: XdsConfig,

    /// Envoy listener translation configuration
    #[serde(default)]
    pub envoy: EnvoyConfig,

    /// Ingress object selection configuration
    #[serde(default)]
    pub ingress: IngressConfig,

    /// Build coalescing configuration
    #[serde(default)]
    pub holdoff: HoldoffConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Diagnostics HTTP configuration
    #[serde(default)]
    pub debug: DebugConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        if self.xds.port == self.debug.port {
            return Err(PylonError::validation("xDS and debug ports cannot be the same"));
        }
        if self.envoy.http_port == self.envoy.https_port {
            return Err(PylonError::validation(
                "Envoy HTTP and HTTPS listener ports cannot be the same",
            ));
        }
        if self.holdoff.delay > self.holdoff.max_delay {
            return Err(PylonError::validation(
                "holdoff delay cannot exceed the maximum holdoff delay",
            ));
        }
        self.observability.validate()?;
        Ok(())
    }
}

/// xDS gRPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XdsConfig {
    /// Bind address for the xDS gRPC API
    pub bind_address: String,

    /// Port for the xDS gRPC API
    pub port: u16,

    /// Deadline for draining open streams on shutdown
    #[serde(with = "duration_secs")]
    pub drain_deadline: Duration,
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8001,
            drain_deadline: Duration::from_secs(30),
        }
    }
}

impl XdsConfig {
    /// Full bind address string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Parameters applied while translating the DAG into Envoy listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvoyConfig {
    /// Address the insecure (HTTP) listener binds to
    pub http_address: String,

    /// Port the insecure (HTTP) listener binds to
    pub http_port: u16,

    /// Address the secure (HTTPS) listener binds to
    pub https_address: String,

    /// Port the secure (HTTPS) listener binds to
    pub https_port: u16,

    /// Access log path for the HTTP listener
    pub http_access_log: String,

    /// Access log path for the HTTPS listener
    pub https_access_log: String,

    /// Enable the PROXY protocol listener filter on both listeners
    pub use_proxy_protocol: bool,
}

impl Default for EnvoyConfig {
    fn default() -> Self {
        Self {
            http_address: "0.0.0.0".to_string(),
            http_port: 8080,
            https_address: "0.0.0.0".to_string(),
            https_port: 8443,
            http_access_log: "/dev/stdout".to_string(),
            https_access_log: "/dev/stdout".to_string(),
            use_proxy_protocol: false,
        }
    }
}

/// Selection of routing objects from the platform
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngressConfig {
    /// Ingress class to watch. Empty accepts objects with no class
    /// annotation or the default class name.
    pub ingress_class: String,

    /// Namespaces allowed to hold root HTTPProxies. Empty allows any.
    pub root_namespaces: Vec<String>,
}

/// Coalescing window for rebuilds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldoffConfig {
    /// Quiet period after the last event before a build fires
    #[serde(with = "duration_millis")]
    pub delay: Duration,

    /// Upper bound on the total wait since the first unprocessed event
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for HoldoffConfig {
    fn default() -> Self {
        Self { delay: Duration::from_millis(100), max_delay: Duration::from_millis(500) }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit JSON structured logs instead of human-readable output
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logging: false }
    }
}

impl ObservabilityConfig {
    fn validate(&self) -> Result<()> {
        match self.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(PylonError::validation(format!(
                "Invalid log level '{other}': must be one of trace, debug, info, warn, error"
            ))),
        }
    }
}

/// Diagnostics HTTP endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Bind address for the diagnostics HTTP endpoint
    pub bind_address: String,

    /// Port for the diagnostics HTTP endpoint
    pub port: u16,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1".to_string(), port: 6060 }
    }
}

impl DebugConfig {
    /// Full bind address string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Load configuration from a YAML file, falling back to defaults when the
/// path does not exist.
pub fn load_config(path: &str) -> Result<AppConfig> {
    let config = match std::fs::read_to_string(path) {
        Ok(raw) => serde_yaml::from_str(&raw)
            .map_err(|e| PylonError::config(format!("Invalid config file '{path}': {e}")))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(PylonError::io(e, format!("reading config file '{path}'"))),
    };
    config.validate()?;
    Ok(config)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
