//! The generic Ingress routing resource.

use serde::{Deserialize, Serialize};

use super::core::ServicePortRef;
use super::meta::Meta;

/// Path matching type for Ingress rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathType {
    #[default]
    Prefix,
    Exact,
}

/// Backend service target for an Ingress path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressBackend {
    pub service_name: String,
    pub service_port: ServicePortRef,
}

/// A single path rule within an Ingress HTTP rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressPath {
    /// Path string; empty means `/`. Strings containing any of `[ ( * \`
    /// are treated as regular expressions.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub path_type: PathType,
    pub backend: IngressBackend,
}

/// A single host-based Ingress rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    /// Host the paths apply to; empty means every host.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub paths: Vec<IngressPath>,
}

/// TLS configuration mapping hostnames to a secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressTls {
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Secret name, optionally qualified as `namespace/name`.
    pub secret_name: String,
}

/// Ingress specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingress {
    pub meta: Meta,
    /// Catch-all backend used when no rules are present.
    #[serde(default)]
    pub default_backend: Option<IngressBackend>,
    #[serde(default)]
    pub rules: Vec<IngressRule>,
    #[serde(default)]
    pub tls: Vec<IngressTls>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingress_deserializes_from_json() {
        let raw = r#"{
            "meta": {"namespace": "demo", "name": "web"},
            "default_backend": {"service_name": "app", "service_port": 80},
            "tls": [{"hosts": ["example.com"], "secret_name": "tls"}]
        }"#;
        let ing: Ingress = serde_json::from_str(raw).unwrap();
        assert_eq!(ing.meta.name, "web");
        let backend = ing.default_backend.unwrap();
        assert_eq!(backend.service_port, ServicePortRef::Number(80));
        assert_eq!(ing.tls[0].secret_name, "tls");
    }

    #[test]
    fn test_named_port_reference() {
        let raw = r#"{"service_name": "app", "service_port": "http"}"#;
        let backend: IngressBackend = serde_json::from_str(raw).unwrap();
        assert_eq!(backend.service_port, ServicePortRef::Name("http".into()));
    }
}
