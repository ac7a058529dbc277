//! Core platform resources: Service, Endpoints, Secret,
//! TLSCertificateDelegation, and Namespace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::meta::Meta;

/// Transport protocol of a service or endpoint port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "SCTP")]
    Sctp,
}

/// A port exposed by a Service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    /// Port name; may be empty for single-port services.
    #[serde(default)]
    pub name: String,
    pub port: i32,
    #[serde(default)]
    pub protocol: Protocol,
}

/// A Service backing one or more routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub meta: Meta,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    /// DNS name for ExternalName services; resolved via STRICT_DNS.
    #[serde(default)]
    pub external_name: Option<String>,
}

impl Service {
    /// Find a port by number or by name.
    pub fn find_port(&self, reference: &ServicePortRef) -> Option<&ServicePort> {
        match reference {
            ServicePortRef::Number(n) => self.ports.iter().find(|p| p.port == *n),
            ServicePortRef::Name(name) => self.ports.iter().find(|p| &p.name == name),
        }
    }
}

/// A reference to a service port, either by number or name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServicePortRef {
    Number(i32),
    Name(String),
}

impl std::fmt::Display for ServicePortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServicePortRef::Number(n) => write!(f, "{n}"),
            ServicePortRef::Name(s) => f.write_str(s),
        }
    }
}

/// A port within an Endpoints subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPort {
    #[serde(default)]
    pub name: String,
    pub port: i32,
    #[serde(default)]
    pub protocol: Protocol,
}

/// One subset of ready addresses sharing a port list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSubset {
    /// Ready addresses (IPs) in this subset.
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub ports: Vec<EndpointPort>,
}

/// Endpoints carry the ready backend addresses of a Service; they share the
/// Service's namespace and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub meta: Meta,
    #[serde(default)]
    pub subsets: Vec<EndpointSubset>,
}

/// Well-known keys of a TLS secret payload.
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// An opaque secret; TLS secrets carry a PEM certificate chain and private
/// key under the well-known keys, base64-encoded as on the platform wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub meta: Meta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    pub fn certificate(&self) -> Option<&str> {
        self.data.get(TLS_CERT_KEY).map(String::as_str)
    }

    pub fn private_key(&self) -> Option<&str> {
        self.data.get(TLS_PRIVATE_KEY_KEY).map(String::as_str)
    }
}

/// One delegation: a named secret offered to a set of namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDelegation {
    pub secret_name: String,
    /// Namespaces permitted to reference the secret; `*` permits any.
    #[serde(default)]
    pub target_namespaces: Vec<String>,
}

/// TLSCertificateDelegation allows objects in other namespaces to reference
/// secrets owned by this object's namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCertificateDelegation {
    pub meta: Meta,
    #[serde(default)]
    pub delegations: Vec<CertificateDelegation>,
}

/// Namespace objects participate only through their labels, which Gateway
/// route-binding selectors match against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub meta: Meta,
}
