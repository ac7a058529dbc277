//! Object identity shared by every watched resource.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The kinds of platform objects the control plane watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Service,
    Endpoints,
    Secret,
    Ingress,
    HttpProxy,
    TlsCertificateDelegation,
    HttpRoute,
    Gateway,
    Namespace,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Service => "Service",
            ObjectKind::Endpoints => "Endpoints",
            ObjectKind::Secret => "Secret",
            ObjectKind::Ingress => "Ingress",
            ObjectKind::HttpProxy => "HTTPProxy",
            ObjectKind::TlsCertificateDelegation => "TLSCertificateDelegation",
            ObjectKind::HttpRoute => "HTTPRoute",
            ObjectKind::Gateway => "Gateway",
            ObjectKind::Namespace => "Namespace",
        };
        f.write_str(name)
    }
}

/// Identity of an object: kind plus namespaced name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Namespaced name without a kind, used to key lookups inside the builder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Parse `name` or `namespace/name`, defaulting to `default_namespace`.
    pub fn from_qualified(value: &str, default_namespace: &str) -> Self {
        match value.split_once('/') {
            Some((ns, name)) if !ns.is_empty() => Self::new(ns, name),
            _ => Self::new(default_namespace, value),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object metadata carried by every watched resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub namespace: String,
    pub name: String,

    /// Monotonic revision assigned by the platform; stale replays carry an
    /// older value than the stored object.
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Meta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into(), ..Default::default() }
    }

    pub fn with_version(mut self, resource_version: u64) -> Self {
        self.resource_version = resource_version;
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.name.clone())
    }

    pub fn object_ref(&self, kind: ObjectKind) -> ObjectRef {
        ObjectRef::new(kind, self.namespace.clone(), self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_parsing() {
        let n = NamespacedName::from_qualified("tls-cert", "demo");
        assert_eq!(n, NamespacedName::new("demo", "tls-cert"));

        let n = NamespacedName::from_qualified("certs/tls-cert", "demo");
        assert_eq!(n, NamespacedName::new("certs", "tls-cert"));

        // A leading slash is not a namespace separator.
        let n = NamespacedName::from_qualified("/odd", "demo");
        assert_eq!(n, NamespacedName::new("demo", "/odd"));
    }

    #[test]
    fn test_object_ref_display() {
        let r = ObjectRef::new(ObjectKind::HttpProxy, "default", "root");
        assert_eq!(r.to_string(), "HTTPProxy default/root");
    }
}
