//! The HTTPProxy custom resource.
//!
//! An HTTPProxy that declares a `virtualhost` is a root; one without is an
//! include target reachable only through a root's `includes`.

use serde::{Deserialize, Serialize};

use crate::errors::{PylonError, Result};

use super::meta::Meta;

/// HTTPProxy custom resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpProxy {
    pub meta: Meta,
    pub spec: HttpProxySpec,
}

impl HttpProxy {
    /// A root proxy declares a virtualhost.
    pub fn is_root(&self) -> bool {
        self.spec.virtualhost.is_some()
    }
}

/// HTTPProxy specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpProxySpec {
    /// Present on roots only.
    #[serde(default)]
    pub virtualhost: Option<VirtualHost>,

    #[serde(default)]
    pub routes: Vec<ProxyRoute>,

    #[serde(default)]
    pub tcpproxy: Option<TcpProxy>,

    #[serde(default)]
    pub includes: Vec<Include>,
}

/// A delegation to another HTTPProxy, composing the listed conditions with
/// the target's own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Include {
    pub name: String,
    /// Defaults to the including proxy's namespace.
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// One match condition: a path prefix or a header match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub header: Option<HeaderCondition>,
}

/// A header match; exactly one of the match fields must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderCondition {
    pub name: String,
    #[serde(default)]
    pub present: bool,
    #[serde(default)]
    pub contains: String,
    #[serde(default, rename = "notcontains")]
    pub not_contains: String,
    #[serde(default)]
    pub exact: String,
    #[serde(default, rename = "notexact")]
    pub not_exact: String,
}

impl HeaderCondition {
    /// Enforce the CRD rule that exactly one match field is set.
    pub fn validate(&self) -> Result<()> {
        let set = [
            self.present,
            !self.contains.is_empty(),
            !self.not_contains.is_empty(),
            !self.exact.is_empty(),
            !self.not_exact.is_empty(),
        ]
        .iter()
        .filter(|v| **v)
        .count();

        if set != 1 {
            return Err(PylonError::validation_field(
                format!(
                    "header condition for '{}' must set exactly one of present, contains, \
                     notcontains, exact, notexact",
                    self.name
                ),
                "header",
            ));
        }
        Ok(())
    }
}

/// The virtualhost block of a root proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub fqdn: String,
    #[serde(default)]
    pub tls: Option<ProxyTls>,
}

/// TLS configuration of a root's virtualhost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyTls {
    /// Secret name, optionally qualified as `namespace/name`.
    #[serde(default, rename = "secretName")]
    pub secret_name: String,
    #[serde(default, rename = "minimumProtocolVersion")]
    pub minimum_protocol_version: String,
    /// Pass TLS through to the backend instead of terminating.
    #[serde(default)]
    pub passthrough: bool,
}

/// One routing rule on an HTTPProxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyRoute {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub services: Vec<ProxyService>,
    #[serde(default, rename = "enableWebsockets")]
    pub enable_websockets: bool,
    /// Also serve this route over the insecure listener when the virtualhost
    /// terminates TLS.
    #[serde(default, rename = "permitInsecure")]
    pub permit_insecure: bool,
    #[serde(default, rename = "prefixRewrite")]
    pub prefix_rewrite: String,
    #[serde(default, rename = "timeoutPolicy")]
    pub timeout_policy: Option<TimeoutPolicy>,
    #[serde(default, rename = "retryPolicy")]
    pub retry_policy: Option<RetryPolicy>,
}

/// TCP proxying for the root's virtualhost; requires TLS termination or
/// passthrough.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpProxy {
    #[serde(default)]
    pub services: Vec<ProxyService>,
}

/// An upstream service with weight and per-service policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyService {
    pub name: String,
    pub port: i32,
    #[serde(default)]
    pub weight: u32,
    #[serde(default, rename = "healthCheck")]
    pub health_check: Option<HealthCheckPolicy>,
    /// Load-balancer strategy: WeightedLeastRequest, Random, Cookie, or
    /// RoundRobin (default).
    #[serde(default)]
    pub strategy: String,
    #[serde(default, rename = "validation")]
    pub upstream_validation: Option<UpstreamValidation>,
}

/// Active HTTP health checking of an upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckPolicy {
    pub path: String,
    #[serde(default)]
    pub host: String,
    #[serde(default, rename = "intervalSeconds")]
    pub interval_seconds: i64,
    #[serde(default, rename = "timeoutSeconds")]
    pub timeout_seconds: i64,
    #[serde(default, rename = "unhealthyThresholdCount")]
    pub unhealthy_threshold_count: u32,
    #[serde(default, rename = "healthyThresholdCount")]
    pub healthy_threshold_count: u32,
}

/// Request and idle timeouts applied to a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    /// Timeout for the complete response, e.g. `30s`; `infinity` disables.
    #[serde(default)]
    pub response: String,
    /// Idle timeout for the connection, same syntax.
    #[serde(default)]
    pub idle: String,
}

/// Retry policy applied to a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default, rename = "count")]
    pub num_retries: u32,
    #[serde(default, rename = "perTryTimeout")]
    pub per_try_timeout: String,
}

/// Verification of the upstream's serving certificate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamValidation {
    /// Secret holding the CA bundle, optionally `namespace/name` qualified.
    #[serde(rename = "caSecret")]
    pub ca_secret: String,
    /// Expected subject alternative name of the upstream certificate.
    #[serde(rename = "subjectName")]
    pub subject_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_detection() {
        let mut proxy = HttpProxy { meta: Meta::new("default", "root"), spec: Default::default() };
        assert!(!proxy.is_root());
        proxy.spec.virtualhost =
            Some(VirtualHost { fqdn: "app.example.com".into(), tls: None });
        assert!(proxy.is_root());
    }

    #[test]
    fn test_header_condition_exactly_one() {
        let ok = HeaderCondition { name: "x-env".into(), exact: "prod".into(), ..Default::default() };
        assert!(ok.validate().is_ok());

        let none = HeaderCondition { name: "x-env".into(), ..Default::default() };
        assert!(none.validate().is_err());

        let two = HeaderCondition {
            name: "x-env".into(),
            present: true,
            contains: "pr".into(),
            ..Default::default()
        };
        assert!(two.validate().is_err());
    }

    #[test]
    fn test_crd_field_names() {
        let raw = r#"{
            "meta": {"namespace": "a", "name": "root"},
            "spec": {
                "virtualhost": {
                    "fqdn": "app.example.com",
                    "tls": {"secretName": "certs/tls", "minimumProtocolVersion": "1.3"}
                },
                "includes": [{"name": "api", "namespace": "b", "conditions": [{"prefix": "/api"}]}],
                "routes": [{
                    "conditions": [{"prefix": "/v1"}],
                    "services": [{"name": "svc", "port": 80, "weight": 3}],
                    "permitInsecure": true
                }]
            }
        }"#;
        let proxy: HttpProxy = serde_json::from_str(raw).unwrap();
        let vhost = proxy.spec.virtualhost.as_ref().unwrap();
        assert_eq!(vhost.tls.as_ref().unwrap().secret_name, "certs/tls");
        assert_eq!(proxy.spec.includes[0].namespace, "b");
        assert!(proxy.spec.routes[0].permit_insecure);
        assert_eq!(proxy.spec.routes[0].services[0].weight, 3);
    }
}
