//! The directed acyclic graph linking virtual hosts, routes, clusters, and
//! secrets.
//!
//! A DAG is rebuilt from scratch on every build cycle and discarded when the
//! next build replaces it. Routes hold their clusters by value; nothing in
//! the graph points back up.

mod builder;
mod conditions;
mod graphviz;
mod secrets;
mod status;

pub use builder::{build, BuilderConfig};
pub use conditions::{merge_prefix, ConditionContext};
pub use graphviz::render_dot;
pub use secrets::{DagSecret, DelegationIndex, SecretError};
pub use status::{Status, StatusCondition};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::annotations::{ClusterLimits, Timeout, TlsVersion};
use crate::model::HealthCheckPolicy;

/// Path match condition of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathCondition {
    Prefix(String),
    Exact(String),
    Regex(String),
    /// A prefix containing a single `*` segment wildcard.
    WildcardPrefix(String),
}

impl PathCondition {
    /// Length of the literal path text, used for specificity ordering.
    pub fn matched_len(&self) -> usize {
        match self {
            PathCondition::Prefix(s)
            | PathCondition::Exact(s)
            | PathCondition::Regex(s)
            | PathCondition::WildcardPrefix(s) => s.len(),
        }
    }

    /// Ordering rank among conditions of equal length: exact matches sort
    /// first, regexes last.
    fn rank(&self) -> u8 {
        match self {
            PathCondition::Exact(_) => 0,
            PathCondition::Prefix(_) => 1,
            PathCondition::WildcardPrefix(_) => 2,
            PathCondition::Regex(_) => 3,
        }
    }

    /// Stable identity used for duplicate-route detection.
    pub fn key(&self) -> String {
        match self {
            PathCondition::Prefix(s) => format!("prefix:{s}"),
            PathCondition::Exact(s) => format!("exact:{s}"),
            PathCondition::Regex(s) => format!("regex:{s}"),
            PathCondition::WildcardPrefix(s) => format!("wildcard:{s}"),
        }
    }
}

/// Kinds of header matching supported by routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatchKind {
    Present,
    Contains,
    Exact,
}

/// A single header condition on a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
    pub name: String,
    pub kind: HeaderMatchKind,
    pub value: String,
    pub invert: bool,
}

impl HeaderMatch {
    fn key(&self) -> String {
        let kind = match self.kind {
            HeaderMatchKind::Present => "present",
            HeaderMatchKind::Contains => "contains",
            HeaderMatchKind::Exact => "exact",
        };
        format!("{}:{kind}:{}:{}", self.name.to_ascii_lowercase(), self.value, self.invert)
    }
}

/// Layer-7 protocol spoken towards the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpstreamProtocol {
    #[default]
    Http1,
    H2,
    H2c,
    Tls,
}

impl UpstreamProtocol {
    pub fn parse(value: &str) -> UpstreamProtocol {
        match value {
            "h2" => UpstreamProtocol::H2,
            "h2c" => UpstreamProtocol::H2c,
            "tls" => UpstreamProtocol::Tls,
            _ => UpstreamProtocol::Http1,
        }
    }

    /// Whether the upstream connection is wrapped in TLS.
    pub fn uses_tls(&self) -> bool {
        matches!(self, UpstreamProtocol::H2 | UpstreamProtocol::Tls)
    }

    /// Whether the upstream speaks HTTP/2.
    pub fn uses_http2(&self) -> bool {
        matches!(self, UpstreamProtocol::H2 | UpstreamProtocol::H2c)
    }
}

/// The resolved service port a cluster forwards to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePortTarget {
    pub namespace: String,
    pub service: String,
    pub port_name: String,
    pub port_number: i32,
    /// DNS name for ExternalName services.
    pub external_name: Option<String>,
    pub protocol: UpstreamProtocol,
}

impl ServicePortTarget {
    /// The EDS service name: `<namespace>/<service>/<port-name>`.
    pub fn eds_name(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.service, self.port_name)
    }
}

/// Load-balancing strategies understood by the cluster translator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LbStrategy {
    #[default]
    RoundRobin,
    WeightedLeastRequest,
    Random,
    Cookie,
}

impl LbStrategy {
    pub fn parse(value: &str) -> LbStrategy {
        match value {
            "WeightedLeastRequest" => LbStrategy::WeightedLeastRequest,
            "Random" => LbStrategy::Random,
            "Cookie" => LbStrategy::Cookie,
            _ => LbStrategy::RoundRobin,
        }
    }

    fn short_code(&self) -> &'static str {
        match self {
            LbStrategy::RoundRobin => "rr",
            LbStrategy::WeightedLeastRequest => "wlr",
            LbStrategy::Random => "rnd",
            LbStrategy::Cookie => "ck",
        }
    }
}

/// Verification material for upstream TLS connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamValidationContext {
    pub ca_pem: String,
    pub subject_name: String,
}

/// A weighted upstream of a route.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub upstream: ServicePortTarget,
    pub weight: u32,
    pub lb_strategy: LbStrategy,
    pub health_check: Option<HealthCheckPolicy>,
    pub validation: Option<UpstreamValidationContext>,
    pub limits: ClusterLimits,
}

impl Cluster {
    /// The CDS cluster name. Distinct policy combinations on the same
    /// service port yield distinct clusters, so the policy is encoded into
    /// the name.
    pub fn cluster_name(&self) -> String {
        let base = format!(
            "{}/{}/{}",
            self.upstream.namespace, self.upstream.service, self.upstream.port_number
        );
        let mut suffix = String::new();
        if self.lb_strategy != LbStrategy::RoundRobin {
            suffix.push_str(self.lb_strategy.short_code());
        }
        if self.health_check.is_some() {
            suffix.push_str("hc");
        }
        if suffix.is_empty() {
            base
        } else {
            format!("{base}/{suffix}")
        }
    }
}

/// Retry behaviour of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOn {
    pub num_retries: u32,
    pub per_try_timeout: Timeout,
}

/// A single route beneath a virtual host.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub path: PathCondition,
    pub headers: Vec<HeaderMatch>,
    pub clusters: Vec<Cluster>,
    pub websocket: bool,
    pub response_timeout: Timeout,
    pub idle_timeout: Timeout,
    pub retry_policy: Option<RetryOn>,
    /// Serve a 301 to the secure host instead of the route action when this
    /// route is reached over the insecure listener.
    pub https_upgrade: bool,
    pub prefix_rewrite: String,
}

impl Route {
    pub fn new(path: PathCondition, clusters: Vec<Cluster>) -> Self {
        Self {
            path,
            headers: Vec::new(),
            clusters,
            websocket: false,
            response_timeout: Timeout::Default,
            idle_timeout: Timeout::Default,
            retry_policy: None,
            https_upgrade: false,
            prefix_rewrite: String::new(),
        }
    }

    /// Identity of this route's matchers within a virtual host; a second
    /// route with the same key is a conflict.
    pub fn condition_key(&self) -> String {
        let mut headers: Vec<String> = self.headers.iter().map(HeaderMatch::key).collect();
        headers.sort();
        format!("{}|{}", self.path.key(), headers.join(","))
    }
}

/// An insecure (port 80) virtual host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualHost {
    pub fqdn: String,
    pub port: u16,
    pub routes: BTreeMap<String, Route>,
}

impl VirtualHost {
    pub fn new(fqdn: impl Into<String>, port: u16) -> Self {
        Self { fqdn: fqdn.into(), port, routes: BTreeMap::new() }
    }

    /// Routes in the order the route translator must emit them: longer
    /// matched paths first, exact before prefix, regex after non-regex of
    /// equal length; header-conditioned routes ahead of bare ones.
    pub fn sorted_routes(&self) -> Vec<&Route> {
        let mut routes: Vec<&Route> = self.routes.values().collect();
        routes.sort_by(|a, b| {
            b.path
                .matched_len()
                .cmp(&a.path.matched_len())
                .then_with(|| a.path.rank().cmp(&b.path.rank()))
                .then_with(|| b.headers.len().cmp(&a.headers.len()))
                .then_with(|| a.condition_key().cmp(&b.condition_key()))
        });
        routes
    }
}

/// TCP forwarding bound at a secure virtual host.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpProxyTarget {
    pub clusters: Vec<Cluster>,
}

/// A TLS-protected (port 443) virtual host.
#[derive(Debug, Clone, PartialEq)]
pub struct SecureVirtualHost {
    pub host: VirtualHost,
    /// TLS material; absent when `passthrough` is set.
    pub secret: Option<Arc<DagSecret>>,
    pub min_tls_version: TlsVersion,
    /// Pass TLS through to the upstream instead of terminating.
    pub passthrough: bool,
    pub tcp_proxy: Option<TcpProxyTarget>,
}

impl SecureVirtualHost {
    pub fn new(fqdn: impl Into<String>) -> Self {
        Self {
            host: VirtualHost::new(fqdn, 443),
            secret: None,
            min_tls_version: TlsVersion::default(),
            passthrough: false,
            tcp_proxy: None,
        }
    }

    pub fn fqdn(&self) -> &str {
        &self.host.fqdn
    }
}

/// The graph produced by one build cycle.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    pub virtual_hosts: BTreeMap<String, VirtualHost>,
    pub secure_hosts: BTreeMap<String, SecureVirtualHost>,
    /// Secrets referenced by secure hosts, keyed by SDS name.
    pub secrets: BTreeMap<String, Arc<DagSecret>>,
}

impl Dag {
    /// All clusters referenced anywhere in the graph.
    pub fn clusters(&self) -> Vec<&Cluster> {
        let mut out = Vec::new();
        for vh in self.virtual_hosts.values() {
            for route in vh.routes.values() {
                out.extend(route.clusters.iter());
            }
        }
        for svh in self.secure_hosts.values() {
            for route in svh.host.routes.values() {
                out.extend(route.clusters.iter());
            }
            if let Some(tcp) = &svh.tcp_proxy {
                out.extend(tcp.clusters.iter());
            }
        }
        out
    }
}
