//! Annotation surface recognised on watched objects.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use super::meta::Meta;

/// Annotations selecting the ingress class, in precedence order.
pub const CLASS_ANNOTATIONS: [&str; 2] = ["pylon.io/ingress.class", "kubernetes.io/ingress.class"];

/// Class assumed when the controller is run without an explicit class.
pub const DEFAULT_CLASS: &str = "pylon";

const ANNOTATION_TLS_REQUIRED: &str = "ingress.kubernetes.io/force-ssl-redirect";
const ANNOTATION_ALLOW_HTTP: &str = "kubernetes.io/ingress.allow-http";
const ANNOTATION_MIN_TLS_VERSION: &str = "pylon.io/tls-minimum-protocol-version";
const ANNOTATION_WEBSOCKET_ROUTES: &str = "pylon.io/websocket-routes";
const ANNOTATION_REQUEST_TIMEOUT: &str = "pylon.io/request-timeout";
const ANNOTATION_NUM_RETRIES: &str = "pylon.io/num-retries";
const ANNOTATION_PER_TRY_TIMEOUT: &str = "pylon.io/per-try-timeout";
const ANNOTATION_UPSTREAM_PROTOCOL_PREFIX: &str = "pylon.io/upstream-protocol.";
const ANNOTATION_MAX_CONNECTIONS: &str = "pylon.io/max-connections";
const ANNOTATION_MAX_PENDING_REQUESTS: &str = "pylon.io/max-pending-requests";
const ANNOTATION_MAX_REQUESTS: &str = "pylon.io/max-requests";
const ANNOTATION_MAX_RETRIES: &str = "pylon.io/max-retries";

/// The ingress class annotation of an object, if any.
pub fn ingress_class(meta: &Meta) -> Option<&str> {
    CLASS_ANNOTATIONS.iter().find_map(|key| meta.annotations.get(*key)).map(String::as_str)
}

/// Whether an object matches the configured ingress class. An empty
/// configured class accepts objects carrying no class annotation or the
/// default class name.
pub fn class_matches(meta: &Meta, configured: &str) -> bool {
    match (ingress_class(meta), configured.is_empty()) {
        (None, true) => true,
        (Some(class), true) => class == DEFAULT_CLASS,
        (None, false) => false,
        (Some(class), false) => class == configured,
    }
}

/// Whether insecure requests to this object must be redirected to HTTPS.
pub fn tls_required(meta: &Meta) -> bool {
    meta.annotations.get(ANNOTATION_TLS_REQUIRED).map(String::as_str) == Some("true")
}

/// Whether routes may be served on the insecure listener.
pub fn http_allowed(meta: &Meta) -> bool {
    meta.annotations.get(ANNOTATION_ALLOW_HTTP).map(String::as_str) != Some("false")
}

/// Minimum TLS protocol versions accepted on a secure virtual host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    V1_1,
    #[default]
    V1_2,
    V1_3,
}

impl TlsVersion {
    /// Parse an annotation or CRD value; unrecognised values fall back to
    /// the 1.2 default.
    pub fn parse(value: &str) -> TlsVersion {
        match value {
            "1.1" => TlsVersion::V1_1,
            "1.3" => TlsVersion::V1_3,
            _ => TlsVersion::V1_2,
        }
    }
}

/// Minimum TLS version for an object, from its annotation.
pub fn min_tls_version(meta: &Meta) -> TlsVersion {
    meta.annotations
        .get(ANNOTATION_MIN_TLS_VERSION)
        .map(|v| TlsVersion::parse(v))
        .unwrap_or_default()
}

/// Paths that should have websocket upgrades enabled.
pub fn websocket_routes(meta: &Meta) -> BTreeSet<String> {
    meta.annotations
        .get(ANNOTATION_WEBSOCKET_ROUTES)
        .map(|v| v.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default()
}

/// A timeout value parsed from an annotation or policy string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timeout {
    /// Use the proxy's default.
    #[default]
    Default,
    /// Disable the timeout entirely.
    Infinite,
    Duration(Duration),
}

impl Timeout {
    /// Parse `infinity` or a duration string such as `90s` or `1m30s`.
    /// Unparseable values disable the timeout, matching the behaviour of
    /// treating a nonsense annotation as "never time out" rather than
    /// silently applying a default.
    pub fn parse(value: &str) -> Timeout {
        let value = value.trim();
        if value.is_empty() {
            return Timeout::Default;
        }
        if value == "infinity" {
            return Timeout::Infinite;
        }
        match parse_duration(value) {
            Some(d) => Timeout::Duration(d),
            None => Timeout::Infinite,
        }
    }
}

/// Request timeout for routes produced from this object.
pub fn request_timeout(meta: &Meta) -> Timeout {
    meta.annotations.get(ANNOTATION_REQUEST_TIMEOUT).map(|v| Timeout::parse(v)).unwrap_or_default()
}

/// Retry policy parsed from annotations, if present.
pub fn retry_policy(meta: &Meta) -> Option<(u32, Timeout)> {
    let count: u32 = meta.annotations.get(ANNOTATION_NUM_RETRIES)?.parse().ok()?;
    let per_try = meta
        .annotations
        .get(ANNOTATION_PER_TRY_TIMEOUT)
        .map(|v| Timeout::parse(v))
        .unwrap_or_default();
    Some((count, per_try))
}

/// Parse the `pylon.io/upstream-protocol.{h2,h2c,tls}` annotations into a
/// map of port name or number to protocol.
pub fn upstream_protocols(meta: &Meta) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for protocol in ["h2", "h2c", "tls"] {
        let key = format!("{ANNOTATION_UPSTREAM_PROTOCOL_PREFIX}{protocol}");
        if let Some(ports) = meta.annotations.get(&key) {
            for port in ports.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                out.insert(port.to_string(), protocol.to_string());
            }
        }
    }
    out
}

/// Circuit-breaker limits declared on a Service; zero means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterLimits {
    pub max_connections: u32,
    pub max_pending_requests: u32,
    pub max_requests: u32,
    pub max_retries: u32,
}

impl ClusterLimits {
    pub fn is_unset(&self) -> bool {
        self.max_connections == 0
            && self.max_pending_requests == 0
            && self.max_requests == 0
            && self.max_retries == 0
    }
}

/// Circuit-breaker limits from a Service's annotations.
pub fn cluster_limits(meta: &Meta) -> ClusterLimits {
    let parse = |key: &str| -> u32 {
        meta.annotations.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    };
    ClusterLimits {
        max_connections: parse(ANNOTATION_MAX_CONNECTIONS),
        max_pending_requests: parse(ANNOTATION_MAX_PENDING_REQUESTS),
        max_requests: parse(ANNOTATION_MAX_REQUESTS),
        max_retries: parse(ANNOTATION_MAX_RETRIES),
    }
}

/// Parse a Go-style duration string: integer segments with `h`, `m`, `s`,
/// or `ms` suffixes, e.g. `90s`, `1m30s`, `250ms`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = value.chars().peekable();
    let mut matched = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return None;
        }
        let number: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match c {
            'h' => Duration::from_secs(3600),
            'm' => {
                if chars.peek() == Some(&'s') {
                    chars.next();
                    Duration::from_millis(1)
                } else {
                    Duration::from_secs(60)
                }
            }
            's' => Duration::from_secs(1),
            _ => return None,
        };
        total += unit * number as u32;
        matched = true;
    }

    if !digits.is_empty() || !matched {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(key: &str, value: &str) -> Meta {
        Meta::new("demo", "web").with_annotation(key, value)
    }

    #[test]
    fn test_class_matching() {
        let unannotated = Meta::new("demo", "web");
        assert!(class_matches(&unannotated, ""));
        assert!(!class_matches(&unannotated, "internal"));

        let default_class = meta_with("kubernetes.io/ingress.class", DEFAULT_CLASS);
        assert!(class_matches(&default_class, ""));

        let custom = meta_with("pylon.io/ingress.class", "internal");
        assert!(class_matches(&custom, "internal"));
        assert!(!class_matches(&custom, ""));
        assert!(!class_matches(&custom, "external"));
    }

    #[test]
    fn test_class_annotation_precedence() {
        let meta = Meta::new("demo", "web")
            .with_annotation("pylon.io/ingress.class", "internal")
            .with_annotation("kubernetes.io/ingress.class", "other");
        assert_eq!(ingress_class(&meta), Some("internal"));
    }

    #[test]
    fn test_tls_required_and_http_allowed() {
        assert!(tls_required(&meta_with(ANNOTATION_TLS_REQUIRED, "true")));
        assert!(!tls_required(&Meta::new("demo", "web")));
        assert!(http_allowed(&Meta::new("demo", "web")));
        assert!(!http_allowed(&meta_with(ANNOTATION_ALLOW_HTTP, "false")));
    }

    #[test]
    fn test_min_tls_version() {
        assert_eq!(min_tls_version(&Meta::new("demo", "web")), TlsVersion::V1_2);
        assert_eq!(min_tls_version(&meta_with(ANNOTATION_MIN_TLS_VERSION, "1.3")), TlsVersion::V1_3);
        assert_eq!(min_tls_version(&meta_with(ANNOTATION_MIN_TLS_VERSION, "1.1")), TlsVersion::V1_1);
        // Unrecognised values fall back to the default.
        assert_eq!(min_tls_version(&meta_with(ANNOTATION_MIN_TLS_VERSION, "0.9")), TlsVersion::V1_2);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("90"), None);
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn test_timeout_parsing() {
        assert_eq!(Timeout::parse("30s"), Timeout::Duration(Duration::from_secs(30)));
        assert_eq!(Timeout::parse("infinity"), Timeout::Infinite);
        assert_eq!(Timeout::parse(""), Timeout::Default);
        // Garbage disables the timeout rather than inventing one.
        assert_eq!(Timeout::parse("banana"), Timeout::Infinite);
    }

    #[test]
    fn test_websocket_routes() {
        let meta = meta_with(ANNOTATION_WEBSOCKET_ROUTES, "/ws, /feed");
        let routes = websocket_routes(&meta);
        assert!(routes.contains("/ws"));
        assert!(routes.contains("/feed"));
        assert_eq!(routes.len(), 2);
    }

    #[test]
    fn test_upstream_protocols() {
        let meta = Meta::new("demo", "app")
            .with_annotation("pylon.io/upstream-protocol.h2", "grpc,8443")
            .with_annotation("pylon.io/upstream-protocol.tls", "https");
        let protocols = upstream_protocols(&meta);
        assert_eq!(protocols.get("grpc").map(String::as_str), Some("h2"));
        assert_eq!(protocols.get("8443").map(String::as_str), Some("h2"));
        assert_eq!(protocols.get("https").map(String::as_str), Some("tls"));
    }

    #[test]
    fn test_cluster_limits() {
        let unset = cluster_limits(&Meta::new("demo", "app"));
        assert!(unset.is_unset());

        let meta = Meta::new("demo", "app")
            .with_annotation(ANNOTATION_MAX_CONNECTIONS, "1024")
            .with_annotation(ANNOTATION_MAX_RETRIES, "seven");
        let limits = cluster_limits(&meta);
        assert!(!limits.is_unset());
        assert_eq!(limits.max_connections, 1024);
        // Unparseable values stay unset.
        assert_eq!(limits.max_retries, 0);
    }

    #[test]
    fn test_retry_annotations() {
        let meta = Meta::new("demo", "web")
            .with_annotation(ANNOTATION_NUM_RETRIES, "3")
            .with_annotation(ANNOTATION_PER_TRY_TIMEOUT, "500ms");
        let (count, per_try) = retry_policy(&meta).unwrap();
        assert_eq!(count, 3);
        assert_eq!(per_try, Timeout::Duration(Duration::from_millis(500)));
        assert!(retry_policy(&Meta::new("demo", "web")).is_none());
    }
}
