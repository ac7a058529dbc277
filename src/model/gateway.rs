//! Gateway-API resources: HTTPRoute and the Gateway listeners that select
//! which routes bind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::meta::Meta;

/// How an HTTPRoute path match is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathMatchType {
    #[default]
    Prefix,
    Exact,
    RegularExpression,
}

/// A match within an HTTPRoute rule. Only prefix path matches are honoured;
/// other types invalidate the route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpPathMatch {
    #[serde(default)]
    pub match_type: PathMatchType,
    #[serde(default)]
    pub value: String,
}

/// A forwarding target of an HTTPRoute rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRouteForward {
    pub service_name: String,
    pub port: i32,
    #[serde(default)]
    pub weight: u32,
}

/// One rule of an HTTPRoute: matches paired with forwarding targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRouteRule {
    #[serde(default)]
    pub matches: Vec<HttpPathMatch>,
    #[serde(default)]
    pub forward_to: Vec<HttpRouteForward>,
}

/// Gateway-API HTTPRoute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoute {
    pub meta: Meta,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub rules: Vec<HttpRouteRule>,
}

/// Which namespaces a Gateway listener accepts routes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteNamespaces {
    All,
    Selector,
    #[default]
    Same,
}

/// Route-binding selector on a Gateway listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBinding {
    #[serde(default)]
    pub from: RouteNamespaces,
    /// Namespace labels matched when `from` is `Selector`.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

/// A Gateway listener; only the route binding participates in translation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayListener {
    #[serde(default)]
    pub routes: RouteBinding,
}

/// Gateway-API Gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub meta: Meta,
    #[serde(default)]
    pub listeners: Vec<GatewayListener>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_binding_default_is_same() {
        let binding = RouteBinding::default();
        assert_eq!(binding.from, RouteNamespaces::Same);
    }

    #[test]
    fn test_httproute_deserializes() {
        let raw = r#"{
            "meta": {"namespace": "demo", "name": "route"},
            "hostnames": ["shop.example.com"],
            "rules": [{
                "matches": [{"match_type": "Prefix", "value": "/cart"}],
                "forward_to": [{"service_name": "cart", "port": 80, "weight": 2}]
            }]
        }"#;
        let route: HttpRoute = serde_json::from_str(raw).unwrap();
        assert_eq!(route.hostnames, vec!["shop.example.com"]);
        assert_eq!(route.rules[0].matches[0].match_type, PathMatchType::Prefix);
        assert_eq!(route.rules[0].forward_to[0].weight, 2);
    }
}
