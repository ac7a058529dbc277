//! RDS translator: renders the DAG's virtual hosts into the two
//! RouteConfigurations served to the proxy.

use envoy_types::pb::envoy::config::route::v3::{
    redirect_action, route::Action, route_action::ClusterSpecifier, route_match::PathSpecifier,
    weighted_cluster::ClusterWeight, HeaderMatcher, RedirectAction, RetryPolicy as EnvoyRetryPolicy,
    Route as EnvoyRoute, RouteAction, RouteConfiguration, RouteMatch,
    VirtualHost as EnvoyVirtualHost, WeightedCluster,
};
use envoy_types::pb::envoy::config::route::v3::header_matcher::HeaderMatchSpecifier;
use envoy_types::pb::envoy::config::route::v3::route_action::UpgradeConfig;
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatcher, StringMatcher,
};
use envoy_types::pb::google::protobuf::UInt32Value;

use crate::dag::{Dag, HeaderMatch, HeaderMatchKind, PathCondition, Route, VirtualHost};

use super::{timeout_to_proto, BuiltResource, INGRESS_HTTP, INGRESS_HTTPS, ROUTE_TYPE_URL};

/// Produce the `ingress_http` and `ingress_https` RouteConfigurations.
pub fn routes_from_dag(dag: &Dag) -> Vec<BuiltResource> {
    let mut insecure_hosts: Vec<EnvoyVirtualHost> = dag
        .virtual_hosts
        .values()
        .map(|vh| envoy_virtual_host(vh, true))
        .collect();
    insecure_hosts.sort_by(|a, b| a.name.cmp(&b.name));

    let mut secure_hosts: Vec<EnvoyVirtualHost> = dag
        .secure_hosts
        .values()
        .filter(|svh| !svh.host.routes.is_empty())
        .map(|svh| envoy_virtual_host(&svh.host, false))
        .collect();
    secure_hosts.sort_by(|a, b| a.name.cmp(&b.name));

    let http = RouteConfiguration {
        name: INGRESS_HTTP.to_string(),
        virtual_hosts: insecure_hosts,
        ..Default::default()
    };
    let https = RouteConfiguration {
        name: INGRESS_HTTPS.to_string(),
        virtual_hosts: secure_hosts,
        ..Default::default()
    };

    vec![
        BuiltResource::encode(INGRESS_HTTP, ROUTE_TYPE_URL, &http),
        BuiltResource::encode(INGRESS_HTTPS, ROUTE_TYPE_URL, &https),
    ]
}

fn envoy_virtual_host(vh: &VirtualHost, insecure: bool) -> EnvoyVirtualHost {
    let domains = if vh.fqdn == "*" {
        vec!["*".to_string()]
    } else {
        vec![vh.fqdn.clone(), format!("{}:*", vh.fqdn)]
    };

    EnvoyVirtualHost {
        name: vh.fqdn.clone(),
        domains,
        routes: vh.sorted_routes().into_iter().map(|r| envoy_route(r, insecure)).collect(),
        ..Default::default()
    }
}

fn envoy_route(route: &Route, insecure: bool) -> EnvoyRoute {
    let action = if insecure && route.https_upgrade {
        Action::Redirect(RedirectAction {
            scheme_rewrite_specifier: Some(
                redirect_action::SchemeRewriteSpecifier::HttpsRedirect(true),
            ),
            response_code: redirect_action::RedirectResponseCode::MovedPermanently as i32,
            ..Default::default()
        })
    } else {
        Action::Route(route_action(route))
    };

    EnvoyRoute {
        r#match: Some(route_match(route)),
        action: Some(action),
        ..Default::default()
    }
}

fn route_match(route: &Route) -> RouteMatch {
    let path_specifier = match &route.path {
        PathCondition::Prefix(p) => PathSpecifier::Prefix(p.clone()),
        PathCondition::Exact(p) => PathSpecifier::Path(p.clone()),
        PathCondition::Regex(p) | PathCondition::WildcardPrefix(p) => {
            PathSpecifier::SafeRegex(RegexMatcher {
                regex: match &route.path {
                    // A wildcard segment matches anything up to the next /.
                    PathCondition::WildcardPrefix(_) => wildcard_to_regex(p),
                    _ => p.clone(),
                },
                ..Default::default()
            })
        }
    };

    RouteMatch {
        path_specifier: Some(path_specifier),
        headers: route.headers.iter().map(header_matcher).collect(),
        ..Default::default()
    }
}

fn wildcard_to_regex(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 8);
    for c in prefix.chars() {
        match c {
            '*' => out.push_str("[^/]+"),
            '.' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push_str(".*");
    out
}

fn header_matcher(header: &HeaderMatch) -> HeaderMatcher {
    let specifier = match header.kind {
        HeaderMatchKind::Present => HeaderMatchSpecifier::PresentMatch(true),
        HeaderMatchKind::Contains => HeaderMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::Contains(header.value.clone())),
            ..Default::default()
        }),
        HeaderMatchKind::Exact => HeaderMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::Exact(header.value.clone())),
            ..Default::default()
        }),
    };

    HeaderMatcher {
        name: header.name.clone(),
        invert_match: header.invert,
        header_match_specifier: Some(specifier),
        ..Default::default()
    }
}

fn route_action(route: &Route) -> RouteAction {
    let cluster_specifier = if route.clusters.len() == 1 {
        Some(ClusterSpecifier::Cluster(route.clusters[0].cluster_name()))
    } else {
        let total: u32 = route.clusters.iter().map(|c| c.weight).sum();
        let clusters: Vec<ClusterWeight> = route
            .clusters
            .iter()
            .map(|c| ClusterWeight {
                name: c.cluster_name(),
                weight: Some(UInt32Value { value: c.weight }),
                ..Default::default()
            })
            .collect();
        #[allow(deprecated)]
        let weighted = WeightedCluster {
            clusters,
            total_weight: Some(UInt32Value { value: total }),
            ..Default::default()
        };
        Some(ClusterSpecifier::WeightedClusters(weighted))
    };

    let mut action = RouteAction {
        cluster_specifier,
        timeout: timeout_to_proto(route.response_timeout),
        idle_timeout: timeout_to_proto(route.idle_timeout),
        ..Default::default()
    };

    if !route.prefix_rewrite.is_empty() {
        action.prefix_rewrite = route.prefix_rewrite.clone();
    }
    if route.websocket {
        action.upgrade_configs =
            vec![UpgradeConfig { upgrade_type: "websocket".to_string(), ..Default::default() }];
    }
    if let Some(retry) = &route.retry_policy {
        action.retry_policy = Some(EnvoyRetryPolicy {
            retry_on: "5xx".to_string(),
            num_retries: Some(UInt32Value { value: retry.num_retries }),
            per_try_timeout: timeout_to_proto(retry.per_try_timeout),
            ..Default::default()
        });
    }

    action
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use crate::dag::{Cluster, LbStrategy, ServicePortTarget};
    use crate::model::annotations::{ClusterLimits, Timeout};

    use super::*;

    fn cluster(service: &str, weight: u32) -> Cluster {
        Cluster {
            upstream: ServicePortTarget {
                namespace: "demo".into(),
                service: service.into(),
                port_name: String::new(),
                port_number: 80,
                external_name: None,
                protocol: Default::default(),
            },
            weight,
            lb_strategy: LbStrategy::RoundRobin,
            health_check: None,
            validation: None,
            limits: ClusterLimits::default(),
        }
    }

    fn decode(resource: &BuiltResource) -> RouteConfiguration {
        RouteConfiguration::decode(resource.resource.value.as_slice()).unwrap()
    }

    #[test]
    fn test_emits_both_route_configurations() {
        let dag = Dag::default();
        let resources = routes_from_dag(&dag);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name, INGRESS_HTTP);
        assert_eq!(resources[1].name, INGRESS_HTTPS);
    }

    #[test]
    fn test_single_cluster_action() {
        let mut dag = Dag::default();
        let mut vh = crate::dag::VirtualHost::new("example.com", 80);
        let route =
            Route::new(PathCondition::Prefix("/".to_string()), vec![cluster("app", 1)]);
        vh.routes.insert(route.condition_key(), route);
        dag.virtual_hosts.insert("example.com".to_string(), vh);

        let config = decode(&routes_from_dag(&dag)[0]);
        let envoy_vh = &config.virtual_hosts[0];
        assert_eq!(envoy_vh.domains, vec!["example.com", "example.com:*"]);
        let action = envoy_vh.routes[0].action.as_ref().unwrap();
        match action {
            Action::Route(ra) => match &ra.cluster_specifier {
                Some(ClusterSpecifier::Cluster(name)) => assert_eq!(name, "demo/app/80"),
                other => panic!("unexpected specifier: {other:?}"),
            },
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_weighted_cluster_action_totals() {
        let mut dag = Dag::default();
        let mut vh = crate::dag::VirtualHost::new("example.com", 80);
        let route = Route::new(
            PathCondition::Prefix("/".to_string()),
            vec![cluster("a", 1), cluster("b", 3)],
        );
        vh.routes.insert(route.condition_key(), route);
        dag.virtual_hosts.insert("example.com".to_string(), vh);

        let config = decode(&routes_from_dag(&dag)[0]);
        let action = config.virtual_hosts[0].routes[0].action.as_ref().unwrap();
        let Action::Route(ra) = action else { panic!("expected route action") };
        let Some(ClusterSpecifier::WeightedClusters(wc)) = &ra.cluster_specifier else {
            panic!("expected weighted clusters");
        };
        #[allow(deprecated)]
        let total = wc.total_weight.as_ref().map(|w| w.value);
        assert_eq!(total, Some(4));
        assert_eq!(wc.clusters.len(), 2);
        assert_eq!(wc.clusters[0].weight.as_ref().map(|w| w.value), Some(1));
        assert_eq!(wc.clusters[1].weight.as_ref().map(|w| w.value), Some(3));
    }

    #[test]
    fn test_https_upgrade_renders_redirect_on_insecure_only() {
        let mut dag = Dag::default();
        let mut vh = crate::dag::VirtualHost::new("example.com", 80);
        let mut route =
            Route::new(PathCondition::Prefix("/".to_string()), vec![cluster("app", 1)]);
        route.https_upgrade = true;
        vh.routes.insert(route.condition_key(), route);
        dag.virtual_hosts.insert("example.com".to_string(), vh);

        let config = decode(&routes_from_dag(&dag)[0]);
        let action = config.virtual_hosts[0].routes[0].action.as_ref().unwrap();
        assert!(matches!(action, Action::Redirect(_)));
    }

    #[test]
    fn test_route_ordering_in_emitted_config() {
        let mut dag = Dag::default();
        let mut vh = crate::dag::VirtualHost::new("example.com", 80);
        for path in ["/", "/api", "/api/v1"] {
            let route =
                Route::new(PathCondition::Prefix(path.to_string()), vec![cluster("app", 1)]);
            vh.routes.insert(route.condition_key(), route);
        }
        dag.virtual_hosts.insert("example.com".to_string(), vh);

        let config = decode(&routes_from_dag(&dag)[0]);
        let prefixes: Vec<String> = config.virtual_hosts[0]
            .routes
            .iter()
            .map(|r| match r.r#match.as_ref().unwrap().path_specifier.as_ref().unwrap() {
                PathSpecifier::Prefix(p) => p.clone(),
                other => panic!("unexpected specifier: {other:?}"),
            })
            .collect();
        assert_eq!(prefixes, vec!["/api/v1", "/api", "/"]);
    }

    #[test]
    fn test_timeout_and_websocket_rendering() {
        let mut dag = Dag::default();
        let mut vh = crate::dag::VirtualHost::new("example.com", 80);
        let mut route =
            Route::new(PathCondition::Prefix("/ws".to_string()), vec![cluster("app", 1)]);
        route.websocket = true;
        route.response_timeout = Timeout::Duration(std::time::Duration::from_secs(30));
        vh.routes.insert(route.condition_key(), route);
        dag.virtual_hosts.insert("example.com".to_string(), vh);

        let config = decode(&routes_from_dag(&dag)[0]);
        let Action::Route(ra) =
            config.virtual_hosts[0].routes[0].action.as_ref().unwrap()
        else {
            panic!("expected route action");
        };
        assert_eq!(ra.timeout.as_ref().map(|t| t.seconds), Some(30));
        assert_eq!(ra.upgrade_configs[0].upgrade_type, "websocket");
    }

    #[test]
    fn test_wildcard_prefix_becomes_regex() {
        assert_eq!(wildcard_to_regex("/api/*/users"), "/api/[^/]+/users.*");
    }
}
