//! GraphViz rendering of the DAG for the diagnostics endpoint.

use std::fmt::Write;

use super::{Dag, PathCondition, Route};

/// Render the DAG as a GraphViz `digraph` document.
pub fn render_dot(dag: &Dag) -> String {
    let mut out = String::new();
    out.push_str("digraph DAG {\n  rankdir=\"LR\";\n  node [shape=record];\n");

    for (fqdn, vh) in &dag.virtual_hosts {
        let vh_id = node_id("vh", fqdn);
        let _ = writeln!(out, "  {vh_id} [label=\"virtualhost|{fqdn}:{}\"];", vh.port);
        for route in vh.routes.values() {
            write_route(&mut out, &vh_id, fqdn, route);
        }
    }

    for (fqdn, svh) in &dag.secure_hosts {
        let svh_id = node_id("svh", fqdn);
        let _ = writeln!(out, "  {svh_id} [label=\"securevirtualhost|{fqdn}:443\"];");
        for route in svh.host.routes.values() {
            write_route(&mut out, &svh_id, fqdn, route);
        }
        if let Some(secret) = &svh.secret {
            let secret_id = node_id("secret", &secret.sds_name());
            let _ = writeln!(out, "  {secret_id} [label=\"secret|{}\"];", secret.sds_name());
            let _ = writeln!(out, "  {svh_id} -> {secret_id};");
        }
        if let Some(tcp) = &svh.tcp_proxy {
            let tcp_id = node_id("tcp", fqdn);
            let _ = writeln!(out, "  {tcp_id} [label=\"tcpproxy\"];");
            let _ = writeln!(out, "  {svh_id} -> {tcp_id};");
            for cluster in &tcp.clusters {
                let cluster_id = node_id("cluster", &cluster.cluster_name());
                let _ = writeln!(
                    out,
                    "  {cluster_id} [label=\"cluster|{}\"];",
                    cluster.cluster_name()
                );
                let _ = writeln!(out, "  {tcp_id} -> {cluster_id};");
            }
        }
    }

    out.push_str("}\n");
    out
}

fn write_route(out: &mut String, parent_id: &str, host: &str, route: &Route) {
    let path = path_label(&route.path);
    let route_id = node_id("route", &format!("{host}{path}"));
    let _ = writeln!(out, "  {route_id} [label=\"route|{}\"];", escape(&path));
    let _ = writeln!(out, "  {parent_id} -> {route_id};");
    for cluster in &route.clusters {
        let cluster_id = node_id("cluster", &cluster.cluster_name());
        let _ = writeln!(out, "  {cluster_id} [label=\"cluster|{}\"];", cluster.cluster_name());
        let _ = writeln!(out, "  {route_id} -> {cluster_id} [label=\"{}\"];", cluster.weight);
    }
}

fn path_label(path: &PathCondition) -> String {
    match path {
        PathCondition::Prefix(p) => p.clone(),
        PathCondition::Exact(p) => format!("= {p}"),
        PathCondition::Regex(p) => format!("~ {p}"),
        PathCondition::WildcardPrefix(p) => p.clone(),
    }
}

/// DOT identifiers cannot contain most punctuation, so node names are
/// derived from a stable hash of their label.
fn node_id(prefix: &str, label: &str) -> String {
    format!("{prefix}_{:08x}", fnv1a(label.as_bytes()))
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use crate::dag::{Cluster, LbStrategy, ServicePortTarget, VirtualHost};
    use crate::model::annotations::ClusterLimits;

    use super::super::Route;
    use super::*;

    #[test]
    fn test_render_includes_hosts_routes_and_clusters() {
        let mut dag = Dag::default();
        let mut vh = VirtualHost::new("example.com", 80);
        let route = Route::new(
            PathCondition::Prefix("/api".to_string()),
            vec![Cluster {
                upstream: ServicePortTarget {
                    namespace: "demo".into(),
                    service: "app".into(),
                    port_name: "http".into(),
                    port_number: 80,
                    external_name: None,
                    protocol: Default::default(),
                },
                weight: 1,
                lb_strategy: LbStrategy::RoundRobin,
                health_check: None,
                validation: None,
                limits: ClusterLimits::default(),
            }],
        );
        vh.routes.insert(route.condition_key(), route);
        dag.virtual_hosts.insert("example.com".to_string(), vh);

        let dot = render_dot(&dag);
        assert!(dot.starts_with("digraph DAG {"));
        assert!(dot.contains("virtualhost|example.com:80"));
        assert!(dot.contains("route|/api"));
        assert!(dot.contains("cluster|demo/app/80"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn test_node_ids_are_stable() {
        assert_eq!(node_id("vh", "example.com"), node_id("vh", "example.com"));
        assert_ne!(node_id("vh", "a.com"), node_id("vh", "b.com"));
    }
}
