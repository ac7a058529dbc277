//! EDS translator: Endpoints events flow directly into the
//! ClusterLoadAssignment cache, bypassing the DAG.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use tracing::debug;

use crate::cache::Caches;
use crate::model::{Endpoints, NamespacedName, Protocol};

use super::{socket_address, BuiltResource, ENDPOINT_TYPE_URL};

/// Translates Endpoints objects into ClusterLoadAssignments named
/// `<namespace>/<service>/<port-name>`.
///
/// The translator runs out-of-band from the DAG builder; it writes only to
/// the endpoints cache, which no other translator touches.
#[derive(Debug)]
pub struct EndpointsTranslator {
    caches: Arc<Caches>,
    endpoints: Mutex<HashMap<NamespacedName, Arc<Endpoints>>>,
}

impl EndpointsTranslator {
    pub fn new(caches: Arc<Caches>) -> Self {
        Self { caches, endpoints: Mutex::new(HashMap::new()) }
    }

    /// Apply an add or update event.
    pub fn upsert(&self, endpoints: Arc<Endpoints>) {
        let key = endpoints.meta.namespaced_name();
        let old = {
            let mut map = self.endpoints.lock().expect("endpoints lock poisoned");
            map.insert(key.clone(), endpoints.clone())
        };
        if let Some(old) = &old {
            if old.subsets.is_empty() && endpoints.subsets.is_empty() {
                // Nothing observable changed; avoid a no-op notification.
                return;
            }
        }
        self.recompute(old.as_deref(), Some(&endpoints));
    }

    /// Apply a delete event.
    pub fn remove(&self, key: &NamespacedName) {
        let old = {
            let mut map = self.endpoints.lock().expect("endpoints lock poisoned");
            map.remove(key)
        };
        if let Some(old) = old {
            self.recompute(Some(&old), None);
        }
    }

    /// Recompute the EDS cache entries covered by an old/new Endpoints pair:
    /// add or update every assignment present in the new object, then remove
    /// assignments only the old object produced.
    fn recompute(&self, old: Option<&Endpoints>, new: Option<&Endpoints>) {
        let mut seen = HashSet::new();

        if let Some(new) = new {
            for subset in &new.subsets {
                if subset.addresses.is_empty() {
                    // Subsets without ready addresses are skipped.
                    continue;
                }
                let mut addresses = subset.addresses.clone();
                addresses.sort();

                for port in &subset.ports {
                    if port.protocol != Protocol::Tcp {
                        continue;
                    }
                    let name = assignment_name(new, &port.name);
                    let lb_endpoints = addresses
                        .iter()
                        .map(|ip| LbEndpoint {
                            host_identifier: Some(HostIdentifier::Endpoint(Endpoint {
                                address: Some(socket_address(ip, port.port as u32)),
                                ..Default::default()
                            })),
                            ..Default::default()
                        })
                        .collect();

                    let assignment = ClusterLoadAssignment {
                        cluster_name: name.clone(),
                        endpoints: vec![LocalityLbEndpoints {
                            lb_endpoints,
                            ..Default::default()
                        }],
                        ..Default::default()
                    };

                    seen.insert(name.clone());
                    self.caches.endpoints.add(BuiltResource::encode(
                        name,
                        ENDPOINT_TYPE_URL,
                        &assignment,
                    ));
                }
            }
        }

        // Assignments from the old spec that no longer match any port are
        // removed.
        if let Some(old) = old {
            for subset in &old.subsets {
                if subset.addresses.is_empty() {
                    continue;
                }
                for port in &subset.ports {
                    let name = assignment_name(old, &port.name);
                    if !seen.contains(&name) {
                        debug!(name = %name, "removing stale load assignment");
                        self.caches.endpoints.remove(&name);
                    }
                }
            }
        }
    }
}

fn assignment_name(endpoints: &Endpoints, port_name: &str) -> String {
    format!("{}/{}/{port_name}", endpoints.meta.namespace, endpoints.meta.name)
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use crate::model::{EndpointPort, EndpointSubset, Meta};

    use super::*;

    fn translator() -> (Arc<Caches>, EndpointsTranslator) {
        let caches = Caches::new();
        (caches.clone(), EndpointsTranslator::new(caches))
    }

    fn endpoints(ns: &str, name: &str, subsets: Vec<EndpointSubset>) -> Arc<Endpoints> {
        Arc::new(Endpoints { meta: Meta::new(ns, name), subsets })
    }

    fn subset(addresses: &[&str], ports: &[(&str, i32, Protocol)]) -> EndpointSubset {
        EndpointSubset {
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            ports: ports
                .iter()
                .map(|(name, port, protocol)| EndpointPort {
                    name: name.to_string(),
                    port: *port,
                    protocol: *protocol,
                })
                .collect(),
        }
    }

    fn decode(resource: &BuiltResource) -> ClusterLoadAssignment {
        ClusterLoadAssignment::decode(resource.resource.value.as_slice()).unwrap()
    }

    #[test]
    fn test_basic_assignment() {
        let (_caches, translator) = translator();
        translator.upsert(endpoints(
            "demo",
            "app",
            vec![subset(&["10.0.0.1"], &[("", 8080, Protocol::Tcp)])],
        ));

        let contents = translator.caches.endpoints.contents();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].name, "demo/app/");
        let cla = decode(&contents[0]);
        assert_eq!(cla.cluster_name, "demo/app/");
        assert_eq!(cla.endpoints[0].lb_endpoints.len(), 1);
    }

    #[test]
    fn test_addresses_sorted_by_ip() {
        let (_caches, translator) = translator();
        translator.upsert(endpoints(
            "demo",
            "app",
            vec![subset(&["10.0.0.9", "10.0.0.1", "10.0.0.5"], &[("http", 8080, Protocol::Tcp)])],
        ));

        let cla = decode(&translator.caches.endpoints.contents()[0]);
        let ips: Vec<String> = cla.endpoints[0]
            .lb_endpoints
            .iter()
            .map(|e| match e.host_identifier.as_ref().unwrap() {
                HostIdentifier::Endpoint(ep) => {
                    match ep.address.as_ref().unwrap().address.as_ref().unwrap() {
                        envoy_types::pb::envoy::config::core::v3::address::Address::SocketAddress(sa) => sa.address.clone(),
                        other => panic!("unexpected address {other:?}"),
                    }
                }
                other => panic!("unexpected host identifier {other:?}"),
            })
            .collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.5", "10.0.0.9"]);
    }

    #[test]
    fn test_non_tcp_ports_skipped() {
        let (_caches, translator) = translator();
        translator.upsert(endpoints(
            "demo",
            "app",
            vec![subset(&["10.0.0.1"], &[("dns", 53, Protocol::Udp)])],
        ));
        assert!(translator.caches.endpoints.contents().is_empty());
    }

    #[test]
    fn test_empty_subsets_skipped() {
        let (_caches, translator) = translator();
        translator.upsert(endpoints(
            "demo",
            "app",
            vec![subset(&[], &[("http", 8080, Protocol::Tcp)])],
        ));
        assert!(translator.caches.endpoints.contents().is_empty());
    }

    #[test]
    fn test_stale_assignment_removed_on_update() {
        let (_caches, translator) = translator();
        translator.upsert(endpoints(
            "demo",
            "app",
            vec![subset(&["10.0.0.1"], &[("http", 8080, Protocol::Tcp), ("admin", 9090, Protocol::Tcp)])],
        ));
        assert_eq!(translator.caches.endpoints.contents().len(), 2);

        // The admin port disappears; its assignment must go with it.
        translator.upsert(endpoints(
            "demo",
            "app",
            vec![subset(&["10.0.0.1"], &[("http", 8080, Protocol::Tcp)])],
        ));
        let names: Vec<String> =
            translator.caches.endpoints.contents().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["demo/app/http"]);
    }

    #[test]
    fn test_remove_clears_assignments() {
        let (_caches, translator) = translator();
        let ep = endpoints(
            "demo",
            "app",
            vec![subset(&["10.0.0.1"], &[("http", 8080, Protocol::Tcp)])],
        );
        translator.upsert(ep);
        assert_eq!(translator.caches.endpoints.contents().len(), 1);

        translator.remove(&NamespacedName::new("demo", "app"));
        assert!(translator.caches.endpoints.contents().is_empty());
    }
}
