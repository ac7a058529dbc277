//! The DAG builder.
//!
//! `build` is a pure function over a store snapshot: it walks the watched
//! routing objects, applies delegation and validation rules, and produces a
//! fresh DAG plus one status report per observed HTTPProxy and HTTPRoute.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::model::annotations::{self, ClusterLimits, Timeout, TlsVersion};
use crate::model::{
    HttpProxy, HttpRoute, Ingress, IngressRule, NamespacedName, ObjectKind, PathMatchType,
    PathType, ProxyService, RouteNamespaces, ServicePortRef,
};
use crate::observability::metrics::{counters, Counters};
use crate::store::StoreSnapshot;

use super::conditions::{
    merge_header_conditions, merge_prefix, path_condition, validate_header_matches,
    validate_path_conditions, ConditionContext,
};
use super::secrets::{resolve_ca_secret, resolve_secret, DelegationIndex};
use super::status::{Status, StatusCondition};
use super::{
    Cluster, Dag, HeaderMatch, LbStrategy, PathCondition, RetryOn, Route, SecureVirtualHost,
    ServicePortTarget, TcpProxyTarget, UpstreamProtocol, UpstreamValidationContext, VirtualHost,
};

/// Parameters the builder applies uniformly across builds.
#[derive(Debug, Clone, Default)]
pub struct BuilderConfig {
    /// Namespaces allowed to hold root HTTPProxies; empty allows any.
    pub root_namespaces: Vec<String>,
}

impl BuilderConfig {
    fn root_allowed(&self, namespace: &str) -> bool {
        self.root_namespaces.is_empty()
            || self.root_namespaces.iter().any(|ns| ns == namespace)
    }
}

/// Build a DAG and status set from a frozen store snapshot.
///
/// Deterministic and side-effect free: identical snapshots produce
/// identical DAGs regardless of the event order that created them.
pub fn build(snapshot: &StoreSnapshot, config: &BuilderConfig) -> (Dag, Vec<Status>) {
    let mut builder = Builder {
        snapshot,
        config,
        virtual_hosts: BTreeMap::new(),
        secure_hosts: BTreeMap::new(),
        proxy_status: BTreeMap::new(),
        route_status: BTreeMap::new(),
        visited: HashSet::new(),
    };

    builder.compute_secure_virtualhosts();
    builder.compute_ingresses();
    builder.compute_httpproxies();
    builder.compute_httproutes();
    builder.compute_orphans();

    Counters::incr(&counters().dag_builds);
    builder.finish()
}

struct Builder<'a> {
    snapshot: &'a StoreSnapshot,
    config: &'a BuilderConfig,
    virtual_hosts: BTreeMap<String, VirtualHost>,
    secure_hosts: BTreeMap<String, SecureVirtualHost>,
    proxy_status: BTreeMap<NamespacedName, Status>,
    route_status: BTreeMap<NamespacedName, Status>,
    /// Proxies reachable from some root, for orphan detection.
    visited: HashSet<NamespacedName>,
}

/// Routes staged during a root's include walk; committed only when the walk
/// finishes without a fatal error.
#[derive(Default)]
struct WalkState {
    staged: Vec<StagedRoute>,
    staged_tcp: Option<TcpProxyTarget>,
    /// Current DFS chain, for cycle detection and diagnostics.
    chain: Vec<NamespacedName>,
    /// Every proxy visited beneath this root.
    seen: HashSet<NamespacedName>,
    /// Fatal error: the root is marked Invalid and nothing is mounted.
    fatal: Option<String>,
    /// Non-fatal errors attributed to a specific proxy in the chain.
    local_errors: Vec<(NamespacedName, String)>,
}

struct StagedRoute {
    route: Route,
    permit_insecure: bool,
}

impl<'a> Builder<'a> {
    fn delegations(&self) -> DelegationIndex<'a> {
        DelegationIndex::new(&self.snapshot.delegations)
    }

    /// Pass 1–2: resolve TLS secrets and materialise secure virtual hosts,
    /// before any route placement, so routes see a stable set of secure
    /// hosts.
    fn compute_secure_virtualhosts(&mut self) {
        for ing in self.snapshot.ingresses.values() {
            for tls in &ing.tls {
                let secret_ref =
                    NamespacedName::from_qualified(&tls.secret_name, &ing.meta.namespace);
                match resolve_secret(
                    &self.snapshot.secrets,
                    &self.delegations(),
                    &secret_ref,
                    &ing.meta.namespace,
                ) {
                    Ok(secret) => {
                        let secret = Arc::new(secret);
                        for host in &tls.hosts {
                            if host.contains('*') {
                                warn!(host = %host, "rejecting wildcard TLS host");
                                continue;
                            }
                            let svh = self
                                .secure_hosts
                                .entry(host.clone())
                                .or_insert_with(|| SecureVirtualHost::new(host.clone()));
                            svh.secret = Some(secret.clone());
                            svh.min_tls_version = annotations::min_tls_version(&ing.meta);
                        }
                    }
                    Err(e) => {
                        warn!(
                            ingress = %ing.meta.namespaced_name(),
                            secret = %secret_ref,
                            error = %e,
                            "cannot resolve TLS secret for Ingress; host stays insecure"
                        );
                    }
                }
            }
        }

        for proxy in self.snapshot.proxies.values() {
            let Some(vhost) = &proxy.spec.virtualhost else { continue };
            if !self.config.root_allowed(&proxy.meta.namespace) || !valid_fqdn(&vhost.fqdn) {
                // Reported during HTTPProxy expansion.
                continue;
            }
            let Some(tls) = &vhost.tls else { continue };

            if tls.passthrough {
                let svh = self
                    .secure_hosts
                    .entry(vhost.fqdn.clone())
                    .or_insert_with(|| SecureVirtualHost::new(vhost.fqdn.clone()));
                svh.passthrough = true;
                continue;
            }
            if tls.secret_name.is_empty() {
                continue;
            }

            let secret_ref =
                NamespacedName::from_qualified(&tls.secret_name, &proxy.meta.namespace);
            match resolve_secret(
                &self.snapshot.secrets,
                &self.delegations(),
                &secret_ref,
                &proxy.meta.namespace,
            ) {
                Ok(secret) => {
                    let svh = self
                        .secure_hosts
                        .entry(vhost.fqdn.clone())
                        .or_insert_with(|| SecureVirtualHost::new(vhost.fqdn.clone()));
                    svh.secret = Some(Arc::new(secret));
                    svh.min_tls_version = TlsVersion::parse(&tls.minimum_protocol_version);
                }
                Err(e) => {
                    warn!(
                        proxy = %proxy.meta.namespaced_name(),
                        secret = %secret_ref,
                        error = %e,
                        "cannot resolve TLS secret for HTTPProxy; host stays insecure"
                    );
                }
            }
        }
    }

    /// Pass 3: deconstruct each Ingress into routes and virtual hosts.
    fn compute_ingresses(&mut self) {
        for ing in self.snapshot.ingresses.values() {
            let websockets = annotations::websocket_routes(&ing.meta);
            let timeout = annotations::request_timeout(&ing.meta);
            let retry = annotations::retry_policy(&ing.meta);
            let tls_required = annotations::tls_required(&ing.meta);
            let http_allowed = annotations::http_allowed(&ing.meta);

            for rule in effective_rules(ing) {
                if rule.host.contains('*') {
                    warn!(
                        ingress = %ing.meta.namespaced_name(),
                        host = %rule.host,
                        "rejecting wildcard host on Ingress rule"
                    );
                    continue;
                }
                let host = if rule.host.is_empty() { "*" } else { rule.host.as_str() };

                for path in &rule.paths {
                    let path_str = if path.path.is_empty() { "/" } else { path.path.as_str() };
                    let condition = match ingress_path_condition(path_str, path.path_type) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(
                                ingress = %ing.meta.namespaced_name(),
                                path = %path_str,
                                error = %e,
                                "skipping Ingress path with invalid regex"
                            );
                            continue;
                        }
                    };

                    let backend_ref = NamespacedName::new(
                        ing.meta.namespace.clone(),
                        path.backend.service_name.clone(),
                    );
                    let (target, limits) =
                        match self.lookup_service(&backend_ref, &path.backend.service_port) {
                            Ok(t) => t,
                            Err(e) => {
                                debug!(
                                    ingress = %ing.meta.namespaced_name(),
                                    error = %e,
                                    "skipping Ingress path with unresolvable backend"
                                );
                                continue;
                            }
                        };

                    let mut route = Route::new(
                        condition,
                        vec![Cluster {
                            upstream: target,
                            weight: 1,
                            lb_strategy: LbStrategy::RoundRobin,
                            health_check: None,
                            validation: None,
                            limits,
                        }],
                    );
                    route.websocket = websockets.contains(path_str);
                    route.response_timeout = timeout;
                    if let Some((count, per_try)) = retry {
                        route.retry_policy =
                            Some(RetryOn { num_retries: count, per_try_timeout: per_try });
                    }

                    let secure_exists =
                        host != "*" && self.secure_hosts.contains_key(host);

                    if tls_required || http_allowed {
                        let mut insecure = route.clone();
                        insecure.https_upgrade = tls_required && secure_exists;
                        let vh = self
                            .virtual_hosts
                            .entry(host.to_string())
                            .or_insert_with(|| VirtualHost::new(host, 80));
                        vh.routes.insert(insecure.condition_key(), insecure);
                    }
                    if secure_exists {
                        let svh = self.secure_hosts.get_mut(host).expect("checked above");
                        svh.host.routes.insert(route.condition_key(), route);
                    }
                }
            }
        }
    }

    /// Pass 4: expand each root HTTPProxy by walking its include tree.
    fn compute_httpproxies(&mut self) {
        let proxies: Vec<Arc<HttpProxy>> = self.snapshot.proxies.values().cloned().collect();
        for proxy in proxies {
            if !proxy.is_root() {
                continue;
            }
            let key = proxy.meta.namespaced_name();
            let object = proxy.meta.object_ref(ObjectKind::HttpProxy);
            let vhost = proxy.spec.virtualhost.as_ref().expect("roots carry a virtualhost");
            let fqdn = vhost.fqdn.clone();

            if !self.config.root_allowed(&proxy.meta.namespace) {
                self.set_proxy_status(Status::invalid(
                    object,
                    "root HTTPProxy is not allowed in this namespace",
                    Some(fqdn),
                ));
                continue;
            }
            if vhost.fqdn.is_empty() {
                self.set_proxy_status(Status::invalid(
                    object,
                    "Spec.VirtualHost.Fqdn must be specified",
                    None,
                ));
                continue;
            }
            if vhost.fqdn.contains('*') {
                self.set_proxy_status(Status::invalid(
                    object,
                    format!("Spec.VirtualHost.Fqdn \"{fqdn}\" cannot use wildcards"),
                    Some(fqdn),
                ));
                continue;
            }

            let mut state = WalkState::default();
            self.walk_proxy(&mut state, &proxy, String::new(), Vec::new());

            // Reachability is recorded even for failed walks so that the
            // members of a broken chain are not additionally reported as
            // orphans.
            self.visited.extend(state.seen.iter().cloned());

            if let Some(reason) = state.fatal.take() {
                Counters::incr(&counters().invalid_roots);
                self.set_proxy_status(Status::invalid(
                    proxy.meta.object_ref(ObjectKind::HttpProxy),
                    reason,
                    Some(fqdn),
                ));
                continue;
            }

            if let Err(reason) = self.commit(&fqdn, state.staged, state.staged_tcp) {
                Counters::incr(&counters().invalid_roots);
                self.set_proxy_status(Status::invalid(
                    proxy.meta.object_ref(ObjectKind::HttpProxy),
                    reason,
                    Some(fqdn),
                ));
                continue;
            }

            for (member, error) in state.local_errors {
                let meta = self
                    .snapshot
                    .proxies
                    .get(&member)
                    .map(|p| p.meta.object_ref(ObjectKind::HttpProxy))
                    .unwrap_or_else(|| {
                        crate::model::ObjectRef::new(
                            ObjectKind::HttpProxy,
                            member.namespace.clone(),
                            member.name.clone(),
                        )
                    });
                self.set_proxy_status(Status::invalid(meta, error, None));
            }

            for member in &state.seen {
                if !self.proxy_status.contains_key(member) {
                    let vhost = (member == &key).then(|| fqdn.clone());
                    self.set_proxy_status(Status::valid(
                        crate::model::ObjectRef::new(
                            ObjectKind::HttpProxy,
                            member.namespace.clone(),
                            member.name.clone(),
                        ),
                        vhost,
                    ));
                }
            }
        }
    }

    /// Depth-first include walk, accumulating prefix and header context.
    fn walk_proxy(
        &self,
        state: &mut WalkState,
        proxy: &HttpProxy,
        prefix: String,
        headers: Vec<HeaderMatch>,
    ) {
        if state.fatal.is_some() {
            return;
        }
        let key = proxy.meta.namespaced_name();
        if state.chain.contains(&key) {
            let mut chain: Vec<String> =
                state.chain.iter().map(ToString::to_string).collect();
            chain.push(key.to_string());
            state.fatal =
                Some(format!("include creates a delegation cycle: {}", chain.join(" -> ")));
            return;
        }
        state.chain.push(key.clone());
        state.seen.insert(key.clone());

        if let Some(tcp) = &proxy.spec.tcpproxy {
            if state.staged_tcp.is_some() {
                state.fatal =
                    Some("tcpproxy: multiple tcpproxy blocks in one delegation chain".to_string());
            } else {
                match self.tcp_clusters(proxy, &tcp.services) {
                    Ok(clusters) => state.staged_tcp = Some(TcpProxyTarget { clusters }),
                    Err(e) => state.fatal = Some(format!("tcpproxy: {e}")),
                }
            }
        }

        for route in &proxy.spec.routes {
            if state.fatal.is_some() {
                break;
            }
            if let Err(e) = validate_path_conditions(&route.conditions, ConditionContext::Route) {
                state.fatal = Some(e);
                break;
            }
            let route_headers = match merge_header_conditions(&route.conditions) {
                Ok(h) => h,
                Err(e) => {
                    state.fatal = Some(e);
                    break;
                }
            };
            let mut merged_headers = headers.clone();
            merged_headers.extend(route_headers);
            if let Err(e) = validate_header_matches(&merged_headers) {
                state.fatal = Some(e);
                break;
            }

            if route.services.is_empty() {
                state.fatal = Some("route: at least one service must be specified".to_string());
                break;
            }
            let clusters = match self.proxy_clusters(proxy, &route.services) {
                Ok(c) => c,
                Err(e) => {
                    state.fatal = Some(format!("route: {e}"));
                    break;
                }
            };

            let merged_prefix = merge_prefix(&prefix, &route.conditions);
            let mut dag_route = Route::new(path_condition(merged_prefix), clusters);
            dag_route.headers = merged_headers;
            dag_route.websocket = route.enable_websockets;
            dag_route.prefix_rewrite = route.prefix_rewrite.clone();
            if let Some(timeouts) = &route.timeout_policy {
                dag_route.response_timeout = Timeout::parse(&timeouts.response);
                dag_route.idle_timeout = Timeout::parse(&timeouts.idle);
            }
            if let Some(retry) = &route.retry_policy {
                if retry.num_retries > 0 {
                    dag_route.retry_policy = Some(RetryOn {
                        num_retries: retry.num_retries,
                        per_try_timeout: Timeout::parse(&retry.per_try_timeout),
                    });
                }
            }

            state
                .staged
                .push(StagedRoute { route: dag_route, permit_insecure: route.permit_insecure });
        }

        for include in &proxy.spec.includes {
            if state.fatal.is_some() {
                break;
            }
            if let Err(e) =
                validate_path_conditions(&include.conditions, ConditionContext::Include)
            {
                state.fatal = Some(e);
                break;
            }
            let include_headers = match merge_header_conditions(&include.conditions) {
                Ok(h) => h,
                Err(e) => {
                    state.fatal = Some(e);
                    break;
                }
            };

            let target_namespace = if include.namespace.is_empty() {
                proxy.meta.namespace.clone()
            } else {
                include.namespace.clone()
            };
            let target = NamespacedName::new(target_namespace, include.name.clone());

            let Some(delegate) = self.snapshot.proxies.get(&target) else {
                // The declaring proxy is at fault; ancestors stay valid and
                // the missing subtree is simply not mounted.
                state
                    .local_errors
                    .push((key.clone(), format!("include {target} not found")));
                continue;
            };

            let merged_prefix = merge_prefix(&prefix, &include.conditions);
            let mut merged_headers = headers.clone();
            merged_headers.extend(include_headers);
            let delegate = delegate.clone();
            self.walk_proxy(state, &delegate, merged_prefix, merged_headers);
        }

        state.chain.pop();
    }

    /// Commit a successful walk: place routes on the root's hosts, checking
    /// the one-route-per-condition invariant.
    fn commit(
        &mut self,
        fqdn: &str,
        staged: Vec<StagedRoute>,
        tcp: Option<TcpProxyTarget>,
    ) -> Result<(), String> {
        let secure_exists = self.secure_hosts.contains_key(fqdn);

        if tcp.is_some() && !secure_exists {
            return Err(
                "tcpproxy requires the virtualhost to terminate or pass through TLS".to_string()
            );
        }

        // Detect duplicates before mutating anything so an invalid root
        // mounts nothing.
        let mut keys = HashSet::new();
        for staged_route in &staged {
            let key = staged_route.route.condition_key();
            let existing_insecure = self
                .virtual_hosts
                .get(fqdn)
                .map(|vh| vh.routes.contains_key(&key))
                .unwrap_or(false);
            let existing_secure = self
                .secure_hosts
                .get(fqdn)
                .map(|svh| svh.host.routes.contains_key(&key))
                .unwrap_or(false);
            if !keys.insert(key) || existing_insecure || existing_secure {
                return Err(format!(
                    "duplicate conditions on route {:?}",
                    staged_route.route.path
                ));
            }
        }

        for staged_route in staged {
            let StagedRoute { route, permit_insecure } = staged_route;
            let mut insecure = route.clone();
            insecure.https_upgrade = secure_exists && !permit_insecure;
            let vh = self
                .virtual_hosts
                .entry(fqdn.to_string())
                .or_insert_with(|| VirtualHost::new(fqdn, 80));
            vh.routes.insert(insecure.condition_key(), insecure);

            if secure_exists && !permit_insecure {
                let svh = self.secure_hosts.get_mut(fqdn).expect("checked above");
                svh.host.routes.insert(route.condition_key(), route);
            }
        }

        if let Some(tcp) = tcp {
            let svh = self.secure_hosts.get_mut(fqdn).expect("checked above");
            svh.tcp_proxy = Some(tcp);
        }
        Ok(())
    }

    /// Pass 5: expand Gateway-bound HTTPRoutes.
    fn compute_httproutes(&mut self) {
        let mut bound: BTreeMap<NamespacedName, Arc<HttpRoute>> = BTreeMap::new();
        for gateway in self.snapshot.gateways.values() {
            for listener in &gateway.listeners {
                for (key, route) in &self.snapshot.httproutes {
                    let selected = match listener.routes.from {
                        RouteNamespaces::All => true,
                        RouteNamespaces::Same => route.meta.namespace == gateway.meta.namespace,
                        RouteNamespaces::Selector => self
                            .snapshot
                            .namespaces
                            .values()
                            .filter(|ns| ns.meta.name == route.meta.namespace)
                            .any(|ns| {
                                listener
                                    .routes
                                    .selector
                                    .iter()
                                    .all(|(k, v)| ns.meta.labels.get(k) == Some(v))
                            }),
                    };
                    if selected {
                        bound.insert(key.clone(), route.clone());
                    }
                }
            }
        }

        for (key, route) in bound {
            let object = route.meta.object_ref(ObjectKind::HttpRoute);
            let mut error: Option<String> = None;
            let mut mounted = false;

            let hosts: Vec<String> = if route.hostnames.is_empty() {
                vec!["*".to_string()]
            } else {
                route.hostnames.iter().filter(|h| *h == "*" || !h.contains('*')).cloned().collect()
            };

            for rule in &route.rules {
                let mut prefixes = Vec::new();
                for path_match in &rule.matches {
                    match path_match.match_type {
                        PathMatchType::Prefix => prefixes.push(if path_match.value.is_empty() {
                            "/".to_string()
                        } else {
                            path_match.value.clone()
                        }),
                        other => {
                            error = Some(format!(
                                "unsupported path match type {other:?}: only prefix matching is supported"
                            ));
                        }
                    }
                }
                if rule.matches.is_empty() {
                    prefixes.push("/".to_string());
                }

                let mut clusters = Vec::new();
                for forward in &rule.forward_to {
                    let service_ref = NamespacedName::new(
                        route.meta.namespace.clone(),
                        forward.service_name.clone(),
                    );
                    match self.lookup_service(&service_ref, &ServicePortRef::Number(forward.port))
                    {
                        Ok((target, limits)) => clusters.push(Cluster {
                            upstream: target,
                            weight: forward.weight,
                            lb_strategy: LbStrategy::RoundRobin,
                            health_check: None,
                            validation: None,
                            limits,
                        }),
                        Err(e) => error = Some(e),
                    }
                }
                if clusters.is_empty() {
                    continue;
                }
                normalize_weights(&mut clusters);

                for host in &hosts {
                    for prefix in &prefixes {
                        let dag_route = Route::new(
                            PathCondition::Prefix(prefix.clone()),
                            clusters.clone(),
                        );
                        let vh = self
                            .virtual_hosts
                            .entry(host.clone())
                            .or_insert_with(|| VirtualHost::new(host.clone(), 80));
                        vh.routes.insert(dag_route.condition_key(), dag_route);
                        mounted = true;
                    }
                }
            }

            let status = match (mounted, error) {
                (_, Some(e)) => Status::invalid(object, e, None),
                (true, None) => Status {
                    object,
                    condition: StatusCondition::Valid,
                    description: "valid HTTPRoute".to_string(),
                    vhost: None,
                },
                (false, None) => Status::invalid(object, "no routes could be mounted", None),
            };
            self.route_status.insert(key, status);
        }
    }

    /// Pass 6: report HTTPProxies that are neither roots nor reachable from
    /// one.
    fn compute_orphans(&mut self) {
        for (key, proxy) in &self.snapshot.proxies {
            if proxy.is_root() || self.visited.contains(key) {
                continue;
            }
            if !self.proxy_status.contains_key(key) {
                Counters::incr(&counters().orphaned_proxies);
                self.proxy_status.insert(
                    key.clone(),
                    Status::orphaned(proxy.meta.object_ref(ObjectKind::HttpProxy)),
                );
            }
        }
    }

    /// Pass 7: assemble the DAG and the ordered status list.
    fn finish(self) -> (Dag, Vec<Status>) {
        let mut dag = Dag::default();

        for (fqdn, vh) in self.virtual_hosts {
            if !vh.routes.is_empty() {
                dag.virtual_hosts.insert(fqdn, vh);
            }
        }
        for (fqdn, svh) in self.secure_hosts {
            if svh.host.routes.is_empty() && svh.tcp_proxy.is_none() {
                continue;
            }
            if let Some(secret) = &svh.secret {
                dag.secrets.insert(secret.sds_name(), secret.clone());
            }
            dag.secure_hosts.insert(fqdn, svh);
        }

        let mut statuses: Vec<Status> = self.proxy_status.into_values().collect();
        statuses.extend(self.route_status.into_values());
        (dag, statuses)
    }

    fn set_proxy_status(&mut self, status: Status) {
        let key = NamespacedName::new(
            status.object.namespace.clone(),
            status.object.name.clone(),
        );
        self.proxy_status.insert(key, status);
    }

    /// Resolve a service-port reference into an upstream target plus the
    /// service's circuit-breaker limits.
    fn lookup_service(
        &self,
        name: &NamespacedName,
        port: &ServicePortRef,
    ) -> Result<(ServicePortTarget, ClusterLimits), String> {
        let service = self
            .snapshot
            .services
            .get(name)
            .ok_or_else(|| format!("service \"{name}\" not found"))?;
        let service_port = service
            .find_port(port)
            .ok_or_else(|| format!("port \"{port}\" on service \"{name}\" not matched"))?;
        if service_port.protocol != crate::model::Protocol::Tcp {
            return Err(format!("port \"{port}\" on service \"{name}\" is not TCP"));
        }

        let protocols = annotations::upstream_protocols(&service.meta);
        let protocol = protocols
            .get(&service_port.name)
            .or_else(|| protocols.get(&service_port.port.to_string()))
            .map(|p| UpstreamProtocol::parse(p))
            .unwrap_or_default();

        Ok((
            ServicePortTarget {
                namespace: name.namespace.clone(),
                service: name.name.clone(),
                port_name: service_port.name.clone(),
                port_number: service_port.port,
                external_name: service.external_name.clone(),
                protocol,
            },
            annotations::cluster_limits(&service.meta),
        ))
    }

    /// Resolve the weighted services of an HTTPProxy route.
    fn proxy_clusters(
        &self,
        proxy: &HttpProxy,
        services: &[ProxyService],
    ) -> Result<Vec<Cluster>, String> {
        let mut clusters = Vec::with_capacity(services.len());
        for svc in services {
            let name = NamespacedName::new(proxy.meta.namespace.clone(), svc.name.clone());
            let (target, limits) = self.lookup_service(&name, &ServicePortRef::Number(svc.port))?;

            let validation = match &svc.upstream_validation {
                Some(validation) => {
                    let ca_ref = NamespacedName::from_qualified(
                        &validation.ca_secret,
                        &proxy.meta.namespace,
                    );
                    let ca_pem = resolve_ca_secret(
                        &self.snapshot.secrets,
                        &self.delegations(),
                        &ca_ref,
                        &proxy.meta.namespace,
                    )
                    .map_err(|e| format!("upstream validation CA secret \"{ca_ref}\": {e}"))?;
                    Some(UpstreamValidationContext {
                        ca_pem,
                        subject_name: validation.subject_name.clone(),
                    })
                }
                None => None,
            };

            let mut upstream = target;
            if validation.is_some() && !upstream.protocol.uses_tls() {
                upstream.protocol = UpstreamProtocol::Tls;
            }

            clusters.push(Cluster {
                upstream,
                weight: svc.weight,
                lb_strategy: LbStrategy::parse(&svc.strategy),
                health_check: svc.health_check.clone(),
                validation,
                limits,
            });
        }
        normalize_weights(&mut clusters);
        Ok(clusters)
    }

    fn tcp_clusters(
        &self,
        proxy: &HttpProxy,
        services: &[ProxyService],
    ) -> Result<Vec<Cluster>, String> {
        if services.is_empty() {
            return Err("at least one service must be specified".to_string());
        }
        self.proxy_clusters(proxy, services)
    }
}

/// The default-backend Ingress is rewritten to a stock rule so that one code
/// path mounts everything.
fn effective_rules(ing: &Ingress) -> Vec<IngressRule> {
    if ing.rules.is_empty() {
        if let Some(backend) = &ing.default_backend {
            return vec![IngressRule {
                host: String::new(),
                paths: vec![crate::model::IngressPath {
                    path: "/".to_string(),
                    path_type: PathType::Prefix,
                    backend: backend.clone(),
                }],
            }];
        }
    }
    ing.rules.clone()
}

/// Interpret an Ingress path string. Anything containing a regex
/// metacharacter is treated as a regular expression and pre-validated; the
/// expression is passed through without added anchors.
fn ingress_path_condition(path: &str, path_type: PathType) -> Result<PathCondition, String> {
    if path.contains(['[', '(', '*', '\\']) {
        regex::Regex::new(path).map_err(|e| format!("invalid path regex \"{path}\": {e}"))?;
        return Ok(PathCondition::Regex(path.to_string()));
    }
    Ok(match path_type {
        PathType::Exact => PathCondition::Exact(path.to_string()),
        PathType::Prefix => PathCondition::Prefix(path.to_string()),
    })
}

/// When every weight is absent each service gets an equal weight of one.
fn normalize_weights(clusters: &mut [Cluster]) {
    if clusters.iter().all(|c| c.weight == 0) {
        for cluster in clusters {
            cluster.weight = 1;
        }
    }
}

fn valid_fqdn(fqdn: &str) -> bool {
    !fqdn.is_empty() && !fqdn.contains('*')
}
