//! Input resource model.
//!
//! These types mirror the platform objects the control plane watches. The
//! platform client and its informers are external collaborators; they feed
//! these models through [`crate::store::ObjectStore`].

pub mod annotations;
mod core;
mod gateway;
mod httpproxy;
mod ingress;
mod meta;

pub use core::{
    CertificateDelegation, EndpointPort, EndpointSubset, Endpoints, Namespace, Protocol, Secret,
    Service, ServicePort, ServicePortRef, TlsCertificateDelegation, TLS_CERT_KEY,
    TLS_PRIVATE_KEY_KEY,
};
pub use gateway::{
    Gateway, GatewayListener, HttpPathMatch, HttpRoute, HttpRouteForward, HttpRouteRule,
    PathMatchType, RouteBinding, RouteNamespaces,
};
pub use httpproxy::{
    Condition, HeaderCondition, HealthCheckPolicy, HttpProxy, HttpProxySpec, Include, ProxyRoute,
    ProxyService, ProxyTls, RetryPolicy, TcpProxy, TimeoutPolicy, UpstreamValidation, VirtualHost,
};
pub use ingress::{Ingress, IngressBackend, IngressPath, IngressRule, IngressTls, PathType};
pub use meta::{Meta, NamespacedName, ObjectKind, ObjectRef};

/// Any watched object, as delivered by the change feed.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    Service(Service),
    Endpoints(Endpoints),
    Secret(Secret),
    Ingress(Ingress),
    HttpProxy(HttpProxy),
    TlsCertificateDelegation(TlsCertificateDelegation),
    HttpRoute(HttpRoute),
    Gateway(Gateway),
    Namespace(Namespace),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Service(_) => ObjectKind::Service,
            Object::Endpoints(_) => ObjectKind::Endpoints,
            Object::Secret(_) => ObjectKind::Secret,
            Object::Ingress(_) => ObjectKind::Ingress,
            Object::HttpProxy(_) => ObjectKind::HttpProxy,
            Object::TlsCertificateDelegation(_) => ObjectKind::TlsCertificateDelegation,
            Object::HttpRoute(_) => ObjectKind::HttpRoute,
            Object::Gateway(_) => ObjectKind::Gateway,
            Object::Namespace(_) => ObjectKind::Namespace,
        }
    }

    pub fn meta(&self) -> &Meta {
        match self {
            Object::Service(o) => &o.meta,
            Object::Endpoints(o) => &o.meta,
            Object::Secret(o) => &o.meta,
            Object::Ingress(o) => &o.meta,
            Object::HttpProxy(o) => &o.meta,
            Object::TlsCertificateDelegation(o) => &o.meta,
            Object::HttpRoute(o) => &o.meta,
            Object::Gateway(o) => &o.meta,
            Object::Namespace(o) => &o.meta,
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        self.meta().object_ref(self.kind())
    }
}
