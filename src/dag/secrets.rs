//! TLS secret resolution: delegation rules and PEM validation.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;
use tracing::debug;
use x509_parser::pem::Pem;

use crate::model::{NamespacedName, Secret, TlsCertificateDelegation};
use crate::observability::metrics::{counters, Counters};

/// Lookup view over the TLSCertificateDelegations of a store snapshot.
#[derive(Debug, Clone, Copy)]
pub struct DelegationIndex<'a> {
    delegations: &'a BTreeMap<NamespacedName, Arc<TlsCertificateDelegation>>,
}

impl<'a> DelegationIndex<'a> {
    pub fn new(
        delegations: &'a BTreeMap<NamespacedName, Arc<TlsCertificateDelegation>>,
    ) -> Self {
        Self { delegations }
    }

    /// Whether a delegation in the secret's namespace offers it to
    /// `from_namespace`.
    pub fn permits(&self, secret: &NamespacedName, from_namespace: &str) -> bool {
        self.delegations.values().any(|d| {
            d.meta.namespace == secret.namespace
                && d.delegations.iter().any(|entry| {
                    entry.secret_name == secret.name
                        && entry
                            .target_namespaces
                            .iter()
                            .any(|ns| ns == "*" || ns == from_namespace)
                })
        })
    }
}

/// Validated TLS material held by the DAG for one build cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagSecret {
    pub namespace: String,
    pub name: String,
    /// Decoded PEM certificate chain.
    pub cert_pem: String,
    /// Decoded PEM private key.
    pub key_pem: String,
}

impl DagSecret {
    /// The SDS resource name: `<namespace>/<name>`.
    pub fn sds_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Why a secret reference could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("secret not found")]
    NotFound,
    #[error("certificate delegation not permitted")]
    NotPermitted,
    #[error("invalid TLS payload: {0}")]
    InvalidPayload(String),
}

/// Resolve a secret reference through the delegation rules: a secret in
/// namespace A is usable from namespace B iff A == B or a
/// TLSCertificateDelegation in A lists B (or `*`) as a target.
pub fn resolve_secret(
    secrets: &BTreeMap<NamespacedName, Arc<Secret>>,
    delegations: &DelegationIndex<'_>,
    secret_ref: &NamespacedName,
    from_namespace: &str,
) -> Result<DagSecret, SecretError> {
    if secret_ref.namespace != from_namespace
        && !delegations.permits(secret_ref, from_namespace)
    {
        Counters::incr(&counters().delegation_denials);
        return Err(SecretError::NotPermitted);
    }

    let secret = secrets.get(secret_ref).ok_or(SecretError::NotFound)?;
    match validate_tls_secret(secret) {
        Ok((cert_pem, key_pem)) => {
            debug!(secret = %secret_ref, "resolved TLS secret");
            Ok(DagSecret {
                namespace: secret_ref.namespace.clone(),
                name: secret_ref.name.clone(),
                cert_pem,
                key_pem,
            })
        }
        Err(e) => {
            Counters::incr(&counters().invalid_secrets);
            Err(e)
        }
    }
}

/// Data key of a CA bundle inside a secret.
pub const CA_CERT_KEY: &str = "ca.crt";

/// Resolve a CA-bundle secret through the same delegation rules, returning
/// the decoded PEM bundle.
pub fn resolve_ca_secret(
    secrets: &BTreeMap<NamespacedName, Arc<Secret>>,
    delegations: &DelegationIndex<'_>,
    secret_ref: &NamespacedName,
    from_namespace: &str,
) -> Result<String, SecretError> {
    if secret_ref.namespace != from_namespace
        && !delegations.permits(secret_ref, from_namespace)
    {
        Counters::incr(&counters().delegation_denials);
        return Err(SecretError::NotPermitted);
    }

    let secret = secrets.get(secret_ref).ok_or(SecretError::NotFound)?;
    let raw = secret
        .data
        .get(CA_CERT_KEY)
        .ok_or_else(|| SecretError::InvalidPayload("missing ca.crt".to_string()))?;
    let pem = decode_payload(raw, CA_CERT_KEY)?;
    validate_certificate_chain(&pem)?;
    Ok(pem)
}

/// Validate that a secret carries a parseable PEM certificate chain and a
/// PEM private key, returning the decoded payloads.
pub fn validate_tls_secret(secret: &Secret) -> Result<(String, String), SecretError> {
    let cert = secret
        .certificate()
        .ok_or_else(|| SecretError::InvalidPayload("missing tls.crt".to_string()))?;
    let key = secret
        .private_key()
        .ok_or_else(|| SecretError::InvalidPayload("missing tls.key".to_string()))?;

    let cert_pem = decode_payload(cert, "tls.crt")?;
    let key_pem = decode_payload(key, "tls.key")?;

    validate_certificate_chain(&cert_pem)?;
    validate_private_key(&key_pem)?;

    Ok((cert_pem, key_pem))
}

fn decode_payload(value: &str, field: &str) -> Result<String, SecretError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| SecretError::InvalidPayload(format!("{field} is not valid base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|_| SecretError::InvalidPayload(format!("{field} is not valid UTF-8 PEM")))
}

fn validate_certificate_chain(pem: &str) -> Result<(), SecretError> {
    let mut count = 0;
    for entry in Pem::iter_from_buffer(pem.as_bytes()) {
        let entry = entry
            .map_err(|e| SecretError::InvalidPayload(format!("tls.crt PEM parse error: {e}")))?;
        if entry.label != "CERTIFICATE" {
            continue;
        }
        entry.parse_x509().map_err(|e| {
            SecretError::InvalidPayload(format!("tls.crt certificate parse error: {e}"))
        })?;
        count += 1;
    }
    if count == 0 {
        return Err(SecretError::InvalidPayload(
            "tls.crt contains no CERTIFICATE blocks".to_string(),
        ));
    }
    Ok(())
}

fn validate_private_key(pem: &str) -> Result<(), SecretError> {
    for entry in Pem::iter_from_buffer(pem.as_bytes()) {
        let entry = entry
            .map_err(|e| SecretError::InvalidPayload(format!("tls.key PEM parse error: {e}")))?;
        if entry.label.ends_with("PRIVATE KEY") {
            return Ok(());
        }
    }
    Err(SecretError::InvalidPayload("tls.key contains no PRIVATE KEY block".to_string()))
}
