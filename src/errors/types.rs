//! # Error Types
//!
//! Comprehensive error types for the Pylon control plane using `thiserror`.

/// Custom result type for Pylon operations
pub type Result<T> = std::result::Result<T, PylonError>;

/// Main error type for the Pylon control plane
#[derive(thiserror::Error, Debug)]
pub enum PylonError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Validation errors on an input object
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Stale-event conflicts in the object store
    #[error("Resource conflict: {message}")]
    Conflict {
        message: String,
        resource_type: String,
    },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} '{id}'")]
    NotFound {
        resource_type: String,
        id: String,
    },

    /// xDS protocol errors
    #[error("xDS protocol error: {message}")]
    Xds {
        message: String,
        node_id: Option<String>,
    },

    /// Network transport errors (gRPC server, diagnostics HTTP)
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal invariant violations
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PylonError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error scoped to a field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a new conflict error
    pub fn conflict<S: Into<String>, R: Into<String>>(message: S, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create a new not-found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a new xDS protocol error
    pub fn xds<S: Into<String>>(message: S) -> Self {
        Self::Xds { message: message.into(), node_id: None }
    }

    /// Create an xDS protocol error attributed to a node
    pub fn xds_for_node<S: Into<String>, N: Into<String>>(message: S, node_id: N) -> Self {
        Self::Xds { message: message.into(), node_id: Some(node_id.into()) }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(source: std::io::Error, context: S) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// Whether this error represents a stale-event conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for PylonError {
    fn from(source: serde_json::Error) -> Self {
        Self::Serialization { source, context: "JSON serialization failed".to_string() }
    }
}

impl From<std::io::Error> for PylonError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source, context: "I/O operation failed".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = PylonError::config("bad address");
        assert!(matches!(err, PylonError::Config { .. }));
        assert_eq!(err.to_string(), "Configuration error: bad address");

        let err = PylonError::validation_field("must start with /", "prefix");
        match err {
            PylonError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("prefix")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_conflict_detection() {
        let err = PylonError::conflict("resource version 3 is older than 5", "Ingress");
        assert!(err.is_conflict());
        assert!(!PylonError::xds("boom").is_conflict());
    }

    #[test]
    fn test_not_found_display() {
        let err = PylonError::not_found("Service", "demo/app");
        assert_eq!(err.to_string(), "Resource not found: Service 'demo/app'");
    }
}
