//! # Error Handling
//!
//! Crate-wide error taxonomy for the control plane. Every fallible operation
//! in the pipeline returns [`Result<T>`], backed by [`ControlPlaneError`].

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

/// Error taxonomy for the DAG/translation/xDS pipeline.
///
/// Variants map onto the error taxonomy: input errors become [`ControlPlaneError::Validation`]
/// records attached to a status entry rather than aborting a build; transient external
/// errors (status write-back) are `Status`; protocol errors on an xDS stream are `Xds`;
/// fatal startup errors are `Config`/`Internal`.
#[derive(thiserror::Error, Debug)]
pub enum ControlPlaneError {
    /// Process configuration could not be loaded or failed validation.
    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A Kubernetes object or CRD field failed a validity rule. Surfaced as a
    /// per-object status record, never propagated out of the DAG builder.
    #[error("validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Writing a status condition back to the Kubernetes API failed.
    #[error("status write error: {message}")]
    Status {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An xDS stream protocol violation (unknown type URL, encoding failure).
    /// Terminates the single stream, not the process.
    #[error("xDS protocol error: {message}")]
    Xds { message: String, node_id: Option<String> },

    /// Resource requested by name was not present in a cache or DAG.
    #[error("not found: {resource_type} '{id}'")]
    NotFound { resource_type: String, id: String },

    /// A shared lock was poisoned by a panicking holder.
    #[error("synchronization error: {context}")]
    Sync { context: String },

    /// Internal invariant violation — indicates a bug, not bad input.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ControlPlaneError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    pub fn status<S: Into<String>>(message: S) -> Self {
        Self::Status { message: message.into(), source: None }
    }

    pub fn xds<S: Into<String>>(message: S) -> Self {
        Self::Xds { message: message.into(), node_id: None }
    }

    pub fn xds_with_node<S: Into<String>, N: Into<String>>(message: S, node_id: N) -> Self {
        Self::Xds { message: message.into(), node_id: Some(node_id.into()) }
    }

    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    pub fn sync<S: Into<String>>(context: S) -> Self {
        Self::Sync { context: context.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Whether the failing operation should be retried on the next cycle
    /// rather than treated as fatal — transient external errors only.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControlPlaneError::Status { .. })
    }

    /// Maps this error onto a gRPC status for the xDS transport boundary.
    pub fn to_tonic_status(&self) -> tonic::Status {
        match self {
            ControlPlaneError::Xds { message, .. } => tonic::Status::invalid_argument(message),
            ControlPlaneError::NotFound { .. } => tonic::Status::not_found(self.to_string()),
            _ => tonic::Status::internal(self.to_string()),
        }
    }
}

impl From<config::ConfigError> for ControlPlaneError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("failed to build configuration", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for ControlPlaneError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{field}: {}", messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");
        Self::validation(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ControlPlaneError::config("bad value");
        assert!(matches!(error, ControlPlaneError::Config { .. }));
        assert_eq!(error.to_string(), "configuration error: bad value");
    }

    #[test]
    fn validation_field_round_trip() {
        let error = ControlPlaneError::validation_field("must be set", "virtualhost.fqdn");
        if let ControlPlaneError::Validation { field, .. } = error {
            assert_eq!(field.as_deref(), Some("virtualhost.fqdn"));
        } else {
            panic!("expected Validation variant");
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(ControlPlaneError::status("api unavailable").is_retryable());
        assert!(!ControlPlaneError::validation("bad host").is_retryable());
        assert!(!ControlPlaneError::xds("unknown type url").is_retryable());
    }

    #[test]
    fn xds_maps_to_invalid_argument() {
        let error = ControlPlaneError::xds("unknown type url");
        assert_eq!(error.to_tonic_status().code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn not_found_maps_to_not_found_status() {
        let error = ControlPlaneError::not_found("Cluster", "default/s1/80");
        assert_eq!(error.to_tonic_status().code(), tonic::Code::NotFound);
    }
}
