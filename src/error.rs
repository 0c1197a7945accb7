//! Error types for the HSDP provider.

use thiserror::Error;

use crate::cartel::CartelError;
use crate::schema::Diagnostic;
use crate::ssh::SshError;

/// Errors surfaced by provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Input was rejected before any remote call was made.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The Cartel API reported an error.
    #[error("Cartel API error: {0}")]
    Api(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource already exists (create conflict).
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// The instance id stored in state is not the one Cartel knows by that name.
    #[error("Instance ID mismatch: state has '{stored}', Cartel reports '{fetched}'")]
    InstanceIdMismatch {
        /// Id recorded in state.
        stored: String,
        /// Id returned by the details lookup.
        fetched: String,
    },

    /// The host never reached a usable deployment state.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// Post-provisioning commands or the remote session failed.
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),
}

impl ProviderError {
    /// Get the error message as a string.
    ///
    /// Returns a reference to the error message for any variant that carries one.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Api(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::AlreadyExists(msg) => msg,
            Self::PermissionDenied(msg) => msg,
            Self::ResourceExhausted(msg) => msg,
            Self::Unavailable(msg) => msg,
            Self::DeadlineExceeded(msg) => msg,
            Self::FailedPrecondition(msg) => msg,
            Self::InstanceIdMismatch { .. } => "instance ID mismatch",
            Self::Provisioning(msg) => msg,
            Self::Bootstrap(msg) => msg,
        }
    }

    /// Whether this is a local/remote identity disagreement.
    pub fn is_consistency_error(&self) -> bool {
        matches!(self, Self::InstanceIdMismatch { .. })
    }

    /// Convert into the diagnostic list handed back to the plugin host.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        let diagnostic = match &self {
            Self::InstanceIdMismatch { stored, fetched } => Diagnostic::error(self.to_string())
                .with_detail(format!(
                    "Refusing to act on instance '{}' while state tracks '{}'",
                    fetched, stored
                )),
            _ => Diagnostic::error(self.to_string()),
        };
        vec![diagnostic]
    }

    /// Wrap a Cartel error with context about the call that failed.
    pub fn api(context: impl std::fmt::Display, err: CartelError) -> Self {
        let mapped = Self::from(err);
        match mapped {
            Self::Api(msg) => Self::Api(format!("{}: {}", context, msg)),
            other => other,
        }
    }
}

impl From<CartelError> for ProviderError {
    fn from(err: CartelError) -> Self {
        let message = err.to_string();
        match err.status() {
            Some(401) | Some(403) => ProviderError::PermissionDenied(message),
            Some(404) => ProviderError::NotFound(message),
            Some(409) => ProviderError::AlreadyExists(message),
            Some(429) => ProviderError::ResourceExhausted(message),
            Some(503) => ProviderError::Unavailable(message),
            _ => ProviderError::Api(message),
        }
    }
}

impl From<SshError> for ProviderError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::Timeout { .. } => ProviderError::DeadlineExceeded(err.to_string()),
            other => ProviderError::Bootstrap(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DiagnosticSeverity;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("resource-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: resource-123");

        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::InstanceIdMismatch {
            stored: "i-1".to_string(),
            fetched: "i-2".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Instance ID mismatch: state has 'i-1', Cartel reports 'i-2'"
        );
        assert!(err.is_consistency_error());
    }

    #[test]
    fn test_cartel_error_mapping() {
        let err: ProviderError = CartelError::rejected(403, "forbidden").into();
        assert!(matches!(err, ProviderError::PermissionDenied(_)));

        let err: ProviderError = CartelError::rejected(404, "no such host").into();
        assert!(matches!(err, ProviderError::NotFound(_)));

        let err: ProviderError = CartelError::rejected(429, "slow down").into();
        assert!(matches!(err, ProviderError::ResourceExhausted(_)));

        let err: ProviderError = CartelError::rejected(503, "maintenance").into();
        assert!(matches!(err, ProviderError::Unavailable(_)));

        let err: ProviderError = CartelError::rejected(400, "bad request").into();
        assert!(matches!(err, ProviderError::Api(_)));

        let err: ProviderError = CartelError::Transport("refused".into()).into();
        assert!(matches!(err, ProviderError::Api(_)));
    }

    #[test]
    fn test_api_context() {
        let err = ProviderError::api("add_tags", CartelError::rejected(400, "bad tag"));
        assert_eq!(err.message(), "add_tags: Cartel returned status 400: bad tag");

        // Mapped variants keep their own kind
        let err = ProviderError::api("destroy", CartelError::rejected(404, "gone"));
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    fn test_into_diagnostics() {
        let diags = ProviderError::Configuration("cartel_host is not set".into()).into_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Error);
        assert!(diags[0].summary.contains("cartel_host"));

        let diags = ProviderError::InstanceIdMismatch {
            stored: "i-1".into(),
            fetched: "i-2".into(),
        }
        .into_diagnostics();
        assert!(diags[0].detail.as_deref().unwrap().contains("i-2"));
    }

    #[test]
    fn test_ssh_error_mapping() {
        let err: ProviderError = SshError::Timeout {
            command: "sleep 600".into(),
            seconds: 300,
        }
        .into();
        assert!(matches!(err, ProviderError::DeadlineExceeded(_)));

        let err: ProviderError = SshError::Auth("core".into()).into();
        assert!(matches!(err, ProviderError::Bootstrap(_)));
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::Bootstrap("command [false] exited with status 1".to_string());
        assert_eq!(err.message(), "command [false] exited with status 1");

        let err = ProviderError::Configuration("invalid config".to_string());
        assert_eq!(err.message(), "invalid config");
    }
}
