//! Error types for the deployment reconciler.
//!
//! The hierarchy mirrors the lifecycle of a run: configuration is resolved
//! locally, remote state is observed, then mutated. Each stage has its own
//! failure mode and propagation rule.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the deployment reconciler.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Bad or missing local input. Never retried.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote state could not be read; nothing was mutated.
    #[error("Failed to observe {resource}: {source}")]
    Observation {
        /// Resource that was being observed.
        resource: String,
        /// Underlying provider failure.
        #[source]
        source: CloudError,
    },

    /// A mutating provider call failed.
    #[error("Remote error: {0}")]
    Remote(#[from] CloudError),

    /// The operation targets a resource that does not exist.
    #[error("{resource_type} '{name}' not found")]
    NotFound {
        /// Kind of resource.
        resource_type: String,
        /// Resource name.
        name: String,
    },

    /// The operator declined a destructive-action confirmation.
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// Why the operation was cancelled.
        reason: String,
    },

    /// Token acquisition or server verification failed.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested environment file does not exist.
    #[error("Environment file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The environment file could not be read.
    #[error("Failed to read environment file {path}: {message}")]
    ReadError {
        /// Path of the file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A mandatory field has no value from any source.
    #[error("{field} required: pass --{flag} or set {env_key} in the environment file")]
    MissingField {
        /// Human-readable field name.
        field: String,
        /// CLI flag that supplies it.
        flag: String,
        /// Environment-file key that supplies it.
        env_key: String,
    },

    /// A value could not be parsed.
    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        /// Field being parsed.
        field: String,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Failures of calls into the cloud control plane.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The provider command exited unsuccessfully.
    #[error("`{command}` failed (exit code {code}): {stderr}")]
    CommandFailed {
        /// Short form of the command that failed.
        command: String,
        /// Process exit code, -1 when killed by a signal.
        code: i32,
        /// Provider error message, passed through verbatim.
        stderr: String,
    },

    /// The addressed resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },

    /// The provider answered with something that could not be interpreted.
    #[error("Invalid response from `{command}`: {message}")]
    InvalidResponse {
        /// Short form of the command.
        command: String,
        /// Description of the problem.
        message: String,
    },

    /// The provider tool could not be started at all.
    #[error("Failed to run `{program}`: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Description of the failure.
        message: String,
    },
}

/// Authentication and server-verification errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint rejected the request.
    #[error("Token request failed: {status} - {message}")]
    TokenRequest {
        /// HTTP status code.
        status: u16,
        /// Error body returned by the authority.
        message: String,
    },

    /// Network failure talking to the authority or the server.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The authority answered with an unexpected payload.
    #[error("Invalid token response: {message}")]
    InvalidResponse {
        /// Description of the problem.
        message: String,
    },
}

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Result type alias for provider calls.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wraps a provider failure that happened while reading state.
    #[must_use]
    pub fn observation(resource: impl Into<String>, source: CloudError) -> Self {
        Self::Observation {
            resource: resource.into(),
            source,
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Returns true if re-invoking the same command may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Observation { .. } | Self::Auth(AuthError::Network { .. })
        )
    }

    /// Short label of the error kind, used in summaries.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigurationError",
            Self::Observation { .. } => "ObservationError",
            Self::Remote(_) => "RemoteError",
            Self::NotFound { .. } => "NotFoundError",
            Self::Cancelled { .. } => "CancelledError",
            Self::Auth(_) => "AuthError",
            Self::Io(_) => "IoError",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error for a field value.
    #[must_use]
    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl CloudError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Returns true if the provider reported the resource as absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl AuthError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        let err = DeployError::cancelled("declined");
        assert_eq!(err.kind(), "CancelledError");

        let err = DeployError::not_found("Container instance", "svc1");
        assert_eq!(err.kind(), "NotFoundError");
        assert_eq!(err.to_string(), "Container instance 'svc1' not found");
    }

    #[test]
    fn test_observation_is_retryable() {
        let err = DeployError::observation("resource group rg1", CloudError::not_found("x"));
        assert!(err.is_retryable());

        let err = DeployError::Remote(CloudError::not_found("x"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_remote_message_passthrough() {
        let err = DeployError::from(CloudError::CommandFailed {
            command: String::from("az acr create"),
            code: 1,
            stderr: String::from("The registry DNS name reg1.azurecr.io is already in use."),
        });
        assert!(err.to_string().contains("already in use"));
    }
}
