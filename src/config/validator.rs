//! Validation of resolved deployment configuration.
//!
//! Checks names and resource sizes against the provider's documented rules
//! before any remote call is made. Global uniqueness of the registry name is
//! not checked here; the provider reports it when the registry is created.

use std::collections::HashSet;
use tracing::debug;

use crate::error::{ConfigError, Result};

use super::spec::{DeploymentTarget, ResolvedConfig, SecretsMode};

/// Validator for resolved configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates only the resource triple.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate_target(&self, target: &DeploymentTarget) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();
        Self::check_target(target, &mut result);
        Self::finish(result)
    }

    /// Validates a full resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &ResolvedConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::check_target(&config.target, &mut result);
        Self::check_desired(config, &mut result);

        if config.options.wait.attempts == 0 {
            result.push("wait.attempts", "Wait attempts must be at least 1");
        }

        Self::finish(result)
    }

    fn finish(result: ValidationResult) -> Result<ValidationResult> {
        if let Some(first_error) = result.errors.first() {
            return Err(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }
            .into());
        }

        for warning in &result.warnings {
            debug!("Configuration warning: {warning}");
        }
        Ok(result)
    }

    fn check_target(target: &DeploymentTarget, result: &mut ValidationResult) {
        if target.resource_group.is_empty() {
            result.push("resource_group", "Resource group name cannot be empty");
        } else if target.resource_group.len() > 90 {
            result.push("resource_group", "Resource group name must be at most 90 characters");
        }

        if !is_valid_registry_name(&target.registry) {
            result.push(
                "registry",
                format!(
                    "Registry name '{}' is invalid. Must be 5-50 alphanumeric characters.",
                    target.registry
                ),
            );
        }

        if !is_valid_name(&target.instance) {
            result.push(
                "instance",
                format!(
                    "Instance name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    target.instance
                ),
            );
        }

        if target.region.is_empty() {
            result.push("region", "Region cannot be empty");
        }
    }

    fn check_desired(config: &ResolvedConfig, result: &mut ValidationResult) {
        let desired = &config.desired;

        if desired.cpu_cores.is_nan() || desired.cpu_cores <= 0.0 {
            result.push("cpu", "CPU cores must be greater than zero");
        }
        if desired.memory_gib.is_nan() || desired.memory_gib <= 0.0 {
            result.push("memory", "Memory must be greater than zero");
        }

        if desired.ports.is_empty() {
            result.push("ports", "At least one port must be exposed");
        }
        let mut seen = HashSet::new();
        for port in &desired.ports {
            if !seen.insert(port.port) {
                result.push("ports", format!("Duplicate port: {}", port.port));
            }
        }
        // The provider CLI applies one protocol to every port of an instance.
        if desired.ports.windows(2).any(|w| w[0].protocol != w[1].protocol) {
            result.push(
                "ports",
                "All ports must use the same protocol (mixed TCP and UDP is not supported)",
            );
        }

        if !is_valid_name(&desired.dns_label) {
            result.push(
                "dns_label",
                format!(
                    "DNS label '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    desired.dns_label
                ),
            );
        }

        if desired.image.repository.is_empty() || desired.image.tag.is_empty() {
            result.push("image", "Image repository and tag cannot be empty");
        }

        if let SecretsMode::VaultManagedIdentity {
            vault_name,
            identity_name,
        } = &desired.secrets
        {
            if vault_name.len() < 3 || vault_name.len() > 24 {
                result.push("key_vault", "Key vault name must be 3-24 characters");
            }
            if identity_name.is_empty() {
                result.push("identity", "Managed identity name cannot be empty");
            }
            if desired.secret_variables.is_empty() {
                result
                    .warnings
                    .push(String::from("Key vault mode selected but no secret variables are set"));
            }
        }

        if matches!(desired.secrets, SecretsMode::PlainEnv) && !desired.secret_variables.is_empty() {
            result.warnings.push(String::from(
                "Secrets are passed as plain environment variables and are visible through the provider API",
            ));
        }
    }
}

impl ValidationResult {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Checks a DNS-style name: lowercase alphanumerics and single hyphens,
/// starting with a letter, at most 63 characters.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }

    let first = name.chars().next();
    if !first.is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }

    if name.ends_with('-') || name.contains("--") {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Registry names are 5-50 ASCII alphanumerics.
fn is_valid_registry_name(name: &str) -> bool {
    (5..=50).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphanumeric())
}
