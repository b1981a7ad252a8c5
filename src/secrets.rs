//! Secrets delivery strategies.
//!
//! A strategy decides how secret variables reach the instance. It only
//! contributes actions placed before `CreateInstance` and the environment
//! that `CreateInstance` passes; the rest of the plan has the same shape
//! whichever strategy is selected.

use std::collections::BTreeMap;

use crate::config::{DeploymentTarget, DesiredState, SecretsMode};
use crate::planner::{ActionKind, ActionPayload, ReconciliationAction};

/// Environment variable carrying the vault name in vault mode.
pub const VAULT_NAME_VARIABLE: &str = "KEY_VAULT_NAME";

/// Environment variable carrying the vault URI in vault mode.
pub const VAULT_URI_VARIABLE: &str = "KEY_VAULT_URI";

/// Environment variable carrying the identity's client id in vault mode.
pub const IDENTITY_CLIENT_ID_VARIABLE: &str = "AZURE_CLIENT_ID";

/// What a strategy contributes to a plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Materialized {
    /// Actions to run before `CreateInstance`, in order.
    pub actions_before_create: Vec<ReconciliationAction>,
    /// Environment variables for `CreateInstance`.
    pub environment: BTreeMap<String, String>,
    /// Names in `environment` that hold secret values.
    pub masked: Vec<String>,
    /// Managed identity to assign to the instance, by name.
    pub identity: Option<String>,
}

/// How secrets reach the running instance.
pub trait SecretsStrategy: Send + Sync {
    /// Computes the extra actions and the create-time environment.
    fn materialize(&self, desired: &DesiredState, target: &DeploymentTarget) -> Materialized;

    /// Gets the strategy name.
    fn name(&self) -> &'static str;
}

/// Secrets are plain environment variables on the instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainEnv;

impl SecretsStrategy for PlainEnv {
    fn materialize(&self, desired: &DesiredState, _target: &DeploymentTarget) -> Materialized {
        Materialized {
            actions_before_create: Vec::new(),
            environment: desired.environment_variables.clone(),
            masked: desired.secret_variables.iter().cloned().collect(),
            identity: None,
        }
    }

    fn name(&self) -> &'static str {
        "plain-env"
    }
}

/// Secrets live in a key vault read through a user-assigned identity.
#[derive(Debug, Clone)]
pub struct VaultManagedIdentity {
    vault_name: String,
    identity_name: String,
}

impl VaultManagedIdentity {
    /// Creates the strategy for a vault and an identity.
    #[must_use]
    pub fn new(vault_name: impl Into<String>, identity_name: impl Into<String>) -> Self {
        Self {
            vault_name: vault_name.into(),
            identity_name: identity_name.into(),
        }
    }
}

impl SecretsStrategy for VaultManagedIdentity {
    fn materialize(&self, desired: &DesiredState, target: &DeploymentTarget) -> Materialized {
        let vault = &self.vault_name;
        let identity = &self.identity_name;

        let mut actions = vec![ReconciliationAction::new(
            ActionKind::EnsureSecretStore,
            vault,
            ActionPayload::SecretStore {
                vault: vault.clone(),
            },
            "secrets are stored in a key vault",
        )];

        for (variable, _) in desired.secret_entries() {
            let name = secret_name(variable);
            actions.push(ReconciliationAction::new(
                ActionKind::WriteSecret,
                &name,
                ActionPayload::Secret {
                    vault: vault.clone(),
                    name: name.clone(),
                    variable: variable.clone(),
                },
                format!("{variable} is a secret"),
            ));
        }

        actions.push(ReconciliationAction::new(
            ActionKind::EnsureManagedIdentity,
            identity,
            ActionPayload::Identity {
                name: identity.clone(),
            },
            format!("{} reads secrets through an identity", target.instance),
        ));
        actions.push(ReconciliationAction::new(
            ActionKind::GrantSecretAccess,
            identity,
            ActionPayload::Grant {
                vault: vault.clone(),
                identity: identity.clone(),
            },
            format!("read-only access to {vault}"),
        ));

        let mut environment: BTreeMap<String, String> = desired
            .plain_variables()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        environment.insert(VAULT_NAME_VARIABLE.to_string(), vault.clone());
        environment.insert(VAULT_URI_VARIABLE.to_string(), vault_uri(vault));

        Materialized {
            actions_before_create: actions,
            environment,
            masked: Vec::new(),
            identity: Some(identity.clone()),
        }
    }

    fn name(&self) -> &'static str {
        "vault-managed-identity"
    }
}

/// Selects the strategy configured for a deployment.
#[must_use]
pub fn strategy_for(mode: &SecretsMode) -> Box<dyn SecretsStrategy> {
    match mode {
        SecretsMode::PlainEnv => Box::new(PlainEnv),
        SecretsMode::VaultManagedIdentity {
            vault_name,
            identity_name,
        } => Box::new(VaultManagedIdentity::new(vault_name, identity_name)),
    }
}

/// Key vault secret name for an environment variable.
///
/// Vault names allow only alphanumerics and hyphens, so `OPENWEATHER_API_KEY`
/// becomes `openweather-api-key`.
#[must_use]
pub fn secret_name(variable: &str) -> String {
    variable
        .chars()
        .filter_map(|c| match c {
            '_' | '-' => Some('-'),
            c if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase()),
            _ => None,
        })
        .collect()
}

/// Data-plane URI of a key vault.
#[must_use]
pub fn vault_uri(vault: &str) -> String {
    format!("https://{vault}.vault.azure.net/")
}
