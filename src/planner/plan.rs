//! Deployment plan types.
//!
//! A plan is the ordered list of reconciliation actions computed from one
//! observation of remote state. It is built once and never modified while
//! it executes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::cloud::ObservedTarget;
use crate::config::{BuildContext, ImageReference, PortSpec, RestartPolicy, WaitPolicy};

/// A complete deployment plan.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// Identifier of the run this plan belongs to.
    pub run_id: Uuid,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the desired state.
    pub fingerprint: String,
    /// Observation the plan was computed from.
    pub observed: ObservedTarget,
    /// Actions in execution order.
    pub actions: Vec<ReconciliationAction>,
}

/// One ordered step of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationAction {
    /// What to do.
    pub kind: ActionKind,
    /// Name of the resource the action addresses.
    pub target: String,
    /// Inputs of the action.
    pub payload: ActionPayload,
    /// Why the planner emitted it.
    pub reason: String,
}

/// Kinds of reconciliation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    /// Create the resource group.
    EnsureResourceGroup,
    /// Create the registry.
    EnsureRegistry,
    /// Build the image locally.
    BuildImage,
    /// Tag and push the image to the registry.
    PushImage,
    /// Delete the existing instance.
    DeleteInstance,
    /// Create the key vault.
    EnsureSecretStore,
    /// Write one secret into the key vault.
    WriteSecret,
    /// Create the user-assigned identity.
    EnsureManagedIdentity,
    /// Grant the identity read access to the vault.
    GrantSecretAccess,
    /// Create the instance.
    CreateInstance,
    /// Poll until the instance runs.
    WaitForRunning,
}

/// Inputs carried by an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    /// No inputs beyond the target name.
    None,
    /// Image to build or push.
    Image {
        /// Full image reference.
        image: ImageReference,
        /// Local build inputs.
        build: BuildContext,
    },
    /// Key vault to ensure.
    SecretStore {
        /// Vault name.
        vault: String,
    },
    /// Secret to write. The value is read from the desired state at
    /// execution time so plans never hold secret values.
    Secret {
        /// Vault name.
        vault: String,
        /// Secret name inside the vault.
        name: String,
        /// Environment variable holding the value.
        variable: String,
    },
    /// Identity to ensure.
    Identity {
        /// Identity name.
        name: String,
    },
    /// Access grant of an identity on a vault.
    Grant {
        /// Vault name.
        vault: String,
        /// Identity name.
        identity: String,
    },
    /// Instance to create.
    Instance(Box<InstancePayload>),
    /// Bounded poll.
    Wait(WaitPolicy),
}

/// Everything `CreateInstance` needs besides registry credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct InstancePayload {
    /// Image to run.
    pub image: ImageReference,
    /// CPU cores.
    pub cpu_cores: f64,
    /// Memory in GiB.
    pub memory_gib: f64,
    /// Exposed ports.
    pub ports: Vec<PortSpec>,
    /// Restart policy.
    pub restart_policy: RestartPolicy,
    /// DNS name label.
    pub dns_label: String,
    /// Environment variables as produced by the secrets strategy.
    pub environment: BTreeMap<String, String>,
    /// Names in `environment` whose values must not be displayed.
    pub masked: Vec<String>,
    /// Managed identity to assign, by name.
    pub identity: Option<String>,
}

impl ActionKind {
    /// Existence-checked creations that are safe to retry.
    #[must_use]
    pub const fn is_idempotent(self) -> bool {
        matches!(self, Self::EnsureResourceGroup | Self::EnsureRegistry)
    }

    /// Actions that destroy remote state.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::DeleteInstance)
    }

    /// Actions after which remote state is observed again.
    #[must_use]
    pub const fn reobserves(self) -> bool {
        matches!(self, Self::DeleteInstance | Self::CreateInstance)
    }

    /// Name of the kind as shown in plans and results.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EnsureResourceGroup => "EnsureResourceGroup",
            Self::EnsureRegistry => "EnsureRegistry",
            Self::BuildImage => "BuildImage",
            Self::PushImage => "PushImage",
            Self::DeleteInstance => "DeleteInstance",
            Self::EnsureSecretStore => "EnsureSecretStore",
            Self::WriteSecret => "WriteSecret",
            Self::EnsureManagedIdentity => "EnsureManagedIdentity",
            Self::GrantSecretAccess => "GrantSecretAccess",
            Self::CreateInstance => "CreateInstance",
            Self::WaitForRunning => "WaitForRunning",
        }
    }
}

impl ReconciliationAction {
    /// Creates an action.
    #[must_use]
    pub fn new(
        kind: ActionKind,
        target: impl Into<String>,
        payload: ActionPayload,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            target: target.into(),
            payload,
            reason: reason.into(),
        }
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.kind {
            ActionKind::EnsureResourceGroup => format!("Create resource group '{}'", self.target),
            ActionKind::EnsureRegistry => format!("Create registry '{}'", self.target),
            ActionKind::BuildImage => format!("Build image '{}'", self.target),
            ActionKind::PushImage => format!("Push image '{}'", self.target),
            ActionKind::DeleteInstance => format!("Delete instance '{}'", self.target),
            ActionKind::EnsureSecretStore => format!("Ensure key vault '{}'", self.target),
            ActionKind::WriteSecret => format!("Write secret '{}'", self.target),
            ActionKind::EnsureManagedIdentity => format!("Ensure identity '{}'", self.target),
            ActionKind::GrantSecretAccess => format!("Grant secret access to '{}'", self.target),
            ActionKind::CreateInstance => format!("Create instance '{}'", self.target),
            ActionKind::WaitForRunning => format!("Wait for '{}' to run", self.target),
        }
    }
}

impl DeploymentPlan {
    /// Kinds of the actions, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ActionKind> {
        self.actions.iter().map(|a| a.kind).collect()
    }

    /// Returns true if the plan contains an action of this kind.
    #[must_use]
    pub fn contains(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.kind == kind)
    }

    /// Returns true if the plan is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of destructive actions.
    #[must_use]
    pub fn destructive_count(&self) -> usize {
        self.actions.iter().filter(|a| a.kind.is_destructive()).count()
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.target)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short: String = self.fingerprint.chars().take(8).collect();
        writeln!(
            f,
            "Deployment Plan ({} actions, desired state {short}):",
            self.actions.len()
        )?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {}. {action}", i + 1)?;
        }
        Ok(())
    }
}
