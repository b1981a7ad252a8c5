//! The capability interface over the cloud control plane.
//!
//! Everything that touches the network goes through [`CloudResourceClient`].
//! The planner, executor and lifecycle manager only see this trait, so they
//! can be driven by an in-memory fake in tests.

use async_trait::async_trait;

use crate::config::{BuildContext, DeploymentTarget, ImageReference};
use crate::error::CloudResult;

use super::types::{CreateInstanceRequest, IdentityInfo, ObservedState, RegistryCredentials};

/// Operations the reconciler consumes from the provider.
///
/// Every call may fail with a provider-specific message; implementations
/// report a missing resource as [`crate::error::CloudError::NotFound`] where
/// the operation addresses one.
#[async_trait]
pub trait CloudResourceClient: Send + Sync {
    // ---- resource group ----

    /// Returns true if the resource group exists.
    async fn resource_group_exists(&self, name: &str) -> CloudResult<bool>;

    /// Creates the resource group in the region. Succeeds if it already exists.
    async fn create_resource_group(&self, name: &str, region: &str) -> CloudResult<()>;

    /// Deletes the resource group and everything in it.
    async fn delete_resource_group(&self, name: &str) -> CloudResult<()>;

    /// Names of the resources left in the group.
    async fn list_group_resources(&self, name: &str) -> CloudResult<Vec<String>>;

    // ---- registry ----

    /// Returns true if the target's registry exists.
    async fn registry_exists(&self, target: &DeploymentTarget) -> CloudResult<bool>;

    /// Creates the registry with admin credentials enabled.
    async fn create_registry(&self, target: &DeploymentTarget) -> CloudResult<()>;

    /// Deletes the registry.
    async fn delete_registry(&self, target: &DeploymentTarget) -> CloudResult<()>;

    /// Pull credentials of the registry.
    async fn registry_credentials(&self, target: &DeploymentTarget)
    -> CloudResult<RegistryCredentials>;

    // ---- image ----

    /// Builds the image locally as `repository:tag`.
    async fn build_image(&self, image: &ImageReference, build: &BuildContext) -> CloudResult<()>;

    /// Tags the local `repository:tag` image with its full registry reference.
    async fn tag_image(&self, image: &ImageReference) -> CloudResult<()>;

    /// Logs in to the registry and pushes the image.
    async fn push_image(&self, target: &DeploymentTarget, image: &ImageReference)
    -> CloudResult<()>;

    // ---- instance ----

    /// Observed state of the instance, `None` when it does not exist.
    async fn show_instance(&self, target: &DeploymentTarget) -> CloudResult<Option<ObservedState>>;

    /// Returns true if the instance exists.
    async fn instance_exists(&self, target: &DeploymentTarget) -> CloudResult<bool> {
        Ok(self.show_instance(target).await?.is_some())
    }

    /// Creates the instance.
    async fn create_instance(&self, request: &CreateInstanceRequest) -> CloudResult<()>;

    /// Deletes the instance.
    async fn delete_instance(&self, target: &DeploymentTarget) -> CloudResult<()>;

    /// Starts a stopped instance.
    async fn start_instance(&self, target: &DeploymentTarget) -> CloudResult<()>;

    /// Stops the instance.
    async fn stop_instance(&self, target: &DeploymentTarget) -> CloudResult<()>;

    /// Restarts the instance.
    async fn restart_instance(&self, target: &DeploymentTarget) -> CloudResult<()>;

    /// Current log output, optionally only the last `tail` lines.
    async fn instance_logs(
        &self,
        target: &DeploymentTarget,
        tail: Option<usize>,
    ) -> CloudResult<Vec<String>>;

    /// Opens a live log stream.
    async fn follow_logs(&self, target: &DeploymentTarget) -> CloudResult<Box<dyn LogSource>>;

    // ---- secret store and identity ----

    /// Creates the key vault if it does not exist.
    async fn ensure_secret_store(&self, target: &DeploymentTarget, vault: &str)
    -> CloudResult<()>;

    /// Writes one secret into the vault.
    async fn write_secret(&self, vault: &str, name: &str, value: &str) -> CloudResult<()>;

    /// Creates the user-assigned identity if needed and returns it.
    async fn ensure_identity(
        &self,
        target: &DeploymentTarget,
        identity: &str,
    ) -> CloudResult<IdentityInfo>;

    /// Grants the principal read access to the vault's secrets.
    async fn grant_secret_access(&self, vault: &str, principal_id: &str) -> CloudResult<()>;
}

/// A live, non-restartable source of log lines.
#[async_trait]
pub trait LogSource: Send {
    /// Next line, or `None` once the source is closed.
    async fn next_line(&mut self) -> CloudResult<Option<String>>;
}
