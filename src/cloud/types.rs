//! Provider-facing types.
//!
//! `ObservedState` is the reconciler's view of the instance. The `az*`
//! structs mirror the JSON the Azure CLI prints and are converted into
//! observed state right after parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{DeploymentTarget, ImageReference, PortSpec, RestartPolicy};

/// Run state of the instance as reported by the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RunState {
    /// State could not be determined.
    #[default]
    Unknown,
    /// Provisioning or pulling the image.
    Creating,
    /// Container is running.
    Running,
    /// Instance was stopped.
    Stopped,
    /// Container exited.
    Terminated,
    /// Provisioning failed.
    Failed,
}

impl RunState {
    /// Returns true for states the instance will not leave on its own.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Failed | Self::Terminated)
    }

    /// Maps the provider's provisioning and instance-view states.
    #[must_use]
    pub fn from_provider(provisioning: Option<&str>, instance: Option<&str>) -> Self {
        match provisioning.map(str::to_lowercase).as_deref() {
            Some("failed") => return Self::Failed,
            Some("creating" | "pending" | "repairing" | "updating") => return Self::Creating,
            _ => {}
        }

        match instance.map(str::to_lowercase).as_deref() {
            Some("running") => Self::Running,
            Some("stopped") => Self::Stopped,
            Some("terminated" | "succeeded") => Self::Terminated,
            Some("failed") => Self::Failed,
            Some("pending" | "waiting" | "starting") => Self::Creating,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The provider's answer about the instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedState {
    /// Whether an instance with the target name exists.
    pub exists: bool,
    /// Image the instance runs.
    pub current_image: Option<String>,
    /// Run state.
    pub run_state: RunState,
    /// Public IP address.
    pub ip_address: Option<String>,
    /// Public FQDN.
    pub fqdn: Option<String>,
    /// When the container last started.
    pub start_time: Option<DateTime<Utc>>,
    /// Exit code of the last terminated run.
    pub last_exit_code: Option<i32>,
}

impl ObservedState {
    /// State for an instance that does not exist.
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    /// State for an existing instance in the given run state.
    #[must_use]
    pub fn present(run_state: RunState, image: impl Into<String>) -> Self {
        Self {
            exists: true,
            current_image: Some(image.into()),
            run_state,
            ..Self::default()
        }
    }

    /// Returns true if the instance is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.run_state, RunState::Running)
    }

    /// One-line summary for results and logs.
    #[must_use]
    pub fn summary(&self) -> String {
        if !self.exists {
            return String::from("absent");
        }
        format!(
            "state={}, ip={}, fqdn={}",
            self.run_state,
            self.ip_address.as_deref().unwrap_or("-"),
            self.fqdn.as_deref().unwrap_or("-"),
        )
    }
}

/// Snapshot of the three resources the planner reads.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ObservedTarget {
    /// Resource group exists.
    pub resource_group_exists: bool,
    /// Registry exists.
    pub registry_exists: bool,
    /// The instance.
    pub instance: ObservedState,
}

/// Pull credentials of a registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    /// Login server, e.g. `reg.azurecr.io`.
    pub login_server: String,
    /// Admin user name.
    pub username: String,
    /// Admin password.
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("login_server", &self.login_server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A user-assigned managed identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityInfo {
    /// Full resource id, used to assign the identity.
    pub id: String,
    /// Client (application) id, used by the workload to authenticate.
    pub client_id: String,
    /// Principal (object) id, used in access policies.
    pub principal_id: String,
}

/// Everything the provider needs to create the instance.
#[derive(Clone)]
pub struct CreateInstanceRequest {
    /// Where to create it.
    pub target: DeploymentTarget,
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
    /// Environment variables.
    pub environment: BTreeMap<String, String>,
    /// Credentials to pull the image.
    pub registry: RegistryCredentials,
    /// Managed identity resource id to assign.
    pub identity_id: Option<String>,
}

impl std::fmt::Debug for CreateInstanceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may be secrets; only the names are printed.
        let environment: Vec<&str> = self.environment.keys().map(String::as_str).collect();
        f.debug_struct("CreateInstanceRequest")
            .field("target", &self.target)
            .field("image", &self.image)
            .field("cpu_cores", &self.cpu_cores)
            .field("memory_gib", &self.memory_gib)
            .field("ports", &self.ports)
            .field("restart_policy", &self.restart_policy)
            .field("dns_label", &self.dns_label)
            .field("environment", &environment)
            .field("registry", &self.registry)
            .field("identity_id", &self.identity_id)
            .finish()
    }
}

// ============================================================================
// Azure CLI JSON
// ============================================================================

/// `az container show` output (fields used here only).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzContainerGroup {
    /// Provisioning state.
    #[serde(default)]
    pub provisioning_state: Option<String>,
    /// Containers in the group.
    #[serde(default)]
    pub containers: Vec<AzContainer>,
    /// Group-level instance view.
    #[serde(default)]
    pub instance_view: Option<AzGroupInstanceView>,
    /// Public address.
    #[serde(default)]
    pub ip_address: Option<AzIpAddress>,
}

/// One container of a group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzContainer {
    /// Image reference.
    #[serde(default)]
    pub image: Option<String>,
    /// Container-level instance view.
    #[serde(default)]
    pub instance_view: Option<AzContainerInstanceView>,
}

/// Group-level instance view.
#[derive(Debug, Clone, Deserialize)]
pub struct AzGroupInstanceView {
    /// State, e.g. `Running`.
    #[serde(default)]
    pub state: Option<String>,
}

/// Container-level instance view.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzContainerInstanceView {
    /// Current container state.
    #[serde(default)]
    pub current_state: Option<AzContainerState>,
}

/// Container state.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzContainerState {
    /// State name.
    #[serde(default)]
    pub state: Option<String>,
    /// Start time.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Exit code when terminated.
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// Public address of a group.
#[derive(Debug, Clone, Deserialize)]
pub struct AzIpAddress {
    /// IP address.
    #[serde(default)]
    pub ip: Option<String>,
    /// FQDN.
    #[serde(default)]
    pub fqdn: Option<String>,
}

/// `az acr credential show` output.
#[derive(Debug, Clone, Deserialize)]
pub struct AzRegistryCredential {
    /// Admin user name.
    pub username: String,
    /// Admin passwords.
    #[serde(default)]
    pub passwords: Vec<AzRegistryPassword>,
}

/// One registry password.
#[derive(Debug, Clone, Deserialize)]
pub struct AzRegistryPassword {
    /// Password value.
    pub value: String,
}

/// `az identity show` output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzIdentity {
    /// Resource id.
    pub id: String,
    /// Client id.
    pub client_id: String,
    /// Principal id.
    pub principal_id: String,
}

/// `az resource list` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AzResource {
    /// Resource name.
    pub name: String,
    /// Resource type.
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
}

impl From<AzContainerGroup> for ObservedState {
    fn from(group: AzContainerGroup) -> Self {
        let container = group.containers.into_iter().next();
        let current = container
            .as_ref()
            .and_then(|c| c.instance_view.as_ref())
            .and_then(|v| v.current_state.clone());

        let instance_state = group
            .instance_view
            .as_ref()
            .and_then(|v| v.state.as_deref())
            .or_else(|| current.as_ref().and_then(|s| s.state.as_deref()));

        let run_state = RunState::from_provider(group.provisioning_state.as_deref(), instance_state);

        Self {
            exists: true,
            current_image: container.and_then(|c| c.image),
            run_state,
            ip_address: group.ip_address.as_ref().and_then(|a| a.ip.clone()),
            fqdn: group.ip_address.and_then(|a| a.fqdn),
            start_time: current.as_ref().and_then(|s| s.start_time),
            last_exit_code: current.and_then(|s| s.exit_code),
        }
    }
}

impl From<AzIdentity> for IdentityInfo {
    fn from(identity: AzIdentity) -> Self {
        Self {
            id: identity.id,
            client_id: identity.client_id,
            principal_id: identity.principal_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING_GROUP: &str = r#"{
        "name": "svc1",
        "provisioningState": "Succeeded",
        "containers": [{
            "name": "svc1",
            "image": "reg1.azurecr.io/app:v1",
            "instanceView": {
                "restartCount": 0,
                "currentState": {
                    "state": "Running",
                    "startTime": "2024-05-01T10:00:00+00:00",
                    "exitCode": null
                }
            }
        }],
        "instanceView": { "state": "Running" },
        "ipAddress": { "ip": "20.1.2.3", "fqdn": "svc1.westeurope.azurecontainer.io", "ports": [] }
    }"#;

    #[test]
    fn test_parse_running_group() {
        let group: AzContainerGroup = serde_json::from_str(RUNNING_GROUP).expect("valid json");
        let observed = ObservedState::from(group);

        assert!(observed.exists);
        assert_eq!(observed.run_state, RunState::Running);
        assert_eq!(observed.current_image.as_deref(), Some("reg1.azurecr.io/app:v1"));
        assert_eq!(observed.ip_address.as_deref(), Some("20.1.2.3"));
        assert_eq!(observed.fqdn.as_deref(), Some("svc1.westeurope.azurecontainer.io"));
        assert!(observed.start_time.is_some());
        assert_eq!(observed.last_exit_code, None);
    }

    #[test]
    fn test_parse_terminated_container() {
        let json = r#"{
            "provisioningState": "Succeeded",
            "containers": [{
                "image": "reg1.azurecr.io/app:v1",
                "instanceView": { "currentState": { "state": "Terminated", "exitCode": 137 } }
            }]
        }"#;
        let group: AzContainerGroup = serde_json::from_str(json).expect("valid json");
        let observed = ObservedState::from(group);

        assert_eq!(observed.run_state, RunState::Terminated);
        assert_eq!(observed.last_exit_code, Some(137));
        assert!(observed.run_state.is_fatal());
    }

    #[test]
    fn test_provisioning_state_wins() {
        assert_eq!(RunState::from_provider(Some("Creating"), None), RunState::Creating);
        assert_eq!(RunState::from_provider(Some("Failed"), Some("Running")), RunState::Failed);
        assert_eq!(RunState::from_provider(Some("Succeeded"), Some("Stopped")), RunState::Stopped);
        assert_eq!(RunState::from_provider(None, None), RunState::Unknown);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = RegistryCredentials {
            login_server: String::from("reg1.azurecr.io"),
            username: String::from("reg1"),
            password: String::from("hunter2"),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn test_create_request_debug_hides_environment_values() {
        let request = CreateInstanceRequest {
            target: DeploymentTarget::new("rg1", "reg12345", "svc1", "westeurope"),
            image: ImageReference::new("reg12345.azurecr.io", "app", "v1"),
            cpu_cores: 1.0,
            memory_gib: 1.5,
            ports: vec![PortSpec::tcp(8000)],
            restart_policy: RestartPolicy::Always,
            dns_label: String::from("svc1"),
            environment: BTreeMap::from([(
                String::from("AZURE_AD_CLIENT_SECRET"),
                String::from("s3cret-value"),
            )]),
            registry: RegistryCredentials {
                login_server: String::from("reg12345.azurecr.io"),
                username: String::from("reg12345"),
                password: String::from("hunter2"),
            },
            identity_id: None,
        };

        let debug = format!("{request:?}");
        assert!(debug.contains("AZURE_AD_CLIENT_SECRET"));
        assert!(!debug.contains("s3cret-value"));
        assert!(!debug.contains("hunter2"));
    }
}
