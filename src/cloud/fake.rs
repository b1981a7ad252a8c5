//! In-memory [`CloudResourceClient`] for tests.
//!
//! Records every call by name, answers reads from a small resource model,
//! can replay a scripted sequence of instance observations and can fail any
//! operation on demand.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use crate::config::{BuildContext, DeploymentTarget, ImageReference};
use crate::error::{CloudError, CloudResult};

use super::client::{CloudResourceClient, LogSource};
use super::types::{
    CreateInstanceRequest, IdentityInfo, ObservedState, RegistryCredentials, RunState,
};

/// Names of operations that change remote state.
const MUTATING: &[&str] = &[
    "create_resource_group",
    "delete_resource_group",
    "create_registry",
    "delete_registry",
    "build_image",
    "tag_image",
    "push_image",
    "create_instance",
    "delete_instance",
    "start_instance",
    "stop_instance",
    "restart_instance",
    "ensure_secret_store",
    "write_secret",
    "ensure_identity",
    "grant_secret_access",
];

#[derive(Default)]
struct FakeState {
    groups: BTreeSet<String>,
    registries: BTreeSet<String>,
    instance: Option<ObservedState>,
    show_script: VecDeque<CloudResult<Option<ObservedState>>>,
    group_resources: Vec<String>,
    logs: Vec<String>,
    calls: Vec<String>,
    failures: HashMap<String, (Option<u32>, String)>,
    created: Vec<CreateInstanceRequest>,
    secrets: BTreeMap<String, String>,
}

/// Recording fake of the provider.
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    /// Empty provider: nothing exists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider where the target's group and registry exist.
    pub fn provisioned(target: &DeploymentTarget) -> Self {
        Self::new()
            .with_group(&target.resource_group)
            .with_registry(&target.registry)
    }

    pub fn with_group(self, name: &str) -> Self {
        self.lock().groups.insert(name.to_string());
        self
    }

    pub fn with_registry(self, name: &str) -> Self {
        self.lock().registries.insert(name.to_string());
        self
    }

    pub fn with_instance(self, observed: ObservedState) -> Self {
        self.lock().instance = Some(observed);
        self
    }

    pub fn with_logs(self, lines: &[&str]) -> Self {
        self.lock().logs = lines.iter().map(ToString::to_string).collect();
        self
    }

    /// Resources reported as left in the group after the instance is gone.
    pub fn with_group_resources(self, names: &[&str]) -> Self {
        self.lock().group_resources = names.iter().map(ToString::to_string).collect();
        self
    }

    /// Queues answers for `show_instance`, consumed before the model is used.
    pub fn script_show(&self, answers: Vec<CloudResult<Option<ObservedState>>>) {
        self.lock().show_script.extend(answers);
    }

    /// Makes `operation` fail every time.
    pub fn fail(&self, operation: &str, stderr: &str) {
        self.lock()
            .failures
            .insert(operation.to_string(), (None, stderr.to_string()));
    }

    /// Makes `operation` fail the next `times` calls.
    pub fn fail_times(&self, operation: &str, times: u32, stderr: &str) {
        self.lock()
            .failures
            .insert(operation.to_string(), (Some(times), stderr.to_string()));
    }

    /// All calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls that change remote state, in order.
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| MUTATING.contains(&c.as_str()))
            .collect()
    }

    /// Number of times `operation` was called.
    pub fn count(&self, operation: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == operation).count()
    }

    /// Requests passed to `create_instance`.
    pub fn created(&self) -> Vec<CreateInstanceRequest> {
        self.lock().created.clone()
    }

    /// Secrets written to any vault, keyed `vault/name`.
    pub fn secrets(&self) -> BTreeMap<String, String> {
        self.lock().secrets.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake cloud state poisoned")
    }

    /// Records the call and applies any injected failure.
    /// Records a call that does not touch the fake's state.
    fn record(&self, operation: &str) -> CloudResult<()> {
        self.enter(operation).map(drop)
    }

    fn enter(&self, operation: &str) -> CloudResult<std::sync::MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(operation.to_string());

        let failure = match state.failures.get_mut(operation) {
            Some((None, stderr)) => Some(stderr.clone()),
            Some((Some(remaining), stderr)) if *remaining > 0 => {
                *remaining -= 1;
                Some(stderr.clone())
            }
            _ => None,
        };

        match failure {
            Some(stderr) => Err(CloudError::CommandFailed {
                command: operation.to_string(),
                code: 1,
                stderr,
            }),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl CloudResourceClient for FakeCloud {
    async fn resource_group_exists(&self, name: &str) -> CloudResult<bool> {
        Ok(self.enter("resource_group_exists")?.groups.contains(name))
    }

    async fn create_resource_group(&self, name: &str, _region: &str) -> CloudResult<()> {
        self.enter("create_resource_group")?
            .groups
            .insert(name.to_string());
        Ok(())
    }

    async fn delete_resource_group(&self, name: &str) -> CloudResult<()> {
        let mut state = self.enter("delete_resource_group")?;
        if !state.groups.remove(name) {
            return Err(CloudError::not_found(format!("resource group {name}")));
        }
        Ok(())
    }

    async fn list_group_resources(&self, _name: &str) -> CloudResult<Vec<String>> {
        let state = self.enter("list_group_resources")?;
        let mut resources = state.group_resources.clone();
        if state.instance.is_some() {
            resources.push(String::from("instance"));
        }
        Ok(resources)
    }

    async fn registry_exists(&self, target: &DeploymentTarget) -> CloudResult<bool> {
        Ok(self
            .enter("registry_exists")?
            .registries
            .contains(&target.registry))
    }

    async fn create_registry(&self, target: &DeploymentTarget) -> CloudResult<()> {
        self.enter("create_registry")?
            .registries
            .insert(target.registry.clone());
        Ok(())
    }

    async fn delete_registry(&self, target: &DeploymentTarget) -> CloudResult<()> {
        let mut state = self.enter("delete_registry")?;
        if !state.registries.remove(&target.registry) {
            return Err(CloudError::not_found(format!("registry {}", target.registry)));
        }
        Ok(())
    }

    async fn registry_credentials(
        &self,
        target: &DeploymentTarget,
    ) -> CloudResult<RegistryCredentials> {
        self.record("registry_credentials")?;
        Ok(RegistryCredentials {
            login_server: target.login_server(),
            username: target.registry.clone(),
            password: String::from("registry-password"),
        })
    }

    async fn build_image(&self, _image: &ImageReference, _build: &BuildContext) -> CloudResult<()> {
        self.record("build_image")?;
        Ok(())
    }

    async fn tag_image(&self, _image: &ImageReference) -> CloudResult<()> {
        self.record("tag_image")?;
        Ok(())
    }

    async fn push_image(
        &self,
        _target: &DeploymentTarget,
        _image: &ImageReference,
    ) -> CloudResult<()> {
        self.record("push_image")?;
        Ok(())
    }

    async fn show_instance(&self, _target: &DeploymentTarget) -> CloudResult<Option<ObservedState>> {
        let mut state = self.enter("show_instance")?;
        match state.show_script.pop_front() {
            Some(answer) => answer,
            None => Ok(state.instance.clone()),
        }
    }

    async fn create_instance(&self, request: &CreateInstanceRequest) -> CloudResult<()> {
        let mut state = self.enter("create_instance")?;
        state.created.push(request.clone());
        state.instance = Some(ObservedState {
            ip_address: Some(String::from("20.0.0.1")),
            fqdn: Some(format!("{}.{}.azurecontainer.io", request.dns_label, request.target.region)),
            ..ObservedState::present(RunState::Running, request.image.to_string())
        });
        Ok(())
    }

    async fn delete_instance(&self, target: &DeploymentTarget) -> CloudResult<()> {
        let mut state = self.enter("delete_instance")?;
        if state.instance.take().is_none() {
            return Err(CloudError::not_found(format!("container instance {}", target.instance)));
        }
        Ok(())
    }

    async fn start_instance(&self, _target: &DeploymentTarget) -> CloudResult<()> {
        let mut state = self.enter("start_instance")?;
        if let Some(instance) = state.instance.as_mut() {
            instance.run_state = RunState::Running;
        }
        Ok(())
    }

    async fn stop_instance(&self, _target: &DeploymentTarget) -> CloudResult<()> {
        let mut state = self.enter("stop_instance")?;
        if let Some(instance) = state.instance.as_mut() {
            instance.run_state = RunState::Stopped;
        }
        Ok(())
    }

    async fn restart_instance(&self, _target: &DeploymentTarget) -> CloudResult<()> {
        self.record("restart_instance")?;
        Ok(())
    }

    async fn instance_logs(
        &self,
        _target: &DeploymentTarget,
        tail: Option<usize>,
    ) -> CloudResult<Vec<String>> {
        let state = self.enter("instance_logs")?;
        let lines = state.logs.clone();
        Ok(match tail {
            Some(n) if n < lines.len() => lines[lines.len() - n..].to_vec(),
            _ => lines,
        })
    }

    async fn follow_logs(&self, _target: &DeploymentTarget) -> CloudResult<Box<dyn LogSource>> {
        let state = self.enter("follow_logs")?;
        Ok(Box::new(FakeLogSource {
            lines: state.logs.clone().into(),
        }))
    }

    async fn ensure_secret_store(
        &self,
        _target: &DeploymentTarget,
        _vault: &str,
    ) -> CloudResult<()> {
        self.record("ensure_secret_store")?;
        Ok(())
    }

    async fn write_secret(&self, vault: &str, name: &str, value: &str) -> CloudResult<()> {
        self.enter("write_secret")?
            .secrets
            .insert(format!("{vault}/{name}"), value.to_string());
        Ok(())
    }

    async fn ensure_identity(
        &self,
        target: &DeploymentTarget,
        identity: &str,
    ) -> CloudResult<IdentityInfo> {
        self.record("ensure_identity")?;
        Ok(IdentityInfo {
            id: format!(
                "/resourceGroups/{}/providers/Microsoft.ManagedIdentity/userAssignedIdentities/{identity}",
                target.resource_group
            ),
            client_id: String::from("client-0001"),
            principal_id: String::from("principal-0001"),
        })
    }

    async fn grant_secret_access(&self, _vault: &str, _principal_id: &str) -> CloudResult<()> {
        self.record("grant_secret_access")?;
        Ok(())
    }
}

/// Finite log source; a real follow never ends on its own.
struct FakeLogSource {
    lines: VecDeque<String>,
}

#[async_trait]
impl LogSource for FakeLogSource {
    async fn next_line(&mut self) -> CloudResult<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DeploymentTarget {
        DeploymentTarget::new("rg1", "reg12345", "svc1", "westeurope")
    }

    #[tokio::test]
    async fn test_stateless_calls_are_recorded_and_can_fail() {
        let cloud = FakeCloud::provisioned(&target());
        cloud.fail_times("restart_instance", 1, "throttled");

        let first = cloud.restart_instance(&target()).await;
        assert!(matches!(
            first,
            Err(CloudError::CommandFailed { ref stderr, .. }) if stderr == "throttled"
        ));
        assert!(cloud.restart_instance(&target()).await.is_ok());

        let identity = cloud
            .ensure_identity(&target(), "svc1-identity")
            .await
            .expect("identity");
        assert!(identity.id.ends_with("/svc1-identity"));

        assert_eq!(cloud.count("restart_instance"), 2);
        assert_eq!(
            cloud.calls(),
            vec!["restart_instance", "restart_instance", "ensure_identity"]
        );
    }

    #[tokio::test]
    async fn test_lock_released_after_stateless_call() {
        let cloud = FakeCloud::provisioned(&target());
        cloud
            .tag_image(&ImageReference::new("reg12345.azurecr.io", "app", "v1"))
            .await
            .expect("tag");
        // A second call would deadlock if the guard leaked.
        assert!(cloud.resource_group_exists("rg1").await.expect("exists"));
        assert_eq!(cloud.mutating_calls(), vec!["tag_image"]);
    }
}
