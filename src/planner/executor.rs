//! Plan executor for applying deployment plans.
//!
//! Actions run strictly in order. The first failed action halts the run and
//! every remaining action is reported as skipped. Only the existence-checked
//! creations are retried; nothing destructive is.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cancel::CancelToken;
use crate::cloud::{CloudResourceClient, CreateInstanceRequest, IdentityInfo, ObservedState};
use crate::config::{DeploymentTarget, DesiredState, WaitPolicy};
use crate::error::{CloudError, CloudResult};
use crate::secrets::IDENTITY_CLIENT_ID_VARIABLE;

use super::plan::{ActionKind, ActionPayload, DeploymentPlan, InstancePayload, ReconciliationAction};

/// Maximum attempts for idempotent actions.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 2000;

/// Detail of actions not run because an earlier one failed.
const SKIPPED_AFTER_FAILURE: &str = "not run: an earlier action failed";
const SKIPPED_AFTER_CANCEL: &str = "cancelled";

/// Executor for deployment plans.
pub struct DeploymentExecutor<'a> {
    client: &'a dyn CloudResourceClient,
    cancel: CancelToken,
    retry_delay: Duration,
}

/// Outcome of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// The action did what it set out to do.
    Success,
    /// The action failed; the run halts.
    Failed,
    /// The action was not run.
    Skipped,
    /// The instance did not reach `Running` within the wait budget.
    TimeoutWarning,
}

/// Result of executing a single action.
#[derive(Debug, Clone)]
pub struct DeploymentResult {
    /// Action that was executed.
    pub action: ReconciliationAction,
    /// What happened.
    pub outcome: Outcome,
    /// Free text, or the provider's error message.
    pub detail: String,
    /// State observed right after the action, where applicable.
    pub observed_after: Option<ObservedState>,
}

/// Result of executing a whole plan.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Per-action results, in plan order.
    pub results: Vec<DeploymentResult>,
    /// Whether polling was interrupted.
    pub cancelled: bool,
}

/// Facts learned while executing that later actions depend on.
#[derive(Debug, Default)]
struct ExecutionContext {
    identity: Option<IdentityInfo>,
}

impl<'a> DeploymentExecutor<'a> {
    /// Creates an executor calling `client`.
    #[must_use]
    pub fn new(client: &'a dyn CloudResourceClient) -> Self {
        Self {
            client,
            cancel: CancelToken::new(),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }

    /// Uses `cancel` to interrupt polling.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the base delay between retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Executes a plan against the target.
    ///
    /// Never returns an error: failures are reported per action.
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        target: &DeploymentTarget,
        desired: &DesiredState,
    ) -> ExecutionReport {
        let span = info_span!("execute", run_id = %plan.run_id);
        self.execute_actions(&plan.actions, target, desired)
            .instrument(span)
            .await
    }

    /// Executes actions in order, halting at the first failure.
    pub async fn execute_actions(
        &self,
        actions: &[ReconciliationAction],
        target: &DeploymentTarget,
        desired: &DesiredState,
    ) -> ExecutionReport {
        info!("Executing deployment plan with {} actions", actions.len());

        let mut context = ExecutionContext::default();
        let mut results = Vec::with_capacity(actions.len());
        let mut halted = false;
        let mut cancelled = false;

        for (idx, action) in actions.iter().enumerate() {
            if !halted && self.cancel.is_cancelled() {
                warn!("Cancelled before {}", action.kind);
                cancelled = true;
                halted = true;
            }
            if halted {
                let detail = if cancelled { SKIPPED_AFTER_CANCEL } else { SKIPPED_AFTER_FAILURE };
                results.push(DeploymentResult::skipped(action, detail));
                continue;
            }

            info!("Executing action {}: {}", idx + 1, action.description());
            let result = self.execute_action(action, target, desired, &mut context).await;

            match result.outcome {
                Outcome::Failed => {
                    error!("{} failed: {}", action.kind, result.detail);
                    halted = true;
                }
                Outcome::Skipped => {
                    // Only a cancelled wait skips by itself.
                    warn!("{} interrupted", action.kind);
                    cancelled = true;
                    halted = true;
                }
                Outcome::TimeoutWarning => warn!("{}", result.detail),
                Outcome::Success => debug!("{} succeeded", action.kind),
            }

            results.push(result);
        }

        let report = ExecutionReport { results, cancelled };
        info!("{report}");
        report
    }

    async fn execute_action(
        &self,
        action: &ReconciliationAction,
        target: &DeploymentTarget,
        desired: &DesiredState,
        context: &mut ExecutionContext,
    ) -> DeploymentResult {
        match (&action.kind, &action.payload) {
            (ActionKind::EnsureResourceGroup, _) => {
                let outcome = self
                    .with_retry(action.kind, || {
                        self.client
                            .create_resource_group(&target.resource_group, &target.region)
                    })
                    .await;
                DeploymentResult::from_call(action, outcome, "resource group ready")
            }
            (ActionKind::EnsureRegistry, _) => {
                let outcome = self
                    .with_retry(action.kind, || self.client.create_registry(target))
                    .await;
                DeploymentResult::from_call(
                    action,
                    outcome,
                    &format!("registry ready at {}", target.login_server()),
                )
            }
            (ActionKind::BuildImage, ActionPayload::Image { image, build }) => {
                let outcome = self.client.build_image(image, build).await;
                DeploymentResult::from_call(action, outcome, "image built")
            }
            (ActionKind::PushImage, ActionPayload::Image { image, .. }) => {
                let outcome = match self.client.tag_image(image).await {
                    Ok(()) => self.client.push_image(target, image).await,
                    Err(e) => Err(e),
                };
                DeploymentResult::from_call(action, outcome, &format!("pushed {image}"))
            }
            (ActionKind::DeleteInstance, _) => self.delete_instance(action, target).await,
            (ActionKind::EnsureSecretStore, ActionPayload::SecretStore { vault }) => {
                let outcome = self.client.ensure_secret_store(target, vault).await;
                DeploymentResult::from_call(action, outcome, "key vault ready")
            }
            (ActionKind::WriteSecret, ActionPayload::Secret { vault, name, variable }) => {
                let Some(value) = desired.environment_variables.get(variable) else {
                    return DeploymentResult::failed(action, format!("{variable} has no value"));
                };
                let outcome = self.client.write_secret(vault, name, value).await;
                DeploymentResult::from_call(action, outcome, &format!("stored {variable}"))
            }
            (ActionKind::EnsureManagedIdentity, ActionPayload::Identity { name }) => {
                match self.client.ensure_identity(target, name).await {
                    Ok(identity) => {
                        let detail = format!("client id {}", identity.client_id);
                        context.identity = Some(identity);
                        DeploymentResult::success(action, detail)
                    }
                    Err(e) => DeploymentResult::failed(action, e.to_string()),
                }
            }
            (ActionKind::GrantSecretAccess, ActionPayload::Grant { vault, identity }) => {
                let Some(info) = &context.identity else {
                    return DeploymentResult::failed(
                        action,
                        format!("identity {identity} was not ensured before the grant"),
                    );
                };
                let outcome = self.client.grant_secret_access(vault, &info.principal_id).await;
                DeploymentResult::from_call(action, outcome, "read access granted")
            }
            (ActionKind::CreateInstance, ActionPayload::Instance(payload)) => {
                self.create_instance(action, target, payload, context).await
            }
            (ActionKind::WaitForRunning, ActionPayload::Wait(policy)) => {
                self.wait_for_running(action, target, *policy).await
            }
            (kind, _) => DeploymentResult::failed(action, format!("{kind} has no usable payload")),
        }
    }

    async fn delete_instance(
        &self,
        action: &ReconciliationAction,
        target: &DeploymentTarget,
    ) -> DeploymentResult {
        let detail = match self.client.delete_instance(target).await {
            Ok(()) => String::from("instance deleted"),
            Err(e) if e.is_not_found() => {
                info!("Instance {} was already deleted", target.instance);
                String::from("instance was already gone")
            }
            Err(e) => return DeploymentResult::failed(action, e.to_string()),
        };

        let observed_after = self.reobserve(target).await;
        DeploymentResult {
            observed_after,
            ..DeploymentResult::success(action, detail)
        }
    }

    async fn create_instance(
        &self,
        action: &ReconciliationAction,
        target: &DeploymentTarget,
        payload: &InstancePayload,
        context: &ExecutionContext,
    ) -> DeploymentResult {
        let registry = match self.client.registry_credentials(target).await {
            Ok(credentials) => credentials,
            Err(e) => return DeploymentResult::failed(action, e.to_string()),
        };

        let mut environment: BTreeMap<String, String> = payload.environment.clone();
        let mut identity_id = None;
        if payload.identity.is_some() {
            let Some(identity) = &context.identity else {
                return DeploymentResult::failed(action, "managed identity was not ensured");
            };
            environment.insert(IDENTITY_CLIENT_ID_VARIABLE.to_string(), identity.client_id.clone());
            identity_id = Some(identity.id.clone());
        }

        let request = CreateInstanceRequest {
            target: target.clone(),
            image: payload.image.clone(),
            cpu_cores: payload.cpu_cores,
            memory_gib: payload.memory_gib,
            ports: payload.ports.clone(),
            restart_policy: payload.restart_policy,
            dns_label: payload.dns_label.clone(),
            environment,
            registry,
            identity_id,
        };

        if let Err(e) = self.client.create_instance(&request).await {
            return DeploymentResult::failed(action, e.to_string());
        }

        let observed_after = self.reobserve(target).await;
        let detail = observed_after.as_ref().map_or_else(
            || String::from("instance created, state not yet visible"),
            |observed| {
                format!(
                    "ip={}, fqdn={}, state={}",
                    observed.ip_address.as_deref().unwrap_or("-"),
                    observed.fqdn.as_deref().unwrap_or("-"),
                    observed.run_state
                )
            },
        );

        DeploymentResult {
            observed_after,
            ..DeploymentResult::success(action, detail)
        }
    }

    async fn wait_for_running(
        &self,
        action: &ReconciliationAction,
        target: &DeploymentTarget,
        policy: WaitPolicy,
    ) -> DeploymentResult {
        let mut last_seen: Option<ObservedState> = None;

        for attempt in 1..=policy.attempts {
            if self.cancel.is_cancelled() {
                return DeploymentResult::skipped(action, SKIPPED_AFTER_CANCEL);
            }

            match self.client.show_instance(target).await {
                Ok(Some(observed)) if observed.is_running() => {
                    info!("Instance {} is running", target.instance);
                    return DeploymentResult {
                        observed_after: Some(observed),
                        ..DeploymentResult::success(action, format!("running after {attempt} polls"))
                    };
                }
                Ok(Some(observed)) if observed.run_state.is_fatal() => {
                    let detail = match observed.last_exit_code {
                        Some(code) => format!("instance {} (exit code {code})", observed.run_state),
                        None => format!("instance {}", observed.run_state),
                    };
                    return DeploymentResult {
                        observed_after: Some(observed),
                        ..DeploymentResult::failed(action, detail)
                    };
                }
                Ok(Some(observed)) => {
                    debug!(
                        "Poll {attempt}/{}: instance is {}",
                        policy.attempts, observed.run_state
                    );
                    last_seen = Some(observed);
                }
                Ok(None) => debug!("Poll {attempt}/{}: instance not visible yet", policy.attempts),
                Err(e) => warn!("Poll {attempt}/{} failed: {e}", policy.attempts),
            }

            if attempt < policy.attempts && !self.cancel.sleep(policy.interval).await {
                return DeploymentResult::skipped(action, SKIPPED_AFTER_CANCEL);
            }
        }

        let state = last_seen
            .as_ref()
            .map_or_else(|| String::from("unknown"), |o| o.run_state.to_string());
        DeploymentResult {
            outcome: Outcome::TimeoutWarning,
            detail: format!(
                "not running after {} polls (last state {state}); the instance may still converge",
                policy.attempts
            ),
            observed_after: last_seen,
            action: action.clone(),
        }
    }

    /// Fresh read after a mutation. A failed read does not fail the action.
    async fn reobserve(&self, target: &DeploymentTarget) -> Option<ObservedState> {
        match self.client.show_instance(target).await {
            Ok(observed) => Some(observed.unwrap_or_else(ObservedState::absent)),
            Err(e) => {
                warn!("Could not re-observe {}: {e}", target.instance);
                None
            }
        }
    }

    /// Runs an idempotent call up to `MAX_RETRIES` times.
    async fn with_retry<F, Fut>(&self, kind: ActionKind, mut call: F) -> CloudResult<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = CloudResult<()>>,
    {
        debug_assert!(kind.is_idempotent());
        let mut last_error: Option<CloudError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES} for {kind}");
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match call().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("{kind} attempt {} failed: {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CloudError::invalid_response(kind.as_str(), "no attempt was made")
        }))
    }
}

impl DeploymentResult {
    fn success(action: &ReconciliationAction, detail: impl Into<String>) -> Self {
        Self {
            action: action.clone(),
            outcome: Outcome::Success,
            detail: detail.into(),
            observed_after: None,
        }
    }

    fn failed(action: &ReconciliationAction, detail: impl Into<String>) -> Self {
        Self {
            action: action.clone(),
            outcome: Outcome::Failed,
            detail: detail.into(),
            observed_after: None,
        }
    }

    fn skipped(action: &ReconciliationAction, detail: impl Into<String>) -> Self {
        Self {
            action: action.clone(),
            outcome: Outcome::Skipped,
            detail: detail.into(),
            observed_after: None,
        }
    }

    fn from_call(action: &ReconciliationAction, outcome: CloudResult<()>, detail: &str) -> Self {
        match outcome {
            Ok(()) => Self::success(action, detail),
            Err(e) => Self::failed(action, e.to_string()),
        }
    }
}

impl Outcome {
    /// Label shown next to each action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
            Self::TimeoutWarning => "TimeoutWarning",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ExecutionReport {
    fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Number of successful actions.
    #[must_use]
    pub fn successful(&self) -> usize {
        self.count(Outcome::Success)
    }

    /// Number of failed actions.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(Outcome::Failed)
    }

    /// Number of skipped actions.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(Outcome::Skipped)
    }

    /// Returns true if the wait budget ran out.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.count(Outcome::TimeoutWarning) > 0
    }

    /// Returns true if nothing failed and nothing was interrupted.
    /// A timed-out wait still counts as success.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failed() == 0 && !self.cancelled
    }

    /// The first failed result.
    #[must_use]
    pub fn first_failure(&self) -> Option<&DeploymentResult> {
        self.results.iter().find(|r| r.outcome == Outcome::Failed)
    }

    /// The most recent state observed during the run.
    #[must_use]
    pub fn final_state(&self) -> Option<&ObservedState> {
        self.results.iter().rev().find_map(|r| r.observed_after.as_ref())
    }
}

impl std::fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.results.len(),
            self.successful(),
            self.failed(),
            self.skipped()
        )?;
        if self.timed_out() {
            write!(f, " (deployed, not yet confirmed running)")?;
        }
        Ok(())
    }
}
