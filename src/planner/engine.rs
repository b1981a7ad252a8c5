//! Plan computation.
//!
//! The planner observes the three remote resources and derives the ordered
//! action list that converges them. Observation is read-only; a failed read
//! aborts planning and no partial plan is returned.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cloud::{CloudResourceClient, ObservedState, ObservedTarget};
use crate::config::{DeploymentTarget, ResolvedConfig, StateHasher};
use crate::error::{DeployError, Result};
use crate::secrets::strategy_for;

use super::plan::{ActionKind, ActionPayload, DeploymentPlan, InstancePayload, ReconciliationAction};

/// Computes deployment plans.
pub struct DeploymentPlanner<'a> {
    client: &'a dyn CloudResourceClient,
    hasher: StateHasher,
}

impl<'a> DeploymentPlanner<'a> {
    /// Creates a planner reading state through `client`.
    #[must_use]
    pub const fn new(client: &'a dyn CloudResourceClient) -> Self {
        Self {
            client,
            hasher: StateHasher::new(),
        }
    }

    /// Reads the current state of the target's resources.
    ///
    /// Registry and instance are only queried when the resource group
    /// exists; neither can exist without it.
    ///
    /// # Errors
    ///
    /// Returns an observation error if any read fails.
    pub async fn observe(&self, target: &DeploymentTarget) -> Result<ObservedTarget> {
        debug!("Observing {target}");

        let resource_group_exists = self
            .client
            .resource_group_exists(&target.resource_group)
            .await
            .map_err(|e| {
                DeployError::observation(format!("resource group {}", target.resource_group), e)
            })?;

        if !resource_group_exists {
            return Ok(ObservedTarget {
                resource_group_exists,
                registry_exists: false,
                instance: ObservedState::absent(),
            });
        }

        let registry_exists = self
            .client
            .registry_exists(target)
            .await
            .map_err(|e| DeployError::observation(format!("registry {}", target.registry), e))?;

        let instance = self
            .client
            .show_instance(target)
            .await
            .map_err(|e| {
                DeployError::observation(format!("container instance {}", target.instance), e)
            })?
            .unwrap_or_else(ObservedState::absent);

        debug!(
            resource_group = resource_group_exists,
            registry = registry_exists,
            instance = %instance.summary(),
            "Observed state"
        );

        Ok(ObservedTarget {
            resource_group_exists,
            registry_exists,
            instance,
        })
    }

    /// Observes the target and computes the plan.
    ///
    /// # Errors
    ///
    /// Returns an observation error if remote state cannot be read.
    pub async fn plan(&self, config: &ResolvedConfig) -> Result<DeploymentPlan> {
        let observed = self.observe(&config.target).await?;
        let plan = self.plan_against(config, observed);
        info!(
            "Planned {} actions for {} ({} destructive)",
            plan.action_count(),
            config.target,
            plan.destructive_count()
        );
        Ok(plan)
    }

    /// Computes the plan for a given observation. Deterministic: the same
    /// configuration and observation always yield the same actions.
    #[must_use]
    pub fn plan_against(&self, config: &ResolvedConfig, observed: ObservedTarget) -> DeploymentPlan {
        let target = &config.target;
        let desired = &config.desired;
        let mut actions = Vec::new();

        // Group first: the registry is created inside it.
        if !observed.resource_group_exists {
            actions.push(ReconciliationAction::new(
                ActionKind::EnsureResourceGroup,
                &target.resource_group,
                ActionPayload::None,
                "resource group does not exist",
            ));
        }

        if !observed.registry_exists {
            actions.push(ReconciliationAction::new(
                ActionKind::EnsureRegistry,
                &target.registry,
                ActionPayload::None,
                "registry does not exist",
            ));
        }

        if !config.options.skip_build {
            let image = ActionPayload::Image {
                image: desired.image.clone(),
                build: config.options.build.clone(),
            };
            let name = format!("{}:{}", desired.image.repository, desired.image.tag);
            actions.push(ReconciliationAction::new(
                ActionKind::BuildImage,
                &name,
                image.clone(),
                "image is rebuilt on every deploy",
            ));
            actions.push(ReconciliationAction::new(
                ActionKind::PushImage,
                &name,
                image,
                format!("publish to {}", desired.image.registry),
            ));
        }

        // Always recreate; the provider offers no in-place update.
        if observed.instance.exists {
            actions.push(ReconciliationAction::new(
                ActionKind::DeleteInstance,
                &target.instance,
                ActionPayload::None,
                format!("instance exists ({})", observed.instance.run_state),
            ));
        }

        let materialized = strategy_for(&desired.secrets).materialize(desired, target);
        actions.extend(materialized.actions_before_create);

        actions.push(ReconciliationAction::new(
            ActionKind::CreateInstance,
            &target.instance,
            ActionPayload::Instance(Box::new(InstancePayload {
                image: desired.image.clone(),
                cpu_cores: desired.cpu_cores,
                memory_gib: desired.memory_gib,
                ports: desired.ports.clone(),
                restart_policy: desired.restart_policy,
                dns_label: desired.dns_label.clone(),
                environment: materialized.environment,
                masked: materialized.masked,
                identity: materialized.identity,
            })),
            format!("run {}", desired.image),
        ));

        actions.push(ReconciliationAction::new(
            ActionKind::WaitForRunning,
            &target.instance,
            ActionPayload::Wait(config.options.wait),
            format!(
                "up to {} polls every {}s",
                config.options.wait.attempts,
                config.options.wait.interval.as_secs()
            ),
        ));

        DeploymentPlan {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            fingerprint: self.hasher.fingerprint(target, desired),
            observed,
            actions,
        }
    }
}
