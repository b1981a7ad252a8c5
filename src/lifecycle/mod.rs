//! Operations on an already deployed instance.
//!
//! The lifecycle manager never plans. Each operation is one remote call,
//! plus a settle delay and a fresh status read for `start` and `restart`.
//! Deletion always goes through a [`ConfirmationProvider`] first.

mod confirm;
mod logs;

pub use confirm::{
    CONFIRMATION_TOKEN, Confirmation, ConfirmationProvider, ForcedConfirmation,
    TerminalConfirmation,
};
pub use logs::{FollowStream, LogSnapshot, LogStream};

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::cloud::{CloudResourceClient, ObservedState};
use crate::config::DeploymentTarget;
use crate::error::{CloudError, DeployError, Result};

/// Delay between `start`/`restart` and the status read that follows.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Manages a deployed instance.
pub struct LifecycleManager<'a> {
    client: &'a dyn CloudResourceClient,
    settle_delay: Duration,
    cancel: CancelToken,
}

/// What to fetch from the logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Stream live lines until cancelled.
    pub follow: bool,
    /// Only the last N lines of a snapshot.
    pub tail: Option<usize>,
}

/// What to remove besides the instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Delete the resource group when nothing else is left in it.
    pub delete_group_if_empty: bool,
    /// Delete the registry too.
    pub include_registry: bool,
    /// Do not fail when the instance is already gone.
    pub allow_missing_instance: bool,
}

/// What happened to the resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GroupOutcome {
    /// Group deletion was not requested.
    NotRequested,
    /// The group was empty and is deleted.
    Deleted,
    /// The group still holds other resources and was kept.
    Kept {
        /// Names of the remaining resources.
        remaining: Vec<String>,
    },
    /// The group does not exist.
    Absent,
}

/// Result of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    /// The instance was deleted by this call.
    pub instance_deleted: bool,
    /// The registry was deleted by this call.
    pub registry_deleted: bool,
    /// Resource group outcome.
    pub group: GroupOutcome,
}

impl<'a> LifecycleManager<'a> {
    /// Creates a manager calling `client`.
    #[must_use]
    pub fn new(client: &'a dyn CloudResourceClient) -> Self {
        Self {
            client,
            settle_delay: DEFAULT_SETTLE_DELAY,
            cancel: CancelToken::new(),
        }
    }

    /// Sets the delay before the status read after `start`/`restart`.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Uses `cancel` to end follows and settle delays.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current state of the instance.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the instance does not exist, or an observation
    /// error if the read fails.
    pub async fn status(&self, target: &DeploymentTarget) -> Result<ObservedState> {
        debug!("Fetching status of {}", target.instance);
        self.client
            .show_instance(target)
            .await
            .map_err(|e| {
                DeployError::observation(format!("container instance {}", target.instance), e)
            })?
            .ok_or_else(|| instance_not_found(target))
    }

    /// Log output of the instance.
    ///
    /// Existence is checked first, so an absent instance fails before any
    /// log fetch.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the instance does not exist, or a remote error.
    pub async fn logs(&self, target: &DeploymentTarget, options: LogOptions) -> Result<LogStream> {
        self.status(target).await?;

        if options.follow {
            let source = self
                .client
                .follow_logs(target)
                .await
                .map_err(|e| remote(e, target))?;
            return Ok(LogStream::Follow(FollowStream::new(source, self.cancel.clone())));
        }

        let lines = self
            .client
            .instance_logs(target, options.tail)
            .await
            .map_err(|e| remote(e, target))?;
        Ok(LogStream::Snapshot(LogSnapshot::new(lines)))
    }

    /// Restarts the instance and returns the status after the settle delay.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the instance does not exist, or a remote error.
    pub async fn restart(&self, target: &DeploymentTarget) -> Result<ObservedState> {
        self.client
            .restart_instance(target)
            .await
            .map_err(|e| remote(e, target))?;
        self.settle_then_status(target).await
    }

    /// Starts the instance and returns the status after the settle delay.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the instance does not exist, or a remote error.
    pub async fn start(&self, target: &DeploymentTarget) -> Result<ObservedState> {
        self.client
            .start_instance(target)
            .await
            .map_err(|e| remote(e, target))?;
        self.settle_then_status(target).await
    }

    /// Stops the instance.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the instance does not exist, or a remote error.
    pub async fn stop(&self, target: &DeploymentTarget) -> Result<()> {
        self.client
            .stop_instance(target)
            .await
            .map_err(|e| remote(e, target))
    }

    /// Deletes the instance and, optionally, the registry and the group.
    ///
    /// Confirmation is requested before any remote call. The group is
    /// deleted only if nothing is left in it.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if confirmation is declined, `NotFound` if the
    /// instance does not exist (unless allowed), or a remote error.
    pub async fn delete(
        &self,
        target: &DeploymentTarget,
        options: DeleteOptions,
        confirmation: &dyn ConfirmationProvider,
    ) -> Result<DeleteReport> {
        let answer = confirmation.confirm(&delete_prompt(target, options))?;
        if !answer.is_granted() {
            info!("Deletion of {} cancelled", target.instance);
            return Err(DeployError::cancelled(format!(
                "confirmation did not match '{CONFIRMATION_TOKEN}'"
            )));
        }

        let instance_deleted = match self.client.delete_instance(target).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() && options.allow_missing_instance => {
                debug!("Instance {} already absent", target.instance);
                false
            }
            Err(e) => return Err(remote(e, target)),
        };

        let registry_deleted = if options.include_registry {
            match self.client.delete_registry(target).await {
                Ok(()) => true,
                Err(e) if e.is_not_found() => false,
                Err(e) => return Err(DeployError::Remote(e)),
            }
        } else {
            false
        };

        let group = if options.delete_group_if_empty {
            self.delete_group_if_empty(&target.resource_group).await?
        } else {
            GroupOutcome::NotRequested
        };

        Ok(DeleteReport {
            instance_deleted,
            registry_deleted,
            group,
        })
    }

    async fn delete_group_if_empty(&self, group: &str) -> Result<GroupOutcome> {
        let remaining = match self.client.list_group_resources(group).await {
            Ok(remaining) => remaining,
            Err(e) if e.is_not_found() => return Ok(GroupOutcome::Absent),
            Err(e) => return Err(DeployError::observation(format!("resource group {group}"), e)),
        };

        if !remaining.is_empty() {
            warn!(
                "Keeping resource group {group}: {} resources remain",
                remaining.len()
            );
            return Ok(GroupOutcome::Kept { remaining });
        }

        self.client.delete_resource_group(group).await?;
        Ok(GroupOutcome::Deleted)
    }

    async fn settle_then_status(&self, target: &DeploymentTarget) -> Result<ObservedState> {
        debug!("Waiting {:?} for {} to settle", self.settle_delay, target.instance);
        if !self.cancel.sleep(self.settle_delay).await {
            return Err(DeployError::cancelled("interrupted while waiting for status"));
        }
        self.status(target).await
    }
}

fn instance_not_found(target: &DeploymentTarget) -> DeployError {
    DeployError::not_found("Container instance", &target.instance)
}

/// Maps a failed call on the instance, turning "not found" into `NotFound`.
fn remote(error: CloudError, target: &DeploymentTarget) -> DeployError {
    if error.is_not_found() {
        instance_not_found(target)
    } else {
        DeployError::Remote(error)
    }
}

fn delete_prompt(target: &DeploymentTarget, options: DeleteOptions) -> String {
    let mut prompt = format!(
        "The following resources will be deleted:\n  - container instance {}",
        target.instance
    );
    if options.include_registry {
        prompt.push_str(&format!("\n  - registry {}", target.registry));
    }
    if options.delete_group_if_empty {
        prompt.push_str(&format!(
            "\n  - resource group {} (only if empty)",
            target.resource_group
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::confirm::MockConfirmationProvider;
    use super::*;
    use crate::cloud::RunState;
    use crate::cloud::fake::FakeCloud;
    use mockall::predicate::function;

    fn target() -> DeploymentTarget {
        DeploymentTarget::new("rg1", "reg12345", "svc1", "westeurope")
    }

    fn deployed() -> FakeCloud {
        FakeCloud::provisioned(&target())
            .with_instance(ObservedState::present(RunState::Running, "reg12345.azurecr.io/app:v1"))
    }

    fn typed(token: &'static str) -> MockConfirmationProvider {
        let mut provider = MockConfirmationProvider::new();
        provider
            .expect_confirm()
            .times(1)
            .returning(move |_| Ok(Confirmation::Typed(token.to_string())));
        provider
    }

    #[tokio::test]
    async fn test_status_of_missing_instance() {
        let cloud = FakeCloud::provisioned(&target());
        let err = LifecycleManager::new(&cloud)
            .status(&target())
            .await
            .expect_err("instance is absent");
        assert_eq!(err.kind(), "NotFoundError");
    }

    #[tokio::test]
    async fn test_logs_of_missing_instance_fetch_nothing() {
        let cloud = FakeCloud::provisioned(&target());

        let err = LifecycleManager::new(&cloud)
            .logs(&target(), LogOptions::default())
            .await
            .expect_err("instance is absent");

        assert!(matches!(err, DeployError::NotFound { .. }));
        assert_eq!(cloud.count("instance_logs"), 0);
        assert_eq!(cloud.count("follow_logs"), 0);
    }

    #[tokio::test]
    async fn test_snapshot_logs_with_tail() {
        let cloud = deployed().with_logs(&["one", "two", "three"]);

        let stream = LifecycleManager::new(&cloud)
            .logs(
                &target(),
                LogOptions {
                    follow: false,
                    tail: Some(2),
                },
            )
            .await
            .expect("logs");

        let LogStream::Snapshot(snapshot) = stream else {
            panic!("expected a snapshot");
        };
        assert_eq!(snapshot.lines(), ["two", "three"]);
    }

    #[tokio::test]
    async fn test_follow_logs_until_source_closes() {
        let cloud = deployed().with_logs(&["ready"]);

        let mut stream = LifecycleManager::new(&cloud)
            .logs(
                &target(),
                LogOptions {
                    follow: true,
                    tail: None,
                },
            )
            .await
            .expect("logs");

        assert!(stream.is_follow());
        assert_eq!(stream.next_line().await.expect("line"), Some(String::from("ready")));
        assert_eq!(stream.next_line().await.expect("end"), None);
    }

    #[tokio::test]
    async fn test_restart_rereads_status() {
        let cloud = deployed();

        let state = LifecycleManager::new(&cloud)
            .with_settle_delay(Duration::from_millis(1))
            .restart(&target())
            .await
            .expect("restart");

        assert!(state.is_running());
        assert_eq!(cloud.calls(), vec!["restart_instance", "show_instance"]);
    }

    #[tokio::test]
    async fn test_stop_then_start() {
        let cloud = deployed();
        let manager = LifecycleManager::new(&cloud).with_settle_delay(Duration::from_millis(1));

        manager.stop(&target()).await.expect("stop");
        assert_eq!(
            manager.status(&target()).await.expect("status").run_state,
            RunState::Stopped
        );

        let state = manager.start(&target()).await.expect("start");
        assert_eq!(state.run_state, RunState::Running);
    }

    #[tokio::test]
    async fn test_stop_failure_passes_through() {
        let cloud = deployed();
        cloud.fail("stop_instance", "The container group is in a transitioning state");

        let err = LifecycleManager::new(&cloud)
            .stop(&target())
            .await
            .expect_err("stop fails");

        assert_eq!(err.kind(), "RemoteError");
        assert!(err.to_string().contains("transitioning state"));
    }

    #[tokio::test]
    async fn test_delete_missing_instance_is_not_found() {
        let cloud = FakeCloud::provisioned(&target());

        let err = LifecycleManager::new(&cloud)
            .delete(&target(), DeleteOptions::default(), &ForcedConfirmation)
            .await
            .expect_err("instance is absent");

        assert_eq!(err.kind(), "NotFoundError");
    }

    #[tokio::test]
    async fn test_declined_confirmation_makes_no_remote_calls() {
        for token in ["", "delete", "Delete", "yes", "DELETE "] {
            let cloud = deployed();
            let provider = typed(token);

            let err = LifecycleManager::new(&cloud)
                .delete(
                    &target(),
                    DeleteOptions {
                        delete_group_if_empty: true,
                        include_registry: true,
                        allow_missing_instance: false,
                    },
                    &provider,
                )
                .await
                .expect_err("must be cancelled");

            assert_eq!(err.kind(), "CancelledError");
            assert!(cloud.calls().is_empty(), "'{token}' made remote calls");
        }
    }

    #[tokio::test]
    async fn test_confirmed_delete_keeps_non_empty_group() {
        let cloud = deployed().with_group_resources(&["reg12345"]);
        let mut provider = MockConfirmationProvider::new();
        provider
            .expect_confirm()
            .with(function(|prompt: &str| prompt.contains("svc1")))
            .times(1)
            .returning(|_| Ok(Confirmation::Typed(String::from("DELETE"))));

        let report = LifecycleManager::new(&cloud)
            .delete(
                &target(),
                DeleteOptions {
                    delete_group_if_empty: true,
                    ..DeleteOptions::default()
                },
                &provider,
            )
            .await
            .expect("delete");

        assert!(report.instance_deleted);
        assert_eq!(
            report.group,
            GroupOutcome::Kept {
                remaining: vec![String::from("reg12345")]
            }
        );
        assert_eq!(cloud.count("delete_resource_group"), 0);
    }

    #[tokio::test]
    async fn test_cleanup_with_registry_deletes_empty_group() {
        let cloud = deployed();

        let report = LifecycleManager::new(&cloud)
            .delete(
                &target(),
                DeleteOptions {
                    delete_group_if_empty: true,
                    include_registry: true,
                    allow_missing_instance: true,
                },
                &ForcedConfirmation,
            )
            .await
            .expect("delete");

        assert!(report.instance_deleted);
        assert!(report.registry_deleted);
        assert_eq!(report.group, GroupOutcome::Deleted);
        assert_eq!(
            cloud.mutating_calls(),
            vec!["delete_instance", "delete_registry", "delete_resource_group"]
        );
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_missing_instance() {
        let cloud = FakeCloud::provisioned(&target());

        let report = LifecycleManager::new(&cloud)
            .delete(
                &target(),
                DeleteOptions {
                    allow_missing_instance: true,
                    ..DeleteOptions::default()
                },
                &ForcedConfirmation,
            )
            .await
            .expect("delete");

        assert!(!report.instance_deleted);
        assert_eq!(report.group, GroupOutcome::NotRequested);
    }
}
