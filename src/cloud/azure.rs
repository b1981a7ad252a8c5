//! Azure binding of [`CloudResourceClient`] over the `az` and `docker` CLIs.
//!
//! Every call spawns the tool, waits for it and parses `--output json` where
//! the command produces structured output. Arguments are never logged past
//! the first two words, since they carry registry passwords and secret
//! values.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::{BuildContext, DeploymentTarget, ImageReference};
use crate::error::{CloudError, CloudResult};

use super::client::{CloudResourceClient, LogSource};
use super::types::{
    AzContainerGroup, AzIdentity, AzRegistryCredential, AzResource, CreateInstanceRequest,
    IdentityInfo, ObservedState, RegistryCredentials,
};

/// Default Azure CLI executable.
const AZ_BIN: &str = "az";

/// Default Docker CLI executable.
const DOCKER_BIN: &str = "docker";

/// Registry SKU for newly created registries.
const REGISTRY_SKU: &str = "Basic";

/// Stderr fragments the Azure CLI uses for missing resources.
const NOT_FOUND_MARKERS: &[&str] = &[
    "ResourceNotFound",
    "ResourceGroupNotFound",
    "was not found",
    "could not be found",
];

/// Azure CLI client.
#[derive(Debug, Clone)]
pub struct AzureCli {
    az_bin: String,
    docker_bin: String,
    subscription: Option<String>,
}

impl Default for AzureCli {
    fn default() -> Self {
        Self::new()
    }
}

impl AzureCli {
    /// Creates a client using `az` and `docker` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            az_bin: AZ_BIN.to_string(),
            docker_bin: DOCKER_BIN.to_string(),
            subscription: None,
        }
    }

    /// Pins every `az` call to a subscription.
    #[must_use]
    pub fn with_subscription(mut self, subscription: Option<String>) -> Self {
        self.subscription = subscription;
        self
    }

    /// Overrides the executables, e.g. for wrappers.
    #[must_use]
    pub fn with_binaries(
        mut self,
        az_bin: impl Into<String>,
        docker_bin: impl Into<String>,
    ) -> Self {
        self.az_bin = az_bin.into();
        self.docker_bin = docker_bin.into();
        self
    }

    /// Runs a program to completion and returns its stdout.
    async fn run(&self, program: &str, args: &[String]) -> CloudResult<String> {
        let command = describe(program, args);
        trace!(command = %command, "Running provider command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CloudError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_not_found(&stderr) {
                debug!(command = %command, "Resource not found");
                return Err(CloudError::not_found(command));
            }
            return Err(CloudError::CommandFailed {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn az_args(&self, args: &[&str], json: bool) -> Vec<String> {
        let mut full: Vec<String> = args.iter().map(ToString::to_string).collect();
        if json {
            full.extend(["--output".to_string(), "json".to_string()]);
        }
        if let Some(subscription) = &self.subscription {
            full.extend(["--subscription".to_string(), subscription.clone()]);
        }
        full
    }

    /// Runs `az` and discards the output.
    async fn az(&self, args: &[&str]) -> CloudResult<()> {
        self.run(&self.az_bin, &self.az_args(args, true)).await.map(|_| ())
    }

    /// Runs `az` and returns raw text output.
    async fn az_text(&self, args: &[&str]) -> CloudResult<String> {
        self.run(&self.az_bin, &self.az_args(args, false)).await
    }

    /// Runs `az` and parses its JSON output.
    async fn az_json<T: DeserializeOwned>(&self, args: &[&str]) -> CloudResult<T> {
        let full = self.az_args(args, true);
        let stdout = self.run(&self.az_bin, &full).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| CloudError::invalid_response(describe(&self.az_bin, &full), e.to_string()))
    }

    /// Runs `docker`.
    async fn docker(&self, args: &[&str]) -> CloudResult<()> {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        self.run(&self.docker_bin, &args).await.map(|_| ())
    }
}

#[async_trait]
impl CloudResourceClient for AzureCli {
    async fn resource_group_exists(&self, name: &str) -> CloudResult<bool> {
        let stdout = self.az_text(&["group", "exists", "--name", name]).await?;
        match stdout.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(CloudError::invalid_response(
                "az group exists",
                format!("expected true or false, got '{other}'"),
            )),
        }
    }

    async fn create_resource_group(&self, name: &str, region: &str) -> CloudResult<()> {
        info!("Creating resource group {name} in {region}");
        self.az(&["group", "create", "--name", name, "--location", region])
            .await
    }

    async fn delete_resource_group(&self, name: &str) -> CloudResult<()> {
        info!("Deleting resource group {name}");
        self.az(&["group", "delete", "--name", name, "--yes"]).await
    }

    async fn list_group_resources(&self, name: &str) -> CloudResult<Vec<String>> {
        let resources: Vec<AzResource> = self
            .az_json(&["resource", "list", "--resource-group", name])
            .await?;
        Ok(resources.into_iter().map(|r| r.name).collect())
    }

    async fn registry_exists(&self, target: &DeploymentTarget) -> CloudResult<bool> {
        let result = self
            .az(&[
                "acr",
                "show",
                "--name",
                &target.registry,
                "--resource-group",
                &target.resource_group,
            ])
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_registry(&self, target: &DeploymentTarget) -> CloudResult<()> {
        info!("Creating registry {}", target.registry);
        self.az(&[
            "acr",
            "create",
            "--name",
            &target.registry,
            "--resource-group",
            &target.resource_group,
            "--location",
            &target.region,
            "--sku",
            REGISTRY_SKU,
            "--admin-enabled",
            "true",
        ])
        .await
    }

    async fn delete_registry(&self, target: &DeploymentTarget) -> CloudResult<()> {
        info!("Deleting registry {}", target.registry);
        self.az(&[
            "acr",
            "delete",
            "--name",
            &target.registry,
            "--resource-group",
            &target.resource_group,
            "--yes",
        ])
        .await
    }

    async fn registry_credentials(
        &self,
        target: &DeploymentTarget,
    ) -> CloudResult<RegistryCredentials> {
        let credential: AzRegistryCredential = self
            .az_json(&["acr", "credential", "show", "--name", &target.registry])
            .await?;

        let password = credential
            .passwords
            .into_iter()
            .next()
            .map(|p| p.value)
            .ok_or_else(|| {
                CloudError::invalid_response("az acr credential", "registry returned no password")
            })?;

        Ok(RegistryCredentials {
            login_server: target.login_server(),
            username: credential.username,
            password,
        })
    }

    async fn build_image(&self, image: &ImageReference, build: &BuildContext) -> CloudResult<()> {
        let local = local_tag(image);
        info!("Building image {local}");
        let dockerfile = build.dockerfile.to_string_lossy();
        let context = build.context_dir.to_string_lossy();
        self.docker(&["build", "-t", &local, "-f", &dockerfile, &context])
            .await
    }

    async fn tag_image(&self, image: &ImageReference) -> CloudResult<()> {
        let local = local_tag(image);
        let remote = image.to_string();
        debug!("Tagging {local} as {remote}");
        self.docker(&["tag", &local, &remote]).await
    }

    async fn push_image(
        &self,
        target: &DeploymentTarget,
        image: &ImageReference,
    ) -> CloudResult<()> {
        self.az(&["acr", "login", "--name", &target.registry]).await?;
        let remote = image.to_string();
        info!("Pushing image {remote}");
        self.docker(&["push", &remote]).await
    }

    async fn show_instance(&self, target: &DeploymentTarget) -> CloudResult<Option<ObservedState>> {
        let result: CloudResult<AzContainerGroup> = self
            .az_json(&[
                "container",
                "show",
                "--resource-group",
                &target.resource_group,
                "--name",
                &target.instance,
            ])
            .await;

        match result {
            Ok(group) => Ok(Some(ObservedState::from(group))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_instance(&self, request: &CreateInstanceRequest) -> CloudResult<()> {
        let target = &request.target;
        info!("Creating container instance {}", target.instance);

        let image = request.image.to_string();
        let cpu = request.cpu_cores.to_string();
        let memory = request.memory_gib.to_string();
        let ports: Vec<String> = request.ports.iter().map(|p| p.port.to_string()).collect();
        // The CLI takes a single protocol for all ports; mixed ports fail validation.
        let protocol = request
            .ports
            .first()
            .map_or("TCP", |p| p.protocol.as_str());
        let environment: Vec<String> = request
            .environment
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        let mut args: Vec<&str> = vec![
            "container",
            "create",
            "--resource-group",
            &target.resource_group,
            "--name",
            &target.instance,
            "--location",
            &target.region,
            "--image",
            &image,
            "--cpu",
            &cpu,
            "--memory",
            &memory,
            "--os-type",
            "Linux",
            "--restart-policy",
            request.restart_policy.as_str(),
            "--ip-address",
            "Public",
            "--dns-name-label",
            &request.dns_label,
            "--registry-login-server",
            &request.registry.login_server,
            "--registry-username",
            &request.registry.username,
            "--registry-password",
            &request.registry.password,
            "--protocol",
            protocol,
            "--ports",
        ];
        args.extend(ports.iter().map(String::as_str));

        if !environment.is_empty() {
            args.push("--environment-variables");
            args.extend(environment.iter().map(String::as_str));
        }

        if let Some(identity) = &request.identity_id {
            args.extend(["--assign-identity", identity.as_str()]);
        }

        self.az(&args).await
    }

    async fn delete_instance(&self, target: &DeploymentTarget) -> CloudResult<()> {
        info!("Deleting container instance {}", target.instance);
        self.az(&[
            "container",
            "delete",
            "--resource-group",
            &target.resource_group,
            "--name",
            &target.instance,
            "--yes",
        ])
        .await
    }

    async fn start_instance(&self, target: &DeploymentTarget) -> CloudResult<()> {
        info!("Starting container instance {}", target.instance);
        self.instance_verb("start", target).await
    }

    async fn stop_instance(&self, target: &DeploymentTarget) -> CloudResult<()> {
        info!("Stopping container instance {}", target.instance);
        self.instance_verb("stop", target).await
    }

    async fn restart_instance(&self, target: &DeploymentTarget) -> CloudResult<()> {
        info!("Restarting container instance {}", target.instance);
        self.instance_verb("restart", target).await
    }

    async fn instance_logs(
        &self,
        target: &DeploymentTarget,
        tail: Option<usize>,
    ) -> CloudResult<Vec<String>> {
        let stdout = self
            .az_text(&[
                "container",
                "logs",
                "--resource-group",
                &target.resource_group,
                "--name",
                &target.instance,
            ])
            .await?;

        let lines: Vec<String> = stdout.lines().map(ToString::to_string).collect();
        Ok(match tail {
            Some(n) if n < lines.len() => lines[lines.len() - n..].to_vec(),
            _ => lines,
        })
    }

    async fn follow_logs(&self, target: &DeploymentTarget) -> CloudResult<Box<dyn LogSource>> {
        let args = self.az_args(
            &[
                "container",
                "logs",
                "--resource-group",
                &target.resource_group,
                "--name",
                &target.instance,
                "--follow",
            ],
            false,
        );

        let mut child = Command::new(&self.az_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CloudError::Spawn {
                program: self.az_bin.clone(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            CloudError::invalid_response("az container logs", "log stream has no stdout")
        })?;

        // Drained concurrently so a chatty stderr cannot block the stream.
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text).await;
                text
            })
        });

        Ok(Box::new(ChildLogSource {
            child,
            lines: BufReader::new(stdout).lines(),
            stderr,
            finished: false,
        }))
    }

    async fn ensure_secret_store(
        &self,
        target: &DeploymentTarget,
        vault: &str,
    ) -> CloudResult<()> {
        match self.az(&["keyvault", "show", "--name", vault]).await {
            Ok(()) => {
                debug!("Key vault {vault} already exists");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!("Creating key vault {vault}");
        self.az(&[
            "keyvault",
            "create",
            "--name",
            vault,
            "--resource-group",
            &target.resource_group,
            "--location",
            &target.region,
        ])
        .await
    }

    async fn write_secret(&self, vault: &str, name: &str, value: &str) -> CloudResult<()> {
        info!("Writing secret {name} to key vault {vault}");
        self.az(&[
            "keyvault",
            "secret",
            "set",
            "--vault-name",
            vault,
            "--name",
            name,
            "--value",
            value,
        ])
        .await
    }

    async fn ensure_identity(
        &self,
        target: &DeploymentTarget,
        identity: &str,
    ) -> CloudResult<IdentityInfo> {
        let existing: CloudResult<AzIdentity> = self
            .az_json(&[
                "identity",
                "show",
                "--name",
                identity,
                "--resource-group",
                &target.resource_group,
            ])
            .await;

        match existing {
            Ok(found) => return Ok(found.into()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!("Creating managed identity {identity}");
        let created: AzIdentity = self
            .az_json(&[
                "identity",
                "create",
                "--name",
                identity,
                "--resource-group",
                &target.resource_group,
                "--location",
                &target.region,
            ])
            .await?;
        Ok(created.into())
    }

    async fn grant_secret_access(&self, vault: &str, principal_id: &str) -> CloudResult<()> {
        info!("Granting secret read access on {vault}");
        self.az(&[
            "keyvault",
            "set-policy",
            "--name",
            vault,
            "--object-id",
            principal_id,
            "--secret-permissions",
            "get",
            "list",
        ])
        .await
    }
}

impl AzureCli {
    async fn instance_verb(&self, verb: &str, target: &DeploymentTarget) -> CloudResult<()> {
        self.az(&[
            "container",
            verb,
            "--resource-group",
            &target.resource_group,
            "--name",
            &target.instance,
        ])
        .await
    }
}

/// Log lines from a running `az container logs --follow`.
struct ChildLogSource {
    /// Killed when the source is dropped, reaped at end of stream.
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl ChildLogSource {
    const COMMAND: &'static str = "az container logs";

    /// Turns the exit status of a finished stream into the end-of-stream result.
    async fn finish(&mut self) -> CloudResult<Option<String>> {
        self.finished = true;

        let status = self
            .child
            .wait()
            .await
            .map_err(|e| CloudError::invalid_response(Self::COMMAND, e.to_string()))?;
        if status.success() {
            return Ok(None);
        }

        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = stderr.trim().to_string();
        if is_not_found(&stderr) {
            return Err(CloudError::not_found(Self::COMMAND));
        }
        Err(CloudError::CommandFailed {
            command: Self::COMMAND.to_string(),
            code: status.code().unwrap_or(-1),
            stderr,
        })
    }
}

#[async_trait]
impl LogSource for ChildLogSource {
    async fn next_line(&mut self) -> CloudResult<Option<String>> {
        if self.finished {
            return Ok(None);
        }

        let line = self
            .lines
            .next_line()
            .await
            .map_err(|e| CloudError::invalid_response(Self::COMMAND, e.to_string()))?;
        match line {
            Some(line) => Ok(Some(line)),
            None => self.finish().await,
        }
    }
}

/// Local build tag of an image.
fn local_tag(image: &ImageReference) -> String {
    format!("{}:{}", image.repository, image.tag)
}

/// Short, secret-free form of a command for logs and errors.
fn describe(program: &str, args: &[String]) -> String {
    let head: Vec<&str> = args.iter().take(2).map(String::as_str).collect();
    if head.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", head.join(" "))
    }
}

fn is_not_found(stderr: &str) -> bool {
    NOT_FOUND_MARKERS.iter().any(|marker| stderr.contains(marker))
}
