//! Desired-state types for a deployment.
//!
//! These types describe what the single managed container instance should
//! look like and where it lives. They are built once per invocation by the
//! resolver and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Azure registry login-server suffix.
pub const REGISTRY_DOMAIN: &str = "azurecr.io";

/// The resource triple a run converges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentTarget {
    /// Resource group holding the registry and the instance.
    pub resource_group: String,
    /// Image registry name (globally unique at the provider).
    pub registry: String,
    /// Container instance name.
    pub instance: String,
    /// Region for newly created resources.
    pub region: String,
}

impl DeploymentTarget {
    /// Creates a new deployment target.
    #[must_use]
    pub fn new(
        resource_group: impl Into<String>,
        registry: impl Into<String>,
        instance: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            registry: registry.into(),
            instance: instance.into(),
            region: region.into(),
        }
    }

    /// Login server of the registry, e.g. `myreg.azurecr.io`.
    #[must_use]
    pub fn login_server(&self) -> String {
        format!("{}.{REGISTRY_DOMAIN}", self.registry.to_lowercase())
    }
}

impl std::fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.resource_group, self.instance, self.region)
    }
}

/// Fully qualified container image reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host (login server).
    pub registry: String,
    /// Repository inside the registry.
    pub repository: String,
    /// Image tag.
    pub tag: String,
}

impl ImageReference {
    /// Creates a new image reference.
    #[must_use]
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Parses `registry/repository[:tag]`. The tag defaults to `latest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference has no registry part.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (registry, rest) = s
            .split_once('/')
            .ok_or_else(|| format!("Invalid image reference: {s}. Expected REGISTRY/REPOSITORY[:TAG]"))?;

        // A colon after the last slash is a tag; one before it would be a registry port.
        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, tag),
            _ => (rest, "latest"),
        };

        if registry.is_empty() || repository.is_empty() || tag.is_empty() {
            return Err(format!("Invalid image reference: {s}"));
        }

        Ok(Self::new(registry, repository, tag))
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

/// An exposed port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct PortSpec {
    /// Port number.
    pub port: u16,
    /// Transport protocol.
    pub protocol: PortProtocol,
}

/// Port protocol types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortProtocol {
    /// TCP protocol.
    #[default]
    Tcp,
    /// UDP protocol.
    Udp,
}

impl PortProtocol {
    /// Provider spelling of the protocol.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl PortSpec {
    /// Creates a TCP port.
    #[must_use]
    pub const fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: PortProtocol::Tcp,
        }
    }

    /// Parses `8000`, `8000/tcp` or `8000/UDP`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port number or protocol is invalid.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (number, protocol) = s.trim().split_once('/').unwrap_or((s.trim(), "tcp"));

        let port = number
            .parse::<u16>()
            .map_err(|_| format!("Invalid port number: {number}"))?;
        if port == 0 {
            return Err(String::from("Port must be a positive integer"));
        }

        let protocol = match protocol.to_lowercase().as_str() {
            "tcp" => PortProtocol::Tcp,
            "udp" => PortProtocol::Udp,
            other => return Err(format!("Invalid protocol: {other}. Expected: tcp or udp")),
        };

        Ok(Self { port, protocol })
    }
}

impl TryFrom<String> for PortSpec {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PortSpec> for String {
    fn from(port: PortSpec) -> Self {
        port.to_string()
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol.as_str())
    }
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RestartPolicy {
    /// Never restart.
    Never,
    /// Restart when the process exits non-zero.
    OnFailure,
    /// Always restart.
    #[default]
    Always,
}

impl RestartPolicy {
    /// Provider spelling of the policy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::OnFailure => "OnFailure",
            Self::Always => "Always",
        }
    }

    /// Parses the provider spelling, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown policies.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "onfailure" | "on-failure" => Ok(Self::OnFailure),
            "always" => Ok(Self::Always),
            other => Err(format!("Invalid restart policy: {other}. Expected: Never, OnFailure or Always")),
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How secrets reach the running instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SecretsMode {
    /// Secrets are plain environment variables on the instance.
    #[default]
    PlainEnv,
    /// Secrets live in a key vault read through a managed identity.
    VaultManagedIdentity {
        /// Key vault holding the secrets.
        vault_name: String,
        /// User-assigned identity granted read access to the vault.
        identity_name: String,
    },
}

impl SecretsMode {
    /// Short label of the mode.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::PlainEnv => "plain-env",
            Self::VaultManagedIdentity { .. } => "vault-managed-identity",
        }
    }
}

/// What the instance should look like.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesiredState {
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
    /// Environment variables forwarded to the instance.
    pub environment_variables: BTreeMap<String, String>,
    /// Names in `environment_variables` that hold secrets.
    pub secret_variables: BTreeSet<String>,
    /// Secrets delivery strategy.
    pub secrets: SecretsMode,
    /// DNS name label for the public IP.
    pub dns_label: String,
}

impl DesiredState {
    /// Returns true if the named variable is a secret.
    #[must_use]
    pub fn is_secret(&self, name: &str) -> bool {
        self.secret_variables.contains(name)
    }

    /// Variables that are not secrets.
    pub fn plain_variables(&self) -> impl Iterator<Item = (&String, &String)> {
        self.environment_variables
            .iter()
            .filter(|(name, _)| !self.is_secret(name))
    }

    /// Variables that are secrets.
    pub fn secret_entries(&self) -> impl Iterator<Item = (&String, &String)> {
        self.environment_variables
            .iter()
            .filter(|(name, _)| self.is_secret(name))
    }

    /// First exposed port, used to build the service URL.
    #[must_use]
    pub fn primary_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.port)
    }
}

/// Bounded poll for the instance to reach `Running`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Number of polls.
    pub attempts: u32,
    /// Delay between polls.
    pub interval: Duration,
}

impl WaitPolicy {
    /// Default number of polls.
    pub const DEFAULT_ATTEMPTS: u32 = 12;
    /// Default delay between polls in seconds.
    pub const DEFAULT_INTERVAL_SECS: u64 = 10;

    /// Creates a new wait policy.
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound of the time spent polling.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.attempts)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_ATTEMPTS,
            Duration::from_secs(Self::DEFAULT_INTERVAL_SECS),
        )
    }
}

/// Local inputs for the image build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildContext {
    /// Docker build context directory.
    pub context_dir: PathBuf,
    /// Dockerfile path.
    pub dockerfile: PathBuf,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self {
            context_dir: PathBuf::from("."),
            dockerfile: PathBuf::from("Dockerfile"),
        }
    }
}

/// Knobs that shape the plan without being part of the desired state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanOptions {
    /// Reuse the image already in the registry.
    pub skip_build: bool,
    /// Build inputs.
    pub build: BuildContext,
    /// Wait policy for the final `WaitForRunning` step.
    pub wait: WaitPolicy,
}

/// Everything the resolver produces for one invocation.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Where to deploy.
    pub target: DeploymentTarget,
    /// What to deploy.
    pub desired: DesiredState,
    /// How to plan.
    pub options: PlanOptions,
}

impl ResolvedConfig {
    /// Public URL of the service once it has an FQDN.
    #[must_use]
    pub fn service_url(&self, fqdn: &str) -> String {
        self.desired.primary_port().map_or_else(
            || format!("http://{fqdn}"),
            |port| format!("http://{fqdn}:{port}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_reference() {
        let image = ImageReference::parse("reg1.azurecr.io/app:v2").expect("valid reference");
        assert_eq!(image.registry, "reg1.azurecr.io");
        assert_eq!(image.repository, "app");
        assert_eq!(image.tag, "v2");
        assert_eq!(image.to_string(), "reg1.azurecr.io/app:v2");
    }

    #[test]
    fn test_image_reference_default_tag() {
        let image = ImageReference::parse("localhost:5000/team/app").expect("valid reference");
        assert_eq!(image.registry, "localhost:5000");
        assert_eq!(image.repository, "team/app");
        assert_eq!(image.tag, "latest");

        assert!(ImageReference::parse("app").is_err());
    }

    #[test]
    fn test_parse_ports() {
        assert_eq!(PortSpec::parse("8000").expect("port"), PortSpec::tcp(8000));
        assert_eq!(PortSpec::parse("8000/TCP").expect("port"), PortSpec::tcp(8000));

        let udp = PortSpec::parse("53/udp").expect("port");
        assert_eq!(udp.protocol, PortProtocol::Udp);
        assert_eq!(udp.to_string(), "53/UDP");

        assert!(PortSpec::parse("0").is_err());
        assert!(PortSpec::parse("8000/http").is_err());
        assert!(PortSpec::parse("abc").is_err());
    }

    #[test]
    fn test_restart_policy_parse() {
        assert_eq!(RestartPolicy::parse("always").expect("policy"), RestartPolicy::Always);
        assert_eq!(RestartPolicy::parse("OnFailure").expect("policy"), RestartPolicy::OnFailure);
        assert!(RestartPolicy::parse("sometimes").is_err());
    }

    #[test]
    fn test_login_server() {
        let target = DeploymentTarget::new("rg1", "MyReg", "svc1", "westeurope");
        assert_eq!(target.login_server(), "myreg.azurecr.io");
    }

    #[test]
    fn test_wait_policy_budget() {
        let policy = WaitPolicy::default();
        assert_eq!(policy.attempts, 12);
        assert_eq!(policy.budget(), Duration::from_secs(120));
    }
}
