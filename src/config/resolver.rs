//! Configuration resolution.
//!
//! Merges three layers into one effective configuration, highest first:
//! command-line parameters, the environment file, built-in defaults.
//! Resolution is pure: it reads the already-loaded environment file and
//! never touches the cloud.

use clap::Args;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, DeployError, Result};

use super::env_file::EnvFile;
use super::spec::{
    BuildContext, DeploymentTarget, DesiredState, ImageReference, PlanOptions, PortSpec,
    ResolvedConfig, RestartPolicy, SecretsMode, WaitPolicy,
};
use super::validator::ConfigValidator;

/// Default resource group.
pub const DEFAULT_RESOURCE_GROUP: &str = "mcp-weather-rg";
/// Default container instance name.
pub const DEFAULT_INSTANCE: &str = "mcp-weather-server";
/// Default region.
pub const DEFAULT_REGION: &str = "westeurope";
/// Default image repository.
pub const DEFAULT_IMAGE_NAME: &str = "mcp-weather-server";
/// Default image tag.
pub const DEFAULT_IMAGE_TAG: &str = "latest";
/// Default CPU cores.
pub const DEFAULT_CPU_CORES: f64 = 1.0;
/// Default memory in GiB.
pub const DEFAULT_MEMORY_GIB: f64 = 1.5;
/// Default service port.
pub const DEFAULT_PORT: u16 = 8000;

/// Maximum key vault name length at the provider.
const MAX_VAULT_NAME_LEN: usize = 24;

/// Parameters naming the resource triple.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetParams {
    /// Resource group name.
    #[arg(short = 'g', long)]
    pub resource_group: Option<String>,

    /// Container registry name.
    #[arg(short = 'r', long)]
    pub registry: Option<String>,

    /// Container instance name.
    #[arg(short = 'n', long)]
    pub instance: Option<String>,

    /// Region for new resources.
    #[arg(short = 'l', long)]
    pub region: Option<String>,
}

/// Parameters describing the desired instance.
#[derive(Debug, Clone, Default, Args)]
pub struct CliParams {
    /// Resource names.
    #[command(flatten)]
    pub target: TargetParams,

    /// Image repository name.
    #[arg(long)]
    pub image_name: Option<String>,

    /// Image tag.
    #[arg(short = 't', long)]
    pub image_tag: Option<String>,

    /// CPU cores.
    #[arg(long)]
    pub cpu: Option<f64>,

    /// Memory in GiB.
    #[arg(long)]
    pub memory: Option<f64>,

    /// Exposed port, `PORT[/PROTOCOL]`. Repeatable.
    #[arg(short = 'p', long = "port")]
    pub ports: Vec<String>,

    /// Restart policy.
    #[arg(long, value_enum)]
    pub restart_policy: Option<RestartPolicy>,

    /// DNS name label of the public IP.
    #[arg(long)]
    pub dns_label: Option<String>,

    /// Extra environment variable, `KEY=VALUE`. Repeatable.
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Extra secret environment variable, `KEY=VALUE`. Repeatable.
    #[arg(long = "secret-env")]
    pub secret_env: Vec<String>,

    /// Deliver secrets through a key vault and a managed identity.
    #[arg(long)]
    pub use_key_vault: bool,

    /// Key vault name (with --use-key-vault).
    #[arg(long)]
    pub key_vault: Option<String>,

    /// Managed identity name (with --use-key-vault).
    #[arg(long)]
    pub identity: Option<String>,

    /// Reuse the image already pushed to the registry.
    #[arg(long)]
    pub skip_build: bool,

    /// Docker build context.
    #[arg(long)]
    pub context: Option<PathBuf>,

    /// Dockerfile path.
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,

    /// Number of status polls while waiting for the instance.
    #[arg(long)]
    pub wait_attempts: Option<u32>,

    /// Seconds between status polls.
    #[arg(long)]
    pub wait_interval: Option<u64>,
}

/// Merges CLI parameters, the environment file and defaults.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded environment file.
    env_file: EnvFile,
    /// Validator applied to the result.
    validator: ConfigValidator,
}

impl ConfigResolver {
    /// Creates a resolver over an already-loaded environment file.
    #[must_use]
    pub fn new(env_file: EnvFile) -> Self {
        Self {
            env_file,
            validator: ConfigValidator::new(),
        }
    }

    /// Creates a resolver, loading `path` or the default `.env` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing or unreadable.
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        Ok(Self::new(EnvFile::load_optional(path)?))
    }

    /// The underlying environment file.
    #[must_use]
    pub const fn env_file(&self) -> &EnvFile {
        &self.env_file
    }

    /// Resolves only the resource triple.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry name is missing or a name is invalid.
    pub fn resolve_target(&self, params: &TargetParams) -> Result<DeploymentTarget> {
        let registry = params
            .registry
            .clone()
            .or_else(|| self.file_value(&["ACR_NAME", "REGISTRY_NAME"]))
            .ok_or_else(|| ConfigError::MissingField {
                field: String::from("registry name"),
                flag: String::from("registry"),
                env_key: String::from("ACR_NAME"),
            })?;

        let target = DeploymentTarget {
            resource_group: self.layered(
                params.resource_group.as_deref(),
                &["RESOURCE_GROUP"],
                DEFAULT_RESOURCE_GROUP,
            ),
            registry,
            instance: self.layered(params.instance.as_deref(), &["CONTAINER_NAME"], DEFAULT_INSTANCE),
            region: self.layered(params.region.as_deref(), &["LOCATION"], DEFAULT_REGION),
        };

        self.validator.validate_target(&target)?;
        debug!("Resolved target: {target}");
        Ok(target)
    }

    /// Resolves the full configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for missing mandatory fields and
    /// unparsable or invalid values. Unknown keys are ignored.
    pub fn resolve(&self, cli: &CliParams) -> Result<ResolvedConfig> {
        let target = self.resolve_target(&cli.target)?;

        let image = ImageReference::new(
            target.login_server(),
            self.layered(cli.image_name.as_deref(), &["IMAGE_NAME"], DEFAULT_IMAGE_NAME),
            self.layered(cli.image_tag.as_deref(), &["IMAGE_TAG"], DEFAULT_IMAGE_TAG),
        );

        let cpu_cores = match cli.cpu {
            Some(cpu) => cpu,
            None => self.parsed("CPU_CORES", "cpu")?.unwrap_or(DEFAULT_CPU_CORES),
        };
        let memory_gib = match cli.memory {
            Some(memory) => memory,
            None => self.parsed("MEMORY_GB", "memory")?.unwrap_or(DEFAULT_MEMORY_GIB),
        };

        let ports = self.resolve_ports(&cli.ports)?;

        let restart_policy = match cli.restart_policy {
            Some(policy) => policy,
            None => match self.env_file.get("RESTART_POLICY") {
                Some(raw) => RestartPolicy::parse(raw)
                    .map_err(|reason| ConfigError::invalid("restart policy", raw, reason))?,
                None => RestartPolicy::default(),
            },
        };

        let dns_label = self.layered(cli.dns_label.as_deref(), &["DNS_LABEL"], &target.instance);

        let (environment_variables, secret_variables) = self.resolve_environment(cli)?;

        let secrets = if cli.use_key_vault || self.env_file.get("USE_KEY_VAULT") == Some("true") {
            SecretsMode::VaultManagedIdentity {
                vault_name: self.layered(
                    cli.key_vault.as_deref(),
                    &["KEY_VAULT_NAME"],
                    &default_vault_name(&target.instance),
                ),
                identity_name: self.layered(
                    cli.identity.as_deref(),
                    &["MANAGED_IDENTITY_NAME"],
                    &format!("{}-identity", target.instance),
                ),
            }
        } else {
            SecretsMode::PlainEnv
        };

        let desired = DesiredState {
            image,
            cpu_cores,
            memory_gib,
            ports,
            restart_policy,
            environment_variables,
            secret_variables,
            secrets,
            dns_label,
        };

        let wait = WaitPolicy::new(
            match cli.wait_attempts {
                Some(attempts) => attempts,
                None => self
                    .parsed("WAIT_ATTEMPTS", "wait attempts")?
                    .unwrap_or(WaitPolicy::DEFAULT_ATTEMPTS),
            },
            Duration::from_secs(match cli.wait_interval {
                Some(secs) => secs,
                None => self
                    .parsed("WAIT_INTERVAL_SECS", "wait interval")?
                    .unwrap_or(WaitPolicy::DEFAULT_INTERVAL_SECS),
            }),
        );

        let defaults = BuildContext::default();
        let options = PlanOptions {
            skip_build: cli.skip_build,
            build: BuildContext {
                context_dir: cli.context.clone().unwrap_or(defaults.context_dir),
                dockerfile: cli.dockerfile.clone().unwrap_or(defaults.dockerfile),
            },
            wait,
        };

        let resolved = ResolvedConfig {
            target,
            desired,
            options,
        };
        self.validator.validate(&resolved)?;

        Ok(resolved)
    }

    /// Ports from the CLI, else the `PORTS` key, else the default port.
    fn resolve_ports(&self, cli_ports: &[String]) -> Result<Vec<PortSpec>> {
        let raw: Vec<String> = if cli_ports.is_empty() {
            self.env_file.get("PORTS").map_or_else(Vec::new, |ports| {
                ports.split(',').map(|p| p.trim().to_string()).collect()
            })
        } else {
            cli_ports.to_vec()
        };

        if raw.is_empty() {
            return Ok(vec![PortSpec::tcp(DEFAULT_PORT)]);
        }

        raw.iter()
            .map(|p| {
                PortSpec::parse(p)
                    .map_err(|reason| DeployError::from(ConfigError::invalid("port", p, reason)))
            })
            .collect()
    }

    /// Allow-listed file variables overlaid with explicit CLI variables.
    fn resolve_environment(
        &self,
        cli: &CliParams,
    ) -> Result<(BTreeMap<String, String>, BTreeSet<String>)> {
        let mut variables = BTreeMap::new();
        let mut secrets = BTreeSet::new();

        for (var, value) in self.env_file.forwarded() {
            variables.insert(var.name.to_string(), value.to_string());
            if var.secret {
                secrets.insert(var.name.to_string());
            }
        }

        for raw in &cli.env {
            let (key, value) = split_assignment(raw)?;
            secrets.remove(&key);
            variables.insert(key, value);
        }

        for raw in &cli.secret_env {
            let (key, value) = split_assignment(raw)?;
            secrets.insert(key.clone());
            variables.insert(key, value);
        }

        Ok((variables, secrets))
    }

    /// CLI value, else the first file key present, else the default.
    fn layered(&self, cli: Option<&str>, keys: &[&str], default: &str) -> String {
        cli.filter(|v| !v.is_empty())
            .map(String::from)
            .or_else(|| self.file_value(keys))
            .unwrap_or_else(|| default.to_string())
    }

    /// First file key present.
    fn file_value(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|key| self.env_file.get(key))
            .map(String::from)
    }

    /// Parses a file value, if present.
    fn parsed<T: FromStr>(&self, key: &str, field: &str) -> Result<Option<T>> {
        self.env_file
            .get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| {
                    DeployError::from(ConfigError::invalid(
                        field,
                        raw,
                        format!("{key} is not a valid number"),
                    ))
                })
            })
            .transpose()
    }
}

/// `<instance>-kv`, truncated to the provider limit.
fn default_vault_name(instance: &str) -> String {
    let mut name: String = format!("{instance}-kv");
    if name.len() > MAX_VAULT_NAME_LEN {
        let base: String = instance.chars().take(MAX_VAULT_NAME_LEN - 3).collect();
        name = format!("{}-kv", base.trim_end_matches('-'));
    }
    name
}

/// Splits `KEY=VALUE`.
fn split_assignment(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ConfigError::invalid("environment variable", raw, "expected KEY=VALUE").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(pairs: &[(&str, &str)]) -> ConfigResolver {
        ConfigResolver::new(EnvFile::from_pairs(pairs.iter().copied()))
    }

    fn cli_with_registry(registry: &str) -> CliParams {
        CliParams {
            target: TargetParams {
                registry: Some(registry.to_string()),
                ..TargetParams::default()
            },
            ..CliParams::default()
        }
    }

    #[test]
    fn test_registry_is_mandatory() {
        let result = resolver(&[]).resolve(&CliParams::default());
        match result {
            Err(DeployError::Config(ConfigError::MissingField { field, .. })) => {
                assert_eq!(field, "registry name");
            }
            other => panic!("expected missing registry, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = resolver(&[])
            .resolve(&cli_with_registry("reg12345"))
            .expect("resolve failed");

        assert_eq!(config.target.resource_group, DEFAULT_RESOURCE_GROUP);
        assert_eq!(config.target.instance, DEFAULT_INSTANCE);
        assert_eq!(config.target.region, DEFAULT_REGION);
        assert_eq!(
            config.desired.image.to_string(),
            "reg12345.azurecr.io/mcp-weather-server:latest"
        );
        assert_eq!(config.desired.ports, vec![PortSpec::tcp(8000)]);
        assert_eq!(config.desired.restart_policy, RestartPolicy::Always);
        assert_eq!(config.desired.dns_label, DEFAULT_INSTANCE);
        assert_eq!(config.desired.secrets, SecretsMode::PlainEnv);
        assert_eq!(config.options.wait, WaitPolicy::default());
        assert!(config.desired.environment_variables.is_empty());
    }

    #[test]
    fn test_cli_overrides_file_overrides_default() {
        let resolver = resolver(&[
            ("ACR_NAME", "filereg01"),
            ("RESOURCE_GROUP", "file-rg"),
            ("IMAGE_TAG", "v1"),
            ("CPU_CORES", "2"),
        ]);

        let mut cli = cli_with_registry("clireg01");
        cli.image_tag = Some(String::from("v2"));

        let config = resolver.resolve(&cli).expect("resolve failed");
        assert_eq!(config.target.registry, "clireg01");
        assert_eq!(config.target.resource_group, "file-rg");
        assert_eq!(config.desired.image.tag, "v2");
        assert!((config.desired.cpu_cores - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_registry_from_file() {
        let config = resolver(&[("REGISTRY_NAME", "filereg01")])
            .resolve(&CliParams::default())
            .expect("resolve failed");
        assert_eq!(config.target.registry, "filereg01");
    }

    #[test]
    fn test_only_allow_listed_variables_forwarded() {
        let resolver = resolver(&[
            ("ACR_NAME", "reg12345"),
            ("AZURE_AD_TENANT_ID", "tenant"),
            ("OPENWEATHER_API_KEY", "owm-key"),
            ("AWS_SECRET_ACCESS_KEY", "leak"),
        ]);

        let config = resolver.resolve(&CliParams::default()).expect("resolve failed");
        let env = &config.desired.environment_variables;

        assert_eq!(env.get("AZURE_AD_TENANT_ID").map(String::as_str), Some("tenant"));
        assert_eq!(env.get("OPENWEATHER_API_KEY").map(String::as_str), Some("owm-key"));
        assert!(!env.contains_key("AWS_SECRET_ACCESS_KEY"));
        assert!(!env.contains_key("ACR_NAME"));
        assert!(config.desired.is_secret("OPENWEATHER_API_KEY"));
        assert!(!config.desired.is_secret("AZURE_AD_TENANT_ID"));
    }

    #[test]
    fn test_cli_env_overrides_file_env() {
        let resolver = resolver(&[("ACR_NAME", "reg12345"), ("OPENWEATHER_API_KEY", "from-file")]);

        let mut cli = CliParams::default();
        cli.secret_env.push(String::from("OPENWEATHER_API_KEY=from-cli"));
        cli.env.push(String::from("LOG_LEVEL=debug"));

        let config = resolver.resolve(&cli).expect("resolve failed");
        let env = &config.desired.environment_variables;
        assert_eq!(env.get("OPENWEATHER_API_KEY").map(String::as_str), Some("from-cli"));
        assert_eq!(env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert!(config.desired.is_secret("OPENWEATHER_API_KEY"));
    }

    #[test]
    fn test_invalid_numeric_value() {
        let result = resolver(&[("ACR_NAME", "reg12345"), ("MEMORY_GB", "lots")])
            .resolve(&CliParams::default());
        assert!(matches!(
            result,
            Err(DeployError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_key_vault_mode() {
        let mut cli = cli_with_registry("reg12345");
        cli.use_key_vault = true;

        let config = resolver(&[]).resolve(&cli).expect("resolve failed");
        assert_eq!(
            config.desired.secrets,
            SecretsMode::VaultManagedIdentity {
                vault_name: String::from("mcp-weather-server-kv"),
                identity_name: String::from("mcp-weather-server-identity"),
            }
        );
    }

    #[test]
    fn test_default_vault_name_truncated() {
        let name = default_vault_name("a-very-long-instance-name-for-weather");
        assert!(name.len() <= MAX_VAULT_NAME_LEN);
        assert!(name.ends_with("-kv"));
    }

    #[test]
    fn test_ports_from_file() {
        let config = resolver(&[("ACR_NAME", "reg12345"), ("PORTS", "8000/tcp, 9000")])
            .resolve(&CliParams::default())
            .expect("resolve failed");
        assert_eq!(
            config.desired.ports,
            vec![PortSpec::tcp(8000), PortSpec::tcp(9000)]
        );
    }

    #[test]
    fn test_malformed_cli_env() {
        let mut cli = cli_with_registry("reg12345");
        cli.env.push(String::from("NOVALUE"));
        assert!(resolver(&[]).resolve(&cli).is_err());
    }
}
