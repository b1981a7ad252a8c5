//! Configuration module for the deployment reconciler.
//!
//! This module handles all configuration-related functionality:
//! - Loading the key-value environment file
//! - Layering CLI parameters over the file over built-in defaults
//! - Validation of names and sizes
//! - Fingerprinting the desired state

mod env_file;
mod hash;
mod resolver;
mod spec;
mod validator;

pub use env_file::{
    DEFAULT_ENV_FILE, EnvFile, FORWARDED_VARIABLES, ForwardedVariable, forwarded_variable,
};
pub use hash::StateHasher;
pub use resolver::{
    CliParams, ConfigResolver, DEFAULT_INSTANCE, DEFAULT_REGION, DEFAULT_RESOURCE_GROUP,
    TargetParams,
};
pub use spec::{
    BuildContext, DeploymentTarget, DesiredState, ImageReference, PlanOptions, PortProtocol,
    PortSpec, REGISTRY_DOMAIN, ResolvedConfig, RestartPolicy, SecretsMode, WaitPolicy,
};
pub use validator::{ConfigValidator, ValidationResult};
