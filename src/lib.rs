// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # aci-deploy
//!
//! Idempotent deployment and lifecycle management of a containerized tool
//! server on Azure Container Instances.
//!
//! ## Overview
//!
//! A deployment converges three cloud resources, a resource group, an image
//! registry and a container instance, towards a desired state:
//!
//! 1. **Resolve**: CLI flags, the `.env` file and defaults become one
//!    [`config::ResolvedConfig`]
//! 2. **Observe and plan**: [`planner::DeploymentPlanner`] reads the current
//!    state and emits an ordered list of actions
//! 3. **Execute**: [`planner::DeploymentExecutor`] applies the actions and
//!    polls the instance until it runs
//!
//! Updates always delete and recreate the instance. Secrets are passed as
//! plain environment variables or through a key vault read by a managed
//! identity, see [`secrets`].
//!
//! ## Modules
//!
//! - [`config`]: Environment file loading, layering and validation
//! - [`cloud`]: Provider client trait and the Azure CLI binding
//! - [`planner`]: Planning and execution of reconciliation actions
//! - [`secrets`]: Secrets delivery strategies
//! - [`lifecycle`]: Status, logs, restart, stop, start and delete
//! - [`auth`]: Bearer tokens and server verification
//! - [`cli`]: Command-line interface

// ============================================================================
// Modules
// ============================================================================

pub mod auth;
pub mod cancel;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod planner;
pub mod secrets;

// ============================================================================
// Re-exports
// ============================================================================

pub use auth::{AccessToken, AuthSettings, ServerProbe, TokenClient};
pub use cancel::CancelToken;
pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{AzureCli, CloudResourceClient, ObservedState};
pub use config::{ConfigResolver, DeploymentTarget, DesiredState, ResolvedConfig};
pub use error::{DeployError, Result};
pub use lifecycle::LifecycleManager;
pub use planner::{DeploymentExecutor, DeploymentPlan, DeploymentPlanner, ExecutionReport};
pub use secrets::SecretsStrategy;
