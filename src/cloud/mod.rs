//! Cloud control-plane access.
//!
//! - [`CloudResourceClient`]: the capability trait the core consumes
//! - [`AzureCli`]: the binding over the `az` and `docker` tools
//! - Observed-state types and the provider's JSON shapes

mod azure;
mod client;
#[cfg(test)]
pub(crate) mod fake;
mod types;

pub use azure::AzureCli;
pub use client::{CloudResourceClient, LogSource};
pub use types::{
    CreateInstanceRequest, IdentityInfo, ObservedState, ObservedTarget, RegistryCredentials,
    RunState,
};
