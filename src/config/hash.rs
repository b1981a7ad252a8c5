//! Desired-state fingerprinting.
//!
//! A fingerprint is a deterministic hash of everything that shapes the
//! instance. It labels plans so two runs can be compared at a glance.
//! Secret values never enter the hash; only their names do.

use sha2::{Digest, Sha256};

use super::spec::{DeploymentTarget, DesiredState, SecretsMode};

/// Hasher for computing desired-state fingerprints.
#[derive(Debug, Default)]
pub struct StateHasher;

impl StateHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint of a target and its desired state.
    #[must_use]
    pub fn fingerprint(&self, target: &DeploymentTarget, desired: &DesiredState) -> String {
        let mut hasher = Sha256::new();

        // Identity
        hasher.update(target.resource_group.as_bytes());
        hasher.update(target.registry.as_bytes());
        hasher.update(target.instance.as_bytes());
        hasher.update(target.region.as_bytes());

        // Runtime
        hasher.update(desired.image.to_string().as_bytes());
        hasher.update(desired.cpu_cores.to_be_bytes());
        hasher.update(desired.memory_gib.to_be_bytes());
        hasher.update(desired.restart_policy.as_str().as_bytes());
        hasher.update(desired.dns_label.as_bytes());

        // Ports (sorted for determinism)
        let mut ports: Vec<_> = desired.ports.iter().map(ToString::to_string).collect();
        ports.sort_unstable();
        for port in ports {
            hasher.update(port.as_bytes());
        }

        // Environment is a BTreeMap, already ordered
        for (name, value) in &desired.environment_variables {
            hasher.update(name.as_bytes());
            if desired.is_secret(name) {
                hasher.update(b"<secret>");
            } else {
                hasher.update(value.as_bytes());
            }
        }

        hasher.update(desired.secrets.label().as_bytes());
        if let SecretsMode::VaultManagedIdentity {
            vault_name,
            identity_name,
        } = &desired.secrets
        {
            hasher.update(vault_name.as_bytes());
            hasher.update(identity_name.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{ImageReference, PortSpec, RestartPolicy};
    use std::collections::{BTreeMap, BTreeSet};

    fn desired() -> DesiredState {
        DesiredState {
            image: ImageReference::new("reg1.azurecr.io", "app", "v1"),
            cpu_cores: 1.0,
            memory_gib: 1.5,
            ports: vec![PortSpec::tcp(8000)],
            restart_policy: RestartPolicy::Always,
            environment_variables: BTreeMap::from([(
                String::from("OPENWEATHER_API_KEY"),
                String::from("first"),
            )]),
            secret_variables: BTreeSet::from([String::from("OPENWEATHER_API_KEY")]),
            secrets: SecretsMode::PlainEnv,
            dns_label: String::from("svc1"),
        }
    }

    fn target() -> DeploymentTarget {
        DeploymentTarget::new("rg1", "reg1", "svc1", "westeurope")
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let hasher = StateHasher::new();
        assert_eq!(
            hasher.fingerprint(&target(), &desired()),
            hasher.fingerprint(&target(), &desired())
        );
    }

    #[test]
    fn test_image_change_changes_fingerprint() {
        let hasher = StateHasher::new();
        let mut changed = desired();
        changed.image.tag = String::from("v2");

        assert_ne!(
            hasher.fingerprint(&target(), &desired()),
            hasher.fingerprint(&target(), &changed)
        );
    }

    #[test]
    fn test_secret_value_not_hashed() {
        let hasher = StateHasher::new();
        let mut rotated = desired();
        rotated
            .environment_variables
            .insert(String::from("OPENWEATHER_API_KEY"), String::from("second"));

        assert_eq!(
            hasher.fingerprint(&target(), &desired()),
            hasher.fingerprint(&target(), &rotated)
        );
    }

    #[test]
    fn test_short_hash() {
        let hasher = StateHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
