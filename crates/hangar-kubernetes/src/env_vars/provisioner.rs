// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Injection of resolved environment variables into container specs.

use std::collections::BTreeMap;
use std::sync::Arc;

use hangar_core::{Result, RuntimeIdentity};
use tracing::{debug, info};

use super::providers::EnvVarProvider;
use super::resolver;
use crate::model::{EnvVar, KubernetesEnvironment, machine_name};

/// Merges provider, machine-declared and container env vars and writes the
/// ordered result into every container of an environment.
#[derive(Clone, Default)]
pub struct EnvVarsProvisioner {
    providers: Vec<Arc<dyn EnvVarProvider>>,
}

impl std::fmt::Debug for EnvVarsProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvVarsProvisioner")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl EnvVarsProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. Earlier providers win when two supply the same name.
    pub fn with_provider(mut self, provider: Arc<dyn EnvVarProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Resolve and write the env of every container in `env`.
    ///
    /// For each container the existing env list (deduplicated, last entry
    /// wins) is overridden by provider variables, which in turn are
    /// overridden by the variables its machine declares. The merged set is
    /// ordered with [`resolver::sort`]. All containers are computed before
    /// any is changed: on error `env` is left untouched.
    pub async fn provision(
        &self,
        env: &mut KubernetesEnvironment,
        identity: &RuntimeIdentity,
    ) -> Result<()> {
        let provided = self.provided_vars(identity).await?;

        let mut resolved: Vec<(String, usize, Vec<EnvVar>)> = Vec::new();
        for (pod_name, pod) in &env.pods {
            for (index, container) in pod.containers.iter().enumerate() {
                let machine = machine_name(pod_name, &container.name);
                let declared = env.machines.get(&machine).map(|m| &m.env);

                let mut merged: BTreeMap<String, EnvVar> = BTreeMap::new();
                for var in &container.env {
                    merged.insert(var.name.clone(), var.clone());
                }
                for var in &provided {
                    merged.insert(var.name.clone(), var.clone());
                }
                for (name, value) in declared.into_iter().flatten() {
                    merged.insert(name.clone(), EnvVar::new(name, value));
                }

                let sorted = resolver::sort(merged)?;
                debug!(
                    workspace_id = %identity.workspace_id,
                    machine = %machine,
                    vars = sorted.len(),
                    "Resolved container env"
                );
                resolved.push((pod_name.clone(), index, sorted));
            }
        }

        for machine in env.machines.values_mut() {
            for var in &provided {
                if let Some(value) = &var.value {
                    machine
                        .env
                        .entry(var.name.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }

        let containers = resolved.len();
        for (pod_name, index, vars) in resolved {
            if let Some(container) = env
                .pods
                .get_mut(&pod_name)
                .and_then(|pod| pod.containers.get_mut(index))
            {
                container.env = vars;
            }
        }

        info!(
            workspace_id = %identity.workspace_id,
            containers,
            provided = provided.len(),
            "Provisioned environment variables"
        );
        Ok(())
    }

    /// Provider variables, first provider wins on duplicate names.
    async fn provided_vars(&self, identity: &RuntimeIdentity) -> Result<Vec<EnvVar>> {
        let mut vars: BTreeMap<String, EnvVar> = BTreeMap::new();
        for provider in &self.providers {
            let provided = provider.provide(identity).await?;
            debug!(
                provider = provider.name(),
                count = provided.len(),
                "Collected provider env vars"
            );
            for var in provided {
                vars.entry(var.name.clone()).or_insert(var);
            }
        }
        Ok(vars.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_vars::providers::{IdentityEnvVars, StaticEnvVars};
    use crate::model::{Container, MachineConfig, Pod};
    use hangar_core::InfraError;

    fn identity() -> RuntimeIdentity {
        RuntimeIdentity::new("ws1", "default", "alice", "alice-ns")
    }

    fn env_of(container: Container, machine: MachineConfig) -> KubernetesEnvironment {
        let machine_name = machine_name("ws", &container.name);
        KubernetesEnvironment::default()
            .with_pod(Pod::new("ws").with_container(container))
            .with_machine(&machine_name, machine)
    }

    fn container_env(env: &KubernetesEnvironment, pod: &str, index: usize) -> Vec<(String, String)> {
        env.pods[pod].containers[index]
            .env
            .iter()
            .map(|var| (var.name.clone(), var.value.clone().unwrap_or_default()))
            .collect()
    }

    fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_declared_value_overrides_existing() {
        let mut env = env_of(
            Container::new("dev", "ide")
                .with_env("VAR_THAT_EXISTS", "old")
                .with_env("DEP", "base"),
            MachineConfig::default().with_env("VAR_THAT_EXISTS", "new $(DEP)"),
        );

        EnvVarsProvisioner::new()
            .provision(&mut env, &identity())
            .await
            .unwrap();

        assert_eq!(
            container_env(&env, "ws", 0),
            pairs(&[("DEP", "base"), ("VAR_THAT_EXISTS", "new $(DEP)")])
        );
    }

    #[tokio::test]
    async fn test_duplicate_container_vars_last_wins() {
        let mut env = env_of(
            Container::new("dev", "ide")
                .with_env("PATH_EXTRA", "first")
                .with_env("PATH_EXTRA", "second"),
            MachineConfig::default(),
        );

        EnvVarsProvisioner::new()
            .provision(&mut env, &identity())
            .await
            .unwrap();

        assert_eq!(container_env(&env, "ws", 0), pairs(&[("PATH_EXTRA", "second")]));
    }

    #[tokio::test]
    async fn test_cross_source_references_resolve() {
        let provisioner = EnvVarsProvisioner::new().with_provider(Arc::new(IdentityEnvVars));
        let mut env = env_of(
            Container::new("dev", "ide").with_env("HOME_DIR", "/home/$(USER_NAME)"),
            MachineConfig::default()
                .with_env("USER_NAME", "user-$(HANGAR_WORKSPACE_OWNER)")
                .with_env("HANGAR_WORKSPACE_ID", "declared"),
        );

        provisioner.provision(&mut env, &identity()).await.unwrap();

        assert_eq!(
            container_env(&env, "ws", 0),
            pairs(&[
                ("HANGAR_WORKSPACE_ID", "declared"),
                ("HANGAR_WORKSPACE_NAMESPACE", "alice-ns"),
                ("HANGAR_WORKSPACE_OWNER", "alice"),
                ("USER_NAME", "user-$(HANGAR_WORKSPACE_OWNER)"),
                ("HOME_DIR", "/home/$(USER_NAME)"),
            ])
        );
        let machine = &env.machines["ws/dev"];
        assert_eq!(machine.env["HANGAR_WORKSPACE_ID"], "declared");
        assert_eq!(machine.env["HANGAR_WORKSPACE_OWNER"], "alice");
    }

    #[tokio::test]
    async fn test_provider_overrides_container_env() {
        let provisioner = EnvVarsProvisioner::new()
            .with_provider(Arc::new(StaticEnvVars::default().with("LANG", "en_US.UTF-8")));
        let mut env = env_of(
            Container::new("dev", "ide").with_env("LANG", "C"),
            MachineConfig::default(),
        );

        provisioner.provision(&mut env, &identity()).await.unwrap();

        assert_eq!(container_env(&env, "ws", 0), pairs(&[("LANG", "en_US.UTF-8")]));
        assert_eq!(env.machines["ws/dev"].env["LANG"], "en_US.UTF-8");
    }

    #[tokio::test]
    async fn test_first_provider_wins() {
        let provisioner = EnvVarsProvisioner::new()
            .with_provider(Arc::new(StaticEnvVars::default().with("LANG", "en_US.UTF-8")))
            .with_provider(Arc::new(StaticEnvVars::default().with("LANG", "C")));
        let mut env = env_of(Container::new("dev", "ide"), MachineConfig::default());

        provisioner.provision(&mut env, &identity()).await.unwrap();

        assert_eq!(container_env(&env, "ws", 0), pairs(&[("LANG", "en_US.UTF-8")]));
    }

    #[tokio::test]
    async fn test_cycle_leaves_every_container_untouched() {
        let mut env = KubernetesEnvironment::default()
            .with_pod(
                Pod::new("ws")
                    .with_container(Container::new("a", "img").with_env("OK", "1"))
                    .with_container(Container::new("b", "img").with_env("X", "$(Y)")),
            )
            .with_machine("ws/a", MachineConfig::default().with_env("NEW", "2"))
            .with_machine("ws/b", MachineConfig::default().with_env("Y", "$(X)"));
        let before = env.clone();

        let provisioner = EnvVarsProvisioner::new().with_provider(Arc::new(IdentityEnvVars));
        let err = provisioner.provision(&mut env, &identity()).await.unwrap_err();

        assert!(matches!(err, InfraError::CyclicReferences { .. }));
        assert_eq!(env, before);
    }
}
