// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workspace runtime start/stop flow.
//!
//! [`KubernetesRuntime`] ties the runtime cache, env provisioning, server
//! exposure and the orchestration client together.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hangar_core::{Config as CoreConfig, RuntimeCache, persistence};
//! use hangar_kubernetes::{Config, KubernetesRuntime, MockOrchestrationClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let stores = persistence::connect(&CoreConfig::load()?).await?;
//!
//!     let runtime = KubernetesRuntime::builder()
//!         .cache(RuntimeCache::from(stores))
//!         .client(Arc::new(MockOrchestrationClient::new()))
//!         .config(Config::load()?)
//!         .build()?;
//!
//!     runtime.recover().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Start
//!
//! 1. Store the runtime as `starting` (fails if the workspace already runs)
//! 2. Provision env vars and expose servers and preview URLs
//! 3. Re-check the status; a stop may have won in the meantime
//! 4. Submit services, routes and pods
//! 5. Register machines with servers derived from the routes
//! 6. Compare-and-set `starting` → `running`
//!
//! If any step fails, submitted objects and the stored state are removed.

use std::sync::Arc;

use anyhow::Result as AnyResult;
use hangar_core::{
    InfraError, Machine, MachineStatus, RecoveryReport, Result, RuntimeCache, RuntimeIdentity,
    RuntimeState, RuntimeStatus, ServerStatus,
};
use tracing::{debug, error, info, warn};

use crate::client::OrchestrationClient;
use crate::config::Config;
use crate::env_vars::{EnvVarProvider, EnvVarsProvisioner};
use crate::model::KubernetesEnvironment;
use crate::server::{PreviewUrlExposer, RouteServerResolver, ServerExposer};

/// How a start call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// All objects were submitted and the runtime is running.
    Running,
    /// A concurrent stop won; the runtime is left for the stop to tear down.
    Interrupted,
}

/// Builder for creating a [`KubernetesRuntime`].
#[derive(Default)]
pub struct KubernetesRuntimeBuilder {
    cache: Option<RuntimeCache>,
    client: Option<Arc<dyn OrchestrationClient>>,
    config: Config,
    providers: Vec<Arc<dyn EnvVarProvider>>,
}

impl std::fmt::Debug for KubernetesRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesRuntimeBuilder")
            .field("cache", &self.cache.as_ref().map(|_| "..."))
            .field("client", &self.client.as_ref().map(|c| c.client_type()))
            .field("config", &self.config)
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl KubernetesRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime cache (required).
    pub fn cache(mut self, cache: RuntimeCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the orchestration client (required).
    pub fn client(mut self, client: Arc<dyn OrchestrationClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the routing configuration.
    ///
    /// Default: `Config::default()`
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Add an env var provider.
    pub fn provider(mut self, provider: Arc<dyn EnvVarProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the runtime.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> AnyResult<KubernetesRuntime> {
        let cache = self
            .cache
            .ok_or_else(|| anyhow::anyhow!("cache is required"))?;
        let client = self
            .client
            .ok_or_else(|| anyhow::anyhow!("client is required"))?;

        let provisioner = self
            .providers
            .into_iter()
            .fold(EnvVarsProvisioner::new(), |p, provider| p.with_provider(provider));
        let exposer = ServerExposer::new(&self.config);

        Ok(KubernetesRuntime {
            cache,
            client,
            provisioner,
            preview: PreviewUrlExposer::new(exposer.clone()),
            exposer,
        })
    }
}

/// Starts and stops workspace runtimes on a Kubernetes/OpenShift cluster.
pub struct KubernetesRuntime {
    cache: RuntimeCache,
    client: Arc<dyn OrchestrationClient>,
    provisioner: EnvVarsProvisioner,
    exposer: ServerExposer,
    preview: PreviewUrlExposer,
}

impl std::fmt::Debug for KubernetesRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesRuntime")
            .field("client", &self.client.client_type())
            .field("provisioner", &self.provisioner)
            .field("exposer", &self.exposer)
            .finish_non_exhaustive()
    }
}

impl KubernetesRuntime {
    /// Create a new builder.
    pub fn builder() -> KubernetesRuntimeBuilder {
        KubernetesRuntimeBuilder::new()
    }

    pub fn cache(&self) -> &RuntimeCache {
        &self.cache
    }

    /// Start the runtime described by `env`.
    pub async fn start(
        &self,
        identity: &RuntimeIdentity,
        mut env: KubernetesEnvironment,
    ) -> Result<StartOutcome> {
        let state = RuntimeState::new(identity.clone(), RuntimeStatus::Starting, env.commands.clone());
        self.cache.register(&state).await?;

        info!(
            workspace_id = %identity.workspace_id,
            namespace = %identity.infra_namespace,
            pods = env.pods.len(),
            "Starting runtime"
        );

        match self.launch(identity, &mut env).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    workspace_id = %identity.workspace_id,
                    error = %e,
                    code = e.error_code(),
                    "Runtime start failed, cleaning up"
                );
                self.abort_start(identity).await;
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        identity: &RuntimeIdentity,
        env: &mut KubernetesEnvironment,
    ) -> Result<StartOutcome> {
        self.provisioner.provision(env, identity).await?;
        self.exposer.expose_machines(env)?;
        self.preview.expose(env)?;
        env.label_workspace(&identity.workspace_id);

        let mut commands = env.commands.clone();
        self.preview.resolve_commands(env, &mut commands);
        match self.cache.runtimes().update_commands(identity, &commands).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(workspace_id = %identity.workspace_id, "Runtime removed before objects were submitted");
                return Ok(StartOutcome::Interrupted);
            }
            Err(e) => return Err(e),
        }

        if !self.still_starting(identity).await? {
            warn!(workspace_id = %identity.workspace_id, "Runtime stopped before objects were submitted");
            return Ok(StartOutcome::Interrupted);
        }

        let namespace = identity.infra_namespace.as_str();
        for service in env.services.values() {
            self.client.create_service(namespace, service).await?;
        }
        for route in env.routes.values() {
            self.client.create_route(namespace, route).await?;
        }
        for pod in env.pods.values() {
            self.client.create_pod(namespace, pod).await?;
        }
        debug!(
            workspace_id = %identity.workspace_id,
            services = env.services.len(),
            routes = env.routes.len(),
            pods = env.pods.len(),
            "Submitted objects"
        );

        let resolver = RouteServerResolver::new(env.routes.values());
        let machine_names = env.machine_names();
        for name in &machine_names {
            let mut machine = Machine::new(name.clone(), MachineStatus::Starting);
            machine.servers = resolver.resolve(name)?;
            match self.cache.machines().put(identity, &machine).await {
                Ok(()) => {}
                Err(InfraError::RuntimeNotFound { .. }) => {
                    warn!(workspace_id = %identity.workspace_id, "Runtime removed while registering machines");
                    return self.interrupted(identity).await;
                }
                Err(e) => return Err(e),
            }
        }

        let running = self
            .cache
            .runtimes()
            .update_status_if(identity, &|s| s == RuntimeStatus::Starting, RuntimeStatus::Running)
            .await?;
        if !running {
            warn!(workspace_id = %identity.workspace_id, "Runtime stop won the race against start");
            return self.interrupted(identity).await;
        }

        for name in &machine_names {
            match self
                .cache
                .machines()
                .update_machine_status(identity, name, MachineStatus::Running)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(StartOutcome::Interrupted),
                Err(e) => return Err(e),
            }
        }

        info!(
            workspace_id = %identity.workspace_id,
            machines = machine_names.len(),
            "Runtime running"
        );
        Ok(StartOutcome::Running)
    }

    /// A stop took over after objects were submitted. Its teardown may have
    /// run before the submission, so delete again.
    async fn interrupted(&self, identity: &RuntimeIdentity) -> Result<StartOutcome> {
        self.client
            .delete_all(&identity.infra_namespace, &identity.workspace_id)
            .await?;
        Ok(StartOutcome::Interrupted)
    }

    async fn still_starting(&self, identity: &RuntimeIdentity) -> Result<bool> {
        match self.cache.runtimes().get_status(identity).await {
            Ok(status) => Ok(status == RuntimeStatus::Starting),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn abort_start(&self, identity: &RuntimeIdentity) {
        if let Err(e) = self
            .client
            .delete_all(&identity.infra_namespace, &identity.workspace_id)
            .await
        {
            error!(workspace_id = %identity.workspace_id, error = %e, "Failed to delete objects of failed start");
        }
        if let Err(e) = self.cache.remove(identity).await {
            error!(workspace_id = %identity.workspace_id, error = %e, "Failed to remove state of failed start");
        }
    }

    /// Stop the runtime of `identity`.
    ///
    /// Returns false if the runtime was already stopped. Stopping a runtime
    /// that is being stopped repeats the teardown, which is idempotent.
    pub async fn stop(&self, identity: &RuntimeIdentity) -> Result<bool> {
        let stopping = self
            .cache
            .runtimes()
            .update_status_if(identity, &|s| s != RuntimeStatus::Stopped, RuntimeStatus::Stopping)
            .await?;
        if !stopping {
            debug!(workspace_id = %identity.workspace_id, "Runtime already stopped");
            return Ok(false);
        }

        info!(workspace_id = %identity.workspace_id, "Stopping runtime");
        self.teardown(identity).await?;
        Ok(true)
    }

    async fn teardown(&self, identity: &RuntimeIdentity) -> Result<()> {
        self.client
            .delete_all(&identity.infra_namespace, &identity.workspace_id)
            .await?;

        match self
            .cache
            .runtimes()
            .update_status(identity, RuntimeStatus::Stopped)
            .await
        {
            Ok(()) => {}
            // Removed by a concurrent stop.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }
        self.cache.remove(identity).await?;

        info!(workspace_id = %identity.workspace_id, "Runtime stopped");
        Ok(())
    }

    /// Record a status event of a server.
    ///
    /// Returns false for duplicate events.
    pub async fn server_status_changed(
        &self,
        identity: &RuntimeIdentity,
        machine: &str,
        server: &str,
        status: ServerStatus,
    ) -> Result<bool> {
        let changed = self
            .cache
            .machines()
            .update_server_status(identity, machine, server, status)
            .await?;
        if changed {
            info!(
                workspace_id = %identity.workspace_id,
                machine = %machine,
                server = %server,
                status = %status,
                "Server status changed"
            );
        } else {
            debug!(
                workspace_id = %identity.workspace_id,
                machine = %machine,
                server = %server,
                status = %status,
                "Duplicate server status event"
            );
        }
        Ok(changed)
    }

    /// Settle runtimes interrupted by a restart and finish their teardown.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let report = hangar_core::recover(&self.cache).await?;

        for identity in &report.interrupted {
            if let Err(e) = self.teardown(identity).await {
                error!(
                    workspace_id = %identity.workspace_id,
                    error = %e,
                    "Failed to finish teardown of interrupted runtime"
                );
            }
        }

        Ok(report)
    }
}
