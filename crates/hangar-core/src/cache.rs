// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime cache facade.
//!
//! [`RuntimeCache`] pairs a [`RuntimeStateStore`] with the [`MachineStateCache`]
//! holding the machines of the same runtimes. Removing a runtime through the
//! facade always clears its machines first, so no reader sees machines of a
//! runtime that is no longer stored.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{InfraError, Result};
use crate::model::{RuntimeIdentity, RuntimeState};
use crate::persistence::{MachineStateCache, RemovalCascade, RuntimeStateStore, Stores};

/// Clears the machine cache of a runtime before the runtime row goes away.
struct MachineCascade<'a>(&'a dyn MachineStateCache);

#[async_trait]
impl RemovalCascade for MachineCascade<'_> {
    async fn before_remove(&self, identity: &RuntimeIdentity) -> Result<()> {
        self.0.remove_machines(identity).await
    }
}

/// Runtime state store and machine cache of one process.
#[derive(Clone)]
pub struct RuntimeCache {
    runtimes: Arc<dyn RuntimeStateStore>,
    machines: Arc<dyn MachineStateCache>,
}

impl std::fmt::Debug for RuntimeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCache")
            .field("runtimes", &"...")
            .field("machines", &"...")
            .finish()
    }
}

impl From<Stores> for RuntimeCache {
    fn from(stores: Stores) -> Self {
        Self::new(stores.runtimes, stores.machines)
    }
}

impl RuntimeCache {
    pub fn new(runtimes: Arc<dyn RuntimeStateStore>, machines: Arc<dyn MachineStateCache>) -> Self {
        Self { runtimes, machines }
    }

    pub fn runtimes(&self) -> &dyn RuntimeStateStore {
        self.runtimes.as_ref()
    }

    pub fn machines(&self) -> &dyn MachineStateCache {
        self.machines.as_ref()
    }

    /// Store the state of a runtime that is about to start.
    ///
    /// Fails with `RuntimeAlreadyExists` if the workspace already has one.
    pub async fn register(&self, state: &RuntimeState) -> Result<()> {
        if !self.runtimes.put_if_absent(state).await? {
            return Err(InfraError::RuntimeAlreadyExists {
                workspace_id: state.identity.workspace_id.clone(),
            });
        }

        info!(
            workspace_id = %state.identity.workspace_id,
            env_name = %state.identity.env_name,
            namespace = %state.identity.infra_namespace,
            status = %state.status,
            "Registered runtime"
        );
        Ok(())
    }

    /// Remove the runtime together with its machines and servers.
    ///
    /// Returns false if no runtime was stored for the workspace.
    pub async fn remove(&self, identity: &RuntimeIdentity) -> Result<bool> {
        let cascade = MachineCascade(self.machines.as_ref());
        self.runtimes.remove(identity, &cascade).await
    }
}
