// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sources of environment variables injected into every machine.

use std::collections::BTreeMap;

use async_trait::async_trait;
use hangar_core::{Result, RuntimeIdentity};

use crate::model::EnvVar;

/// Supplies variables added to every machine of a runtime.
///
/// Provided variables never override variables a machine declares itself.
#[async_trait]
pub trait EnvVarProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    async fn provide(&self, identity: &RuntimeIdentity) -> Result<Vec<EnvVar>>;
}

/// Workspace id, owner and namespace of the runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityEnvVars;

impl IdentityEnvVars {
    pub const WORKSPACE_ID: &'static str = "HANGAR_WORKSPACE_ID";
    pub const WORKSPACE_OWNER: &'static str = "HANGAR_WORKSPACE_OWNER";
    pub const WORKSPACE_NAMESPACE: &'static str = "HANGAR_WORKSPACE_NAMESPACE";
}

#[async_trait]
impl EnvVarProvider for IdentityEnvVars {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn provide(&self, identity: &RuntimeIdentity) -> Result<Vec<EnvVar>> {
        Ok(vec![
            EnvVar::new(Self::WORKSPACE_ID, &identity.workspace_id),
            EnvVar::new(Self::WORKSPACE_OWNER, &identity.owner_id),
            EnvVar::new(Self::WORKSPACE_NAMESPACE, &identity.infra_namespace),
        ])
    }
}

/// Fixed set of variables, e.g. from service configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvVars {
    vars: BTreeMap<String, String>,
}

impl StaticEnvVars {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl EnvVarProvider for StaticEnvVars {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn provide(&self, _identity: &RuntimeIdentity) -> Result<Vec<EnvVar>> {
        Ok(self
            .vars
            .iter()
            .map(|(name, value)| EnvVar::new(name, value))
            .collect())
    }
}
