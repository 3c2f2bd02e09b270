// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for hangar-core.
//!
//! Two contracts live here: [`RuntimeStateStore`] keeps one record per running
//! workspace, [`MachineStateCache`] keeps the machines and servers of those
//! runtimes. Both SQLite and PostgreSQL backends implement both traits on one
//! type sharing a connection pool.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::error::{InfraError, Result};
use crate::model::{
    Command, Machine, MachineStatus, RuntimeIdentity, RuntimeState, RuntimeStatus, Server,
    ServerStatus,
};

/// Predicate evaluated against the currently stored runtime status.
pub type StatusPredicate<'a> = &'a (dyn Fn(RuntimeStatus) -> bool + Send + Sync);

/// Runtime row as stored in the `runtimes` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RuntimeRecord {
    pub workspace_id: String,
    pub env_name: String,
    pub owner_id: String,
    pub infra_namespace: String,
    /// Lowercase [`RuntimeStatus`] string.
    pub status: String,
    /// JSON array of [`Command`].
    pub commands: String,
}

impl RuntimeRecord {
    fn identity(&self) -> RuntimeIdentity {
        RuntimeIdentity::new(
            self.workspace_id.clone(),
            self.env_name.clone(),
            self.owner_id.clone(),
            self.infra_namespace.clone(),
        )
    }
}

impl TryFrom<RuntimeRecord> for RuntimeState {
    type Error = InfraError;

    fn try_from(record: RuntimeRecord) -> Result<Self> {
        Ok(RuntimeState {
            identity: record.identity(),
            status: record.status.parse()?,
            commands: serde_json::from_str(&record.commands)?,
        })
    }
}

/// Machine row as stored in the `machines` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MachineRecord {
    pub machine_name: String,
    pub status: String,
}

/// Server row as stored in the `servers` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServerRecord {
    pub machine_name: String,
    pub server_name: String,
    pub status: String,
    pub url: String,
    /// JSON object of string attributes.
    pub attributes: String,
}

impl TryFrom<ServerRecord> for Server {
    type Error = InfraError;

    fn try_from(record: ServerRecord) -> Result<Self> {
        Ok(Server {
            name: record.server_name,
            status: record.status.parse()?,
            url: record.url,
            attributes: serde_json::from_str(&record.attributes)?,
        })
    }
}

/// Assemble machines from their rows. Servers whose machine row is missing are dropped.
pub(crate) fn assemble_machines(
    machines: Vec<MachineRecord>,
    servers: Vec<ServerRecord>,
) -> Result<BTreeMap<String, Machine>> {
    let mut assembled = BTreeMap::new();
    for record in machines {
        let status: MachineStatus = record.status.parse()?;
        assembled.insert(
            record.machine_name.clone(),
            Machine::new(record.machine_name, status),
        );
    }
    for record in servers {
        let machine_name = record.machine_name.clone();
        let server = Server::try_from(record)?;
        if let Some(machine) = assembled.get_mut(&machine_name) {
            machine.servers.insert(server.name.clone(), server);
        }
    }
    Ok(assembled)
}

/// Decide what a server status update that touched no row means.
pub(crate) fn classify_server_miss(
    identity: &RuntimeIdentity,
    machine: &str,
    server: &str,
    current: Option<String>,
    requested: ServerStatus,
) -> Result<bool> {
    let Some(current) = current else {
        return Err(InfraError::ServerNotFound {
            workspace_id: identity.workspace_id.clone(),
            machine: machine.to_string(),
            server: server.to_string(),
        });
    };
    let current: ServerStatus = current.parse()?;
    if current == requested {
        debug!(
            workspace_id = %identity.workspace_id,
            machine = %machine,
            server = %server,
            status = %requested,
            "Server already in requested status"
        );
        return Ok(false);
    }
    Err(InfraError::InvalidTransition {
        entity: "server",
        from: current.to_string(),
        to: requested.to_string(),
    })
}

/// Hook run by [`RuntimeStateStore::remove`] before the runtime row is deleted.
///
/// An error aborts the removal; the runtime stays stored.
#[async_trait]
pub trait RemovalCascade: Send + Sync {
    async fn before_remove(&self, identity: &RuntimeIdentity) -> Result<()>;
}

/// Cascade that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCascade;

#[async_trait]
impl RemovalCascade for NoCascade {
    async fn before_remove(&self, _identity: &RuntimeIdentity) -> Result<()> {
        Ok(())
    }
}

/// Durable per-workspace runtime records.
///
/// Every status change that depends on the current status must go through
/// [`update_status_if`](Self::update_status_if).
#[async_trait]
pub trait RuntimeStateStore: Send + Sync {
    /// Insert `state` unless a runtime is already stored for its workspace.
    ///
    /// Returns false without touching the stored entry on conflict.
    async fn put_if_absent(&self, state: &RuntimeState) -> Result<bool>;

    async fn get(&self, identity: &RuntimeIdentity) -> Result<Option<RuntimeState>>;

    async fn get_identities(&self) -> Result<BTreeSet<RuntimeIdentity>>;

    /// Unconditionally overwrite the status.
    async fn update_status(&self, identity: &RuntimeIdentity, status: RuntimeStatus)
    -> Result<()>;

    /// Set the status to `new` only if it currently equals `expected`.
    ///
    /// Returns whether a row was updated. Backends implement this as a single
    /// conditional `UPDATE`; it never reports `RuntimeNotFound`.
    async fn replace_status(
        &self,
        identity: &RuntimeIdentity,
        expected: RuntimeStatus,
        new: RuntimeStatus,
    ) -> Result<bool>;

    /// Replace the stored command list.
    async fn update_commands(&self, identity: &RuntimeIdentity, commands: &[Command])
    -> Result<()>;

    /// Delete the runtime, running `cascade` first.
    ///
    /// Returns false if nothing was stored for the workspace.
    async fn remove(
        &self,
        identity: &RuntimeIdentity,
        cascade: &dyn RemovalCascade,
    ) -> Result<bool>;

    /// Current status of the runtime.
    async fn get_status(&self, identity: &RuntimeIdentity) -> Result<RuntimeStatus> {
        self.get(identity)
            .await?
            .map(|state| state.status)
            .ok_or_else(|| InfraError::RuntimeNotFound {
                workspace_id: identity.workspace_id.clone(),
            })
    }

    /// Stored commands of the runtime.
    async fn get_commands(&self, identity: &RuntimeIdentity) -> Result<Vec<Command>> {
        self.get(identity)
            .await?
            .map(|state| state.commands)
            .ok_or_else(|| InfraError::RuntimeNotFound {
                workspace_id: identity.workspace_id.clone(),
            })
    }

    /// Compare-and-set: apply `new` only if `predicate(current)` holds.
    ///
    /// The observed status is re-checked by the conditional update; when a
    /// concurrent writer changed it in between, the predicate is evaluated
    /// again against the fresh value.
    async fn update_status_if(
        &self,
        identity: &RuntimeIdentity,
        predicate: StatusPredicate<'_>,
        new: RuntimeStatus,
    ) -> Result<bool> {
        loop {
            let current = self.get_status(identity).await?;
            if !predicate(current) {
                return Ok(false);
            }
            if self.replace_status(identity, current, new).await? {
                debug!(
                    workspace_id = %identity.workspace_id,
                    old_status = %current,
                    new_status = %new,
                    "Updated runtime status"
                );
                return Ok(true);
            }
            debug!(
                workspace_id = %identity.workspace_id,
                observed = %current,
                "Runtime status changed concurrently, re-evaluating"
            );
        }
    }
}

/// Machines and servers of running workspaces.
#[async_trait]
pub trait MachineStateCache: Send + Sync {
    /// Register a new machine with its servers.
    ///
    /// Fails with `MachineAlreadyExists` if the name is taken; never use this
    /// to update a machine, concurrent server updates would be lost.
    async fn put(&self, identity: &RuntimeIdentity, machine: &Machine) -> Result<()>;

    async fn get_machines(&self, identity: &RuntimeIdentity) -> Result<BTreeMap<String, Machine>>;

    async fn get_server(
        &self,
        identity: &RuntimeIdentity,
        machine: &str,
        server: &str,
    ) -> Result<Server>;

    async fn update_machine_status(
        &self,
        identity: &RuntimeIdentity,
        machine: &str,
        status: MachineStatus,
    ) -> Result<()>;

    /// Move a server to `status`.
    ///
    /// Returns false when the server already has `status`; callers use this
    /// to drop duplicate status events.
    async fn update_server_status(
        &self,
        identity: &RuntimeIdentity,
        machine: &str,
        server: &str,
        status: ServerStatus,
    ) -> Result<bool>;

    /// Drop every machine and server of the runtime.
    async fn remove_machines(&self, identity: &RuntimeIdentity) -> Result<()>;
}

/// Store handles sharing one backend.
#[derive(Clone)]
pub struct Stores {
    pub runtimes: Arc<dyn RuntimeStateStore>,
    pub machines: Arc<dyn MachineStateCache>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

impl From<SqlitePersistence> for Stores {
    fn from(persistence: SqlitePersistence) -> Self {
        Self {
            runtimes: Arc::new(persistence.clone()),
            machines: Arc::new(persistence),
        }
    }
}

impl From<PostgresPersistence> for Stores {
    fn from(persistence: PostgresPersistence) -> Self {
        Self {
            runtimes: Arc::new(persistence.clone()),
            machines: Arc::new(persistence),
        }
    }
}

/// Connect to the database named by `config` and run migrations.
///
/// The backend is chosen from the URL scheme (`sqlite:` or `postgres:`/`postgresql:`).
pub async fn connect(config: &Config) -> Result<Stores> {
    let url = config.database_url.as_str();
    if url.starts_with("sqlite:") {
        let persistence = SqlitePersistence::connect(url, config.max_connections).await?;
        Ok(persistence.into())
    } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
        let persistence = PostgresPersistence::connect(url, config.max_connections).await?;
        Ok(persistence.into())
    } else {
        Err(crate::config::ConfigError::Invalid(
            "HANGAR_DATABASE_URL",
            "must start with sqlite: or postgres://",
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_machines_attaches_servers() {
        let machines = vec![
            MachineRecord {
                machine_name: "pod/dev".into(),
                status: "running".into(),
            },
            MachineRecord {
                machine_name: "pod/db".into(),
                status: "starting".into(),
            },
        ];
        let servers = vec![
            ServerRecord {
                machine_name: "pod/dev".into(),
                server_name: "http".into(),
                status: "running".into(),
                url: "http://dev.example".into(),
                attributes: r#"{"type":"ide"}"#.into(),
            },
            ServerRecord {
                machine_name: "pod/gone".into(),
                server_name: "orphan".into(),
                status: "running".into(),
                url: "http://orphan".into(),
                attributes: "{}".into(),
            },
        ];

        let assembled = assemble_machines(machines, servers).unwrap();

        assert_eq!(assembled.len(), 2);
        let dev = &assembled["pod/dev"];
        assert_eq!(dev.status, MachineStatus::Running);
        assert_eq!(dev.servers["http"].attributes["type"], "ide");
        assert!(assembled["pod/db"].servers.is_empty());
    }

    #[test]
    fn test_classify_server_miss() {
        let identity = RuntimeIdentity::new("ws1", "default", "owner", "ns");

        let missing = classify_server_miss(&identity, "m", "s", None, ServerStatus::Running);
        assert!(matches!(missing, Err(InfraError::ServerNotFound { .. })));

        let same = classify_server_miss(
            &identity,
            "m",
            "s",
            Some("running".into()),
            ServerStatus::Running,
        );
        assert!(!same.unwrap());

        let backwards = classify_server_miss(
            &identity,
            "m",
            "s",
            Some("stopped".into()),
            ServerStatus::Running,
        );
        assert!(matches!(
            backwards,
            Err(InfraError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let config = Config {
            database_url: "mysql://localhost/hangar".into(),
            max_connections: 1,
        };
        let result = connect(&config).await;
        assert!(matches!(result, Err(InfraError::Config(_))));
    }
}
