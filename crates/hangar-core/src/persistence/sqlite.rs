// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{debug, info};

use crate::error::{InfraError, Result};
use crate::model::{
    Command, Machine, MachineStatus, RuntimeIdentity, RuntimeState, RuntimeStatus, Server,
    ServerStatus,
};

use super::{
    MachineRecord, MachineStateCache, RemovalCascade, RuntimeRecord, RuntimeStateStore,
    ServerRecord, assemble_machines, classify_server_miss,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and run all migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        Self::open(
            SqlitePoolOptions::new().max_connections(max_connections),
            url,
        )
        .await
    }

    async fn open(options: SqlitePoolOptions, url: &str) -> Result<Self> {
        let pool = options
            .connect(url)
            .await
            .map_err(|e| InfraError::storage("connect", e))?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create and initialize a SQLite database at `path`, creating parent
    /// directories and the file as needed.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| InfraError::storage("create_dir", sqlx::Error::Io(e)))?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, 5).await
    }

    /// Private in-memory database. The data lives as long as its single
    /// connection, so the pool never closes or recycles it.
    pub async fn in_memory() -> Result<Self> {
        let options = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::open(options, "sqlite::memory:").await
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RuntimeStateStore for SqlitePersistence {
    async fn put_if_absent(&self, state: &RuntimeState) -> Result<bool> {
        let identity = &state.identity;
        let commands = serde_json::to_string(&state.commands)?;

        let result = sqlx::query(
            r#"
            INSERT INTO runtimes (workspace_id, env_name, owner_id, infra_namespace, status, commands)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (workspace_id) DO NOTHING
            "#,
        )
        .bind(&identity.workspace_id)
        .bind(&identity.env_name)
        .bind(&identity.owner_id)
        .bind(&identity.infra_namespace)
        .bind(state.status.as_str())
        .bind(commands)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(
            workspace_id = %identity.workspace_id,
            status = %state.status,
            inserted,
            "put_if_absent runtime"
        );
        Ok(inserted)
    }

    async fn get(&self, identity: &RuntimeIdentity) -> Result<Option<RuntimeState>> {
        let record = sqlx::query_as::<_, RuntimeRecord>(
            r#"
            SELECT workspace_id, env_name, owner_id, infra_namespace, status, commands
            FROM runtimes
            WHERE workspace_id = ?1
            "#,
        )
        .bind(&identity.workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(RuntimeState::try_from).transpose()
    }

    async fn get_identities(&self) -> Result<BTreeSet<RuntimeIdentity>> {
        let records = sqlx::query_as::<_, RuntimeRecord>(
            r#"
            SELECT workspace_id, env_name, owner_id, infra_namespace, status, commands
            FROM runtimes
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records.iter().map(RuntimeRecord::identity).collect())
    }

    async fn update_status(
        &self,
        identity: &RuntimeIdentity,
        status: RuntimeStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE runtimes
            SET status = ?1, updated_at = CURRENT_TIMESTAMP
            WHERE workspace_id = ?2
            "#,
        )
        .bind(status.as_str())
        .bind(&identity.workspace_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::RuntimeNotFound {
                workspace_id: identity.workspace_id.clone(),
            });
        }

        debug!(workspace_id = %identity.workspace_id, status = %status, "Overwrote runtime status");
        Ok(())
    }

    async fn replace_status(
        &self,
        identity: &RuntimeIdentity,
        expected: RuntimeStatus,
        new: RuntimeStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runtimes
            SET status = ?1, updated_at = CURRENT_TIMESTAMP
            WHERE workspace_id = ?2
              AND status = ?3
            "#,
        )
        .bind(new.as_str())
        .bind(&identity.workspace_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_commands(
        &self,
        identity: &RuntimeIdentity,
        commands: &[Command],
    ) -> Result<()> {
        let commands = serde_json::to_string(commands)?;

        let result = sqlx::query(
            r#"
            UPDATE runtimes
            SET commands = ?1, updated_at = CURRENT_TIMESTAMP
            WHERE workspace_id = ?2
            "#,
        )
        .bind(commands)
        .bind(&identity.workspace_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::RuntimeNotFound {
                workspace_id: identity.workspace_id.clone(),
            });
        }

        Ok(())
    }

    async fn remove(
        &self,
        identity: &RuntimeIdentity,
        cascade: &dyn RemovalCascade,
    ) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, String>(
            "SELECT workspace_id FROM runtimes WHERE workspace_id = ?1",
        )
        .bind(&identity.workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        if exists.is_none() {
            debug!(workspace_id = %identity.workspace_id, "No runtime to remove");
            return Ok(false);
        }

        cascade.before_remove(identity).await?;

        let result = sqlx::query("DELETE FROM runtimes WHERE workspace_id = ?1")
            .bind(&identity.workspace_id)
            .execute(&self.pool)
            .await?;

        info!(workspace_id = %identity.workspace_id, "Removed runtime state");
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MachineStateCache for SqlitePersistence {
    async fn put(&self, identity: &RuntimeIdentity, machine: &Machine) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let runtime = sqlx::query_scalar::<_, String>(
            "SELECT workspace_id FROM runtimes WHERE workspace_id = ?1",
        )
        .bind(&identity.workspace_id)
        .fetch_optional(&mut *tx)
        .await?;

        if runtime.is_none() {
            return Err(InfraError::RuntimeNotFound {
                workspace_id: identity.workspace_id.clone(),
            });
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO machines (workspace_id, machine_name, status)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (workspace_id, machine_name) DO NOTHING
            "#,
        )
        .bind(&identity.workspace_id)
        .bind(&machine.name)
        .bind(machine.status.as_str())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(InfraError::MachineAlreadyExists {
                workspace_id: identity.workspace_id.clone(),
                machine: machine.name.clone(),
            });
        }

        for server in machine.servers.values() {
            sqlx::query(
                r#"
                INSERT INTO servers (workspace_id, machine_name, server_name, status, url, attributes)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&identity.workspace_id)
            .bind(&machine.name)
            .bind(&server.name)
            .bind(server.status.as_str())
            .bind(&server.url)
            .bind(serde_json::to_string(&server.attributes)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            workspace_id = %identity.workspace_id,
            machine = %machine.name,
            servers = machine.servers.len(),
            "Registered machine"
        );
        Ok(())
    }

    async fn get_machines(&self, identity: &RuntimeIdentity) -> Result<BTreeMap<String, Machine>> {
        let mut tx = self.pool.begin().await?;

        let machines = sqlx::query_as::<_, MachineRecord>(
            "SELECT machine_name, status FROM machines WHERE workspace_id = ?1",
        )
        .bind(&identity.workspace_id)
        .fetch_all(&mut *tx)
        .await?;

        let servers = sqlx::query_as::<_, ServerRecord>(
            r#"
            SELECT machine_name, server_name, status, url, attributes
            FROM servers
            WHERE workspace_id = ?1
            "#,
        )
        .bind(&identity.workspace_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        assemble_machines(machines, servers)
    }

    async fn get_server(
        &self,
        identity: &RuntimeIdentity,
        machine: &str,
        server: &str,
    ) -> Result<Server> {
        let record = sqlx::query_as::<_, ServerRecord>(
            r#"
            SELECT machine_name, server_name, status, url, attributes
            FROM servers
            WHERE workspace_id = ?1 AND machine_name = ?2 AND server_name = ?3
            "#,
        )
        .bind(&identity.workspace_id)
        .bind(machine)
        .bind(server)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => Server::try_from(record),
            None => Err(InfraError::ServerNotFound {
                workspace_id: identity.workspace_id.clone(),
                machine: machine.to_string(),
                server: server.to_string(),
            }),
        }
    }

    async fn update_machine_status(
        &self,
        identity: &RuntimeIdentity,
        machine: &str,
        status: MachineStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE machines SET status = ?1 WHERE workspace_id = ?2 AND machine_name = ?3",
        )
        .bind(status.as_str())
        .bind(&identity.workspace_id)
        .bind(machine)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::MachineNotFound {
                workspace_id: identity.workspace_id.clone(),
                machine: machine.to_string(),
            });
        }

        debug!(
            workspace_id = %identity.workspace_id,
            machine = %machine,
            status = %status,
            "Updated machine status"
        );
        Ok(())
    }

    async fn update_server_status(
        &self,
        identity: &RuntimeIdentity,
        machine: &str,
        server: &str,
        status: ServerStatus,
    ) -> Result<bool> {
        let predecessors = status.predecessors();

        if !predecessors.is_empty() {
            let placeholders = (0..predecessors.len())
                .map(|i| format!("?{}", i + 5))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE servers SET status = ?1 \
                 WHERE workspace_id = ?2 AND machine_name = ?3 AND server_name = ?4 \
                 AND status IN ({})",
                placeholders
            );

            let mut query = sqlx::query(&sql)
                .bind(status.as_str())
                .bind(&identity.workspace_id)
                .bind(machine)
                .bind(server);
            for predecessor in predecessors {
                query = query.bind(predecessor.as_str());
            }

            if query.execute(&self.pool).await?.rows_affected() > 0 {
                debug!(
                    workspace_id = %identity.workspace_id,
                    machine = %machine,
                    server = %server,
                    status = %status,
                    "Updated server status"
                );
                return Ok(true);
            }
        }

        let current = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status FROM servers
            WHERE workspace_id = ?1 AND machine_name = ?2 AND server_name = ?3
            "#,
        )
        .bind(&identity.workspace_id)
        .bind(machine)
        .bind(server)
        .fetch_optional(&self.pool)
        .await?;

        classify_server_miss(identity, machine, server, current, status)
    }

    async fn remove_machines(&self, identity: &RuntimeIdentity) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM servers WHERE workspace_id = ?1")
            .bind(&identity.workspace_id)
            .execute(&mut *tx)
            .await?;
        let machines = sqlx::query("DELETE FROM machines WHERE workspace_id = ?1")
            .bind(&identity.workspace_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            workspace_id = %identity.workspace_id,
            machines = machines.rows_affected(),
            "Removed machines"
        );
        Ok(())
    }
}
