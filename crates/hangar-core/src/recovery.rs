// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Startup recovery of persisted runtimes.
//!
//! After a restart the store may still hold runtimes whose start or stop was
//! in flight when the process went away. [`recover`] classifies every stored
//! runtime:
//!
//! - `running` → left in place, machines are reattached by the caller
//! - `starting` → the start will never finish; moved to `stopping`
//! - `stopping` → the stop must be finished by the caller
//! - `stopped` → torn down already; removed together with its machines

use tracing::{debug, error, info, warn};

use crate::cache::RuntimeCache;
use crate::error::Result;
use crate::model::{RuntimeIdentity, RuntimeStatus};

/// Outcome of a recovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Runtimes that are still running.
    pub running: Vec<RuntimeIdentity>,
    /// Runtimes left in `stopping` whose objects still need to be deleted.
    pub interrupted: Vec<RuntimeIdentity>,
    /// Runtimes that were already stopped and have been removed.
    pub removed: Vec<RuntimeIdentity>,
}

/// Walk every stored runtime and settle the ones a restart interrupted.
///
/// Failures on a single runtime are logged and do not stop the pass.
pub async fn recover(cache: &RuntimeCache) -> Result<RecoveryReport> {
    let identities = cache.runtimes().get_identities().await?;
    let mut report = RecoveryReport::default();

    if identities.is_empty() {
        debug!("No runtimes to recover");
        return Ok(report);
    }

    info!(count = identities.len(), "Recovering stored runtimes");

    for identity in identities {
        if let Err(e) = recover_one(cache, identity.clone(), &mut report).await {
            error!(
                workspace_id = %identity.workspace_id,
                error = %e,
                "Failed to recover runtime"
            );
        }
    }

    info!(
        running = report.running.len(),
        interrupted = report.interrupted.len(),
        removed = report.removed.len(),
        "Runtime recovery finished"
    );
    Ok(report)
}

async fn recover_one(
    cache: &RuntimeCache,
    identity: RuntimeIdentity,
    report: &mut RecoveryReport,
) -> Result<()> {
    loop {
        let status = match cache.runtimes().get_status(&identity).await {
            Ok(status) => status,
            // Removed by a concurrent stop.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        match status {
            RuntimeStatus::Running => {
                debug!(workspace_id = %identity.workspace_id, "Runtime still running");
                report.running.push(identity);
            }
            RuntimeStatus::Starting => {
                let interrupted = cache
                    .runtimes()
                    .update_status_if(
                        &identity,
                        &|s| s == RuntimeStatus::Starting,
                        RuntimeStatus::Stopping,
                    )
                    .await?;
                if !interrupted {
                    // Status moved on while we looked; settle the fresh value.
                    continue;
                }
                warn!(
                    workspace_id = %identity.workspace_id,
                    "Runtime start interrupted by restart, marked as stopping"
                );
                report.interrupted.push(identity);
            }
            RuntimeStatus::Stopping => {
                warn!(
                    workspace_id = %identity.workspace_id,
                    "Runtime stop interrupted by restart"
                );
                report.interrupted.push(identity);
            }
            RuntimeStatus::Stopped => {
                if cache.remove(&identity).await? {
                    info!(workspace_id = %identity.workspace_id, "Removed stopped runtime");
                    report.removed.push(identity);
                }
            }
        }

        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Machine, MachineStatus, RuntimeState};
    use crate::persistence::{SqlitePersistence, Stores};

    async fn test_cache() -> RuntimeCache {
        let persistence = SqlitePersistence::in_memory()
            .await
            .expect("Failed to create in-memory SQLite store");
        Stores::from(persistence).into()
    }

    async fn seed(cache: &RuntimeCache, workspace_id: &str, status: RuntimeStatus) -> RuntimeIdentity {
        let identity = RuntimeIdentity::new(workspace_id, "default", "owner", "ns");
        cache
            .register(&RuntimeState::new(identity.clone(), status, Vec::new()))
            .await
            .unwrap();
        cache
            .machines()
            .put(&identity, &Machine::new("pod/dev", MachineStatus::Running))
            .await
            .unwrap();
        identity
    }

    #[tokio::test]
    async fn test_recover_classifies_runtimes() {
        let cache = test_cache().await;
        let running = seed(&cache, "ws-running", RuntimeStatus::Running).await;
        let starting = seed(&cache, "ws-starting", RuntimeStatus::Starting).await;
        let stopping = seed(&cache, "ws-stopping", RuntimeStatus::Stopping).await;
        let stopped = seed(&cache, "ws-stopped", RuntimeStatus::Stopped).await;

        let report = recover(&cache).await.unwrap();

        assert_eq!(report.running, vec![running.clone()]);
        // Identities are visited in workspace id order.
        assert_eq!(report.interrupted, vec![starting.clone(), stopping]);
        assert_eq!(report.removed, vec![stopped.clone()]);

        assert_eq!(
            cache.runtimes().get_status(&starting).await.unwrap(),
            RuntimeStatus::Stopping
        );
        assert!(cache.runtimes().get(&stopped).await.unwrap().is_none());
        assert!(cache.machines().get_machines(&stopped).await.unwrap().is_empty());
        assert_eq!(cache.machines().get_machines(&running).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recover_empty_store() {
        let cache = test_cache().await;
        assert_eq!(recover(&cache).await.unwrap(), RecoveryReport::default());
    }
}
