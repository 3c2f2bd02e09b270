// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hangar Core - Workspace Runtime State
//!
//! This crate tracks the lifecycle of container-based developer workspaces:
//! one runtime record per running workspace, and the machines and servers
//! that runtime is made of. State lives in SQLite or PostgreSQL, so it
//! survives restarts of the process driving the workspaces.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   hangar-kubernetes                          │
//! │       (env provisioning, server exposure, start/stop)        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RuntimeCache (this crate)                 │
//! │   RuntimeStateStore ──cascade──► MachineStateCache           │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!               ┌───────────────────────────────┐
//!               │   SQLite / PostgreSQL (sqlx)  │
//!               └───────────────────────────────┘
//! ```
//!
//! # Status Transitions
//!
//! | Entity | Transition primitive |
//! |--------|----------------------|
//! | Runtime | [`RuntimeStateStore::update_status_if`] (compare-and-set by predicate) |
//! | Server | [`MachineStateCache::update_server_status`] (returns `false` on duplicates) |
//! | Machine | [`MachineStateCache::update_machine_status`] |
//!
//! Runtime transitions that depend on the current status must use the
//! predicate form; a plain read followed by a write loses updates when a
//! stop request races a start completion.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HANGAR_DATABASE_URL` | (required) | `sqlite:` or `postgres://` connection URL |
//! | `HANGAR_DB_MAX_CONNECTIONS` | `10` | Connection pool size |

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod persistence;
pub mod recovery;

pub use cache::RuntimeCache;
pub use config::Config;
pub use error::{ErrorKind, InfraError, Result};
pub use model::{
    Command, Machine, MachineStatus, PreviewUrl, RuntimeIdentity, RuntimeState, RuntimeStatus,
    Server, ServerStatus,
};
pub use persistence::{
    MachineStateCache, NoCascade, PostgresPersistence, RemovalCascade, RuntimeStateStore,
    SqlitePersistence, Stores,
};
pub use recovery::{RecoveryReport, recover};
