// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for hangar-core.
//!
//! A single infrastructure error type is shared by the state store, the machine
//! cache and the provisioning code in `hangar-kubernetes`. Callers branch on
//! [`InfraError::kind`] rather than on individual variants.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type using InfraError
pub type Result<T> = std::result::Result<T, InfraError>;

/// Coarse classification of an [`InfraError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The addressed runtime, machine or server does not exist.
    NotFound,
    /// The write would overwrite an existing entry.
    Conflict,
    /// Environment variables reference each other in a loop.
    Cycle,
    /// Storage or transport failure. Safe to retry from an outer layer.
    Io,
    /// The request is malformed or not allowed in the current state.
    Invalid,
}

/// Infrastructure errors raised by the runtime cache and provisioning code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// No runtime is stored for the workspace.
    #[error("Runtime of workspace '{workspace_id}' not found")]
    RuntimeNotFound {
        /// Workspace the lookup was made for.
        workspace_id: String,
    },

    /// A runtime is already stored for the workspace.
    #[error("Runtime of workspace '{workspace_id}' already exists")]
    RuntimeAlreadyExists {
        /// Workspace that already has a runtime.
        workspace_id: String,
    },

    /// Machine is not part of the runtime.
    #[error("Machine '{machine}' not found in runtime of workspace '{workspace_id}'")]
    MachineNotFound {
        /// Workspace the machine was looked up in.
        workspace_id: String,
        /// Name of the missing machine.
        machine: String,
    },

    /// Machine with the same name is already registered.
    #[error("Machine '{machine}' already exists in runtime of workspace '{workspace_id}'")]
    MachineAlreadyExists {
        /// Workspace owning the machine.
        workspace_id: String,
        /// Name of the duplicate machine.
        machine: String,
    },

    /// Server is not part of the machine.
    #[error("Server '{server}' not found in machine '{machine}' of workspace '{workspace_id}'")]
    ServerNotFound {
        /// Workspace the server was looked up in.
        workspace_id: String,
        /// Machine the server was looked up in.
        machine: String,
        /// Name of the missing server.
        server: String,
    },

    /// Status change is not an allowed transition.
    #[error("Invalid {entity} status transition from '{from}' to '{to}'")]
    InvalidTransition {
        /// Kind of entity ("server", "runtime").
        entity: &'static str,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Environment variables reference each other in a loop.
    #[error("Circular environment variable references: {}", .cycle.join(" -> "))]
    CyclicReferences {
        /// Variable names along the cycle; the first name is repeated at the end.
        cycle: Vec<String>,
    },

    /// Database operation failed.
    #[error("Storage error during '{operation}': {source}")]
    Storage {
        /// The operation that failed.
        operation: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored record could not be decoded.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The container orchestration client rejected a request.
    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl InfraError {
    /// Wrap a driver error, recording which operation failed.
    pub fn storage(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Storage { operation, source }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RuntimeNotFound { .. }
            | Self::MachineNotFound { .. }
            | Self::ServerNotFound { .. } => ErrorKind::NotFound,
            Self::RuntimeAlreadyExists { .. } | Self::MachineAlreadyExists { .. } => {
                ErrorKind::Conflict
            }
            Self::CyclicReferences { .. } => ErrorKind::Cycle,
            Self::Storage { .. }
            | Self::Migration(_)
            | Self::CorruptRecord(_)
            | Self::Orchestration(_) => ErrorKind::Io,
            Self::InvalidTransition { .. } | Self::Serialization(_) | Self::Config(_) => {
                ErrorKind::Invalid
            }
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RuntimeNotFound { .. } => "RUNTIME_NOT_FOUND",
            Self::RuntimeAlreadyExists { .. } => "RUNTIME_ALREADY_EXISTS",
            Self::MachineNotFound { .. } => "MACHINE_NOT_FOUND",
            Self::MachineAlreadyExists { .. } => "MACHINE_ALREADY_EXISTS",
            Self::ServerNotFound { .. } => "SERVER_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::CyclicReferences { .. } => "CYCLIC_REFERENCES",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::CorruptRecord(_) => "CORRUPT_RECORD",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Orchestration(_) => "ORCHESTRATION_ERROR",
        }
    }

    /// Shorthand for `kind() == ErrorKind::NotFound`.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<sqlx::Error> for InfraError {
    fn from(err: sqlx::Error) -> Self {
        InfraError::storage("query", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let cases: Vec<(InfraError, ErrorKind, &str)> = vec![
            (
                InfraError::RuntimeNotFound {
                    workspace_id: "ws1".into(),
                },
                ErrorKind::NotFound,
                "RUNTIME_NOT_FOUND",
            ),
            (
                InfraError::MachineAlreadyExists {
                    workspace_id: "ws1".into(),
                    machine: "pod/dev".into(),
                },
                ErrorKind::Conflict,
                "MACHINE_ALREADY_EXISTS",
            ),
            (
                InfraError::CyclicReferences {
                    cycle: vec!["a".into(), "a".into()],
                },
                ErrorKind::Cycle,
                "CYCLIC_REFERENCES",
            ),
            (
                InfraError::storage("connect", sqlx::Error::PoolTimedOut),
                ErrorKind::Io,
                "STORAGE_ERROR",
            ),
            (
                InfraError::InvalidTransition {
                    entity: "server",
                    from: "stopped".into(),
                    to: "running".into(),
                },
                ErrorKind::Invalid,
                "INVALID_TRANSITION",
            ),
        ];

        for (error, kind, code) in cases {
            assert_eq!(error.kind(), kind, "{}", error);
            assert_eq!(error.error_code(), code);
        }
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let error = InfraError::CyclicReferences {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            error.to_string(),
            "Circular environment variable references: a -> b -> a"
        );
    }

    #[test]
    fn test_storage_error_keeps_source() {
        use std::error::Error as _;

        let error = InfraError::from(sqlx::Error::RowNotFound);
        assert!(error.source().is_some());
        assert!(error.to_string().contains("'query'"));
    }
}
