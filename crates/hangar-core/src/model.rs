// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime, machine and server records tracked by the cache.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InfraError;

/// Identifies one running runtime.
///
/// Equality, ordering and hashing only consider `workspace_id`: a workspace
/// has at most one runtime at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeIdentity {
    /// Workspace the runtime belongs to.
    pub workspace_id: String,
    /// Name of the workspace environment being run.
    pub env_name: String,
    /// Owner of the workspace.
    pub owner_id: String,
    /// Kubernetes namespace / OpenShift project the objects live in.
    pub infra_namespace: String,
}

impl RuntimeIdentity {
    /// Create a new identity.
    pub fn new(
        workspace_id: impl Into<String>,
        env_name: impl Into<String>,
        owner_id: impl Into<String>,
        infra_namespace: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            env_name: env_name.into(),
            owner_id: owner_id.into(),
            infra_namespace: infra_namespace.into(),
        }
    }
}

impl PartialEq for RuntimeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.workspace_id == other.workspace_id
    }
}

impl Eq for RuntimeIdentity {}

impl Hash for RuntimeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.workspace_id.hash(state);
    }
}

impl PartialOrd for RuntimeIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RuntimeIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.workspace_id.cmp(&other.workspace_id)
    }
}

impl fmt::Display for RuntimeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({})",
            self.workspace_id, self.env_name, self.infra_namespace
        )
    }
}

fn unknown_status(kind: &str, value: &str) -> InfraError {
    InfraError::CorruptRecord(format!("unknown {} status '{}'", kind, value))
}

/// Orchestration-level status of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    /// Objects are being provisioned.
    Starting,
    /// All machines are up.
    Running,
    /// Teardown in progress.
    Stopping,
    /// Torn down; the record is about to be removed.
    Stopped,
}

impl RuntimeStatus {
    /// Get the status string
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeStatus::Starting => "starting",
            RuntimeStatus::Running => "running",
            RuntimeStatus::Stopping => "stopping",
            RuntimeStatus::Stopped => "stopped",
        }
    }

    /// Starting or running.
    pub fn is_active(&self) -> bool {
        matches!(self, RuntimeStatus::Starting | RuntimeStatus::Running)
    }
}

impl FromStr for RuntimeStatus {
    type Err = InfraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(RuntimeStatus::Starting),
            "running" => Ok(RuntimeStatus::Running),
            "stopping" => Ok(RuntimeStatus::Stopping),
            "stopped" => Ok(RuntimeStatus::Stopped),
            other => Err(unknown_status("runtime", other)),
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one machine (container).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl MachineStatus {
    /// Get the status string
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Starting => "starting",
            MachineStatus::Running => "running",
            MachineStatus::Stopped => "stopped",
            MachineStatus::Failed => "failed",
        }
    }
}

impl FromStr for MachineStatus {
    type Err = InfraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(MachineStatus::Starting),
            "running" => Ok(MachineStatus::Running),
            "stopped" => Ok(MachineStatus::Stopped),
            "failed" => Ok(MachineStatus::Failed),
            other => Err(unknown_status("machine", other)),
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one exposed server.
///
/// ```text
/// STARTING ──► RUNNING ──► STOPPED
///     │                       ▲
///     └───────────────────────┘  (failed or cancelled start)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Starting,
    Running,
    Stopped,
}

impl ServerStatus {
    /// Get the status string
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopped => "stopped",
        }
    }

    /// Statuses from which a server may move to `self`.
    pub fn predecessors(&self) -> &'static [ServerStatus] {
        match self {
            ServerStatus::Starting => &[],
            ServerStatus::Running => &[ServerStatus::Starting],
            ServerStatus::Stopped => &[ServerStatus::Starting, ServerStatus::Running],
        }
    }

    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(&self, next: ServerStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl FromStr for ServerStatus {
    type Err = InfraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(ServerStatus::Starting),
            "running" => Ok(ServerStatus::Running),
            "stopped" => Ok(ServerStatus::Stopped),
            other => Err(unknown_status("server", other)),
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port and path a command wants exposed for end-user HTTP access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewUrl {
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Workspace command stored with the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub name: String,
    pub command_line: String,
    pub command_type: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<PreviewUrl>,
}

impl Command {
    /// Attribute holding the resolved preview URL once routes exist.
    pub const PREVIEW_URL_ATTRIBUTE: &'static str = "previewUrl";

    /// Create a custom command with no attributes.
    pub fn new(name: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command_line: command_line.into(),
            command_type: "custom".to_string(),
            attributes: BTreeMap::new(),
            preview_url: None,
        }
    }

    /// Declare a preview URL on `port`.
    pub fn with_preview_url(mut self, port: u16, path: Option<&str>) -> Self {
        self.preview_url = Some(PreviewUrl {
            port,
            path: path.map(str::to_string),
        });
        self
    }
}

/// Orchestration-level state of one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub identity: RuntimeIdentity,
    pub status: RuntimeStatus,
    pub commands: Vec<Command>,
}

impl RuntimeState {
    pub fn new(identity: RuntimeIdentity, status: RuntimeStatus, commands: Vec<Command>) -> Self {
        Self {
            identity,
            status,
            commands,
        }
    }
}

/// One exposed network endpoint of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub status: ServerStatus,
    pub url: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Server {
    /// Create a server in `Starting` status.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ServerStatus::Starting,
            url: url.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// One container-like unit of a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub name: String,
    pub status: MachineStatus,
    pub servers: BTreeMap<String, Server>,
}

impl Machine {
    pub fn new(name: impl Into<String>, status: MachineStatus) -> Self {
        Self {
            name: name.into(),
            status,
            servers: BTreeMap::new(),
        }
    }

    /// Add a server, replacing one with the same name.
    pub fn with_server(mut self, server: Server) -> Self {
        self.servers.insert(server.name.clone(), server);
        self
    }
}
