// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container orchestration client contract.
//!
//! The runtime only prepares objects; submitting them to a cluster is left
//! to an [`OrchestrationClient`] implementation.

pub mod mock;

pub use mock::MockOrchestrationClient;

use async_trait::async_trait;
use hangar_core::Result;

use crate::model::{Pod, Route, Service};

/// Submits prepared objects to a Kubernetes/OpenShift cluster.
///
/// Failures are reported as `InfraError::Orchestration`.
#[async_trait]
pub trait OrchestrationClient: Send + Sync {
    /// Client type identifier (e.g. "openshift", "mock").
    fn client_type(&self) -> &'static str;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()>;

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<()>;

    /// Create a pod. Containers carry their final, ordered env lists.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()>;

    /// Delete every object labelled with the workspace. Deleting nothing is
    /// not an error.
    async fn delete_all(&self, namespace: &str, workspace_id: &str) -> Result<()>;
}
