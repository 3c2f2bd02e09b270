// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock orchestration client for testing.
//!
//! Keeps submitted objects in memory, keyed by namespace and name, without
//! talking to a cluster.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hangar_core::{InfraError, Result};
use tokio::sync::Mutex;

use super::OrchestrationClient;
use crate::model::{Pod, Route, Service, WORKSPACE_LABEL};

type Objects<T> = BTreeMap<(String, String), T>;

#[derive(Debug, Default)]
struct MockCluster {
    pods: Objects<Pod>,
    services: Objects<Service>,
    routes: Objects<Route>,
}

/// In-memory orchestration client.
#[derive(Debug, Clone, Default)]
pub struct MockOrchestrationClient {
    cluster: Arc<Mutex<MockCluster>>,
    fail_pods: Arc<AtomicBool>,
}

impl MockOrchestrationClient {
    /// Create an empty mock cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock cluster that rejects every pod.
    pub fn failing() -> Self {
        let client = Self::default();
        client.set_fail_pods(true);
        client
    }

    /// Toggle pod rejection.
    pub fn set_fail_pods(&self, fail: bool) {
        self.fail_pods.store(fail, Ordering::SeqCst);
    }

    /// Pods in `namespace`, by name.
    pub async fn pods(&self, namespace: &str) -> BTreeMap<String, Pod> {
        in_namespace(&self.cluster.lock().await.pods, namespace)
    }

    /// Services in `namespace`, by name.
    pub async fn services(&self, namespace: &str) -> BTreeMap<String, Service> {
        in_namespace(&self.cluster.lock().await.services, namespace)
    }

    /// Routes in `namespace`, by name.
    pub async fn routes(&self, namespace: &str) -> BTreeMap<String, Route> {
        in_namespace(&self.cluster.lock().await.routes, namespace)
    }
}

fn in_namespace<T: Clone>(objects: &Objects<T>, namespace: &str) -> BTreeMap<String, T> {
    objects
        .iter()
        .filter(|((ns, _), _)| ns == namespace)
        .map(|((_, name), object)| (name.clone(), object.clone()))
        .collect()
}

fn insert_new<T>(objects: &mut Objects<T>, kind: &str, namespace: &str, name: &str, object: T) -> Result<()> {
    let key = (namespace.to_string(), name.to_string());
    if objects.contains_key(&key) {
        return Err(InfraError::Orchestration(format!(
            "{} '{}' already exists in namespace '{}'",
            kind, name, namespace
        )));
    }
    objects.insert(key, object);
    Ok(())
}

fn owned_by(labels: &BTreeMap<String, String>, workspace_id: &str) -> bool {
    labels.get(WORKSPACE_LABEL).map(String::as_str) == Some(workspace_id)
}

#[async_trait]
impl OrchestrationClient for MockOrchestrationClient {
    fn client_type(&self) -> &'static str {
        "mock"
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        let mut cluster = self.cluster.lock().await;
        insert_new(&mut cluster.services, "service", namespace, &service.name, service.clone())
    }

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<()> {
        let mut cluster = self.cluster.lock().await;
        insert_new(&mut cluster.routes, "route", namespace, &route.name, route.clone())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        if self.fail_pods.load(Ordering::SeqCst) {
            return Err(InfraError::Orchestration(format!(
                "pod '{}' rejected by mock cluster",
                pod.name
            )));
        }
        let mut cluster = self.cluster.lock().await;
        insert_new(&mut cluster.pods, "pod", namespace, &pod.name, pod.clone())
    }

    async fn delete_all(&self, namespace: &str, workspace_id: &str) -> Result<()> {
        let mut cluster = self.cluster.lock().await;
        cluster
            .pods
            .retain(|(ns, _), pod| ns != namespace || !owned_by(&pod.labels, workspace_id));
        cluster
            .services
            .retain(|(ns, _), service| ns != namespace || !owned_by(&service.labels, workspace_id));
        cluster
            .routes
            .retain(|(ns, _), route| ns != namespace || !owned_by(&route.labels, workspace_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Container;

    fn labelled_pod(name: &str, workspace_id: &str) -> Pod {
        let mut pod = Pod::new(name).with_container(Container::new("main", "img"));
        pod.labels
            .insert(WORKSPACE_LABEL.to_string(), workspace_id.to_string());
        pod
    }

    #[tokio::test]
    async fn test_delete_all_only_touches_workspace() {
        let client = MockOrchestrationClient::new();
        client.create_pod("ns", &labelled_pod("a", "ws1")).await.unwrap();
        client.create_pod("ns", &labelled_pod("b", "ws2")).await.unwrap();
        client.create_pod("other", &labelled_pod("c", "ws1")).await.unwrap();

        client.delete_all("ns", "ws1").await.unwrap();

        assert_eq!(client.pods("ns").await.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(client.pods("other").await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_object_rejected() {
        let client = MockOrchestrationClient::new();
        client.create_pod("ns", &labelled_pod("a", "ws1")).await.unwrap();

        let err = client.create_pod("ns", &labelled_pod("a", "ws1")).await.unwrap_err();
        assert!(matches!(err, InfraError::Orchestration(_)));
    }

    #[tokio::test]
    async fn test_failing_client() {
        let client = MockOrchestrationClient::failing();
        assert!(client.create_pod("ns", &labelled_pod("a", "ws1")).await.is_err());
        assert!(client.pods("ns").await.is_empty());
    }
}
