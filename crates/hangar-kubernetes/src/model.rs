// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes/OpenShift object model prepared for submission.
//!
//! Only the fields the provisioning code reads or writes are modelled.
//! Objects serialize with the camelCase field names of the Kubernetes API.

use std::collections::BTreeMap;

use hangar_core::Command;
use serde::{Deserialize, Serialize};

/// Label identifying the workspace that owns an object.
pub const WORKSPACE_LABEL: &str = "hangar.io/workspace";

/// Label added to pods that services select by name.
pub const POD_LABEL: &str = "hangar.io/pod";

/// Name of the machine backing `container` of `pod`.
pub fn machine_name(pod: &str, container: &str) -> String {
    format!("{}/{}", pod, container)
}

/// Where a variable without a literal value gets its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvVarSource {
    SecretKeyRef { name: String, key: String },
    ConfigMapKeyRef { name: String, key: String },
    FieldRef {
        #[serde(rename = "fieldPath")]
        field_path: String,
    },
}

/// Environment variable of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    /// Literal value; may embed `$(NAME)` references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    pub fn from_source(name: impl Into<String>, source: EnvVarSource) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub container_port: u16,
    pub protocol: String,
}

impl ContainerPort {
    pub fn tcp(container_port: u16) -> Self {
        Self {
            name: None,
            container_port,
            protocol: "TCP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Vec::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.ports.push(ContainerPort::tcp(port));
        self
    }

    /// Whether the container declares `port`.
    pub fn exposes(&self, port: u16) -> bool {
        self.ports.iter().any(|p| p.container_port == port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<Container>,
}

impl Pod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            containers: Vec::new(),
        }
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.containers.push(container);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    pub protocol: String,
}

impl ServicePort {
    /// TCP port named `server-<port>` forwarding to the same container port.
    pub fn for_server(port: u16) -> Self {
        Self {
            name: format!("server-{}", port),
            port,
            target_port: port,
            protocol: "TCP".to_string(),
        }
    }

    /// Whether this port serves `port`, on either side.
    pub fn serves(&self, port: u16) -> bool {
        self.port == port || self.target_port == port
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
}

/// OpenShift route (or ingress) exposing one service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub tls: bool,
    /// Target service name.
    pub to_service: String,
    /// Target service port name.
    pub target_port: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Route {
    /// Whether the route points at `port` of `service`.
    pub fn targets(&self, service: &str, port: &str) -> bool {
        self.to_service == service && self.target_port == port
    }
}

/// Server a machine wants reachable from outside the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub port: u16,
    /// `http`, `ws`, `tcp`, ...
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ServerConfig {
    pub fn http(port: u16) -> Self {
        Self {
            port,
            protocol: "http".to_string(),
            path: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }
}

/// Declared configuration of one machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl MachineConfig {
    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_server(mut self, name: &str, server: ServerConfig) -> Self {
        self.servers.insert(name.to_string(), server);
        self
    }
}

/// Everything submitted to the cluster for one runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesEnvironment {
    pub pods: BTreeMap<String, Pod>,
    pub services: BTreeMap<String, Service>,
    pub routes: BTreeMap<String, Route>,
    /// Keyed by [`machine_name`].
    pub machines: BTreeMap<String, MachineConfig>,
    pub commands: Vec<Command>,
}

impl KubernetesEnvironment {
    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.pods.insert(pod.name.clone(), pod);
        self
    }

    pub fn with_machine(mut self, name: &str, machine: MachineConfig) -> Self {
        self.machines.insert(name.to_string(), machine);
        self
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Machine names of every container, in pod then container order.
    pub fn machine_names(&self) -> Vec<String> {
        self.pods
            .values()
            .flat_map(|pod| {
                pod.containers
                    .iter()
                    .map(move |container| machine_name(&pod.name, &container.name))
            })
            .collect()
    }

    /// Routes pointing at `port` of `service`.
    pub fn route_for(&self, service: &str, port: &str) -> Option<&Route> {
        self.routes.values().find(|route| route.targets(service, port))
    }

    /// Stamp `WORKSPACE_LABEL` on every object.
    pub fn label_workspace(&mut self, workspace_id: &str) {
        let labels = self
            .pods
            .values_mut()
            .map(|pod| &mut pod.labels)
            .chain(self.services.values_mut().map(|service| &mut service.labels))
            .chain(self.routes.values_mut().map(|route| &mut route.labels));
        for labels in labels {
            labels.insert(WORKSPACE_LABEL.to_string(), workspace_id.to_string());
        }
    }
}
