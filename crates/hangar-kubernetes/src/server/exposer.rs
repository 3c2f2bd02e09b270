// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idempotent creation of services and routes for machine servers.

use std::collections::BTreeMap;

use hangar_core::Result;
use tracing::debug;

use crate::config::Config;
use crate::model::{KubernetesEnvironment, POD_LABEL, Route, Service, ServerConfig, ServicePort};

/// Route annotation naming the machine the route serves.
pub const MACHINE_ANNOTATION: &str = "hangar.io/machine";

/// Route annotation holding the exposed servers as a JSON object.
pub const SERVERS_ANNOTATION: &str = "hangar.io/servers";

/// Result of an [`ServerExposer::expose`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exposure {
    /// A new route with this name was added.
    Created(String),
    /// A route with this name already targeted the service port.
    Reused(String),
}

impl Exposure {
    pub fn route_name(&self) -> &str {
        match self {
            Exposure::Created(name) | Exposure::Reused(name) => name,
        }
    }
}

/// Creates the routes that make machine servers reachable.
#[derive(Debug, Clone)]
pub struct ServerExposer {
    domain_suffix: String,
    tls: bool,
}

impl ServerExposer {
    pub fn new(config: &Config) -> Self {
        Self {
            domain_suffix: config.route_domain_suffix.clone(),
            tls: config.route_tls,
        }
    }

    /// Host of the route called `route_name`.
    pub fn host(&self, route_name: &str) -> String {
        format!("{}.{}", route_name, self.domain_suffix)
    }

    /// Make `port` of `service` reachable, serving `servers` of `machine`.
    ///
    /// Does nothing when a route already targets the service port.
    pub fn expose(
        &self,
        env: &mut KubernetesEnvironment,
        machine: &str,
        service: &str,
        port: &ServicePort,
        servers: &BTreeMap<String, ServerConfig>,
    ) -> Result<Exposure> {
        if let Some(existing) = env.route_for(service, &port.name) {
            debug!(
                route = %existing.name,
                service = %service,
                port = %port.name,
                "Route already exposes service port"
            );
            return Ok(Exposure::Reused(existing.name.clone()));
        }

        let name = format!("{}-{}", service, port.name);
        let mut annotations = BTreeMap::new();
        annotations.insert(MACHINE_ANNOTATION.to_string(), machine.to_string());
        annotations.insert(SERVERS_ANNOTATION.to_string(), serde_json::to_string(servers)?);

        let route = Route {
            name: name.clone(),
            host: self.host(&name),
            path: None,
            tls: self.tls,
            to_service: service.to_string(),
            target_port: port.name.clone(),
            labels: BTreeMap::new(),
            annotations,
        };

        debug!(
            route = %route.name,
            host = %route.host,
            machine = %machine,
            servers = servers.len(),
            "Created route"
        );
        env.routes.insert(name.clone(), route);
        Ok(Exposure::Created(name))
    }

    /// Expose the declared servers of every machine.
    ///
    /// Each machine gets one service named after it with a `server-<port>`
    /// port per distinct server port, and one route per port.
    pub fn expose_machines(&self, env: &mut KubernetesEnvironment) -> Result<Vec<Exposure>> {
        let mut exposures = Vec::new();

        let machines: Vec<(String, BTreeMap<String, ServerConfig>)> = env
            .machines
            .iter()
            .filter(|(_, config)| !config.servers.is_empty())
            .map(|(name, config)| (name.clone(), config.servers.clone()))
            .collect();

        for (machine, servers) in machines {
            let Some((pod_name, _)) = machine.split_once('/') else {
                continue;
            };
            let Some(pod) = env.pods.get_mut(pod_name) else {
                debug!(machine = %machine, "Machine has no pod, skipping server exposure");
                continue;
            };
            pod.labels
                .entry(POD_LABEL.to_string())
                .or_insert_with(|| pod_name.to_string());
            let selector = pod.labels.clone();

            let mut by_port: BTreeMap<u16, BTreeMap<String, ServerConfig>> = BTreeMap::new();
            for (name, server) in servers {
                by_port.entry(server.port).or_default().insert(name, server);
            }

            let service_name = machine.replace('/', "-");
            let service = env
                .services
                .entry(service_name.clone())
                .or_insert_with(|| Service {
                    name: service_name.clone(),
                    labels: BTreeMap::new(),
                    selector,
                    ports: Vec::new(),
                });
            for port in by_port.keys() {
                if !service.ports.iter().any(|p| p.serves(*port)) {
                    service.ports.push(ServicePort::for_server(*port));
                }
            }
            let ports = service.ports.clone();

            for (port, servers) in by_port {
                if let Some(service_port) = ports.iter().find(|p| p.serves(port)) {
                    exposures.push(self.expose(env, &machine, &service_name, service_port, &servers)?);
                }
            }
        }

        Ok(exposures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Container, MachineConfig, Pod};

    fn exposer() -> ServerExposer {
        ServerExposer::new(&Config::default())
    }

    fn servers() -> BTreeMap<String, ServerConfig> {
        let mut servers = BTreeMap::new();
        servers.insert("app".to_string(), ServerConfig::http(8080).with_path("/app"));
        servers
    }

    #[test]
    fn test_expose_twice_creates_one_route() {
        let mut env = KubernetesEnvironment::default();
        let port = ServicePort::for_server(8080);

        let first = exposer()
            .expose(&mut env, "ws/dev", "dev", &port, &servers())
            .unwrap();
        let second = exposer()
            .expose(&mut env, "ws/dev", "dev", &port, &servers())
            .unwrap();

        assert_eq!(first, Exposure::Created("dev-server-8080".to_string()));
        assert_eq!(second, Exposure::Reused("dev-server-8080".to_string()));
        assert_eq!(env.routes.len(), 1);

        let route = &env.routes["dev-server-8080"];
        assert_eq!(route.host, "dev-server-8080.apps.local");
        assert_eq!(route.annotations[MACHINE_ANNOTATION], "ws/dev");
        let annotated: BTreeMap<String, ServerConfig> =
            serde_json::from_str(&route.annotations[SERVERS_ANNOTATION]).unwrap();
        assert_eq!(annotated, servers());
    }

    #[test]
    fn test_expose_reuses_route_with_other_name() {
        let mut env = KubernetesEnvironment::default();
        env.routes.insert(
            "custom".to_string(),
            Route {
                name: "custom".to_string(),
                host: "custom.example.com".to_string(),
                path: None,
                tls: true,
                to_service: "dev".to_string(),
                target_port: "server-8080".to_string(),
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            },
        );

        let exposure = exposer()
            .expose(&mut env, "ws/dev", "dev", &ServicePort::for_server(8080), &servers())
            .unwrap();

        assert_eq!(exposure.route_name(), "custom");
        assert_eq!(env.routes.len(), 1);
    }

    #[test]
    fn test_expose_machines_is_stable() {
        let mut env = KubernetesEnvironment::default()
            .with_pod(Pod::new("ws").with_container(Container::new("dev", "ide").with_port(8080)))
            .with_machine(
                "ws/dev",
                MachineConfig::default()
                    .with_server("app", ServerConfig::http(8080))
                    .with_server("app-debug", ServerConfig::http(8080).with_path("/debug"))
                    .with_server("lsp", ServerConfig::http(4000)),
            );

        let first = exposer().expose_machines(&mut env).unwrap();
        let second = exposer().expose_machines(&mut env).unwrap();

        assert!(first.iter().all(|e| matches!(e, Exposure::Created(_))));
        assert!(second.iter().all(|e| matches!(e, Exposure::Reused(_))));
        assert_eq!(env.services.len(), 1);
        assert_eq!(env.services["ws-dev"].ports.len(), 2);
        assert_eq!(env.routes.len(), 2);
        assert_eq!(env.services["ws-dev"].selector[POD_LABEL], "ws");

        let servers: BTreeMap<String, ServerConfig> = serde_json::from_str(
            &env.routes["ws-dev-server-8080"].annotations[SERVERS_ANNOTATION],
        )
        .unwrap();
        assert_eq!(servers.len(), 2);
    }
}
