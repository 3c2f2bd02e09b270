// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Preview URL exposure for commands.
//!
//! A command may declare a preview URL on a port. If no service already
//! serves that port, a service `server<port>` with a port named
//! `server-<port>` is added, selecting the pod that declares the port. A
//! route is then ensured for it through [`ServerExposer`]. Names depend only
//! on the port number, so repeated passes change nothing.

use std::collections::{BTreeMap, BTreeSet};

use hangar_core::{Command, Result};
use tracing::{debug, warn};

use super::exposer::{Exposure, ServerExposer};
use super::resolver::url_for;
use crate::model::{
    KubernetesEnvironment, POD_LABEL, Pod, Route, ServerConfig, Service, ServicePort,
    machine_name,
};

/// Server name used in route annotations for a preview port.
pub fn preview_server_name(port: u16) -> String {
    format!("preview-{}", port)
}

#[derive(Debug, Clone)]
pub struct PreviewUrlExposer {
    exposer: ServerExposer,
}

impl PreviewUrlExposer {
    pub fn new(exposer: ServerExposer) -> Self {
        Self { exposer }
    }

    /// Ensure a service and a route exist for every preview URL port of the
    /// environment's commands.
    pub fn expose(&self, env: &mut KubernetesEnvironment) -> Result<Vec<Exposure>> {
        let ports: BTreeSet<u16> = env
            .commands
            .iter()
            .filter_map(|command| command.preview_url.as_ref().map(|p| p.port))
            .collect();

        let mut exposures = Vec::new();
        for port in ports {
            let Some((service, service_port, machine)) = ensure_service(env, port) else {
                warn!(port, "No pod to serve preview URL, skipping");
                continue;
            };

            let mut servers = BTreeMap::new();
            let mut server = ServerConfig::http(port);
            server
                .attributes
                .insert("type".to_string(), "preview".to_string());
            servers.insert(preview_server_name(port), server);

            exposures.push(
                self.exposer
                    .expose(env, &machine, &service, &service_port, &servers)?,
            );
        }
        Ok(exposures)
    }

    /// Write the resolved preview URL of each command into its
    /// `previewUrl` attribute. Commands whose port has no route are left as is.
    pub fn resolve_commands(&self, env: &KubernetesEnvironment, commands: &mut [Command]) {
        for command in commands.iter_mut() {
            let Some(preview) = &command.preview_url else {
                continue;
            };
            let Some(route) = route_for_port(env, preview.port) else {
                debug!(command = %command.name, port = preview.port, "Preview port has no route");
                continue;
            };
            let url = url_for(route, "http", preview.path.as_deref());
            command
                .attributes
                .insert(Command::PREVIEW_URL_ATTRIBUTE.to_string(), url);
        }
    }
}

/// Route reaching `port` through any service.
fn route_for_port(env: &KubernetesEnvironment, port: u16) -> Option<&Route> {
    env.services.values().find_map(|service| {
        service
            .ports
            .iter()
            .filter(|p| p.serves(port))
            .find_map(|p| env.route_for(&service.name, &p.name))
    })
}

/// Find or add a service serving `port`. Returns the service name, its
/// port and the machine behind it.
fn ensure_service(env: &mut KubernetesEnvironment, port: u16) -> Option<(String, ServicePort, String)> {
    let existing = env.services.values().find_map(|service| {
        service
            .ports
            .iter()
            .find(|p| p.serves(port))
            .map(|p| (service.name.clone(), p.clone(), service.selector.clone()))
    });
    if let Some((service, service_port, selector)) = existing {
        let pod = env
            .pods
            .values()
            .find(|pod| !selector.is_empty() && selects(&selector, &pod.labels))
            .or_else(|| declaring_pod(env, port))?;
        let machine = machine_for(pod, port)?;
        return Some((service, service_port, machine));
    }

    let pod_name = declaring_pod(env, port).map(|pod| pod.name.clone())?;
    let pod = env.pods.get_mut(&pod_name)?;
    let machine = machine_for(pod, port)?;

    pod.labels
        .entry(POD_LABEL.to_string())
        .or_insert_with(|| pod_name.clone());
    let selector = pod.labels.clone();

    let name = format!("server{}", port);
    let service_port = ServicePort::for_server(port);
    debug!(service = %name, pod = %pod_name, port, "Created preview service");
    env.services.insert(
        name.clone(),
        Service {
            name: name.clone(),
            labels: BTreeMap::new(),
            selector,
            ports: vec![service_port.clone()],
        },
    );
    Some((name, service_port, machine))
}

/// Pod with a container declaring `port`, or the first pod.
fn declaring_pod(env: &KubernetesEnvironment, port: u16) -> Option<&Pod> {
    env.pods
        .values()
        .find(|pod| pod.containers.iter().any(|c| c.exposes(port)))
        .or_else(|| env.pods.values().next())
}

fn machine_for(pod: &Pod, port: u16) -> Option<String> {
    let container = pod
        .containers
        .iter()
        .find(|c| c.exposes(port))
        .or_else(|| pod.containers.first())?;
    Some(machine_name(&pod.name, &container.name))
}

fn selects(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(key, value)| labels.get(key) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Container, Pod};

    fn preview_exposer() -> PreviewUrlExposer {
        PreviewUrlExposer::new(ServerExposer::new(&Config::default()))
    }

    fn env_with_preview(port: u16) -> KubernetesEnvironment {
        KubernetesEnvironment::default()
            .with_pod(
                Pod::new("ws")
                    .with_container(Container::new("tools", "tools"))
                    .with_container(Container::new("node", "node:20").with_port(port)),
            )
            .with_command(Command::new("run", "npm start").with_preview_url(port, Some("/app")))
    }

    #[test]
    fn test_creates_service_and_route() {
        let mut env = env_with_preview(3000);

        preview_exposer().expose(&mut env).unwrap();

        let service = &env.services["server3000"];
        assert_eq!(service.ports, vec![ServicePort::for_server(3000)]);
        assert_eq!(service.selector[POD_LABEL], "ws");

        let route = &env.routes["server3000-server-3000"];
        assert_eq!(route.to_service, "server3000");
        assert_eq!(route.target_port, "server-3000");
        assert_eq!(
            route.annotations[crate::server::MACHINE_ANNOTATION],
            "ws/node"
        );
    }

    #[test]
    fn test_repeated_passes_are_stable() {
        let mut env = env_with_preview(3000);
        env.commands
            .push(Command::new("debug", "npm run debug").with_preview_url(3000, None));

        preview_exposer().expose(&mut env).unwrap();
        let after_first = env.clone();
        let second = preview_exposer().expose(&mut env).unwrap();

        assert_eq!(env, after_first);
        assert_eq!(env.services.len(), 1);
        assert_eq!(env.routes.len(), 1);
        assert!(matches!(second.as_slice(), [Exposure::Reused(_)]));
    }

    #[test]
    fn test_reuses_existing_service_by_target_port() {
        let mut env = env_with_preview(3000);
        env.services.insert(
            "web".to_string(),
            Service {
                name: "web".to_string(),
                labels: BTreeMap::new(),
                selector: BTreeMap::new(),
                ports: vec![ServicePort {
                    name: "http".to_string(),
                    port: 80,
                    target_port: 3000,
                    protocol: "TCP".to_string(),
                }],
            },
        );

        preview_exposer().expose(&mut env).unwrap();

        assert_eq!(env.services.len(), 1);
        assert!(env.routes.contains_key("web-http"));
    }

    #[test]
    fn test_reused_service_annotates_selected_pod() {
        let mut web = Pod::new("web").with_container(Container::new("server", "nginx"));
        web.labels.insert("app".to_string(), "web".to_string());
        let mut env = env_with_preview(3000).with_pod(web);
        env.services.insert(
            "web-svc".to_string(),
            Service {
                name: "web-svc".to_string(),
                labels: BTreeMap::new(),
                selector: BTreeMap::from([("app".to_string(), "web".to_string())]),
                ports: vec![ServicePort {
                    name: "http".to_string(),
                    port: 80,
                    target_port: 3000,
                    protocol: "TCP".to_string(),
                }],
            },
        );

        preview_exposer().expose(&mut env).unwrap();

        assert_eq!(env.services.len(), 1);
        assert_eq!(
            env.routes["web-svc-http"].annotations[crate::server::MACHINE_ANNOTATION],
            "web/server"
        );
    }

    #[test]
    fn test_resolve_commands_sets_preview_url() {
        let mut env = env_with_preview(3000);
        let exposer = preview_exposer();
        exposer.expose(&mut env).unwrap();

        let mut commands = env.commands.clone();
        commands.push(Command::new("build", "npm run build"));
        exposer.resolve_commands(&env, &mut commands);

        assert_eq!(
            commands[0].attributes[Command::PREVIEW_URL_ATTRIBUTE],
            "http://server3000-server-3000.apps.local/app"
        );
        assert!(commands[1].attributes.is_empty());
    }

    #[test]
    fn test_no_pods_skips_preview() {
        let mut env = KubernetesEnvironment::default()
            .with_command(Command::new("run", "serve").with_preview_url(8000, None));

        assert!(preview_exposer().expose(&mut env).unwrap().is_empty());
        assert!(env.services.is_empty());
    }
}
