// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server records derived from route annotations.

use std::collections::BTreeMap;

use hangar_core::{Result, Server};

use super::exposer::{MACHINE_ANNOTATION, SERVERS_ANNOTATION};
use crate::model::{Route, ServerConfig};

/// URL scheme for `protocol` behind a route.
fn scheme(protocol: &str, tls: bool) -> String {
    match (protocol, tls) {
        ("http", true) => "https".to_string(),
        ("ws", true) => "wss".to_string(),
        (other, _) => other.to_string(),
    }
}

/// External URL of `route` for a server speaking `protocol` at `path`.
pub fn url_for(route: &Route, protocol: &str, path: Option<&str>) -> String {
    let path = path.or(route.path.as_deref()).unwrap_or("/");
    let separator = if path.starts_with('/') { "" } else { "/" };
    format!(
        "{}://{}{}{}",
        scheme(protocol, route.tls),
        route.host,
        separator,
        path
    )
}

/// Builds the servers of a machine from the routes that expose it.
#[derive(Debug, Clone)]
pub struct RouteServerResolver<'a> {
    routes: Vec<&'a Route>,
}

impl<'a> RouteServerResolver<'a> {
    pub fn new(routes: impl IntoIterator<Item = &'a Route>) -> Self {
        Self {
            routes: routes.into_iter().collect(),
        }
    }

    /// Servers of `machine`, all in `Starting` status.
    pub fn resolve(&self, machine: &str) -> Result<BTreeMap<String, Server>> {
        let mut servers = BTreeMap::new();

        for route in &self.routes {
            if route.annotations.get(MACHINE_ANNOTATION).map(String::as_str) != Some(machine) {
                continue;
            }
            let Some(annotation) = route.annotations.get(SERVERS_ANNOTATION) else {
                continue;
            };
            let configs: BTreeMap<String, ServerConfig> = serde_json::from_str(annotation)?;

            for (name, config) in configs {
                let mut server = Server::new(
                    name.clone(),
                    url_for(route, &config.protocol, config.path.as_deref()),
                );
                server.attributes = config.attributes;
                server
                    .attributes
                    .insert("port".to_string(), config.port.to_string());
                servers.insert(name, server);
            }
        }

        Ok(servers)
    }
}
