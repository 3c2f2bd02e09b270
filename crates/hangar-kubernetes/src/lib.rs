// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hangar Kubernetes - Workspace Runtimes on Kubernetes/OpenShift
//!
//! Prepares the objects of a workspace environment (pods, services, routes)
//! and drives the runtime lifecycle stored by `hangar-core`.
//!
//! # Start pipeline
//!
//! ```text
//! KubernetesEnvironment
//!        │
//!        ▼
//! EnvVarsProvisioner ── providers + declared + container env, ordered by references
//!        │
//!        ▼
//! ServerExposer ─────── one service per machine, one route per server port
//!        │
//!        ▼
//! PreviewUrlExposer ─── routes for command preview ports
//!        │
//!        ▼
//! OrchestrationClient ─ services, routes, pods
//!        │
//!        ▼
//! RouteServerResolver ─ machine servers registered in the runtime cache
//! ```
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HANGAR_ROUTE_DOMAIN_SUFFIX` | `apps.local` | Domain appended to route names |
//! | `HANGAR_ROUTE_TLS` | `false` | Expose routes over https/wss |

pub mod client;
pub mod config;
pub mod env_vars;
pub mod model;
pub mod runtime;
pub mod server;

pub use client::{MockOrchestrationClient, OrchestrationClient};
pub use config::Config;
pub use env_vars::{EnvVarProvider, EnvVarsProvisioner, IdentityEnvVars, StaticEnvVars};
pub use model::{
    Container, ContainerPort, EnvVar, EnvVarSource, KubernetesEnvironment, MachineConfig, Pod,
    Route, ServerConfig, Service, ServicePort,
};
pub use runtime::{KubernetesRuntime, KubernetesRuntimeBuilder, StartOutcome};
pub use server::{Exposure, PreviewUrlExposer, RouteServerResolver, ServerExposer};
