// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server exposure: services, routes and the servers derived from them.

pub mod exposer;
pub mod preview;
pub mod resolver;

pub use exposer::{Exposure, MACHINE_ANNOTATION, SERVERS_ANNOTATION, ServerExposer};
pub use preview::PreviewUrlExposer;
pub use resolver::RouteServerResolver;
