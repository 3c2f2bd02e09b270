// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment variable resolution and provisioning.

pub mod providers;
pub mod provisioner;
pub mod resolver;

pub use providers::{EnvVarProvider, IdentityEnvVars, StaticEnvVars};
pub use provisioner::EnvVarsProvisioner;
pub use resolver::{find_references, sort};
