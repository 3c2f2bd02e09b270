// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for hangar-core PostgreSQL tests.

#![allow(dead_code)]

use hangar_core::{PostgresPersistence, RuntimeIdentity, RuntimeState, RuntimeStatus};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Route test logs through the test writer; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Connect to TEST_DATABASE_URL and run migrations.
pub async fn connect() -> Option<PostgresPersistence> {
    init_tracing();
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    PostgresPersistence::connect(&database_url, 5).await.ok()
}

/// Identity with a fresh workspace id so tests never collide.
pub fn unique_identity() -> RuntimeIdentity {
    RuntimeIdentity::new(
        format!("ws-{}", Uuid::new_v4()),
        "default",
        "test-owner",
        "test-ns",
    )
}

pub fn starting_state(identity: &RuntimeIdentity) -> RuntimeState {
    RuntimeState::new(identity.clone(), RuntimeStatus::Starting, Vec::new())
}

#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
