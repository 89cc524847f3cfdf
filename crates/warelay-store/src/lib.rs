// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Warelay bridge.
//!
//! Implements the `DocumentStore` trait over WAL-mode SQLite with a
//! single-writer concurrency model via `tokio-rusqlite`, plus the thin
//! session-registry and RBAC helpers layered on top of it.

pub mod database;
pub mod document;
pub mod migrations;
pub mod rbac;
pub mod registry;

pub use database::Database;
pub use document::SqliteStore;
pub use rbac::{is_authorized, AllowedSubscription, Rbac, ROLE_ADMINISTRATOR};
pub use registry::SessionRegistry;
