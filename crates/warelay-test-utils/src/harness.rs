// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared scaffolding for store-backed tests.

use std::sync::Arc;

use tempfile::TempDir;

use warelay_store::SqliteStore;

/// A throwaway SQLite-backed store rooted in a temp directory.
///
/// Keep the returned [`TempDir`] alive for the duration of the test.
pub async fn temp_store() -> (Arc<SqliteStore>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("warelay-test.db");
    let store = SqliteStore::open(path.to_str().expect("utf8 path"), true)
        .await
        .expect("open store");
    (Arc::new(store), dir)
}
