// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thin persistence helper for session metadata.
//!
//! The supervisor owns the in-memory truth about running clients; this
//! mirror in the document store is what admin tooling and the RBAC layer
//! read (`accounts/{aid}/sessions/{label}`).

use std::sync::Arc;

use serde_json::json;

use warelay_core::normalize::now_ms;
use warelay_core::types::{SessionKey, SessionStatus};
use warelay_core::{DocumentStore, WarelayError};
use warelay_core::paths;

/// Persists session lifecycle metadata into the document store.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn DocumentStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Record that a session was created (admin init).
    pub async fn record_created(&self, key: &SessionKey) -> Result<(), WarelayError> {
        self.store
            .set_merge(
                &paths::session(&key.account_id, &key.label),
                json!({
                    "status": SessionStatus::Starting.to_string(),
                    "createdAt": now_ms(),
                }),
            )
            .await
    }

    /// Record a status transition.
    pub async fn record_status(
        &self,
        key: &SessionKey,
        status: SessionStatus,
    ) -> Result<(), WarelayError> {
        self.store
            .set_merge(
                &paths::session(&key.account_id, &key.label),
                json!({ "status": status.to_string() }),
            )
            .await
    }

    /// Record the transition to `ready`, including the session's platform id.
    pub async fn record_ready(
        &self,
        key: &SessionKey,
        wa_id: Option<&str>,
    ) -> Result<(), WarelayError> {
        let mut patch = json!({
            "status": SessionStatus::Ready.to_string(),
            "lastReadyAt": now_ms(),
        });
        if let Some(wa_id) = wa_id {
            patch["waId"] = json!(wa_id);
        }
        self.store
            .set_merge(&paths::session(&key.account_id, &key.label), patch)
            .await
    }

    /// Remove the session doc entirely (admin destroy).
    pub async fn remove(&self, key: &SessionKey) -> Result<(), WarelayError> {
        self.store
            .delete(&paths::session(&key.account_id, &key.label))
            .await
    }

    /// Every session label known for the account, sorted.
    pub async fn list_labels(&self, account_id: &str) -> Result<Vec<String>, WarelayError> {
        let docs = self.store.list(&paths::sessions_prefix(account_id)).await?;
        let mut labels: Vec<String> = docs
            .iter()
            .filter_map(|d| d.path.rsplit('/').next().map(str::to_string))
            .collect();
        labels.sort();
        Ok(labels)
    }
}
