// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Role and ACL resolution over the document store.
//!
//! The authorization predicate lives here and only here: a user may touch a
//! session label when they are an Administrator of the account or the label
//! appears in their ACL doc. [`Rbac::subscribe_allowed`] turns role/ACL
//! changes into a live stream so subscriber connections update without
//! reconnecting.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use warelay_core::paths;
use warelay_core::traits::store::TxDecision;
use warelay_core::types::AllowedSessions;
use warelay_core::{DocumentStore, WarelayError};

use crate::registry::SessionRegistry;

/// The role that sees every label in an account.
pub const ROLE_ADMINISTRATOR: &str = "Administrator";

/// Resolves `{role, allowed labels}` for users and keeps subscribers current.
#[derive(Clone)]
pub struct Rbac {
    store: Arc<dyn DocumentStore>,
    registry: SessionRegistry,
}

impl Rbac {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let registry = SessionRegistry::new(store.clone());
        Self { store, registry }
    }

    /// The user's role within the account, if any.
    pub async fn role(&self, account_id: &str, uid: &str) -> Result<Option<String>, WarelayError> {
        let doc = self.store.get(&paths::member(account_id, uid)).await?;
        Ok(doc
            .and_then(|d| d.get("role").and_then(Value::as_str).map(str::to_string)))
    }

    /// The labels granted in the user's ACL doc.
    pub async fn acl_sessions(
        &self,
        account_id: &str,
        uid: &str,
    ) -> Result<Vec<String>, WarelayError> {
        let doc = self.store.get(&paths::acl(account_id, uid)).await?;
        Ok(doc
            .and_then(|d| {
                d.get("sessions").and_then(Value::as_array).map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
            })
            .unwrap_or_default())
    }

    /// Resolve the user's allowed set. `None` when the user has no role in
    /// the account. Administrators see every label, dynamically.
    pub async fn resolve_allowed(
        &self,
        account_id: &str,
        uid: &str,
    ) -> Result<Option<AllowedSessions>, WarelayError> {
        let Some(role) = self.role(account_id, uid).await? else {
            return Ok(None);
        };
        let sessions = if role == ROLE_ADMINISTRATOR {
            self.registry.list_labels(account_id).await?
        } else {
            self.acl_sessions(account_id, uid).await?
        };
        Ok(Some(AllowedSessions { role, sessions }))
    }

    /// Grant a label to a user's ACL.
    pub async fn grant(
        &self,
        account_id: &str,
        uid: &str,
        label: &str,
    ) -> Result<(), WarelayError> {
        let label = label.to_string();
        self.store
            .update_atomic(
                &paths::acl(account_id, uid),
                Box::new(move |current| {
                    let mut sessions = sessions_from_doc(current.as_ref());
                    if !sessions.contains(&label) {
                        sessions.push(label);
                        sessions.sort();
                    }
                    TxDecision::Write(json!({ "sessions": sessions }))
                }),
            )
            .await?;
        Ok(())
    }

    /// Revoke a label from a user's ACL.
    pub async fn revoke(
        &self,
        account_id: &str,
        uid: &str,
        label: &str,
    ) -> Result<(), WarelayError> {
        let label = label.to_string();
        self.store
            .update_atomic(
                &paths::acl(account_id, uid),
                Box::new(move |current| {
                    let mut sessions = sessions_from_doc(current.as_ref());
                    sessions.retain(|s| *s != label);
                    TxDecision::Write(json!({ "sessions": sessions }))
                }),
            )
            .await?;
        Ok(())
    }

    /// Follow role and ACL changes for one user, yielding the recomputed
    /// allowed set whenever it changes. The subscription's task is aborted
    /// on drop.
    pub fn subscribe_allowed(&self, account_id: &str, uid: &str) -> AllowedSubscription {
        let (tx, rx) = mpsc::channel(16);
        let rbac = self.clone();
        let account_id = account_id.to_string();
        let uid = uid.to_string();
        let mut changes = self.store.changes();

        let handle = tokio::spawn(async move {
            let member_path = paths::member(&account_id, &uid);
            let acl_path = paths::acl(&account_id, &uid);
            let sessions_prefix = paths::sessions_prefix(&account_id);
            let mut last: Option<Option<AllowedSessions>> = None;

            loop {
                let relevant = match changes.recv().await {
                    Ok(change) => {
                        change.path == member_path
                            || change.path == acl_path
                            || (change.path.starts_with(&sessions_prefix)
                                && !change.path[sessions_prefix.len()..].contains('/'))
                    }
                    // Dropped notifications may have been relevant; recompute.
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !relevant {
                    continue;
                }

                let resolved = match rbac.resolve_allowed(&account_id, &uid).await {
                    Ok(r) => r,
                    Err(e) => {
                        debug!(error = %e, uid = %uid, "allowed-set recompute failed");
                        continue;
                    }
                };
                if last.as_ref() == Some(&resolved) {
                    continue;
                }
                last = Some(resolved.clone());
                if tx.send(resolved).await.is_err() {
                    break;
                }
            }
        });

        AllowedSubscription { rx, handle }
    }
}

/// The shared authorization predicate: Administrator, or label in the ACL.
pub fn is_authorized(allowed: &AllowedSessions, label: &str) -> bool {
    allowed.role == ROLE_ADMINISTRATOR || allowed.sessions.iter().any(|s| s == label)
}

fn sessions_from_doc(doc: Option<&Value>) -> Vec<String> {
    doc.and_then(|d| d.get("sessions"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Live stream of allowed-set updates for one `(account, uid)`.
///
/// `None` items mean the user lost their role entirely.
pub struct AllowedSubscription {
    rx: mpsc::Receiver<Option<AllowedSessions>>,
    handle: JoinHandle<()>,
}

impl AllowedSubscription {
    pub async fn recv(&mut self) -> Option<Option<AllowedSessions>> {
        self.rx.recv().await
    }
}

impl Drop for AllowedSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
