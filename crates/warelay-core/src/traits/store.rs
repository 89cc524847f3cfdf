// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document store trait.
//!
//! The store is the single durable state of the system: turns, session
//! metadata, ACLs, and policy all live in it. Documents are loosely typed
//! JSON keyed by hierarchical path; callers validate into typed records at
//! the boundary. Writes fan change notifications out on a broadcast channel,
//! which is what the outbox watcher and the ACL subscriptions consume.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::WarelayError;

/// A document read back out of the store.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: String,
    pub data: Value,
}

/// A change notification: `data` is `None` for deletions.
#[derive(Debug, Clone)]
pub struct DocChange {
    pub path: String,
    pub data: Option<Value>,
}

/// Outcome of an atomic update closure.
pub enum TxDecision {
    /// Replace the document with this value and commit.
    Write(Value),
    /// Leave the document untouched.
    Abort,
}

/// Closure run inside a store transaction against the current document value.
pub type TxFn = Box<dyn FnOnce(Option<Value>) -> TxDecision + Send>;

/// Equality filter on a dotted field path, e.g. `("meta.accountId", "acme")`.
pub type FieldFilter = (String, Value);

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document.
    async fn get(&self, path: &str) -> Result<Option<Value>, WarelayError>;

    /// Deep-merge `patch` into the document, creating it if absent.
    async fn set_merge(&self, path: &str, patch: Value) -> Result<(), WarelayError>;

    /// Delete one document. Deleting a missing document is not an error.
    async fn delete(&self, path: &str) -> Result<(), WarelayError>;

    /// Run `decide` against the current value inside a single transaction.
    ///
    /// Returns `true` when the closure committed a write, `false` on abort.
    /// This is the only primitive that guarantees read-check-write atomicity;
    /// the outbox claim is built on it.
    async fn update_atomic(&self, path: &str, decide: TxFn) -> Result<bool, WarelayError>;

    /// Query every document whose parent collection is named `collection`,
    /// anywhere in the tree, matching all `equals` filters.
    async fn query_group(
        &self,
        collection: &str,
        equals: &[FieldFilter],
    ) -> Result<Vec<Document>, WarelayError>;

    /// List documents directly under `prefix` (one path segment deeper).
    async fn list(&self, prefix: &str) -> Result<Vec<Document>, WarelayError>;

    /// Subscribe to the store-wide change feed.
    fn changes(&self) -> broadcast::Receiver<DocChange>;
}

/// Read a dotted field path (`meta.accountId`) out of a JSON value.
pub fn field_at<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in dotted.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}
