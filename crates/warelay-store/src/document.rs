// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`DocumentStore`] trait.
//!
//! Documents are JSON blobs keyed by hierarchical path, with the parent
//! collection name denormalized into its own indexed column to back
//! collection-group queries. Every committed write fans a [`DocChange`]
//! out on a broadcast channel; the outbox watcher and ACL subscriptions
//! are driven entirely by that feed.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;

use warelay_core::traits::store::{
    DocChange, Document, DocumentStore, FieldFilter, TxDecision, TxFn,
};
use warelay_core::traits::store::field_at;
use warelay_core::WarelayError;

use crate::database::{map_tr_err, Database};

/// Capacity of the store-wide change feed. Laggy subscribers drop
/// notifications rather than block writers.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// SQLite-backed document store.
pub struct SqliteStore {
    db: Database,
    change_tx: broadcast::Sender<DocChange>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, WarelayError> {
        let db = Database::open(path, wal_mode).await?;
        let (change_tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self { db, change_tx })
    }

    /// Checkpoint and close the underlying database.
    pub async fn close(&self) -> Result<(), WarelayError> {
        self.db.close().await
    }

    fn emit(&self, path: &str, data: Option<Value>) {
        // Nobody listening is fine.
        let _ = self.change_tx.send(DocChange {
            path: path.to_string(),
            data,
        });
    }
}

/// The parent collection name of a document path
/// (`accounts/a/sessions/l/threads/c/turns/w` -> `turns`).
fn parent_collection(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() >= 2 {
        segments[segments.len() - 2].to_string()
    } else {
        String::new()
    }
}

/// Deep-merge `patch` into `base`, Firestore set-merge style: nested maps
/// merge recursively, everything else (including explicit nulls) replaces.
fn deep_merge(base: &mut Value, patch: Value) {
    match patch {
        Value::Object(patch_map) => {
            if let Value::Object(base_map) = base {
                for (key, incoming) in patch_map {
                    match base_map.get_mut(&key) {
                        Some(slot) if slot.is_object() && incoming.is_object() => {
                            deep_merge(slot, incoming);
                        }
                        _ => {
                            base_map.insert(key, incoming);
                        }
                    }
                }
            } else {
                *base = Value::Object(patch_map);
            }
        }
        other => *base = other,
    }
}

const UPSERT_SQL: &str = "INSERT INTO documents (path, parent, data, updated_at) \
     VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
     ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at";

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, WarelayError> {
        let path = path.to_string();
        let raw: Option<String> = self
            .db
            .connection()
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT data FROM documents WHERE path = ?1",
                        params![path],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
            .map_err(map_tr_err)?;

        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| WarelayError::Store {
                source: Box::new(e),
            })
    }

    async fn set_merge(&self, path: &str, patch: Value) -> Result<(), WarelayError> {
        let path_owned = path.to_string();
        let parent = parent_collection(path);
        let merged: Value = self
            .db
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT data FROM documents WHERE path = ?1",
                        params![path_owned],
                        |row| row.get(0),
                    )
                    .optional()?;

                let mut doc = match existing {
                    Some(s) => serde_json::from_str(&s)
                        .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?,
                    None => Value::Object(serde_json::Map::new()),
                };
                deep_merge(&mut doc, patch);

                tx.execute(UPSERT_SQL, params![path_owned, parent, doc.to_string()])?;
                tx.commit()?;
                Ok(doc)
            })
            .await
            .map_err(map_tr_err)?;

        self.emit(path, Some(merged));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), WarelayError> {
        let path_owned = path.to_string();
        let removed: usize = self
            .db
            .connection()
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM documents WHERE path = ?1",
                    params![path_owned],
                )?)
            })
            .await
            .map_err(map_tr_err)?;

        if removed > 0 {
            self.emit(path, None);
        }
        Ok(())
    }

    async fn update_atomic(&self, path: &str, decide: TxFn) -> Result<bool, WarelayError> {
        let path_owned = path.to_string();
        let parent = parent_collection(path);
        let committed: Option<Value> = self
            .db
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT data FROM documents WHERE path = ?1",
                        params![path_owned],
                        |row| row.get(0),
                    )
                    .optional()?;

                let current = existing
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;

                match decide(current) {
                    TxDecision::Write(value) => {
                        tx.execute(UPSERT_SQL, params![path_owned, parent, value.to_string()])?;
                        tx.commit()?;
                        Ok(Some(value))
                    }
                    TxDecision::Abort => Ok(None),
                }
            })
            .await
            .map_err(map_tr_err)?;

        match committed {
            Some(value) => {
                self.emit(path, Some(value));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn query_group(
        &self,
        collection: &str,
        equals: &[FieldFilter],
    ) -> Result<Vec<Document>, WarelayError> {
        let collection = collection.to_string();
        let rows: Vec<(String, String)> = self
            .db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT path, data FROM documents WHERE parent = ?1 ORDER BY path",
                )?;
                let rows = stmt
                    .query_map(params![collection], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)?;

        let mut out = Vec::new();
        for (path, raw) in rows {
            let data: Value = serde_json::from_str(&raw).map_err(|e| WarelayError::Store {
                source: Box::new(e),
            })?;
            let matches = equals
                .iter()
                .all(|(field, expected)| field_at(&data, field) == Some(expected));
            if matches {
                out.push(Document { path, data });
            }
        }
        Ok(out)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Document>, WarelayError> {
        let prefix_owned = prefix.to_string();
        let like = format!("{prefix_owned}%");
        let rows: Vec<(String, String)> = self
            .db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT path, data FROM documents WHERE path LIKE ?1 ORDER BY path",
                )?;
                let rows = stmt
                    .query_map(params![like], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)?;

        let mut out = Vec::new();
        for (path, raw) in rows {
            // LIKE treats `_` as a wildcard; re-check literally and keep only
            // documents exactly one segment below the prefix.
            let Some(rest) = path.strip_prefix(prefix) else {
                continue;
            };
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            let data: Value = serde_json::from_str(&raw).map_err(|e| WarelayError::Store {
                source: Box::new(e),
            })?;
            out.push(Document { path, data });
        }
        Ok(out)
    }

    fn changes(&self) -> broadcast::Receiver<DocChange> {
        self.change_tx.subscribe()
    }
}
