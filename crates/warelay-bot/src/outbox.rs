// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbox watcher: claims `ready` turns and dispatches their replies.
//!
//! One watch task per ready session, driven by the store change feed plus an
//! initial scan. The claim (`ready -> sending`) runs inside a store
//! transaction and is the single source of at-most-once delivery: whoever
//! loses the transaction aborts. A crash between claim and delivery leaves
//! the turn in `sending`; nothing reclaims it automatically; recovery is an
//! operator action.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warelay_core::normalize::now_ms;
use warelay_core::traits::store::{field_at, TxDecision};
use warelay_core::types::{Modality, SessionKey, Turn, TurnStatus};
use warelay_core::{DocumentStore, MediaPayload, SendOptions, WarelayError};
use warelay_session::SessionSupervisor;

use crate::policy::PolicyCache;

struct Inner {
    store: Arc<dyn DocumentStore>,
    policy: Arc<PolicyCache>,
    sessions: Arc<SessionSupervisor>,
    fallback_reply: String,
    watchers: Mutex<HashMap<SessionKey, JoinHandle<()>>>,
}

/// Watches ready turns per session and owns every claim transition.
#[derive(Clone)]
pub struct OutboxWatcher {
    inner: Arc<Inner>,
}

impl OutboxWatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        policy: Arc<PolicyCache>,
        sessions: Arc<SessionSupervisor>,
        fallback_reply: String,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                policy,
                sessions,
                fallback_reply,
                watchers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start watching a session that just became ready. Idempotent.
    pub async fn attach(&self, account_id: &str, label: &str) {
        let key = SessionKey::new(account_id, label);
        let mut watchers = self.inner.watchers.lock().await;
        if watchers.contains_key(&key) {
            return;
        }
        info!(session = %key, "outbox watch attached");
        let watcher = self.clone();
        let task_key = key.clone();
        watchers.insert(
            key,
            tokio::spawn(async move {
                watcher.watch_session(task_key).await;
            }),
        );
    }

    /// Tear the session's watch down (session left `ready`).
    pub async fn detach(&self, account_id: &str, label: &str) {
        let key = SessionKey::new(account_id, label);
        if let Some(handle) = self.inner.watchers.lock().await.remove(&key) {
            handle.abort();
            info!(session = %key, "outbox watch detached");
        }
    }

    /// Tear down every watch (process shutdown).
    pub async fn detach_all(&self) {
        let mut watchers = self.inner.watchers.lock().await;
        for (key, handle) in watchers.drain() {
            handle.abort();
            debug!(session = %key, "outbox watch detached");
        }
    }

    /// Number of active watches (test observability).
    pub async fn active_watches(&self) -> usize {
        self.inner.watchers.lock().await.len()
    }

    /// The per-session watch loop: initial scan, then the change feed.
    /// Documents are processed sequentially, preserving per-session order.
    async fn watch_session(&self, key: SessionKey) {
        // Subscribe before scanning so no ready turn falls into the gap.
        let mut changes = self.inner.store.changes();

        if let Err(e) = self.scan_ready(&key).await {
            warn!(session = %key, error = %e, "outbox scan failed; watch torn down");
            self.inner.watchers.lock().await.remove(&key);
            return;
        }

        loop {
            match changes.recv().await {
                Ok(change) => {
                    let Some(data) = change.data else { continue };
                    if !Self::is_ready_turn_for(&data, &key) {
                        continue;
                    }
                    self.process_ready(&change.path, &data).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(session = %key, skipped, "outbox feed lagged; re-scanning");
                    if let Err(e) = self.scan_ready(&key).await {
                        warn!(session = %key, error = %e, "outbox re-scan failed; watch torn down");
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        self.inner.watchers.lock().await.remove(&key);
    }

    /// One pass over the collection group for turns already `ready`.
    async fn scan_ready(&self, key: &SessionKey) -> Result<(), WarelayError> {
        let docs = self
            .inner
            .store
            .query_group(
                warelay_core::paths::TURNS_COLLECTION,
                &[
                    ("meta.accountId".to_string(), json!(key.account_id)),
                    ("meta.label".to_string(), json!(key.label)),
                    ("status".to_string(), json!(TurnStatus::Ready.to_string())),
                ],
            )
            .await?;
        for doc in docs {
            self.process_ready(&doc.path, &doc.data).await;
        }
        Ok(())
    }

    fn is_ready_turn_for(data: &Value, key: &SessionKey) -> bool {
        field_at(data, "status") == Some(&json!("ready"))
            && field_at(data, "meta.accountId") == Some(&json!(key.account_id))
            && field_at(data, "meta.label") == Some(&json!(key.label))
    }

    /// Claim, validate, check policy, dispatch, and record the terminal state.
    async fn process_ready(&self, path: &str, data: &Value) {
        let claimed_at = now_ms();
        let claimed = self
            .inner
            .store
            .update_atomic(
                path,
                Box::new(move |current| {
                    let Some(mut doc) = current else {
                        return TxDecision::Abort;
                    };
                    let still_ready = doc.get("status") == Some(&json!("ready"));
                    let unclaimed = doc
                        .get("waMessageId")
                        .map(Value::is_null)
                        .unwrap_or(true);
                    if !still_ready || !unclaimed {
                        return TxDecision::Abort;
                    }
                    doc["status"] = json!("sending");
                    doc["claimedAt"] = json!(claimed_at);
                    TxDecision::Write(doc)
                }),
            )
            .await;

        match claimed {
            Ok(true) => {}
            Ok(false) => {
                debug!(path = %path, "claim lost; another watcher owns this turn");
                return;
            }
            Err(e) => {
                warn!(path = %path, error = %e, "claim transaction failed");
                return;
            }
        }

        let turn: Turn = match serde_json::from_value(data.clone()) {
            Ok(turn) => turn,
            Err(e) => {
                warn!(path = %path, error = %e, "turn document malformed");
                self.record_error(path, "validate", Some(e.to_string())).await;
                return;
            }
        };

        let meta = &turn.meta;
        if meta.account_id.is_empty() || meta.label.is_empty() || meta.chat_id.is_empty() {
            self.record_error(path, "validate", None).await;
            return;
        }

        if !self
            .inner
            .policy
            .allow_send(&meta.account_id, &meta.label, &meta.chat_id)
            .await
        {
            info!(window_id = %meta.window_id, "send denied by policy; turn skipped");
            let patch = json!({
                "status": TurnStatus::Skipped.to_string(),
                "skippedAt": now_ms(),
                "error": Value::Null,
            });
            if let Err(e) = self.inner.store.set_merge(path, patch).await {
                warn!(path = %path, error = %e, "failed to record skip");
            }
            return;
        }

        match self.dispatch(&turn).await {
            Ok(message_id) => {
                let patch = json!({
                    "status": TurnStatus::Delivered.to_string(),
                    "deliveredAt": now_ms(),
                    "waMessageId": message_id,
                    "error": Value::Null,
                });
                if let Err(e) = self.inner.store.set_merge(path, patch).await {
                    warn!(path = %path, error = %e, "failed to record delivery");
                } else {
                    info!(window_id = %meta.window_id, "turn delivered");
                }
            }
            Err(e) => {
                warn!(window_id = %meta.window_id, error = %e, "send failed; turn terminal");
                self.record_error(path, "send", Some(e.to_string())).await;
            }
        }
    }

    /// Send the worker's response through the session. Voice responses go out
    /// as a voice note with the text as caption; everything else is text.
    async fn dispatch(&self, turn: &Turn) -> Result<String, WarelayError> {
        let meta = &turn.meta;
        let response = turn.response.as_ref();

        let voice_url = response.and_then(|r| {
            (r.modality == Modality::Voice)
                .then(|| r.audio.as_ref().map(|a| a.url.clone()))
                .flatten()
        });

        if let Some(url) = voice_url {
            let caption = response
                .and_then(|r| r.text.as_deref())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            return self
                .inner
                .sessions
                .send_media(
                    &meta.account_id,
                    &meta.label,
                    &meta.chat_id,
                    MediaPayload::Url { url },
                    SendOptions {
                        caption,
                        send_audio_as_voice: true,
                    },
                )
                .await;
        }

        let text = response
            .and_then(|r| r.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.inner.fallback_reply)
            .to_string();
        self.inner
            .sessions
            .send_text(&meta.account_id, &meta.label, &meta.chat_id, &text)
            .await
    }

    async fn record_error(&self, path: &str, stage: &str, detail: Option<String>) {
        let patch = json!({
            "status": TurnStatus::Error.to_string(),
            "error": { "stage": stage, "detail": detail },
        });
        if let Err(e) = self.inner.store.set_merge(path, patch).await {
            warn!(path = %path, error = %e, "failed to record turn error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use warelay_config::model::SessionConfig;
    use warelay_core::ClientEvent;
    use warelay_core::types::SessionStatus;
    use warelay_store::{SessionRegistry, SqliteStore};
    use warelay_test_utils::{temp_store, MockPlatformFactory};

    struct Fixture {
        outbox: OutboxWatcher,
        store: Arc<SqliteStore>,
        factory: Arc<MockPlatformFactory>,
        supervisor: Arc<SessionSupervisor>,
        key: SessionKey,
        _store_dir: tempfile::TempDir,
        _auth_dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let (store, store_dir) = temp_store().await;
        let auth_dir = tempdir().unwrap();

        let factory = Arc::new(MockPlatformFactory::new());
        let registry = SessionRegistry::new(store.clone());
        let session_cfg = SessionConfig {
            auth_dir: auth_dir.path().to_str().unwrap().to_string(),
            ..SessionConfig::default()
        };
        let supervisor = Arc::new(SessionSupervisor::new(
            factory.clone(),
            registry,
            &session_cfg,
        ));

        let key = SessionKey::new("acme", "support");
        supervisor.init("acme", "support").await.unwrap();
        factory
            .emit(
                &key,
                ClientEvent::Ready {
                    wa_id: Some("1555@c.us".into()),
                },
            )
            .await;
        wait_until(|| async {
            supervisor.status("acme", "support").await == Some(SessionStatus::Ready)
        })
        .await;

        let policy = Arc::new(PolicyCache::with_ttl(store.clone(), 0));
        let outbox = OutboxWatcher::new(
            store.clone(),
            policy,
            supervisor.clone(),
            "Mensaje listo.".to_string(),
        );

        Fixture {
            outbox,
            store,
            factory,
            supervisor,
            key,
            _store_dir: store_dir,
            _auth_dir: auth_dir,
        }
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached within timeout");
    }

    fn turn_path() -> String {
        warelay_core::paths::turn("acme", "support", "521@c.us", "acme.support.521@c.us.1000")
    }

    fn ready_turn(response: Value) -> Value {
        json!({
            "status": "ready",
            "openedAt": 1000,
            "closedAt": 9000,
            "meta": {
                "accountId": "acme",
                "label": "support",
                "chatId": "521@c.us",
                "windowId": "acme.support.521@c.us.1000"
            },
            "hints": {"lastInbound": "text", "explicit": null, "lang": "es-MX"},
            "items": [{"type": "text", "ts": 1000, "text": "hola"}],
            "response": response
        })
    }

    async fn turn_status(store: &SqliteStore, path: &str) -> String {
        store.get(path).await.unwrap().unwrap()["status"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn ready_turn_is_claimed_and_delivered() {
        let f = fixture().await;
        f.outbox.attach("acme", "support").await;

        f.store
            .set_merge(
                &turn_path(),
                ready_turn(json!({"modality": "text", "text": "  todo listo  "})),
            )
            .await
            .unwrap();

        wait_until(|| async { turn_status(&f.store, &turn_path()).await == "delivered" }).await;

        let doc = f.store.get(&turn_path()).await.unwrap().unwrap();
        assert!(doc["waMessageId"].as_str().unwrap().starts_with("mock-"));
        assert!(doc["deliveredAt"].as_i64().unwrap() > 0);
        assert!(doc["claimedAt"].as_i64().unwrap() > 0);
        assert_eq!(doc["error"], Value::Null);

        let client = f.factory.client(&f.key).unwrap();
        let sent = client.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "521@c.us");
        assert_eq!(sent[0].body, "todo listo");
        assert!(!sent[0].is_media);
    }

    #[tokio::test]
    async fn preexisting_ready_turn_is_picked_up_by_scan() {
        let f = fixture().await;
        f.store
            .set_merge(
                &turn_path(),
                ready_turn(json!({"modality": "text", "text": "ok"})),
            )
            .await
            .unwrap();

        f.outbox.attach("acme", "support").await;
        wait_until(|| async { turn_status(&f.store, &turn_path()).await == "delivered" }).await;
    }

    #[tokio::test]
    async fn empty_response_text_falls_back() {
        let f = fixture().await;
        f.outbox.attach("acme", "support").await;
        f.store
            .set_merge(
                &turn_path(),
                ready_turn(json!({"modality": "text", "text": "   "})),
            )
            .await
            .unwrap();

        wait_until(|| async { turn_status(&f.store, &turn_path()).await == "delivered" }).await;
        let client = f.factory.client(&f.key).unwrap();
        assert_eq!(client.sent_messages().await[0].body, "Mensaje listo.");
    }

    #[tokio::test]
    async fn voice_response_goes_out_as_voice_note() {
        let f = fixture().await;
        f.outbox.attach("acme", "support").await;
        f.store
            .set_merge(
                &turn_path(),
                ready_turn(json!({
                    "modality": "voice",
                    "text": "aquí tienes",
                    "audio": {"url": "https://cdn.example/reply.ogg"}
                })),
            )
            .await
            .unwrap();

        wait_until(|| async { turn_status(&f.store, &turn_path()).await == "delivered" }).await;
        let client = f.factory.client(&f.key).unwrap();
        let sent = client.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_media);
        assert!(sent[0].as_voice);
        assert_eq!(sent[0].body, "https://cdn.example/reply.ogg");
        assert_eq!(sent[0].caption.as_deref(), Some("aquí tienes"));
    }

    #[tokio::test]
    async fn policy_deny_skips_without_sending() {
        let f = fixture().await;
        f.store
            .set_merge(
                "accounts/acme/sessions/support/threads/521@c.us/settings/__root__",
                json!({"botEnabled": false}),
            )
            .await
            .unwrap();

        f.outbox.attach("acme", "support").await;
        f.store
            .set_merge(
                &turn_path(),
                ready_turn(json!({"modality": "text", "text": "ok"})),
            )
            .await
            .unwrap();

        wait_until(|| async { turn_status(&f.store, &turn_path()).await == "skipped" }).await;
        let doc = f.store.get(&turn_path()).await.unwrap().unwrap();
        assert!(doc["skippedAt"].as_i64().unwrap() > 0);
        assert!(doc.get("waMessageId").is_none() || doc["waMessageId"].is_null());
        let client = f.factory.client(&f.key).unwrap();
        assert_eq!(client.sent_count().await, 0);
    }

    #[tokio::test]
    async fn send_failure_is_terminal_error() {
        let f = fixture().await;
        let client = f.factory.client(&f.key).unwrap();
        client.fail_sends(true);

        f.outbox.attach("acme", "support").await;
        f.store
            .set_merge(
                &turn_path(),
                ready_turn(json!({"modality": "text", "text": "ok"})),
            )
            .await
            .unwrap();

        wait_until(|| async { turn_status(&f.store, &turn_path()).await == "error" }).await;
        let doc = f.store.get(&turn_path()).await.unwrap().unwrap();
        assert_eq!(doc["error"]["stage"], "send");
        assert!(doc["error"]["detail"]
            .as_str()
            .unwrap()
            .contains("scripted send failure"));
        assert!(doc.get("waMessageId").is_none() || doc["waMessageId"].is_null());
    }

    #[tokio::test]
    async fn malformed_meta_records_validate_error() {
        let f = fixture().await;
        f.outbox.attach("acme", "support").await;

        // Shaped like a ready turn for this session, but the document is
        // missing required fields and cannot validate.
        f.store
            .set_merge(
                &turn_path(),
                json!({
                    "status": "ready",
                    "meta": {"accountId": "acme", "label": "support"}
                }),
            )
            .await
            .unwrap();

        wait_until(|| async { turn_status(&f.store, &turn_path()).await == "error" }).await;
        let doc = f.store.get(&turn_path()).await.unwrap().unwrap();
        assert_eq!(doc["error"]["stage"], "validate");
    }

    #[tokio::test]
    async fn concurrent_watchers_deliver_exactly_once() {
        let f = fixture().await;
        let second = OutboxWatcher::new(
            f.store.clone(),
            Arc::new(PolicyCache::with_ttl(f.store.clone(), 0)),
            f.supervisor.clone(),
            "Mensaje listo.".to_string(),
        );

        f.outbox.attach("acme", "support").await;
        second.attach("acme", "support").await;

        f.store
            .set_merge(
                &turn_path(),
                ready_turn(json!({"modality": "text", "text": "ok"})),
            )
            .await
            .unwrap();

        wait_until(|| async { turn_status(&f.store, &turn_path()).await == "delivered" }).await;
        // Give the losing watcher time to (not) act.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let client = f.factory.client(&f.key).unwrap();
        assert_eq!(client.sent_count().await, 1, "exactly one delivery");
        assert_eq!(turn_status(&f.store, &turn_path()).await, "delivered");
    }

    #[tokio::test]
    async fn detach_stops_processing() {
        let f = fixture().await;
        f.outbox.attach("acme", "support").await;
        assert_eq!(f.outbox.active_watches().await, 1);

        f.outbox.detach("acme", "support").await;
        assert_eq!(f.outbox.active_watches().await, 0);

        f.store
            .set_merge(
                &turn_path(),
                ready_turn(json!({"modality": "text", "text": "ok"})),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(turn_status(&f.store, &turn_path()).await, "ready");
    }
}
