// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-chat debounced aggregation of inbound messages into turns.
//!
//! Every inbound human message lands in a per-(account, label, chat) buffer.
//! Each push re-arms the flush timer; a finalizer phrase flushes immediately.
//! On flush the buffer entry is removed from the map *before* the store
//! write, so a racing push opens a fresh window with a new `openedAt`.
//!
//! Locking discipline: the buffer map lock is never held across an await.
//! Policy checks and media uploads happen before the lock is taken.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use warelay_config::model::BotConfig;
use warelay_core::normalize::now_ms;
use warelay_core::paths;
use warelay_core::types::{Event, TurnItem};
use warelay_core::{DocumentStore, InboundVoiceRef, MediaStore};

use crate::assembler;
use crate::policy::{PolicyCache, ProcessCheck};

/// Sweep cadence for idle buffers.
const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Message types that carry a voice recording.
const VOICE_TYPES: &[&str] = &["ptt", "audio", "voice"];

/// Buffer key: one chat within one session.
type BufferKey = (String, String, String);

struct BufferState {
    items: Vec<TurnItem>,
    opened_at: i64,
    last_at: i64,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    policy: Arc<PolicyCache>,
    media: Arc<dyn MediaStore>,
    config: BotConfig,
    buffers: Mutex<HashMap<BufferKey, BufferState>>,
}

/// Owns every per-chat buffer and their debounce timers.
#[derive(Clone)]
pub struct BufferManager {
    inner: Arc<Inner>,
}

impl BufferManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        policy: Arc<PolicyCache>,
        media: Arc<dyn MediaStore>,
        config: BotConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                policy,
                media,
                config,
                buffers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Feed one supervisor event into the pipeline.
    ///
    /// Only inbound (`fromMe=false`) `message` events are buffered; everything
    /// else is ignored here.
    pub async fn handle_event(&self, event: &Event) {
        let Event::Message {
            scope,
            id,
            chat_id,
            from_me,
            body,
            message_type,
            has_media,
            wa_timestamp,
            ..
        } = event
        else {
            return;
        };
        if *from_me {
            return;
        }

        let account_id = scope.account_id.clone();
        let label = scope.session_id.clone();
        let allowed = self
            .inner
            .policy
            .allow_process(ProcessCheck {
                account_id: &account_id,
                label: &label,
                chat_id,
                sender_wa_id: Some(chat_id),
            })
            .await;
        if !allowed {
            debug!(
                account_id = %account_id,
                label = %label,
                chat_id = %chat_id,
                "inbound dropped by policy"
            );
            return;
        }

        let ts = *wa_timestamp;
        let mut new_items = Vec::new();

        if *has_media && VOICE_TYPES.contains(&message_type.as_str()) {
            match self
                .inner
                .media
                .save_inbound_voice(&InboundVoiceRef {
                    account_id: account_id.clone(),
                    label: label.clone(),
                    chat_id: chat_id.clone(),
                    message_id: id.clone(),
                    wa_timestamp_ms: ts,
                })
                .await
            {
                Ok(saved) => new_items.push(TurnItem::Voice {
                    ts,
                    gcs_uri: saved.gcs_uri,
                    content_type: saved.content_type,
                    filename: saved.filename,
                }),
                Err(e) => {
                    // The text part (if any) still goes through.
                    warn!(
                        account_id = %account_id,
                        label = %label,
                        chat_id = %chat_id,
                        message_id = %id,
                        error = %e,
                        "voice persist failed; continuing without item"
                    );
                }
            }
        }

        if !body.is_empty() {
            new_items.push(TurnItem::Text {
                ts,
                text: body.clone(),
            });
        }

        if new_items.is_empty() {
            return;
        }

        let key: BufferKey = (account_id, label, chat_id.clone());
        let is_finalizer = self.matches_finalizer(body);
        self.push(key, new_items, ts, is_finalizer).await;
    }

    /// Append items and re-arm the flush timer. Lock is released before the
    /// timer's own flush ever runs.
    async fn push(&self, key: BufferKey, items: Vec<TurnItem>, ts: i64, is_finalizer: bool) {
        let delay = {
            let mut buffers = self.inner.buffers.lock().await;
            let state = buffers.entry(key.clone()).or_insert_with(|| BufferState {
                items: Vec::new(),
                opened_at: 0,
                last_at: 0,
                timer: None,
            });

            if state.opened_at == 0 {
                state.opened_at = ts;
            }
            state.items.extend(items);
            state.last_at = ts;

            if let Some(timer) = state.timer.take() {
                timer.abort();
            }

            let mut delay_ms = if is_finalizer {
                0
            } else {
                self.inner.config.debounce_ms
            };
            if self.inner.config.hard_cap_ms > 0 {
                let elapsed = (now_ms() - state.opened_at).max(0) as u64;
                let remaining = self.inner.config.hard_cap_ms.saturating_sub(elapsed);
                delay_ms = delay_ms.min(remaining);
            }

            let manager = self.clone();
            let timer_key = key.clone();
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                manager.flush(&timer_key).await;
            }));
            delay_ms
        };
        debug!(
            account_id = %key.0,
            label = %key.1,
            chat_id = %key.2,
            delay_ms = delay,
            "buffer armed"
        );
    }

    /// Commit one buffer as a `pending` turn.
    ///
    /// The entry is removed from the map first; a write failure drops the
    /// window (logged) rather than wedging the chat.
    pub async fn flush(&self, key: &BufferKey) {
        let state = { self.inner.buffers.lock().await.remove(key) };
        let Some(state) = state else {
            return;
        };
        if state.items.is_empty() {
            return;
        }

        let (account_id, label, chat_id) = key;
        let Some(turn) = assembler::assemble(
            account_id,
            label,
            chat_id,
            state.items,
            &self.inner.config.voice_phrases,
            &self.inner.config.text_phrases,
        ) else {
            return;
        };

        let path = paths::turn(account_id, label, chat_id, &turn.meta.window_id);
        let doc = match serde_json::to_value(&turn) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path, error = %e, "turn serialization failed; window dropped");
                return;
            }
        };
        match self.inner.store.set_merge(&path, doc).await {
            Ok(()) => debug!(
                window_id = %turn.meta.window_id,
                items = turn.items.len(),
                "turn committed"
            ),
            Err(e) => warn!(
                window_id = %turn.meta.window_id,
                error = %e,
                "turn write failed; window dropped"
            ),
        }
    }

    /// Drop every buffer belonging to one session, cancelling their flushes.
    pub async fn drop_session(&self, account_id: &str, label: &str) {
        let mut buffers = self.inner.buffers.lock().await;
        buffers.retain(|key, state| {
            let keep = !(key.0 == account_id && key.1 == label);
            if !keep {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
            }
            keep
        });
    }

    /// Remove buffers idle longer than `gc_idle_ms`. Returns how many were dropped.
    pub async fn gc_sweep(&self) -> usize {
        let cutoff = now_ms() - self.inner.config.gc_idle_ms as i64;
        let mut buffers = self.inner.buffers.lock().await;
        let before = buffers.len();
        buffers.retain(|_, state| {
            let keep = state.last_at >= cutoff;
            if !keep {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
            }
            keep
        });
        before - buffers.len()
    }

    /// Run the periodic idle sweep until cancelled.
    pub fn spawn_gc(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(GC_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let dropped = manager.gc_sweep().await;
                        if dropped > 0 {
                            debug!(dropped, "buffer gc sweep");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    /// Number of open buffers (test observability).
    pub async fn open_buffers(&self) -> usize {
        self.inner.buffers.lock().await.len()
    }

    fn matches_finalizer(&self, body: &str) -> bool {
        if body.is_empty() {
            return false;
        }
        let haystack = body.to_lowercase();
        self.inner
            .config
            .finalizer_words
            .iter()
            .any(|w| !w.is_empty() && haystack.contains(&w.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use warelay_core::types::EventScope;
    use warelay_store::SqliteStore;
    use warelay_test_utils::MockMedia;

    fn config(debounce_ms: u64) -> BotConfig {
        BotConfig {
            debounce_ms,
            ..BotConfig::default()
        }
    }

    async fn manager(
        debounce_ms: u64,
    ) -> (BufferManager, Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("buffer.db");
        let store = Arc::new(SqliteStore::open(path.to_str().unwrap(), true).await.unwrap());
        let policy = Arc::new(PolicyCache::with_ttl(store.clone(), 0));
        let media = Arc::new(MockMedia::new());
        (
            BufferManager::new(store.clone(), policy, media, config(debounce_ms)),
            store,
            dir,
        )
    }

    fn inbound(chat_id: &str, body: &str, ts: i64) -> Event {
        Event::Message {
            scope: EventScope {
                ts,
                account_id: "acme".into(),
                session_id: "support".into(),
                wa_id: None,
            },
            id: format!("m-{ts}"),
            chat_id: chat_id.into(),
            from_me: false,
            body: body.into(),
            message_type: "chat".into(),
            has_media: false,
            wa_timestamp: ts,
            media_url_path: None,
        }
    }

    fn voice_inbound(chat_id: &str, ts: i64) -> Event {
        Event::Message {
            scope: EventScope {
                ts,
                account_id: "acme".into(),
                session_id: "support".into(),
                wa_id: None,
            },
            id: format!("v-{ts}"),
            chat_id: chat_id.into(),
            from_me: false,
            body: String::new(),
            message_type: "ptt".into(),
            has_media: true,
            wa_timestamp: ts,
            media_url_path: Some("/v1/accounts/acme/sessions/support/media/v".into()),
        }
    }

    async fn ready_turns(store: &SqliteStore) -> Vec<warelay_core::Document> {
        store.query_group("turns", &[]).await.unwrap()
    }

    #[tokio::test]
    async fn finalizer_flushes_immediately_and_merges_burst() {
        let (manager, store, _dir) = manager(30_000).await;

        manager.handle_event(&inbound("521@c.us", "hola", 1_000)).await;
        manager
            .handle_event(&inbound("521@c.us", "tengo una", 5_000))
            .await;
        manager
            .handle_event(&inbound("521@c.us", "duda gracias", 9_000))
            .await;

        // "gracias" is a finalizer: the flush timer fired with zero delay.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let turns = ready_turns(&store).await;
        assert_eq!(turns.len(), 1);
        let doc = &turns[0].data;
        assert_eq!(doc["status"], "pending");
        assert_eq!(doc["openedAt"], 1_000);
        assert_eq!(doc["closedAt"], 9_000);
        assert_eq!(doc["items"].as_array().unwrap().len(), 1);
        assert_eq!(doc["items"][0]["text"], "hola tengo una duda gracias");
        assert_eq!(doc["hints"]["lang"], "es-MX");
        assert_eq!(doc["meta"]["windowId"], "acme.support.521@c.us.1000");
        assert_eq!(manager.open_buffers().await, 0);
    }

    #[tokio::test]
    async fn debounce_holds_until_quiet() {
        let (manager, store, _dir) = manager(300).await;

        manager.handle_event(&inbound("521@c.us", "hola", 1_000)).await;
        // Before the debounce elapses nothing is written.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ready_turns(&store).await.is_empty());
        assert_eq!(manager.open_buffers().await, 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(ready_turns(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn repush_rearms_the_timer() {
        let (manager, store, _dir) = manager(300).await;

        manager.handle_event(&inbound("521@c.us", "uno", 1_000)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        manager.handle_event(&inbound("521@c.us", "dos", 2_000)).await;
        // 200ms after the first push the original timer would have fired at
        // 300ms; the second push reset it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(ready_turns(&store).await.is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;
        let turns = ready_turns(&store).await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].data["items"][0]["text"], "uno dos");
    }

    #[tokio::test]
    async fn voice_and_text_keep_arrival_order() {
        let (manager, store, _dir) = manager(100).await;

        manager
            .handle_event(&inbound("521@c.us", "escúchame", 1_000))
            .await;
        manager.handle_event(&voice_inbound("521@c.us", 2_000)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let turns = ready_turns(&store).await;
        assert_eq!(turns.len(), 1);
        let items = turns[0].data["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["type"], "text");
        assert_eq!(items[1]["type"], "voice");
        assert!(items[1]["gcsUri"].as_str().unwrap().starts_with("gs://"));
        assert_eq!(turns[0].data["hints"]["lastInbound"], "voice");
    }

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let (manager, store, _dir) = manager(50).await;
        let mut event = inbound("521@c.us", "hola", 1_000);
        if let Event::Message { from_me, .. } = &mut event {
            *from_me = true;
        }
        manager.handle_event(&event).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(ready_turns(&store).await.is_empty());
        assert_eq!(manager.open_buffers().await, 0);
    }

    #[tokio::test]
    async fn policy_denied_messages_never_buffer() {
        let (manager, store, _dir) = manager(50).await;
        store
            .set_merge(
                "accounts/acme/sessions/support",
                serde_json::json!({"bot": {"enabled": false}}),
            )
            .await
            .unwrap();

        manager.handle_event(&inbound("521@c.us", "hola", 1_000)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(ready_turns(&store).await.is_empty());
    }

    #[tokio::test]
    async fn next_window_opens_fresh_after_flush() {
        let (manager, store, _dir) = manager(100).await;

        manager.handle_event(&inbound("521@c.us", "primero", 1_000)).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        manager.handle_event(&inbound("521@c.us", "segundo", 9_000)).await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        let turns = ready_turns(&store).await;
        assert_eq!(turns.len(), 2);
        let mut window_ids: Vec<&str> = turns
            .iter()
            .map(|t| t.data["meta"]["windowId"].as_str().unwrap())
            .collect();
        window_ids.sort();
        assert_eq!(
            window_ids,
            vec!["acme.support.521@c.us.1000", "acme.support.521@c.us.9000"]
        );
    }

    #[tokio::test]
    async fn drop_session_cancels_pending_flush() {
        let (manager, store, _dir) = manager(200).await;
        manager.handle_event(&inbound("521@c.us", "hola", 1_000)).await;
        manager.drop_session("acme", "support").await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(ready_turns(&store).await.is_empty());
        assert_eq!(manager.open_buffers().await, 0);
    }

    #[tokio::test]
    async fn gc_sweep_drops_idle_buffers() {
        let (manager, _store, _dir) = manager(600_000).await;
        manager
            .handle_event(&inbound("521@c.us", "hola", now_ms()))
            .await;
        assert_eq!(manager.open_buffers().await, 1);

        // Nothing is stale yet (default idle threshold is 30 minutes).
        assert_eq!(manager.gc_sweep().await, 0);

        // A manager with a zero idle threshold treats everything as stale.
        let zero_idle = BufferManager::new(
            manager.inner.store.clone(),
            manager.inner.policy.clone(),
            manager.inner.media.clone(),
            BotConfig {
                gc_idle_ms: 0,
                ..config(600_000)
            },
        );
        zero_idle
            .handle_event(&inbound("9@c.us", "hola", now_ms() - 10))
            .await;
        assert_eq!(zero_idle.gc_sweep().await, 1);
        assert_eq!(zero_idle.open_buffers().await, 0);
    }
}
