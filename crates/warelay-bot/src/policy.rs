// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-through policy cache with three lanes: session view, chat view,
//! and the account's own platform ids (loop prevention).
//!
//! Entries live for 60 seconds; a stale view may let one extra message
//! through right after a config flip, which is accepted. Store read
//! failures are never cached and deny both processing and sending.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use warelay_core::normalize::now_ms;
use warelay_core::paths;
use warelay_core::types::{PolicyChatView, PolicyMode, PolicyView, SessionKey};
use warelay_core::{DocumentStore, WarelayError};

/// Default per-entry TTL.
const POLICY_TTL_MS: i64 = 60_000;

struct CachedEntry<T> {
    value: T,
    fetched_at: i64,
}

/// Inputs for a processing decision.
#[derive(Debug, Clone)]
pub struct ProcessCheck<'a> {
    pub account_id: &'a str,
    pub label: &'a str,
    pub chat_id: &'a str,
    /// Platform id of the sender, for bot-to-bot loop detection.
    pub sender_wa_id: Option<&'a str>,
}

/// Cached read-through over per-session and per-chat bot policy.
pub struct PolicyCache {
    store: Arc<dyn DocumentStore>,
    ttl_ms: i64,
    sessions: DashMap<SessionKey, CachedEntry<PolicyView>>,
    chats: DashMap<(String, String, String), CachedEntry<PolicyChatView>>,
    self_ids: DashMap<String, CachedEntry<HashSet<String>>>,
}

impl PolicyCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_ttl(store, POLICY_TTL_MS)
    }

    /// Custom TTL, for tests and tuning.
    pub fn with_ttl(store: Arc<dyn DocumentStore>, ttl_ms: i64) -> Self {
        Self {
            store,
            ttl_ms,
            sessions: DashMap::new(),
            chats: DashMap::new(),
            self_ids: DashMap::new(),
        }
    }

    /// Whether an inbound message may enter the buffer pipeline.
    ///
    /// Fail-closed: a store read error denies.
    pub async fn allow_process(&self, check: ProcessCheck<'_>) -> bool {
        match self.evaluate(&check, true).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(
                    account_id = check.account_id,
                    label = check.label,
                    chat_id = check.chat_id,
                    error = %e,
                    "policy read failed; denying process"
                );
                false
            }
        }
    }

    /// Whether a reply may be dispatched to the chat.
    ///
    /// Same as [`allow_process`](Self::allow_process) minus the self-id check.
    pub async fn allow_send(&self, account_id: &str, label: &str, chat_id: &str) -> bool {
        let check = ProcessCheck {
            account_id,
            label,
            chat_id,
            sender_wa_id: None,
        };
        match self.evaluate(&check, false).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(
                    account_id,
                    label,
                    chat_id,
                    error = %e,
                    "policy read failed; denying send"
                );
                false
            }
        }
    }

    async fn evaluate(
        &self,
        check: &ProcessCheck<'_>,
        check_self: bool,
    ) -> Result<bool, WarelayError> {
        let session = self
            .session_view(check.account_id, check.label)
            .await?;
        if !session.enabled {
            return Ok(false);
        }

        if check_self && !session.receive_from_bots {
            if let Some(sender) = check.sender_wa_id {
                let own = self.account_self_ids(check.account_id).await?;
                if own.contains(sender) {
                    return Ok(false);
                }
            }
        }

        let chat_allowed = match session.mode {
            PolicyMode::All => true,
            PolicyMode::Allowlist => session.allowlist.iter().any(|c| c == check.chat_id),
            PolicyMode::Blocklist => !session.blocklist.iter().any(|c| c == check.chat_id),
        };
        if !chat_allowed {
            return Ok(false);
        }

        let chat = self
            .chat_view(check.account_id, check.label, check.chat_id)
            .await?;
        if chat.bot_enabled == Some(false) {
            return Ok(false);
        }

        Ok(true)
    }

    /// The session policy lane, reading `sessions/{label}.bot` plus `waId`.
    pub async fn session_view(
        &self,
        account_id: &str,
        label: &str,
    ) -> Result<PolicyView, WarelayError> {
        let key = SessionKey::new(account_id, label);
        if let Some(entry) = self.sessions.get(&key) {
            if entry.fetched_at + self.ttl_ms > now_ms() {
                return Ok(entry.value.clone());
            }
        }

        let doc = self.store.get(&paths::session(account_id, label)).await?;
        let mut view: PolicyView = doc
            .as_ref()
            .and_then(|d| d.get("bot"))
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| WarelayError::Store {
                source: Box::new(e),
            })?
            .unwrap_or_default();
        view.self_wa_id = doc
            .as_ref()
            .and_then(|d| d.get("waId"))
            .and_then(Value::as_str)
            .map(str::to_string);

        self.sessions.insert(
            key,
            CachedEntry {
                value: view.clone(),
                fetched_at: now_ms(),
            },
        );
        Ok(view)
    }

    /// The chat policy lane. The `settings/__root__` doc wins; thread-doc
    /// fields are the fallback for older writers.
    pub async fn chat_view(
        &self,
        account_id: &str,
        label: &str,
        chat_id: &str,
    ) -> Result<PolicyChatView, WarelayError> {
        let key = (
            account_id.to_string(),
            label.to_string(),
            chat_id.to_string(),
        );
        if let Some(entry) = self.chats.get(&key) {
            if entry.fetched_at + self.ttl_ms > now_ms() {
                return Ok(entry.value.clone());
            }
        }

        let settings = self
            .store
            .get(&paths::thread_settings(account_id, label, chat_id))
            .await?;
        let source = match settings {
            Some(doc) => Some(doc),
            None => {
                self.store
                    .get(&paths::thread(account_id, label, chat_id))
                    .await?
            }
        };
        let view: PolicyChatView = source
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or_default()
            .unwrap_or_default();

        self.chats.insert(
            key,
            CachedEntry {
                value: view.clone(),
                fetched_at: now_ms(),
            },
        );
        Ok(view)
    }

    /// Every `waId` across the account's sessions.
    pub async fn account_self_ids(
        &self,
        account_id: &str,
    ) -> Result<HashSet<String>, WarelayError> {
        if let Some(entry) = self.self_ids.get(account_id) {
            if entry.fetched_at + self.ttl_ms > now_ms() {
                return Ok(entry.value.clone());
            }
        }

        let docs = self.store.list(&paths::sessions_prefix(account_id)).await?;
        let ids: HashSet<String> = docs
            .iter()
            .filter_map(|d| d.data.get("waId").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        self.self_ids.insert(
            account_id.to_string(),
            CachedEntry {
                value: ids.clone(),
                fetched_at: now_ms(),
            },
        );
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use warelay_store::SqliteStore;

    async fn cache_with_ttl(ttl_ms: i64) -> (PolicyCache, Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.db");
        let store = Arc::new(SqliteStore::open(path.to_str().unwrap(), true).await.unwrap());
        (
            PolicyCache::with_ttl(store.clone(), ttl_ms),
            store,
            dir,
        )
    }

    fn check<'a>(chat_id: &'a str, sender: Option<&'a str>) -> ProcessCheck<'a> {
        ProcessCheck {
            account_id: "acme",
            label: "support",
            chat_id,
            sender_wa_id: sender,
        }
    }

    #[tokio::test]
    async fn missing_docs_default_to_allow() {
        let (cache, _store, _dir) = cache_with_ttl(0).await;
        assert!(cache.allow_process(check("521@c.us", None)).await);
        assert!(cache.allow_send("acme", "support", "521@c.us").await);
    }

    #[tokio::test]
    async fn disabled_session_denies_everything() {
        let (cache, store, _dir) = cache_with_ttl(0).await;
        store
            .set_merge(
                "accounts/acme/sessions/support",
                json!({"bot": {"enabled": false}}),
            )
            .await
            .unwrap();
        assert!(!cache.allow_process(check("521@c.us", None)).await);
        assert!(!cache.allow_send("acme", "support", "521@c.us").await);
    }

    #[tokio::test]
    async fn own_wa_id_is_blocked_unless_opted_in() {
        let (cache, store, _dir) = cache_with_ttl(0).await;
        store
            .set_merge(
                "accounts/acme/sessions/other",
                json!({"waId": "111@c.us"}),
            )
            .await
            .unwrap();

        // Loop prevention applies to processing...
        assert!(!cache.allow_process(check("c", Some("111@c.us"))).await);
        // ...but never to sending.
        assert!(cache.allow_send("acme", "support", "111@c.us").await);

        // Opting in to bot-to-bot traffic lifts the block.
        store
            .set_merge(
                "accounts/acme/sessions/support",
                json!({"bot": {"receiveFromBots": true}}),
            )
            .await
            .unwrap();
        assert!(cache.allow_process(check("c", Some("111@c.us"))).await);
    }

    #[tokio::test]
    async fn allowlist_mode_only_passes_listed_chats() {
        let (cache, store, _dir) = cache_with_ttl(0).await;
        store
            .set_merge(
                "accounts/acme/sessions/support",
                json!({"bot": {"mode": "allowlist", "allowlist": ["vip@c.us"]}}),
            )
            .await
            .unwrap();
        assert!(cache.allow_process(check("vip@c.us", None)).await);
        assert!(!cache.allow_process(check("other@c.us", None)).await);
    }

    #[tokio::test]
    async fn blocklist_mode_rejects_listed_chats() {
        let (cache, store, _dir) = cache_with_ttl(0).await;
        store
            .set_merge(
                "accounts/acme/sessions/support",
                json!({"bot": {"mode": "blocklist", "blocklist": ["spam@c.us"]}}),
            )
            .await
            .unwrap();
        assert!(!cache.allow_process(check("spam@c.us", None)).await);
        assert!(cache.allow_process(check("ok@c.us", None)).await);
    }

    #[tokio::test]
    async fn chat_toggle_wins_over_session_default() {
        let (cache, store, _dir) = cache_with_ttl(0).await;
        store
            .set_merge(
                "accounts/acme/sessions/support/threads/muted@c.us/settings/__root__",
                json!({"botEnabled": false}),
            )
            .await
            .unwrap();
        assert!(!cache.allow_process(check("muted@c.us", None)).await);
        assert!(!cache.allow_send("acme", "support", "muted@c.us").await);
        assert!(cache.allow_process(check("other@c.us", None)).await);
    }

    #[tokio::test]
    async fn thread_doc_fallback_is_honored() {
        let (cache, store, _dir) = cache_with_ttl(0).await;
        store
            .set_merge(
                "accounts/acme/sessions/support/threads/legacy@c.us",
                json!({"botEnabled": false, "preferredModality": "voice"}),
            )
            .await
            .unwrap();
        let view = cache
            .chat_view("acme", "support", "legacy@c.us")
            .await
            .unwrap();
        assert_eq!(view.bot_enabled, Some(false));
    }

    #[tokio::test]
    async fn stale_entry_permits_until_ttl_expires() {
        let (cache, store, _dir) = cache_with_ttl(60_000).await;

        // Prime the cache with the permissive default.
        assert!(cache.allow_process(check("c@c.us", None)).await);

        // Flip the toggle; the cached view still allows.
        store
            .set_merge(
                "accounts/acme/sessions/support",
                json!({"bot": {"enabled": false}}),
            )
            .await
            .unwrap();
        assert!(cache.allow_process(check("c@c.us", None)).await);

        // A zero-TTL cache sees the flip at once.
        let fresh = PolicyCache::with_ttl(store.clone(), 0);
        assert!(!fresh.allow_process(check("c@c.us", None)).await);
    }
}
