// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle supervisor for per-(account, label) chat sessions.
//!
//! One platform client per session key. Each client's raw event feed is
//! pumped by its own task, normalized into the unified [`Event`] stream,
//! and mirrored into the session registry. Event delivery is fire-and-forget
//! over a broadcast channel; a slow subscriber lags and drops, it never
//! blocks the emitter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use warelay_config::model::SessionConfig;
use warelay_core::normalize::{coerce_timestamp_ms, normalize_chat_id, now_ms};
use warelay_core::types::{Event, EventScope, SessionKey, SessionStatus};
use warelay_core::{
    ClientEvent, DownloadedMedia, MediaPayload, PlatformClient, PlatformFactory,
    PlatformMessage, SendOptions, WarelayError,
};
use warelay_store::SessionRegistry;

use crate::media_cache::{MediaCache, MediaKey};

/// Capacity of the unified event stream.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Snapshot row returned by [`SessionSupervisor::list_running`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningSession {
    pub account_id: String,
    pub label: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wa_id: Option<String>,
    pub has_qr: bool,
}

struct SessionState {
    client: Arc<dyn PlatformClient>,
    status: SessionStatus,
    qr: Option<String>,
    wa_id: Option<String>,
    pump: JoinHandle<()>,
}

/// Supervises every running platform client and owns the unified event bus.
pub struct SessionSupervisor {
    factory: Arc<dyn PlatformFactory>,
    registry: SessionRegistry,
    media_cache: MediaCache,
    auth_root: PathBuf,
    sessions: Arc<Mutex<HashMap<SessionKey, SessionState>>>,
    events_tx: broadcast::Sender<Event>,
}

impl SessionSupervisor {
    pub fn new(
        factory: Arc<dyn PlatformFactory>,
        registry: SessionRegistry,
        config: &SessionConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            factory,
            registry,
            media_cache: MediaCache::new(config.media_ttl_ms),
            auth_root: PathBuf::from(&config.auth_dir),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
        }
    }

    /// Subscribe to the unified event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// The media cache backing `download_message_media`.
    pub fn media_cache(&self) -> &MediaCache {
        &self.media_cache
    }

    /// Start a session, or report its status if one is already running.
    ///
    /// Idempotent: concurrent inits for the same key coalesce on the session
    /// map lock and the loser just reads the winner's status.
    pub async fn init(
        &self,
        account_id: &str,
        label: &str,
    ) -> Result<SessionStatus, WarelayError> {
        let key = SessionKey::new(account_id, label);
        let client = {
            let mut sessions = self.sessions.lock().await;
            if let Some(state) = sessions.get(&key) {
                debug!(session = %key, status = %state.status, "init coalesced");
                return Ok(state.status);
            }

            let auth_dir = self.auth_root.join(key.auth_dir_name());
            let (client, rx) = self.factory.create(&key, &auth_dir)?;
            let pump = tokio::spawn(Self::pump_events(
                self.sessions.clone(),
                key.clone(),
                rx,
                self.events_tx.clone(),
                self.registry.clone(),
                self.media_cache.clone(),
            ));
            sessions.insert(
                key.clone(),
                SessionState {
                    client: client.clone(),
                    status: SessionStatus::Starting,
                    qr: None,
                    wa_id: None,
                    pump,
                },
            );
            client
        };

        if let Err(e) = self.registry.record_created(&key).await {
            warn!(session = %key, error = %e, "failed to persist session creation");
        }

        info!(session = %key, "session starting");
        if let Err(e) = client.initialize().await {
            error!(session = %key, error = %e, "client initialization failed");
            self.set_status(&key, SessionStatus::Error).await;
            self.emit(Event::Error {
                scope: self.scope_for(&key).await,
                err: e.to_string(),
            });
            return Err(e);
        }

        Ok(SessionStatus::Starting)
    }

    /// Gracefully terminate a session's client. The session stays listed
    /// with status `stopped`; its auth state stays on disk.
    pub async fn stop(&self, account_id: &str, label: &str) -> Result<SessionStatus, WarelayError> {
        let key = SessionKey::new(account_id, label);
        let client = {
            let mut sessions = self.sessions.lock().await;
            let state = sessions.get_mut(&key).ok_or_else(|| {
                WarelayError::SessionNotFound {
                    account_id: key.account_id.clone(),
                    label: key.label.clone(),
                }
            })?;
            state.pump.abort();
            state.status = SessionStatus::Stopped;
            state.qr = None;
            state.client.clone()
        };

        if let Err(e) = client.destroy().await {
            warn!(session = %key, error = %e, "client destroy during stop failed");
        }
        if let Err(e) = self.registry.record_status(&key, SessionStatus::Stopped).await {
            warn!(session = %key, error = %e, "failed to persist stopped status");
        }
        self.emit(Event::Stopped {
            scope: self.scope_for(&key).await,
        });
        info!(session = %key, "session stopped");
        Ok(SessionStatus::Stopped)
    }

    /// Logout, terminate, and purge the session's on-disk auth state.
    pub async fn destroy(&self, account_id: &str, label: &str) -> Result<(), WarelayError> {
        let key = SessionKey::new(account_id, label);
        let scope = self.scope_for(&key).await;
        let state = { self.sessions.lock().await.remove(&key) };

        if let Some(state) = state {
            state.pump.abort();
            if let Err(e) = state.client.logout().await {
                warn!(session = %key, error = %e, "logout during destroy failed");
            }
            if let Err(e) = state.client.destroy().await {
                warn!(session = %key, error = %e, "client destroy failed");
            }
        }

        self.media_cache.purge_session(&key.account_id, &key.label);

        let auth_dir = self.auth_root.join(key.auth_dir_name());
        match tokio::fs::remove_dir_all(&auth_dir).await {
            Ok(()) => debug!(session = %key, "auth directory purged"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(session = %key, error = %e, "auth directory purge failed"),
        }

        if let Err(e) = self.registry.remove(&key).await {
            warn!(session = %key, error = %e, "failed to remove session doc");
        }
        self.emit(Event::Destroyed { scope });
        info!(session = %key, "session destroyed");
        Ok(())
    }

    /// Current status of a session, if running.
    pub async fn status(&self, account_id: &str, label: &str) -> Option<SessionStatus> {
        let key = SessionKey::new(account_id, label);
        self.sessions.lock().await.get(&key).map(|s| s.status)
    }

    /// Last QR challenge, while the session is scanning.
    pub async fn qr(&self, account_id: &str, label: &str) -> Option<String> {
        let key = SessionKey::new(account_id, label);
        self.sessions.lock().await.get(&key).and_then(|s| s.qr.clone())
    }

    /// Snapshot of in-memory sessions, optionally scoped to one account.
    pub async fn list_running(&self, account_id: Option<&str>) -> Vec<RunningSession> {
        let sessions = self.sessions.lock().await;
        let mut out: Vec<RunningSession> = sessions
            .iter()
            .filter(|(key, _)| account_id.is_none_or(|aid| key.account_id == aid))
            .map(|(key, state)| RunningSession {
                account_id: key.account_id.clone(),
                label: key.label.clone(),
                status: state.status,
                wa_id: state.wa_id.clone(),
                has_qr: state.qr.is_some(),
            })
            .collect();
        out.sort_by(|a, b| (&a.account_id, &a.label).cmp(&(&b.account_id, &b.label)));
        out
    }

    /// Re-init every session found on disk that is not already running.
    /// Returns how many sessions were started.
    pub async fn restore_all_from_fs(&self) -> Result<usize, WarelayError> {
        let mut dir = match tokio::fs::read_dir(&self.auth_root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(WarelayError::Internal(format!(
                    "auth directory scan failed: {e}"
                )))
            }
        };

        let mut restored = 0;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(key) = SessionKey::parse_auth_dir_name(name) else {
                continue;
            };
            if self.status(&key.account_id, &key.label).await.is_some() {
                continue;
            }
            match self.init(&key.account_id, &key.label).await {
                Ok(_) => restored += 1,
                Err(e) => warn!(session = %key, error = %e, "restore failed"),
            }
        }
        info!(restored, "filesystem session restore complete");
        Ok(restored)
    }

    /// Send a text message through a ready session. Emits `sent`.
    pub async fn send_text(
        &self,
        account_id: &str,
        label: &str,
        to: &str,
        text: &str,
    ) -> Result<String, WarelayError> {
        let key = SessionKey::new(account_id, label);
        let client = self.ready_client(&key).await?;
        let chat_id = normalize_chat_id(to);

        let message_id = client.send_text(&chat_id, text).await?;
        let now = now_ms();
        self.emit(Event::Sent {
            scope: self.scope_for(&key).await,
            id: message_id.clone(),
            chat_id,
            body: text.to_string(),
            message_type: "chat".to_string(),
            from_me: true,
            wa_timestamp: now,
        });
        Ok(message_id)
    }

    /// Send a media message through a ready session. Emits `sent`.
    pub async fn send_media(
        &self,
        account_id: &str,
        label: &str,
        to: &str,
        media: MediaPayload,
        options: SendOptions,
    ) -> Result<String, WarelayError> {
        let key = SessionKey::new(account_id, label);
        let client = self.ready_client(&key).await?;
        let chat_id = normalize_chat_id(to);
        let body = options.caption.clone().unwrap_or_default();

        let message_id = client.send_media(&chat_id, media, options).await?;
        let now = now_ms();
        self.emit(Event::Sent {
            scope: self.scope_for(&key).await,
            id: message_id.clone(),
            chat_id,
            body,
            message_type: "media".to_string(),
            from_me: true,
            wa_timestamp: now,
        });
        Ok(message_id)
    }

    /// Pull media bytes for a message still held in the media cache.
    ///
    /// Returns `None` once the 15-minute window has passed.
    pub async fn download_message_media(
        &self,
        account_id: &str,
        label: &str,
        message_id: &str,
    ) -> Result<Option<DownloadedMedia>, WarelayError> {
        let media_key = MediaKey {
            account_id: account_id.to_string(),
            label: label.to_string(),
            message_id: message_id.to_string(),
        };
        if !self.media_cache.contains(&media_key) {
            return Ok(None);
        }

        let key = SessionKey::new(account_id, label);
        let client = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&key)
                .map(|s| s.client.clone())
                .ok_or_else(|| WarelayError::SessionNotFound {
                    account_id: key.account_id.clone(),
                    label: key.label.clone(),
                })?
        };
        client.download_media(message_id).await
    }

    /// Stop every running session (process shutdown).
    pub async fn stop_all(&self) {
        let keys: Vec<SessionKey> = { self.sessions.lock().await.keys().cloned().collect() };
        for key in keys {
            if let Err(e) = self.stop(&key.account_id, &key.label).await {
                warn!(session = %key, error = %e, "stop during shutdown failed");
            }
        }
    }

    async fn ready_client(
        &self,
        key: &SessionKey,
    ) -> Result<Arc<dyn PlatformClient>, WarelayError> {
        let sessions = self.sessions.lock().await;
        let state = sessions
            .get(key)
            .ok_or_else(|| WarelayError::SessionNotFound {
                account_id: key.account_id.clone(),
                label: key.label.clone(),
            })?;
        if state.status != SessionStatus::Ready {
            return Err(WarelayError::NotReady {
                account_id: key.account_id.clone(),
                label: key.label.clone(),
                status: state.status.to_string(),
            });
        }
        Ok(state.client.clone())
    }

    async fn scope_for(&self, key: &SessionKey) -> EventScope {
        let wa_id = {
            let sessions = self.sessions.lock().await;
            sessions.get(key).and_then(|s| s.wa_id.clone())
        };
        EventScope {
            ts: now_ms(),
            account_id: key.account_id.clone(),
            session_id: key.label.clone(),
            wa_id,
        }
    }

    async fn set_status(&self, key: &SessionKey, status: SessionStatus) {
        if let Some(state) = self.sessions.lock().await.get_mut(key) {
            state.status = status;
        }
    }

    fn emit(&self, event: Event) {
        // Fire-and-forget; no subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    /// Per-session task: normalizes raw client events into the unified stream
    /// and mirrors lifecycle transitions into the registry.
    async fn pump_events(
        sessions: Arc<Mutex<HashMap<SessionKey, SessionState>>>,
        key: SessionKey,
        mut rx: mpsc::Receiver<ClientEvent>,
        events_tx: broadcast::Sender<Event>,
        registry: SessionRegistry,
        media_cache: MediaCache,
    ) {
        while let Some(client_event) = rx.recv().await {
            let scope = |wa_id: Option<String>| EventScope {
                ts: now_ms(),
                account_id: key.account_id.clone(),
                session_id: key.label.clone(),
                wa_id,
            };

            match client_event {
                ClientEvent::Qr(qr) => {
                    let wa_id = {
                        let mut map = sessions.lock().await;
                        match map.get_mut(&key) {
                            Some(state) => {
                                state.status = SessionStatus::Scanning;
                                state.qr = Some(qr.clone());
                                state.wa_id.clone()
                            }
                            None => break,
                        }
                    };
                    if let Err(e) = registry.record_status(&key, SessionStatus::Scanning).await {
                        warn!(session = %key, error = %e, "failed to persist scanning status");
                    }
                    let _ = events_tx.send(Event::Qr {
                        scope: scope(wa_id),
                        qr,
                    });
                }
                ClientEvent::Ready { wa_id } => {
                    {
                        let mut map = sessions.lock().await;
                        match map.get_mut(&key) {
                            Some(state) => {
                                state.status = SessionStatus::Ready;
                                state.qr = None;
                                state.wa_id = wa_id.clone();
                            }
                            None => break,
                        }
                    }
                    if let Err(e) = registry.record_ready(&key, wa_id.as_deref()).await {
                        warn!(session = %key, error = %e, "failed to persist ready status");
                    }
                    info!(session = %key, wa_id = wa_id.as_deref().unwrap_or(""), "session ready");
                    let _ = events_tx.send(Event::Ready {
                        scope: scope(wa_id.clone()),
                        self_wa_id: wa_id,
                    });
                }
                ClientEvent::MessageCreate(msg) => {
                    let wa_id = {
                        let map = sessions.lock().await;
                        map.get(&key).and_then(|s| s.wa_id.clone())
                    };
                    let event = normalize_message(&key, &msg, scope(wa_id));
                    if msg.has_media {
                        media_cache.insert(MediaKey {
                            account_id: key.account_id.clone(),
                            label: key.label.clone(),
                            message_id: msg.id.clone(),
                        });
                    }
                    let _ = events_tx.send(event);
                }
                ClientEvent::Disconnected(reason) => {
                    let wa_id = Self::transition(&sessions, &key, SessionStatus::Disconnected).await;
                    if let Err(e) = registry
                        .record_status(&key, SessionStatus::Disconnected)
                        .await
                    {
                        warn!(session = %key, error = %e, "failed to persist disconnect");
                    }
                    let _ = events_tx.send(Event::Disconnected {
                        scope: scope(wa_id),
                        reason,
                    });
                }
                ClientEvent::AuthFailure(err) => {
                    let wa_id = Self::transition(&sessions, &key, SessionStatus::AuthFailure).await;
                    if let Err(e) = registry
                        .record_status(&key, SessionStatus::AuthFailure)
                        .await
                    {
                        warn!(session = %key, error = %e, "failed to persist auth failure");
                    }
                    let _ = events_tx.send(Event::AuthFailure {
                        scope: scope(wa_id),
                        err,
                    });
                }
                ClientEvent::Error(err) => {
                    let wa_id = Self::transition(&sessions, &key, SessionStatus::Error).await;
                    if let Err(e) = registry.record_status(&key, SessionStatus::Error).await {
                        warn!(session = %key, error = %e, "failed to persist error status");
                    }
                    error!(session = %key, err = %err, "client error");
                    let _ = events_tx.send(Event::Error {
                        scope: scope(wa_id),
                        err,
                    });
                }
            }
        }
        debug!(session = %key, "event pump finished");
    }

    async fn transition(
        sessions: &Arc<Mutex<HashMap<SessionKey, SessionState>>>,
        key: &SessionKey,
        status: SessionStatus,
    ) -> Option<String> {
        let mut map = sessions.lock().await;
        match map.get_mut(key) {
            Some(state) => {
                state.status = status;
                state.wa_id.clone()
            }
            None => None,
        }
    }
}

/// Normalize a raw `message_create` into a `message` event.
///
/// The chat id is the counterpart: `to` for our own messages, `from`
/// otherwise. Outbound messages are emitted too, so subscribers see both
/// directions of every conversation.
fn normalize_message(key: &SessionKey, msg: &PlatformMessage, scope: EventScope) -> Event {
    let chat_id = normalize_chat_id(if msg.from_me { &msg.to } else { &msg.from });
    let wa_timestamp = coerce_timestamp_ms(msg.timestamp, scope.ts);
    let media_url_path = (msg.has_media && !msg.id.is_empty()).then(|| {
        format!(
            "/v1/accounts/{}/sessions/{}/media/{}",
            key.account_id, key.label, msg.id
        )
    });

    Event::Message {
        scope,
        id: msg.id.clone(),
        chat_id,
        from_me: msg.from_me,
        body: msg.body.clone(),
        message_type: msg.message_type.clone(),
        has_media: msg.has_media,
        wa_timestamp,
        media_url_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> EventScope {
        EventScope {
            ts: 1_700_000_000_000,
            account_id: "acme".into(),
            session_id: "support".into(),
            wa_id: Some("1555@c.us".into()),
        }
    }

    fn message(from_me: bool, has_media: bool) -> PlatformMessage {
        PlatformMessage {
            id: "msg-1".into(),
            from: "5215551234@c.us".into(),
            to: "1555@c.us".into(),
            from_me,
            body: "hola".into(),
            message_type: "chat".into(),
            has_media,
            timestamp: Some(1_700_000_000),
        }
    }

    #[test]
    fn inbound_message_uses_from_as_chat() {
        let key = SessionKey::new("acme", "support");
        let event = normalize_message(&key, &message(false, false), scope());
        match event {
            Event::Message {
                chat_id,
                from_me,
                wa_timestamp,
                media_url_path,
                ..
            } => {
                assert_eq!(chat_id, "5215551234@c.us");
                assert!(!from_me);
                assert_eq!(wa_timestamp, 1_700_000_000_000);
                assert!(media_url_path.is_none());
            }
            other => panic!("expected message event, got {other:?}"),
        }
    }

    #[test]
    fn outbound_message_uses_to_as_chat() {
        let key = SessionKey::new("acme", "support");
        let event = normalize_message(&key, &message(true, false), scope());
        match event {
            Event::Message { chat_id, from_me, .. } => {
                assert_eq!(chat_id, "1555@c.us");
                assert!(from_me);
            }
            other => panic!("expected message event, got {other:?}"),
        }
    }

    #[test]
    fn media_message_gets_url_hint() {
        let key = SessionKey::new("acme", "support");
        let event = normalize_message(&key, &message(false, true), scope());
        match event {
            Event::Message { media_url_path, .. } => {
                assert_eq!(
                    media_url_path.as_deref(),
                    Some("/v1/accounts/acme/sessions/support/media/msg-1")
                );
            }
            other => panic!("expected message event, got {other:?}"),
        }
    }
}
