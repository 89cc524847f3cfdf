// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock chat-platform client for deterministic testing.
//!
//! The factory hands the supervisor a [`MockPlatform`] per session and keeps
//! both the client and its raw event sender, so tests can script lifecycle
//! and message events and then assert on captured sends.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use warelay_core::types::SessionKey;
use warelay_core::{
    ClientEvent, DownloadedMedia, MediaPayload, PlatformClient, PlatformFactory, SendOptions,
    WarelayError,
};

/// A send captured by the mock client.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub chat_id: String,
    pub body: String,
    pub is_media: bool,
    pub caption: Option<String>,
    pub as_voice: bool,
}

/// Scriptable platform client: records sends, optionally fails them.
pub struct MockPlatform {
    key: SessionKey,
    sent: Mutex<Vec<SentRecord>>,
    fail_sends: AtomicBool,
    next_id: AtomicU64,
}

impl MockPlatform {
    fn new(key: SessionKey) -> Self {
        Self {
            key,
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// All sends captured so far.
    pub async fn sent_messages(&self) -> Vec<SentRecord> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Make subsequent sends fail with a platform error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn next_message_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("mock-{}-{n}", self.key.label)
    }

    fn check_failure(&self) -> Result<(), WarelayError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(WarelayError::Platform {
                message: "scripted send failure".to_string(),
                source: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn initialize(&self) -> Result<(), WarelayError> {
        Ok(())
    }

    async fn destroy(&self) -> Result<(), WarelayError> {
        Ok(())
    }

    async fn logout(&self) -> Result<(), WarelayError> {
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<String, WarelayError> {
        self.check_failure()?;
        self.sent.lock().await.push(SentRecord {
            chat_id: chat_id.to_string(),
            body: text.to_string(),
            is_media: false,
            caption: None,
            as_voice: false,
        });
        Ok(self.next_message_id())
    }

    async fn send_media(
        &self,
        chat_id: &str,
        media: MediaPayload,
        options: SendOptions,
    ) -> Result<String, WarelayError> {
        self.check_failure()?;
        let body = match media {
            MediaPayload::Url { url } => url,
            MediaPayload::LocalPath { path } => path,
            MediaPayload::Bytes { mimetype, .. } => mimetype,
        };
        self.sent.lock().await.push(SentRecord {
            chat_id: chat_id.to_string(),
            body,
            is_media: true,
            caption: options.caption.clone(),
            as_voice: options.send_audio_as_voice,
        });
        Ok(self.next_message_id())
    }

    async fn download_media(
        &self,
        message_id: &str,
    ) -> Result<Option<DownloadedMedia>, WarelayError> {
        Ok(Some(DownloadedMedia {
            mimetype: "audio/ogg".to_string(),
            filename: Some(format!("{message_id}.ogg")),
            data_b64: "b2dnLWJ5dGVz".to_string(),
        }))
    }
}

/// Factory that remembers every created client and its event sender.
#[derive(Default)]
pub struct MockPlatformFactory {
    senders: DashMap<SessionKey, mpsc::Sender<ClientEvent>>,
    clients: DashMap<SessionKey, Arc<MockPlatform>>,
}

impl MockPlatformFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a raw client event into a session's feed.
    ///
    /// Returns `false` when no client exists (or its pump is gone).
    pub async fn emit(&self, key: &SessionKey, event: ClientEvent) -> bool {
        let tx = match self.senders.get(key) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        tx.send(event).await.is_ok()
    }

    /// The mock client created for a session, if any.
    pub fn client(&self, key: &SessionKey) -> Option<Arc<MockPlatform>> {
        self.clients.get(key).map(|c| Arc::clone(c.value()))
    }
}

impl PlatformFactory for MockPlatformFactory {
    fn create(
        &self,
        key: &SessionKey,
        _auth_dir: &Path,
    ) -> Result<(Arc<dyn PlatformClient>, mpsc::Receiver<ClientEvent>), WarelayError> {
        let (tx, rx) = mpsc::channel(64);
        let client = Arc::new(MockPlatform::new(key.clone()));
        self.senders.insert(key.clone(), tx);
        self.clients.insert(key.clone(), client.clone());
        Ok((client, rx))
    }
}
