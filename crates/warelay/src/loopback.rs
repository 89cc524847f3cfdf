// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Loopback platform client for local bring-up.
//!
//! The real WhatsApp client lives outside this workspace and is consumed
//! through the `PlatformFactory` trait. This loopback comes up `ready`
//! immediately, logs outbound sends, and never produces inbound traffic;
//! it exists so `warelay serve` runs end to end on a developer machine.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use warelay_core::types::SessionKey;
use warelay_core::{
    ClientEvent, DownloadedMedia, MediaPayload, PlatformClient, PlatformFactory, SendOptions,
    WarelayError,
};

pub struct LoopbackClient {
    key: SessionKey,
    events: mpsc::Sender<ClientEvent>,
    next_id: AtomicU64,
}

#[async_trait]
impl PlatformClient for LoopbackClient {
    async fn initialize(&self) -> Result<(), WarelayError> {
        let wa_id = format!("{}-{}@c.us", self.key.account_id, self.key.label);
        self.events
            .send(ClientEvent::Ready { wa_id: Some(wa_id) })
            .await
            .map_err(|_| WarelayError::Platform {
                message: "loopback event feed closed".into(),
                source: None,
            })
    }

    async fn destroy(&self) -> Result<(), WarelayError> {
        Ok(())
    }

    async fn logout(&self) -> Result<(), WarelayError> {
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<String, WarelayError> {
        info!(session = %self.key, chat_id, text, "loopback send_text");
        Ok(self.next_message_id())
    }

    async fn send_media(
        &self,
        chat_id: &str,
        media: MediaPayload,
        options: SendOptions,
    ) -> Result<String, WarelayError> {
        info!(
            session = %self.key,
            chat_id,
            as_voice = options.send_audio_as_voice,
            media = ?media,
            "loopback send_media"
        );
        Ok(self.next_message_id())
    }

    async fn download_media(
        &self,
        _message_id: &str,
    ) -> Result<Option<DownloadedMedia>, WarelayError> {
        Ok(None)
    }
}

impl LoopbackClient {
    fn next_message_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("loopback-{}-{n}", self.key.label)
    }
}

/// Factory handing out loopback clients.
#[derive(Default)]
pub struct LoopbackFactory;

impl PlatformFactory for LoopbackFactory {
    fn create(
        &self,
        key: &SessionKey,
        _auth_dir: &Path,
    ) -> Result<(Arc<dyn PlatformClient>, mpsc::Receiver<ClientEvent>), WarelayError> {
        let (tx, rx) = mpsc::channel(16);
        let client = Arc::new(LoopbackClient {
            key: key.clone(),
            events: tx,
            next_id: AtomicU64::new(1),
        });
        Ok((client, rx))
    }
}
