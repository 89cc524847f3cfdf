// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat-platform client traits.
//!
//! The real client drives a headless browser elsewhere; this crate consumes
//! it through [`PlatformClient`]. A [`PlatformFactory`] creates one client
//! per session together with its raw event receiver, which the supervisor
//! normalizes into the unified [`crate::types::Event`] stream.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WarelayError;
use crate::types::SessionKey;

/// A raw message as delivered by the platform client.
#[derive(Debug, Clone)]
pub struct PlatformMessage {
    /// Canonical serialized message id.
    pub id: String,
    pub from: String,
    pub to: String,
    pub from_me: bool,
    pub body: String,
    /// Platform message type: `chat`, `ptt`, `audio`, `image`, ...
    pub message_type: String,
    pub has_media: bool,
    /// Platform timestamp in seconds, when present.
    pub timestamp: Option<i64>,
}

/// Raw lifecycle and message events emitted by a platform client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Qr(String),
    Ready { wa_id: Option<String> },
    MessageCreate(PlatformMessage),
    Disconnected(String),
    AuthFailure(String),
    Error(String),
}

/// Outbound media payload accepted by [`PlatformClient::send_media`].
#[derive(Debug, Clone)]
pub enum MediaPayload {
    /// Inline bytes, base64-encoded, with an explicit MIME type.
    Bytes {
        data_b64: String,
        mimetype: String,
        filename: Option<String>,
    },
    /// A remote URL the client fetches itself.
    Url { url: String },
    /// A file on the local disk.
    LocalPath { path: String },
}

/// Options applied to an outbound send.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub caption: Option<String>,
    /// Deliver audio media as a voice note rather than a file attachment.
    pub send_audio_as_voice: bool,
}

/// Media bytes downloaded back out of the platform.
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub mimetype: String,
    pub filename: Option<String>,
    pub data_b64: String,
}

/// One connection to the chat platform, owned exclusively by its supervisor task.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Start the client. Events begin flowing on the receiver handed out at creation.
    async fn initialize(&self) -> Result<(), WarelayError>;

    /// Terminate the client without touching persisted auth state.
    async fn destroy(&self) -> Result<(), WarelayError>;

    /// Invalidate the platform session (auth state becomes unusable).
    async fn logout(&self) -> Result<(), WarelayError>;

    /// Send a text message. Returns the platform message id.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<String, WarelayError>;

    /// Send a media message. Returns the platform message id.
    async fn send_media(
        &self,
        chat_id: &str,
        media: MediaPayload,
        options: SendOptions,
    ) -> Result<String, WarelayError>;

    /// Re-download the media attached to a message the client has seen.
    ///
    /// Returns `None` when the message is no longer reachable.
    async fn download_media(
        &self,
        message_id: &str,
    ) -> Result<Option<DownloadedMedia>, WarelayError>;
}

/// Creates platform clients, one per `(account, label)`.
pub trait PlatformFactory: Send + Sync {
    /// Build a client rooted at the given auth directory, plus its raw event feed.
    fn create(
        &self,
        key: &SessionKey,
        auth_dir: &Path,
    ) -> Result<(Arc<dyn PlatformClient>, mpsc::Receiver<ClientEvent>), WarelayError>;
}
