// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Blob store trait for inbound voice media.

use async_trait::async_trait;

use crate::error::WarelayError;

/// Reference to an inbound voice message whose media should be persisted.
#[derive(Debug, Clone)]
pub struct InboundVoiceRef {
    pub account_id: String,
    pub label: String,
    pub chat_id: String,
    pub message_id: String,
    /// Epoch milliseconds; becomes part of the object path.
    pub wa_timestamp_ms: i64,
}

/// A voice object persisted to blob storage.
#[derive(Debug, Clone)]
pub struct SavedVoice {
    pub gcs_uri: String,
    pub content_type: String,
    pub filename: String,
    pub bytes: u64,
}

/// Persists inbound voice media so the worker can fetch it later.
///
/// Object path convention:
/// `wa/{accountId}/{label}/inbound/{chatId}/{tsMs}/{messageId}.{ext}`.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn save_inbound_voice(&self, req: &InboundVoiceRef) -> Result<SavedVoice, WarelayError>;
}

/// File extension for a MIME type, per the blob store convention.
pub fn ext_for_mime(mime: &str) -> &'static str {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    match essence {
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mp4" | "video/mp4" => "mp4",
        _ => "bin",
    }
}
