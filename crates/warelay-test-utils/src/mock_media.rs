// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock blob store for inbound voice media.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use warelay_core::{InboundVoiceRef, MediaStore, SavedVoice, WarelayError};

/// Pretends to upload voice notes; optionally fails to test the
/// log-and-continue path.
#[derive(Default)]
pub struct MockMedia {
    fail_saves: AtomicBool,
    saves: AtomicU64,
}

impl MockMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaStore for MockMedia {
    async fn save_inbound_voice(&self, req: &InboundVoiceRef) -> Result<SavedVoice, WarelayError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(WarelayError::Media {
                message: "scripted upload failure".to_string(),
                source: None,
            });
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        let filename = format!("{}.ogg", req.message_id);
        Ok(SavedVoice {
            gcs_uri: format!(
                "gs://test-bucket/wa/{}/{}/inbound/{}/{}/{}",
                req.account_id, req.label, req.chat_id, req.wa_timestamp_ms, filename
            ),
            content_type: "audio/ogg".to_string(),
            filename,
            bytes: 2048,
        })
    }
}
