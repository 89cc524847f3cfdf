// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filesystem-backed media store.
//!
//! Pulls inbound voice bytes back out of the supervisor's media cache and
//! writes them under the configured media root using the shared object path
//! convention. A cloud blob store drops in behind the same `MediaStore`
//! trait.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;

use warelay_core::traits::media::ext_for_mime;
use warelay_core::{InboundVoiceRef, MediaStore, SavedVoice, WarelayError};
use warelay_session::SessionSupervisor;

pub struct LocalMediaStore {
    supervisor: Arc<SessionSupervisor>,
    root: PathBuf,
}

impl LocalMediaStore {
    pub fn new(supervisor: Arc<SessionSupervisor>, root: impl Into<PathBuf>) -> Self {
        Self {
            supervisor,
            root: root.into(),
        }
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn save_inbound_voice(&self, req: &InboundVoiceRef) -> Result<SavedVoice, WarelayError> {
        let media = self
            .supervisor
            .download_message_media(&req.account_id, &req.label, &req.message_id)
            .await?
            .ok_or_else(|| WarelayError::Media {
                message: format!("message {} no longer in media cache", req.message_id),
                source: None,
            })?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&media.data_b64)
            .map_err(|e| WarelayError::Media {
                message: "media payload is not valid base64".into(),
                source: Some(Box::new(e)),
            })?;

        let ext = ext_for_mime(&media.mimetype);
        let filename = format!("{}.{ext}", req.message_id);
        let relative = format!(
            "wa/{}/{}/inbound/{}/{}/{filename}",
            req.account_id, req.label, req.chat_id, req.wa_timestamp_ms
        );
        let target = self.root.join(&relative);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WarelayError::Media {
                    message: format!("cannot create media directory: {e}"),
                    source: Some(Box::new(e)),
                })?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| WarelayError::Media {
                message: format!("cannot write media object: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(SavedVoice {
            gcs_uri: format!("file://{}", target.display()),
            content_type: media.mimetype,
            filename,
            bytes: bytes.len() as u64,
        })
    }
}
