// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Warelay bridge.
//!
//! Wire-facing structs serialize as camelCase so documents and stream
//! payloads stay compatible with the store layout and subscriber protocol.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifies one chat session: a tenant account plus a named label within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub account_id: String,
    pub label: String,
}

impl SessionKey {
    pub fn new(account_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            label: label.into(),
        }
    }

    /// On-disk auth directory name for this session.
    pub fn auth_dir_name(&self) -> String {
        format!("session-{}__{}", self.account_id, self.label)
    }

    /// Parse a `session-{accountId}__{label}` directory name back into a key.
    pub fn parse_auth_dir_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("session-")?;
        let (account_id, label) = rest.split_once("__")?;
        if account_id.is_empty() || label.is_empty() {
            return None;
        }
        Some(Self::new(account_id, label))
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.account_id, self.label)
    }
}

/// Lifecycle status of a chat session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Scanning,
    Ready,
    Disconnected,
    AuthFailure,
    Error,
    Stopped,
}

/// Common fields carried by every supervisor event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventScope {
    /// Epoch milliseconds at emission time.
    pub ts: i64,
    pub account_id: String,
    /// The session label within the account.
    pub session_id: String,
    /// Platform identifier of the session itself, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wa_id: Option<String>,
}

/// A normalized event on the supervisor's unified stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    Qr {
        #[serde(flatten)]
        scope: EventScope,
        qr: String,
    },
    Ready {
        #[serde(flatten)]
        scope: EventScope,
        #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
        self_wa_id: Option<String>,
    },
    Disconnected {
        #[serde(flatten)]
        scope: EventScope,
        reason: String,
    },
    AuthFailure {
        #[serde(flatten)]
        scope: EventScope,
        err: String,
    },
    Error {
        #[serde(flatten)]
        scope: EventScope,
        err: String,
    },
    Stopped {
        #[serde(flatten)]
        scope: EventScope,
    },
    Destroyed {
        #[serde(flatten)]
        scope: EventScope,
    },
    Message {
        #[serde(flatten)]
        scope: EventScope,
        id: String,
        chat_id: String,
        from_me: bool,
        body: String,
        message_type: String,
        has_media: bool,
        /// Epoch milliseconds (already coerced from platform seconds).
        wa_timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_url_path: Option<String>,
    },
    Sent {
        #[serde(flatten)]
        scope: EventScope,
        id: String,
        chat_id: String,
        body: String,
        message_type: String,
        from_me: bool,
        wa_timestamp: i64,
    },
}

impl Event {
    /// Common fields shared by every event variant.
    pub fn scope(&self) -> &EventScope {
        match self {
            Event::Qr { scope, .. }
            | Event::Ready { scope, .. }
            | Event::Disconnected { scope, .. }
            | Event::AuthFailure { scope, .. }
            | Event::Error { scope, .. }
            | Event::Stopped { scope }
            | Event::Destroyed { scope }
            | Event::Message { scope, .. }
            | Event::Sent { scope, .. } => scope,
        }
    }

    /// The wire tag for this event, as serialized in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Qr { .. } => "qr",
            Event::Ready { .. } => "ready",
            Event::Disconnected { .. } => "disconnected",
            Event::AuthFailure { .. } => "auth_failure",
            Event::Error { .. } => "error",
            Event::Stopped { .. } => "stopped",
            Event::Destroyed { .. } => "destroyed",
            Event::Message { .. } => "message",
            Event::Sent { .. } => "sent",
        }
    }

    pub fn account_id(&self) -> &str {
        &self.scope().account_id
    }

    pub fn session_id(&self) -> &str {
        &self.scope().session_id
    }

    /// The chat this event concerns, when it carries one.
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            Event::Message { chat_id, .. } | Event::Sent { chat_id, .. } => Some(chat_id),
            _ => None,
        }
    }

    pub fn from_me(&self) -> Option<bool> {
        match self {
            Event::Message { from_me, .. } | Event::Sent { from_me, .. } => Some(*from_me),
            _ => None,
        }
    }
}

// --- Turn documents ---

/// Processing status of a turn document.
///
/// Advances only along `pending -> ready -> sending -> {delivered|error|skipped}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TurnStatus {
    Pending,
    Ready,
    Sending,
    Delivered,
    Skipped,
    Error,
}

/// Addressing metadata stamped on every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMeta {
    pub account_id: String,
    pub label: String,
    pub chat_id: String,
    pub window_id: String,
}

/// Kind of an aggregated item, used for the `lastInbound` hint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ItemKind {
    Text,
    Voice,
}

/// Response modality chosen by the worker (or requested explicitly by the user).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Modality {
    Text,
    Voice,
}

/// A single aggregated item inside a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TurnItem {
    Text {
        /// Epoch milliseconds.
        ts: i64,
        text: String,
    },
    Voice {
        ts: i64,
        gcs_uri: String,
        content_type: String,
        filename: String,
    },
}

impl TurnItem {
    pub fn ts(&self) -> i64 {
        match self {
            TurnItem::Text { ts, .. } | TurnItem::Voice { ts, .. } => *ts,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            TurnItem::Text { .. } => ItemKind::Text,
            TurnItem::Voice { .. } => ItemKind::Voice,
        }
    }
}

/// Modality and language hints derived while assembling a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnHints {
    pub last_inbound: ItemKind,
    pub explicit: Option<Modality>,
    pub lang: Option<String>,
}

/// Audio payload reference inside a worker response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseAudio {
    pub url: String,
}

/// The worker-written reply attached to a turn once it becomes `ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub modality: Modality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<ResponseAudio>,
}

/// Terminal failure details recorded on a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnFault {
    /// Stage that failed: `validate` or `send`.
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A committed conversational window, stored at
/// `accounts/{aid}/sessions/{label}/threads/{chatId}/turns/{windowId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub status: TurnStatus,
    /// Epoch milliseconds of the first item.
    pub opened_at: i64,
    /// Epoch milliseconds of the last item.
    pub closed_at: i64,
    pub meta: TurnMeta,
    pub hints: TurnHints,
    pub items: Vec<TurnItem>,
    #[serde(default)]
    pub response: Option<TurnResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wa_message_id: Option<String>,
    #[serde(default)]
    pub error: Option<TurnFault>,
}

// --- Policy views ---

/// Session-level bot filtering mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PolicyMode {
    All,
    Allowlist,
    Blocklist,
}

/// Per-session bot policy as read from `accounts/{aid}/sessions/{label}.bot`.
///
/// Missing fields take the permissive defaults: enabled, not receiving from
/// bots, no chat filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyView {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub receive_from_bots: bool,
    #[serde(default = "default_policy_mode")]
    pub mode: PolicyMode,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub blocklist: Vec<String>,
    /// The session's own platform id, from the same session doc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_wa_id: Option<String>,
}

impl Default for PolicyView {
    fn default() -> Self {
        Self {
            enabled: true,
            receive_from_bots: false,
            mode: PolicyMode::All,
            allowlist: Vec::new(),
            blocklist: Vec::new(),
            self_wa_id: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_policy_mode() -> PolicyMode {
    PolicyMode::All
}

/// Per-chat bot overrides, preferred location `threads/{chatId}/settings/__root__`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyChatView {
    /// `None` means inherit from the session policy.
    #[serde(default)]
    pub bot_enabled: Option<bool>,
    #[serde(default)]
    pub preferred_modality: Option<Modality>,
}

/// A user's resolved access within an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedSessions {
    pub role: String,
    /// Labels the user may observe. Administrators see every label.
    pub sessions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_auth_dir_roundtrip() {
        let key = SessionKey::new("acme", "support");
        assert_eq!(key.auth_dir_name(), "session-acme__support");
        let parsed = SessionKey::parse_auth_dir_name("session-acme__support").unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn auth_dir_name_rejects_malformed() {
        assert!(SessionKey::parse_auth_dir_name("acme__support").is_none());
        assert!(SessionKey::parse_auth_dir_name("session-acme").is_none());
        assert!(SessionKey::parse_auth_dir_name("session-__x").is_none());
    }

    #[test]
    fn event_serializes_with_type_tag_and_camel_case() {
        let evt = Event::Message {
            scope: EventScope {
                ts: 1_700_000_000_000,
                account_id: "acme".into(),
                session_id: "support".into(),
                wa_id: None,
            },
            id: "m1".into(),
            chat_id: "521555@c.us".into(),
            from_me: false,
            body: "hola".into(),
            message_type: "chat".into(),
            has_media: false,
            wa_timestamp: 1_700_000_000_000,
            media_url_path: None,
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["accountId"], "acme");
        assert_eq!(json["sessionId"], "support");
        assert_eq!(json["chatId"], "521555@c.us");
        assert_eq!(json["fromMe"], false);
        assert!(json.get("mediaUrlPath").is_none());
    }

    #[test]
    fn ready_event_self_field_rename() {
        let evt = Event::Ready {
            scope: EventScope {
                ts: 1,
                account_id: "a".into(),
                session_id: "l".into(),
                wa_id: Some("1555@c.us".into()),
            },
            self_wa_id: Some("1555@c.us".into()),
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "ready");
        assert_eq!(json["self"], "1555@c.us");
        assert_eq!(json["waId"], "1555@c.us");
    }

    #[test]
    fn auth_failure_tag_is_snake_case() {
        let evt = Event::AuthFailure {
            scope: EventScope {
                ts: 1,
                account_id: "a".into(),
                session_id: "l".into(),
                wa_id: None,
            },
            err: "bad auth".into(),
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "auth_failure");
    }

    #[test]
    fn turn_status_roundtrip() {
        for status in [
            TurnStatus::Pending,
            TurnStatus::Ready,
            TurnStatus::Sending,
            TurnStatus::Delivered,
            TurnStatus::Skipped,
            TurnStatus::Error,
        ] {
            let json = serde_json::to_value(status).unwrap();
            let back: TurnStatus = serde_json::from_value(json).unwrap();
            assert_eq!(back, status);
        }
        assert_eq!(TurnStatus::Sending.to_string(), "sending");
    }

    #[test]
    fn turn_item_tagged_serialization() {
        let item = TurnItem::Voice {
            ts: 5,
            gcs_uri: "gs://bucket/wa/acme/support/inbound/c/5/m.ogg".into(),
            content_type: "audio/ogg".into(),
            filename: "m.ogg".into(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "voice");
        assert_eq!(json["gcsUri"], "gs://bucket/wa/acme/support/inbound/c/5/m.ogg");
        assert_eq!(json["contentType"], "audio/ogg");
    }

    #[test]
    fn policy_view_defaults_from_empty_doc() {
        let view: PolicyView = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(view.enabled);
        assert!(!view.receive_from_bots);
        assert_eq!(view.mode, PolicyMode::All);
        assert!(view.allowlist.is_empty());
    }

    #[test]
    fn policy_chat_view_tristate() {
        let inherit: PolicyChatView = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(inherit.bot_enabled, None);

        let off: PolicyChatView =
            serde_json::from_value(serde_json::json!({"botEnabled": false})).unwrap();
        assert_eq!(off.bot_enabled, Some(false));
    }

    #[test]
    fn session_status_display() {
        assert_eq!(SessionStatus::AuthFailure.to_string(), "auth_failure");
        assert_eq!(SessionStatus::Ready.to_string(), "ready");
    }
}
