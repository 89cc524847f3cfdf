// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire protocol for the subscriber stream.
//!
//! Server -> client: `hello`, `acl_update`, `subscribed`, plus raw supervisor
//! events serialized as-is. Client -> server: a single `subscribe` message
//! that narrows (never widens) the connection's view.

use serde::{Deserialize, Serialize};

/// Close code sent when a subscriber's allowed set becomes empty.
pub const CLOSE_ACL_EMPTY: u16 = 4403;

/// Reason string accompanying [`CLOSE_ACL_EMPTY`].
pub const CLOSE_ACL_EMPTY_REASON: &str = "ACL empty";

/// Optional narrowing filters carried by a `subscribe` message.
///
/// All present filters must match (conjunctive); they can only narrow the
/// connection's ACL-derived view, never widen it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubscribeFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chats: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_me: Option<bool>,
}

/// Messages a client may send on the stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        filters: SubscribeFilters,
    },
}

/// Control messages the server pushes (supervisor events go out separately,
/// serialized from [`warelay_core::types::Event`]).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Hello {
        account_id: String,
        sessions: Vec<String>,
    },
    AclUpdate {
        sessions: Vec<String>,
    },
    Subscribed {
        sessions: Vec<String>,
        filters: SubscribeFilters,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_message_parses_with_filters() {
        let json = r#"{"type":"subscribe","filters":{"sessions":["b"],"types":["message"],"fromMe":false}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        let ClientMessage::Subscribe { filters } = msg;
        assert_eq!(filters.sessions.as_deref(), Some(&["b".to_string()][..]));
        assert_eq!(filters.types.as_deref(), Some(&["message".to_string()][..]));
        assert_eq!(filters.from_me, Some(false));
        assert!(filters.chats.is_none());
    }

    #[test]
    fn subscribe_message_parses_without_filters() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"subscribe"}"#).unwrap();
        let ClientMessage::Subscribe { filters } = msg;
        assert_eq!(filters, SubscribeFilters::default());
    }

    #[test]
    fn unknown_filter_keys_are_rejected() {
        let json = r#"{"type":"subscribe","filters":{"accounts":["other"]}}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn server_messages_use_snake_case_tags() {
        let hello = ServerMessage::Hello {
            account_id: "acme".into(),
            sessions: vec!["support".into()],
        };
        let json = serde_json::to_value(&hello).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["accountId"], "acme");

        let update = ServerMessage::AclUpdate {
            sessions: vec![],
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "acl_update");
    }
}
