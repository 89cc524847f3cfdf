// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document path builders for the store layout.
//!
//! The layout is hierarchical, Firestore-style:
//! `accounts/{aid}/sessions/{label}/threads/{chatId}/turns/{windowId}`.
//! Building every path through this module keeps the layout in one place.

/// Collection-group name for turn documents.
pub const TURNS_COLLECTION: &str = "turns";

/// Sentinel document id for per-thread settings.
pub const THREAD_SETTINGS_DOC: &str = "__root__";

pub fn account(account_id: &str) -> String {
    format!("accounts/{account_id}")
}

pub fn member(account_id: &str, uid: &str) -> String {
    format!("accounts/{account_id}/members/{uid}")
}

pub fn acl(account_id: &str, uid: &str) -> String {
    format!("accounts/{account_id}/acl/{uid}")
}

pub fn session(account_id: &str, label: &str) -> String {
    format!("accounts/{account_id}/sessions/{label}")
}

pub fn thread(account_id: &str, label: &str, chat_id: &str) -> String {
    format!("accounts/{account_id}/sessions/{label}/threads/{chat_id}")
}

pub fn thread_settings(account_id: &str, label: &str, chat_id: &str) -> String {
    format!(
        "accounts/{account_id}/sessions/{label}/threads/{chat_id}/settings/{THREAD_SETTINGS_DOC}"
    )
}

pub fn turn(account_id: &str, label: &str, chat_id: &str, window_id: &str) -> String {
    format!("accounts/{account_id}/sessions/{label}/threads/{chat_id}/turns/{window_id}")
}

/// Prefix under which every session doc of an account lives.
pub fn sessions_prefix(account_id: &str) -> String {
    format!("accounts/{account_id}/sessions/")
}

/// The window id for a buffer opened at `opened_at` (epoch ms).
pub fn window_id(account_id: &str, label: &str, chat_id: &str, opened_at: i64) -> String {
    format!("{account_id}.{label}.{chat_id}.{opened_at}")
}
