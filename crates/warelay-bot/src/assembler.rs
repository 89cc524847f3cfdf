// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pure assembly of buffered items into a turn document.
//!
//! No IO and no clocks here: everything is derived from the items and the
//! configured phrase lists, which keeps the merge and hint rules trivially
//! testable.

use warelay_core::paths;
use warelay_core::types::{
    ItemKind, Modality, Turn, TurnHints, TurnItem, TurnMeta, TurnStatus,
};

/// Text items at or under this length are merged into one burst.
const SHORT_TEXT_MAX: usize = 14;

/// Build a `pending` turn from the buffered items.
///
/// Items are stably sorted by timestamp; consecutive short texts collapse
/// into a single space-joined item, longer texts and voice items stand
/// alone. Returns `None` when there is nothing to commit.
pub fn assemble(
    account_id: &str,
    label: &str,
    chat_id: &str,
    mut items: Vec<TurnItem>,
    voice_phrases: &[String],
    text_phrases: &[String],
) -> Option<Turn> {
    if items.is_empty() {
        return None;
    }
    items.sort_by_key(TurnItem::ts);

    let opened_at = items.first().map(TurnItem::ts)?;
    let closed_at = items.last().map(TurnItem::ts)?;

    let merged = merge_items(items);
    let last_inbound = merged.last().map(TurnItem::kind)?;

    let all_text = concatenated_text(&merged);
    let explicit = explicit_modality(&all_text, voice_phrases, text_phrases);
    let lang = detect_lang(&all_text);

    let window_id = paths::window_id(account_id, label, chat_id, opened_at);

    Some(Turn {
        status: TurnStatus::Pending,
        opened_at,
        closed_at,
        meta: TurnMeta {
            account_id: account_id.to_string(),
            label: label.to_string(),
            chat_id: chat_id.to_string(),
            window_id,
        },
        hints: TurnHints {
            last_inbound,
            explicit,
            lang,
        },
        items: merged,
        response: None,
        claimed_at: None,
        delivered_at: None,
        skipped_at: None,
        wa_message_id: None,
        error: None,
    })
}

/// Collapse runs of short text into single items; pass everything else through.
fn merge_items(items: Vec<TurnItem>) -> Vec<TurnItem> {
    let mut out = Vec::with_capacity(items.len());
    let mut acc: Vec<String> = Vec::new();
    let mut acc_ts = 0i64;

    let flush =
        |acc: &mut Vec<String>, acc_ts: i64, out: &mut Vec<TurnItem>| {
            if !acc.is_empty() {
                out.push(TurnItem::Text {
                    ts: acc_ts,
                    text: acc.join(" "),
                });
                acc.clear();
            }
        };

    for item in items {
        match item {
            TurnItem::Text { ts, text } if text.chars().count() <= SHORT_TEXT_MAX => {
                if acc.is_empty() {
                    acc_ts = ts;
                }
                acc.push(text);
            }
            TurnItem::Text { .. } => {
                flush(&mut acc, acc_ts, &mut out);
                out.push(item);
            }
            TurnItem::Voice { .. } => {
                flush(&mut acc, acc_ts, &mut out);
                out.push(item);
            }
        }
    }
    flush(&mut acc, acc_ts, &mut out);
    out
}

fn concatenated_text(items: &[TurnItem]) -> String {
    let mut parts = Vec::new();
    for item in items {
        if let TurnItem::Text { text, .. } = item {
            parts.push(text.as_str());
        }
    }
    parts.join(" ")
}

/// First match wins: voice phrases are checked before text phrases.
fn explicit_modality(
    text: &str,
    voice_phrases: &[String],
    text_phrases: &[String],
) -> Option<Modality> {
    let haystack = text.to_lowercase();
    if voice_phrases
        .iter()
        .any(|p| !p.is_empty() && haystack.contains(&p.to_lowercase()))
    {
        return Some(Modality::Voice);
    }
    if text_phrases
        .iter()
        .any(|p| !p.is_empty() && haystack.contains(&p.to_lowercase()))
    {
        return Some(Modality::Text);
    }
    None
}

/// Spanish detection: accented vowels, eñe, or inverted punctuation.
fn detect_lang(text: &str) -> Option<String> {
    const MARKERS: &[char] = &[
        'á', 'é', 'í', 'ó', 'ú', 'Á', 'É', 'Í', 'Ó', 'Ú', 'ñ', 'Ñ', '¿', '¡',
    ];
    if text.chars().any(|c| MARKERS.contains(&c)) {
        Some("es-MX".to_string())
    } else {
        None
    }
}
