// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identifier and timestamp normalization helpers.
//!
//! Everything downstream of the supervisor works in epoch milliseconds and
//! platform-native chat ids (`digits@c.us` for one-to-one chats).

/// Normalize a recipient into a platform chat id.
///
/// Ids that already carry a server part (`@`) pass through untouched.
/// Anything else is reduced to its digits with `@c.us` appended. Idempotent.
pub fn normalize_chat_id(raw: &str) -> String {
    if raw.contains('@') {
        return raw.to_string();
    }
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{digits}@c.us")
}

/// Threshold below which a platform timestamp is taken to be in seconds.
const SECONDS_THRESHOLD: i64 = 10_000_000_000;

/// Coerce a platform timestamp into epoch milliseconds.
///
/// The platform reports seconds; some paths already hand us milliseconds.
/// Values under 10^10 are seconds and get multiplied up. Missing values
/// fall back to `now_ms`.
pub fn coerce_timestamp_ms(wa_timestamp: Option<i64>, now_ms: i64) -> i64 {
    match wa_timestamp {
        Some(ts) if ts < SECONDS_THRESHOLD => ts * 1000,
        Some(ts) => ts,
        None => now_ms,
    }
}

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
