// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Short-TTL hold of inbound media references.
//!
//! Media-bearing messages are remembered here so their bytes can still be
//! pulled out of the platform client for a while after arrival (the worker
//! fetches voice notes asynchronously). Entries expire after 15 minutes and
//! a background sweep prunes them every 60 seconds.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use warelay_core::normalize::now_ms;

/// Sweep cadence for expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cache key: one message within one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaKey {
    pub account_id: String,
    pub label: String,
    pub message_id: String,
}

/// In-memory TTL map of media-bearing message ids.
#[derive(Clone)]
pub struct MediaCache {
    entries: Arc<DashMap<MediaKey, i64>>,
    ttl_ms: i64,
}

impl MediaCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl_ms: ttl_ms as i64,
        }
    }

    /// Remember a media-bearing message, refreshing its TTL when re-seen.
    pub fn insert(&self, key: MediaKey) {
        self.entries.insert(key, now_ms() + self.ttl_ms);
    }

    /// Whether the message is still within its TTL.
    pub fn contains(&self, key: &MediaKey) -> bool {
        match self.entries.get(key) {
            Some(expires_at) => *expires_at > now_ms(),
            None => false,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry belonging to one session (session destroy).
    pub fn purge_session(&self, account_id: &str, label: &str) {
        self.entries
            .retain(|key, _| !(key.account_id == account_id && key.label == label));
    }

    /// Run the periodic sweep until cancelled.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, "media cache sweep");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> MediaKey {
        MediaKey {
            account_id: "acme".into(),
            label: "support".into(),
            message_id: id.into(),
        }
    }

    #[test]
    fn insert_then_contains() {
        let cache = MediaCache::new(60_000);
        cache.insert(key("m1"));
        assert!(cache.contains(&key("m1")));
        assert!(!cache.contains(&key("m2")));
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let cache = MediaCache::new(0);
        cache.insert(key("m1"));
        assert!(!cache.contains(&key("m1")));
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_keeps_live_entries() {
        let cache = MediaCache::new(60_000);
        cache.insert(key("m1"));
        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn purge_session_scopes_to_key() {
        let cache = MediaCache::new(60_000);
        cache.insert(key("m1"));
        cache.insert(MediaKey {
            account_id: "other".into(),
            label: "x".into(),
            message_id: "m9".into(),
        });
        cache.purge_session("acme", "support");
        assert!(!cache.contains(&key("m1")));
        assert_eq!(cache.len(), 1);
    }
}
