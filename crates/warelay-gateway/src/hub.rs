// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-subscriber filtered fan-out of the supervisor event stream.
//!
//! Each connection gets a bounded outgoing queue; a full queue drops the
//! event for that subscriber instead of blocking the fan-out task. ACL
//! updates rewrite the connection's allowed set in place, and an allowed set
//! going empty pushes a policy close down the queue.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use warelay_core::types::Event;
use warelay_session::SessionSupervisor;

use crate::protocol::{SubscribeFilters, CLOSE_ACL_EMPTY, CLOSE_ACL_EMPTY_REASON};

/// Outgoing items on a connection's queue.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// A serialized JSON frame.
    Frame(String),
    /// Close the socket with a code and reason.
    Close { code: u16, reason: String },
}

/// Connection id, unique for the process lifetime.
pub type ConnId = u64;

struct Connection {
    account_id: String,
    allowed: RwLock<HashSet<String>>,
    filters: RwLock<Option<SubscribeFilters>>,
    tx: mpsc::Sender<Outgoing>,
}

struct HubInner {
    connections: DashMap<ConnId, Connection>,
    next_id: AtomicU64,
    send_buffer: usize,
    max_connections: usize,
}

/// Registry of live subscriber connections.
#[derive(Clone)]
pub struct WsHub {
    inner: Arc<HubInner>,
}

impl WsHub {
    pub fn new(max_connections: usize, send_buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                connections: DashMap::new(),
                next_id: AtomicU64::new(1),
                send_buffer,
                max_connections,
            }),
        }
    }

    /// Register a connection. `None` when the connection cap is reached.
    pub fn register(
        &self,
        account_id: &str,
        allowed: Vec<String>,
    ) -> Option<(ConnId, mpsc::Receiver<Outgoing>)> {
        if self.inner.connections.len() >= self.inner.max_connections {
            warn!(
                cap = self.inner.max_connections,
                "connection cap reached; rejecting subscriber"
            );
            return None;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.inner.send_buffer);
        self.inner.connections.insert(
            id,
            Connection {
                account_id: account_id.to_string(),
                allowed: RwLock::new(allowed.into_iter().collect()),
                filters: RwLock::new(None),
                tx,
            },
        );
        Some((id, rx))
    }

    pub fn unregister(&self, id: ConnId) {
        self.inner.connections.remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Replace a connection's allowed set. An empty (or absent) set queues a
    /// policy close; the socket task closes when it drains the queue.
    pub fn update_allowed(&self, id: ConnId, allowed: Option<Vec<String>>) {
        let Some(conn) = self.inner.connections.get(&id) else {
            return;
        };
        let allowed = allowed.unwrap_or_default();
        if allowed.is_empty() {
            let _ = conn.tx.try_send(Outgoing::Close {
                code: CLOSE_ACL_EMPTY,
                reason: CLOSE_ACL_EMPTY_REASON.to_string(),
            });
            return;
        }
        let guard = conn.allowed.write();
        if let Ok(mut set) = guard {
            *set = allowed.into_iter().collect();
        }
    }

    /// Apply narrowing filters and return the effective session list
    /// (the filter intersected with the allowed set).
    pub fn set_filters(&self, id: ConnId, filters: SubscribeFilters) -> Vec<String> {
        let Some(conn) = self.inner.connections.get(&id) else {
            return Vec::new();
        };
        let effective: Vec<String> = {
            let allowed = match conn.allowed.read() {
                Ok(allowed) => allowed,
                Err(_) => return Vec::new(),
            };
            match &filters.sessions {
                Some(wanted) => wanted
                    .iter()
                    .filter(|s| allowed.contains(*s))
                    .cloned()
                    .collect(),
                None => {
                    let mut all: Vec<String> = allowed.iter().cloned().collect();
                    all.sort();
                    all
                }
            }
        };
        if let Ok(mut slot) = conn.filters.write() {
            *slot = Some(filters);
        }
        effective
    }

    /// Queue a control frame on one connection.
    pub fn send_to(&self, id: ConnId, frame: String) {
        if let Some(conn) = self.inner.connections.get(&id) {
            if conn.tx.try_send(Outgoing::Frame(frame)).is_err() {
                debug!(conn = id, "control frame dropped (queue full or closed)");
            }
        }
    }

    /// Fan one event out to every matching connection. Best-effort: full or
    /// closed queues drop the event for that subscriber.
    pub fn broadcast(&self, event: &Event) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "event serialization failed");
                return;
            }
        };

        for entry in self.inner.connections.iter() {
            let conn = entry.value();
            if !Self::matches(conn, event) {
                continue;
            }
            if conn.tx.try_send(Outgoing::Frame(frame.clone())).is_err() {
                debug!(conn = *entry.key(), "subscriber queue full; event dropped");
            }
        }
    }

    fn matches(conn: &Connection, event: &Event) -> bool {
        if event.account_id() != conn.account_id {
            return false;
        }
        match conn.allowed.read() {
            Ok(allowed) if allowed.contains(event.session_id()) => {}
            _ => return false,
        }

        let filters = match conn.filters.read() {
            Ok(filters) => filters.clone(),
            Err(_) => return false,
        };
        let Some(filters) = filters else {
            return true;
        };

        if let Some(sessions) = &filters.sessions {
            if !sessions.iter().any(|s| s == event.session_id()) {
                return false;
            }
        }
        if let Some(types) = &filters.types {
            if !types.iter().any(|t| t == event.kind()) {
                return false;
            }
        }
        if let Some(chats) = &filters.chats {
            match event.chat_id() {
                Some(chat_id) if chats.iter().any(|c| c == chat_id) => {}
                _ => return false,
            }
        }
        if let Some(want_from_me) = filters.from_me {
            if event.from_me() != Some(want_from_me) {
                return false;
            }
        }
        true
    }

    /// Pump the supervisor event stream into the hub until cancelled.
    pub fn spawn_fanout(
        &self,
        supervisor: Arc<SessionSupervisor>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let hub = self.clone();
        let mut events = supervisor.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => hub.broadcast(&event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "hub fan-out lagged behind the event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}
