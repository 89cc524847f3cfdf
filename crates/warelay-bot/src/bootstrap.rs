// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires the supervisor event stream into the bot pipeline.
//!
//! No component owns another: the supervisor, buffer manager, and outbox
//! watcher are created elsewhere with explicit dependencies, and this module
//! just routes events between them and runs the periodic buffer GC.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use warelay_core::types::Event;
use warelay_session::SessionSupervisor;

use crate::buffer::BufferManager;
use crate::outbox::OutboxWatcher;

/// Handles to the bot pipeline's background tasks.
pub struct BotRuntime {
    pub dispatcher: JoinHandle<()>,
    pub gc: JoinHandle<()>,
}

/// Subscribe to the supervisor and keep the pipeline fed until cancelled.
pub fn start(
    supervisor: Arc<SessionSupervisor>,
    buffer: BufferManager,
    outbox: OutboxWatcher,
    cancel: CancellationToken,
) -> BotRuntime {
    let gc = buffer.spawn_gc(cancel.clone());
    let mut events = supervisor.subscribe();

    let dispatcher = tokio::spawn(async move {
        info!("bot pipeline running");
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => route(&buffer, &outbox, event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "bot pipeline lagged behind the event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        outbox.detach_all().await;
        info!("bot pipeline stopped");
    });

    BotRuntime { dispatcher, gc }
}

async fn route(buffer: &BufferManager, outbox: &OutboxWatcher, event: Event) {
    match &event {
        Event::Message { .. } => buffer.handle_event(&event).await,
        Event::Ready { scope, .. } => {
            outbox.attach(&scope.account_id, &scope.session_id).await;
        }
        Event::Disconnected { scope, .. }
        | Event::AuthFailure { scope, .. }
        | Event::Error { scope, .. } => {
            outbox.detach(&scope.account_id, &scope.session_id).await;
        }
        Event::Stopped { scope } | Event::Destroyed { scope } => {
            outbox.detach(&scope.account_id, &scope.session_id).await;
            buffer
                .drop_session(&scope.account_id, &scope.session_id)
                .await;
        }
        Event::Qr { .. } | Event::Sent { .. } => {}
    }
}
