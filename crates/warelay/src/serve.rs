// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `warelay serve` command implementation.
//!
//! Composition root: opens the store, builds the supervisor, bot pipeline,
//! and gateway with explicit dependencies (no component owns another),
//! restores sessions from disk, and runs until SIGINT.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use warelay_bot::{bootstrap, BufferManager, OutboxWatcher, PolicyCache};
use warelay_config::WarelayConfig;
use warelay_core::WarelayError;
use warelay_gateway::{GatewayState, WsHub};
use warelay_session::SessionSupervisor;
use warelay_store::{Rbac, SessionRegistry, SqliteStore};

use crate::identity::ConfigIdentity;
use crate::loopback::LoopbackFactory;
use crate::media::LocalMediaStore;

/// Runs the `warelay serve` command.
pub async fn run_serve(config: WarelayConfig) -> Result<(), WarelayError> {
    init_tracing(&config.agent.log_level);
    info!(name = config.agent.name.as_str(), "starting warelay serve");

    let cancel = CancellationToken::new();

    // Document store.
    let store = Arc::new(
        SqliteStore::open(&config.storage.database_path, config.storage.wal_mode).await?,
    );

    // Session supervisor over the platform factory.
    let registry = SessionRegistry::new(store.clone());
    let supervisor = Arc::new(SessionSupervisor::new(
        Arc::new(LoopbackFactory),
        registry,
        &config.session,
    ));
    let media_sweeper = supervisor.media_cache().spawn_sweeper(cancel.clone());

    // Bot pipeline: policy -> buffers -> outbox, wired over the event bus.
    let policy = Arc::new(PolicyCache::new(store.clone()));
    let media = Arc::new(LocalMediaStore::new(
        supervisor.clone(),
        config.session.media_dir.clone(),
    ));
    let buffer = BufferManager::new(
        store.clone(),
        policy.clone(),
        media,
        config.bot.clone(),
    );
    let outbox = OutboxWatcher::new(
        store.clone(),
        policy,
        supervisor.clone(),
        config.bot.fallback_reply.clone(),
    );
    let bot = bootstrap::start(
        supervisor.clone(),
        buffer,
        outbox.clone(),
        cancel.clone(),
    );

    // Re-init any session with auth state on disk.
    match supervisor.restore_all_from_fs().await {
        Ok(restored) if restored > 0 => info!(restored, "sessions restored from disk"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "session restore failed"),
    }

    // Gateway.
    let state = GatewayState {
        supervisor: supervisor.clone(),
        identity: Arc::new(ConfigIdentity::new(&config.identity)),
        rbac: Rbac::new(store.clone()),
        hub: WsHub::new(config.gateway.max_connections, config.gateway.send_buffer),
        config: config.gateway.clone(),
        start_time: Instant::now(),
    };
    let fanout = state.hub.spawn_fanout(supervisor.clone(), cancel.clone());
    let gateway = tokio::spawn(warelay_gateway::start_server(state, cancel.clone()));

    // Run until SIGINT.
    tokio::select! {
        result = gateway => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "gateway exited with error"),
                Err(e) => error!(error = %e, "gateway task panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Graceful teardown: cancel background work, stop clients, close the store.
    cancel.cancel();
    outbox.detach_all().await;
    supervisor.stop_all().await;
    let _ = bot.dispatcher.await;
    let _ = bot.gc.await;
    let _ = fanout.await;
    let _ = media_sweeper.await;
    store.close().await?;

    info!("warelay stopped");
    Ok(())
}

/// Initialize the tracing subscriber from the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
