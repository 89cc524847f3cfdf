// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Routes:
//! - `GET /ws?accountId=..&token=..` -- the subscriber stream (auth during
//!   the handshake, not middleware)
//! - `GET /health` -- unauthenticated liveness
//! - `/v1/accounts/{aid}/...` -- admin surface, bearer + role checked

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warelay_config::model::GatewayConfig;
use warelay_core::types::AllowedSessions;
use warelay_core::{IdentityVerifier, WarelayError};
use warelay_session::SessionSupervisor;
use warelay_store::Rbac;

use crate::auth::{authorize, require_admin, require_label, AuthRejection};
use crate::hub::{Outgoing, WsHub};
use crate::protocol::{ClientMessage, ServerMessage};

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub supervisor: Arc<SessionSupervisor>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub rbac: Rbac,
    pub hub: WsHub,
    pub config: GatewayConfig,
    pub start_time: Instant,
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    let api = Router::new()
        .route(
            "/v1/accounts/{aid}/sessions",
            get(list_sessions),
        )
        .route(
            "/v1/accounts/{aid}/sessions/{label}/init",
            post(init_session),
        )
        .route(
            "/v1/accounts/{aid}/sessions/{label}/stop",
            post(stop_session),
        )
        .route(
            "/v1/accounts/{aid}/sessions/{label}",
            delete(destroy_session),
        )
        .route("/v1/accounts/{aid}/sessions/{label}/qr", get(get_qr))
        .route(
            "/v1/accounts/{aid}/sessions/{label}/media/{message_id}",
            get(get_media),
        )
        .route("/v1/accounts/{aid}/acl/{uid}/grant", post(grant_acl))
        .route("/v1/accounts/{aid}/acl/{uid}/revoke", post(revoke_acl));

    Router::new()
        .route("/health", get(get_health))
        .route("/ws", get(ws_handler))
        .merge(api)
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the token is cancelled.
pub async fn start_server(
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), WarelayError> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WarelayError::Gateway(format!("failed to bind {addr}: {e}")))?;

    info!("gateway listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| WarelayError::Gateway(format!("gateway server error: {e}")))?;
    Ok(())
}

// --- Subscriber stream ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsParams {
    account_id: String,
    token: String,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<GatewayState>,
) -> Response {
    let user = match state.identity.verify(&params.token).await {
        Ok(user) => user,
        Err(e) => {
            debug!(error = %e, "ws token rejected");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    let allowed = match state.rbac.resolve_allowed(&params.account_id, &user.uid).await {
        Ok(Some(allowed)) => allowed,
        Ok(None) => return StatusCode::FORBIDDEN.into_response(),
        Err(e) => {
            warn!(error = %e, "allowed-set resolution failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let account_id = params.account_id;
    let uid = user.uid;
    ws.on_upgrade(move |socket| handle_socket(socket, state, account_id, uid, allowed))
}

async fn handle_socket(
    socket: WebSocket,
    state: GatewayState,
    account_id: String,
    uid: String,
    allowed: AllowedSessions,
) {
    let Some((conn_id, mut rx)) = state.hub.register(&account_id, allowed.sessions.clone())
    else {
        // Over the connection cap; drop the socket without a hello.
        return;
    };
    info!(conn = conn_id, account_id = %account_id, uid = %uid, "subscriber connected");

    let (mut sink, mut stream) = socket.split();

    let mut sessions = allowed.sessions.clone();
    sessions.sort();
    let hello = ServerMessage::Hello {
        account_id: account_id.clone(),
        sessions,
    };
    match serde_json::to_string(&hello) {
        Ok(frame) => {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                state.hub.unregister(conn_id);
                return;
            }
        }
        Err(e) => warn!(error = %e, "hello serialization failed"),
    }

    // An already-empty allowed set closes right after the hello.
    if allowed.sessions.is_empty() {
        state.hub.update_allowed(conn_id, Some(Vec::new()));
    }

    // Live ACL updates rewrite the allowed set without a reconnect.
    let mut acl_sub = state.rbac.subscribe_allowed(&account_id, &uid);
    let acl_hub = state.hub.clone();
    let acl_task = tokio::spawn(async move {
        while let Some(update) = acl_sub.recv().await {
            match update {
                Some(allowed) => {
                    if let Ok(frame) = serde_json::to_string(&ServerMessage::AclUpdate {
                        sessions: allowed.sessions.clone(),
                    }) {
                        acl_hub.send_to(conn_id, frame);
                    }
                    acl_hub.update_allowed(conn_id, Some(allowed.sessions));
                }
                None => acl_hub.update_allowed(conn_id, None),
            }
        }
    });

    // Sender half: drains the hub queue and owns the heartbeat.
    let alive = Arc::new(AtomicBool::new(true));
    let sender_alive = alive.clone();
    let heartbeat = Duration::from_millis(state.config.heartbeat_ms.max(1));
    let send_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; consume it so the first ping
        // waits a full interval.
        interval.tick().await;
        loop {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(Outgoing::Frame(frame)) => {
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outgoing::Close { code, reason }) => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    if !sender_alive.swap(false, Ordering::SeqCst) {
                        debug!(conn = conn_id, "heartbeat unacknowledged; terminating");
                        break;
                    }
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Receiver half: subscribe messages and liveness.
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                let text_str: &str = &text;
                match serde_json::from_str::<ClientMessage>(text_str) {
                    Ok(ClientMessage::Subscribe { filters }) => {
                        let effective = state.hub.set_filters(conn_id, filters.clone());
                        if let Ok(frame) = serde_json::to_string(&ServerMessage::Subscribed {
                            sessions: effective,
                            filters,
                        }) {
                            state.hub.send_to(conn_id, frame);
                        }
                    }
                    Err(e) => warn!(conn = conn_id, error = %e, "invalid client message"),
                }
            }
            Message::Pong(_) => {
                alive.store(true, Ordering::SeqCst);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.unregister(conn_id);
    acl_task.abort();
    send_task.abort();
    info!(conn = conn_id, "subscriber disconnected");
}

// --- Health ---

async fn get_health(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let running = state.supervisor.list_running(None).await.len();
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "runningSessions": running,
        "subscribers": state.hub.connection_count(),
    }))
}

// --- Admin surface ---

#[derive(Debug, Deserialize)]
struct AclBody {
    label: String,
}

async fn list_sessions(
    Path(aid): Path<String>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AuthRejection> {
    let (_, allowed) = authorize(state.identity.as_ref(), &state.rbac, &headers, &aid).await?;
    let sessions: Vec<_> = state
        .supervisor
        .list_running(Some(&aid))
        .await
        .into_iter()
        .filter(|s| require_label(&allowed, &s.label).is_ok())
        .collect();
    Ok(Json(json!({ "sessions": sessions })))
}

async fn init_session(
    Path((aid, label)): Path<(String, String)>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AuthRejection> {
    let (_, allowed) = authorize(state.identity.as_ref(), &state.rbac, &headers, &aid).await?;
    require_admin(&allowed)?;
    let status = state
        .supervisor
        .init(&aid, &label)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "status": status.to_string() })))
}

async fn stop_session(
    Path((aid, label)): Path<(String, String)>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AuthRejection> {
    let (_, allowed) = authorize(state.identity.as_ref(), &state.rbac, &headers, &aid).await?;
    require_admin(&allowed)?;
    let status = state
        .supervisor
        .stop(&aid, &label)
        .await
        .map_err(not_found_or_internal)?;
    Ok(Json(json!({ "status": status.to_string() })))
}

async fn destroy_session(
    Path((aid, label)): Path<(String, String)>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<StatusCode, AuthRejection> {
    let (_, allowed) = authorize(state.identity.as_ref(), &state.rbac, &headers, &aid).await?;
    require_admin(&allowed)?;
    state
        .supervisor
        .destroy(&aid, &label)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_qr(
    Path((aid, label)): Path<(String, String)>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AuthRejection> {
    let (_, allowed) = authorize(state.identity.as_ref(), &state.rbac, &headers, &aid).await?;
    require_label(&allowed, &label)?;
    match state.supervisor.qr(&aid, &label).await {
        Some(qr) => Ok(Json(json!({ "qr": qr }))),
        None => Err((StatusCode::NOT_FOUND, "no QR pending".into())),
    }
}

async fn get_media(
    Path((aid, label, message_id)): Path<(String, String, String)>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AuthRejection> {
    let (_, allowed) = authorize(state.identity.as_ref(), &state.rbac, &headers, &aid).await?;
    require_label(&allowed, &label)?;
    match state
        .supervisor
        .download_message_media(&aid, &label, &message_id)
        .await
        .map_err(internal)?
    {
        Some(media) => Ok(Json(json!({
            "mimetype": media.mimetype,
            "filename": media.filename,
            "dataB64": media.data_b64,
        }))),
        None => Err((StatusCode::NOT_FOUND, "media expired or unknown".into())),
    }
}

async fn grant_acl(
    Path((aid, uid)): Path<(String, String)>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<AclBody>,
) -> Result<StatusCode, AuthRejection> {
    let (_, allowed) = authorize(state.identity.as_ref(), &state.rbac, &headers, &aid).await?;
    require_admin(&allowed)?;
    state
        .rbac
        .grant(&aid, &uid, &body.label)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_acl(
    Path((aid, uid)): Path<(String, String)>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<AclBody>,
) -> Result<StatusCode, AuthRejection> {
    let (_, allowed) = authorize(state.identity.as_ref(), &state.rbac, &headers, &aid).await?;
    require_admin(&allowed)?;
    state
        .rbac
        .revoke(&aid, &uid, &body.label)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

fn internal(e: WarelayError) -> AuthRejection {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn not_found_or_internal(e: WarelayError) -> AuthRejection {
    match e {
        WarelayError::SessionNotFound { .. } => (StatusCode::NOT_FOUND, e.to_string()),
        other => internal(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_params_deserialize_from_query_shape() {
        let params: WsParams =
            serde_json::from_str(r#"{"accountId": "acme", "token": "tok"}"#).unwrap();
        assert_eq!(params.account_id, "acme");
        assert_eq!(params.token, "tok");
    }

    #[test]
    fn error_mapping_distinguishes_not_found() {
        let missing = WarelayError::SessionNotFound {
            account_id: "a".into(),
            label: "l".into(),
        };
        assert_eq!(not_found_or_internal(missing).0, StatusCode::NOT_FOUND);

        let internal_err = WarelayError::Internal("boom".into());
        assert_eq!(
            not_found_or_internal(internal_err).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
