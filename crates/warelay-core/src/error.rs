// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Warelay bridge.

use thiserror::Error;

/// The primary error type used across all Warelay adapter traits and core operations.
#[derive(Debug, Error)]
pub enum WarelayError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Document store errors (connection, query failure, serialization).
    #[error("store error: {source}")]
    Store {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Chat-platform client errors (send failure, media download, client crash).
    #[error("platform error: {message}")]
    Platform {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A send was attempted against a session that is not in the `ready` state.
    #[error("session {account_id}/{label} not ready (status: {status})")]
    NotReady {
        account_id: String,
        label: String,
        status: String,
    },

    /// No session is running for the given key.
    #[error("session {account_id}/{label} not found")]
    SessionNotFound { account_id: String, label: String },

    /// Bearer verification or role resolution failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Media upload or retrieval failed.
    #[error("media error: {message}")]
    Media {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Gateway (HTTP/WS) errors.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}
