// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Warelay bridge.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Warelay configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WarelayConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Per-session platform client settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Inbound aggregation and outbound dispatch settings.
    #[serde(default)]
    pub bot: BotConfig,

    /// Document store backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Gateway (HTTP/WS) settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Bearer token table for the embedded identity verifier.
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Process identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name of the bridge instance.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_name() -> String {
    "warelay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-session platform client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Directory holding per-session platform auth state
    /// (`session-{accountId}__{label}` subdirectories).
    #[serde(default = "default_auth_dir")]
    pub auth_dir: String,

    /// TTL for inbound media references, in milliseconds.
    #[serde(default = "default_media_ttl_ms")]
    pub media_ttl_ms: u64,

    /// Directory where inbound voice media is persisted.
    #[serde(default = "default_media_dir")]
    pub media_dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_dir: default_auth_dir(),
            media_ttl_ms: default_media_ttl_ms(),
            media_dir: default_media_dir(),
        }
    }
}

fn default_media_dir() -> String {
    "media".to_string()
}

fn default_auth_dir() -> String {
    ".wwebjs_auth".to_string()
}

fn default_media_ttl_ms() -> u64 {
    15 * 60 * 1000
}

/// Inbound aggregation and outbound dispatch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    /// Quiet period before a buffer flushes, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum time a window may stay open, in milliseconds. Zero disables the cap.
    #[serde(default)]
    pub hard_cap_ms: u64,

    /// Idle time after which a buffer is garbage-collected, in milliseconds.
    #[serde(default = "default_gc_idle_ms")]
    pub gc_idle_ms: u64,

    /// Phrases that close a window immediately (case-insensitive substring match).
    #[serde(default = "default_finalizer_words")]
    pub finalizer_words: Vec<String>,

    /// Phrases requesting a voice reply.
    #[serde(default = "default_voice_phrases")]
    pub voice_phrases: Vec<String>,

    /// Phrases requesting a text reply.
    #[serde(default = "default_text_phrases")]
    pub text_phrases: Vec<String>,

    /// Fallback reply when a ready turn carries no usable text.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            hard_cap_ms: 0,
            gc_idle_ms: default_gc_idle_ms(),
            finalizer_words: default_finalizer_words(),
            voice_phrases: default_voice_phrases(),
            text_phrases: default_text_phrases(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    30_000
}

fn default_gc_idle_ms() -> u64 {
    30 * 60 * 1000
}

fn default_finalizer_words() -> Vec<String> {
    ["gracias", "listo", "eso es todo", "es todo"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_voice_phrases() -> Vec<String> {
    ["audio", "nota de voz", "mensaje de voz", "mándame audio"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_text_phrases() -> Vec<String> {
    ["por escrito", "texto", "escríbeme"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fallback_reply() -> String {
    "Mensaje listo.".to_string()
}

/// Document store backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    "warelay.db".to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// Gateway (HTTP/WS) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent subscriber connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Heartbeat ping interval, in milliseconds.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Per-connection outgoing event buffer depth.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            heartbeat_ms: default_heartbeat_ms(),
            send_buffer: default_send_buffer(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_max_connections() -> usize {
    2000
}

fn default_heartbeat_ms() -> u64 {
    30_000
}

fn default_send_buffer() -> usize {
    256
}

/// Embedded identity verifier configuration.
///
/// Maps bearer tokens to uids for standalone deployments; production setups
/// plug a real identity provider in behind the `IdentityVerifier` trait.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// `token = "uid"` pairs.
    #[serde(default)]
    pub tokens: std::collections::HashMap<String, String>,
}
