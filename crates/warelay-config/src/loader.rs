// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./warelay.toml` > `~/.config/warelay/warelay.toml`
//! > `/etc/warelay/warelay.toml` with environment variable overrides via the
//! `WARELAY_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::WarelayConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/warelay/warelay.toml` (system-wide)
/// 3. `~/.config/warelay/warelay.toml` (user XDG config)
/// 4. `./warelay.toml` (local directory)
/// 5. `WARELAY_*` environment variables
pub fn load_config() -> Result<WarelayConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WarelayConfig::default()))
        .merge(Toml::file("/etc/warelay/warelay.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("warelay/warelay.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("warelay.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<WarelayConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WarelayConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<WarelayConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WarelayConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `WARELAY_BOT_DEBOUNCE_MS` must map to
/// `bot.debounce_ms`, not `bot.debounce.ms`.
fn env_provider() -> Env {
    Env::prefixed("WARELAY_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("agent_", "agent.", 1)
            .replacen("session_", "session.", 1)
            .replacen("bot_", "bot.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("gateway_", "gateway.", 1)
            .replacen("identity_", "identity.", 1);
        mapped.into()
    })
}
