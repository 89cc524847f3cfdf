// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Warelay configuration system.

use warelay_config::load_config_from_str;

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_warelay_config() {
    let toml = r#"
[agent]
name = "test-bridge"
log_level = "debug"

[session]
auth_dir = "/var/lib/warelay/auth"
media_ttl_ms = 600000
media_dir = "/var/lib/warelay/media"

[bot]
debounce_ms = 5000
hard_cap_ms = 120000
gc_idle_ms = 900000
finalizer_words = ["gracias", "listo"]
voice_phrases = ["audio"]
text_phrases = ["texto"]
fallback_reply = "Mensaje listo."

[storage]
database_path = "/tmp/test.db"
wal_mode = false

[gateway]
host = "0.0.0.0"
port = 9000
max_connections = 100
heartbeat_ms = 10000
send_buffer = 64

[identity]
tokens = { "tok-1" = "uid-1" }
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.agent.name, "test-bridge");
    assert_eq!(config.agent.log_level, "debug");
    assert_eq!(config.session.auth_dir, "/var/lib/warelay/auth");
    assert_eq!(config.session.media_ttl_ms, 600_000);
    assert_eq!(config.bot.debounce_ms, 5000);
    assert_eq!(config.bot.hard_cap_ms, 120_000);
    assert_eq!(config.bot.finalizer_words, vec!["gracias", "listo"]);
    assert_eq!(config.storage.database_path, "/tmp/test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.gateway.host, "0.0.0.0");
    assert_eq!(config.gateway.port, 9000);
    assert_eq!(config.gateway.max_connections, 100);
    assert_eq!(
        config.identity.tokens.get("tok-1").map(String::as_str),
        Some("uid-1")
    );
}

/// Empty TOML falls back to compiled defaults.
#[test]
fn empty_toml_uses_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");
    assert_eq!(config.agent.name, "warelay");
    assert_eq!(config.bot.debounce_ms, 30_000);
    assert_eq!(config.bot.hard_cap_ms, 0);
    assert_eq!(config.bot.gc_idle_ms, 30 * 60 * 1000);
    assert_eq!(config.session.media_ttl_ms, 15 * 60 * 1000);
    assert!(config
        .bot
        .finalizer_words
        .iter()
        .any(|w| w == "gracias"));
    assert_eq!(config.bot.fallback_reply, "Mensaje listo.");
    assert_eq!(config.gateway.max_connections, 2000);
    assert_eq!(config.gateway.heartbeat_ms, 30_000);
    assert!(config.storage.wal_mode);
}

/// Unknown field in a section is rejected at load time.
#[test]
fn unknown_field_produces_error() {
    let toml = r#"
[bot]
debouce_ms = 5000
"#;

    let err = load_config_from_str(toml).expect_err("should reject unknown field");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("debouce_ms"),
        "error should mention the bad key, got: {err_str}"
    );
}

/// Partial sections keep defaults for the rest.
#[test]
fn partial_section_keeps_other_defaults() {
    let toml = r#"
[bot]
debounce_ms = 1000
"#;
    let config = load_config_from_str(toml).unwrap();
    assert_eq!(config.bot.debounce_ms, 1000);
    assert_eq!(config.bot.gc_idle_ms, 30 * 60 * 1000);
    assert_eq!(config.bot.fallback_reply, "Mensaje listo.");
}
