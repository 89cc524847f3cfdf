// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Warelay - a multi-tenant WhatsApp bridge and conversational-bot core.
//!
//! This is the binary entry point for the bridge.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod identity;
mod loopback;
mod media;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Warelay - a multi-tenant WhatsApp bridge and conversational-bot core.
#[derive(Parser, Debug)]
#[command(name = "warelay", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the bridge: supervisor, bot pipeline, and gateway.
    Serve {
        /// Explicit config file path (overrides the XDG lookup).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration and exit.
    Config {
        /// Explicit config file path (overrides the XDG lookup).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load(config: Option<&PathBuf>) -> warelay_config::WarelayConfig {
    let loaded = match config {
        Some(path) => warelay_config::load_config_from_path(path),
        None => warelay_config::load_config(),
    };
    match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: invalid configuration: {e}");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let config = load(config.as_ref());
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Commands::Config { config } => {
            let config = load(config.as_ref());
            match render_config(&config) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn render_config(config: &warelay_config::WarelayConfig) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(config)
}

#[cfg(test)]
mod tests {
    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Verify jemalloc is the global allocator by advancing the epoch.
        // Only jemalloc supports this -- the system allocator would fail.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }
}
