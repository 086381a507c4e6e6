//! `ClaimChat` server -- real-time messaging for claim negotiation.
//!
//! An axum WebSocket server that relays messages between the two
//! participants of each claim room, backed by in-memory adapters for the
//! message store and the claim directory.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin claimchat-server
//!
//! # Run on custom address with a claims file
//! cargo run --bin claimchat-server -- --bind 127.0.0.1:8080 --config claims.toml
//!
//! # Or via environment variable
//! CLAIMCHAT_ADDR=127.0.0.1:8080 cargo run --bin claimchat-server
//! ```

use std::sync::Arc;

use clap::Parser;
use claimchat_server::claims::InMemoryClaimDirectory;
use claimchat_server::config::{ServerCliArgs, ServerConfig};
use claimchat_server::server::{self, ChatState};
use claimchat_server::store::InMemoryMessageStore;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        claims = config.claims.len(),
        "starting claimchat server"
    );

    let claims = InMemoryClaimDirectory::new();
    for seed in config.claims {
        claims.insert(seed.room_id, seed.participants).await;
    }
    let state = Arc::new(ChatState::with_settings(
        InMemoryMessageStore::new(),
        claims,
        config.settings,
    ));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "chat server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "chat server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start chat server");
            std::process::exit(1);
        }
    }
}
