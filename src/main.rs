// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SportSYNC connectivity check
//!
//! Loads configuration, connects to the backend and, when credentials are
//! supplied, signs in, reports the account state and signs out again.

use sportsync::{config::Config, SessionManager};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        backend = %config.supabase_url,
        environment = ?config.environment,
        "Starting SportSYNC client"
    );

    let manager = SessionManager::from_config(&config)?;

    let credentials = (
        std::env::var("SPORTSYNC_EMAIL").ok(),
        std::env::var("SPORTSYNC_PASSWORD").ok(),
    );
    match credentials {
        (Some(email), Some(password)) => {
            let session = manager.login(&email, &password).await.map_err(|e| {
                tracing::error!(code = e.code(), "Login failed: {}", e.user_message());
                e
            })?;
            let snapshot = manager.snapshot();
            tracing::info!(
                user_id = %session.id,
                role = %session.role,
                following = snapshot.following.len(),
                unread_messages = snapshot.unread.messages,
                unread_notifications = snapshot.unread.notifications,
                "Signed in"
            );
            manager.logout().await;
        }
        _ => {
            let restored = manager.refresh_session().await?;
            tracing::info!(
                authenticated = restored.is_some(),
                "No credentials supplied; set SPORTSYNC_EMAIL and SPORTSYNC_PASSWORD to sign in"
            );
        }
    }

    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sportsync=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
