//! Courier Tracker - Main Entry Point
//!
//! Headless companion daemon for the courier delivery platform. Resolves
//! the courier identity from stored credentials, announces it to dispatch,
//! and reports location for the duration of the shift.

use anyhow::Context;
use tracing::{info, warn};

use courier_tracker_lib::{config::Config, logging, CourierState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    info!("Courier tracker starting...");

    let config = Config::from_env();
    let mut state = CourierState::new(&config);

    // Headless login when nothing is stored and the environment carries
    // credentials; otherwise the persisted token from a previous run is used.
    if state.session_store.auth_token().is_none() {
        if let (Ok(email), Ok(password)) = (
            std::env::var("COURIER_EMAIL"),
            std::env::var("COURIER_PASSWORD"),
        ) {
            let token = state
                .api
                .courier_login(&email, &password)
                .await
                .context("courier login failed")?;
            if let Err(e) = state.session_store.set_auth_token(&token) {
                warn!("Failed to persist auth token: {}", e);
            }
        }
    }

    let profile = state
        .identity
        .resolve()
        .context("no courier identity available; log in first")?;
    info!(
        "Resolved courier {} ({})",
        profile.unit_id,
        profile.unit_nickname.as_deref().unwrap_or("unnamed")
    );

    state.session.open(&profile, &state.identity);

    state.shift.start_shift().context("failed to start shift")?;
    info!("On shift; reporting location until interrupted");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");

    if let Err(e) = state.shift.stop_shift() {
        warn!("Failed to stop shift cleanly: {}", e);
    }
    state.session.close();

    Ok(())
}
