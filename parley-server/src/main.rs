//! parley server - Broadcast chat daemon

use std::net::SocketAddr;

use tracing::{info, warn};

use parley_utils::{LogConfig, ParleyError, Result};

mod broadcast;
mod config;
mod connection;
mod console;
mod registry;
mod server;
mod session;

use config::AppConfig;
use server::ServerState;

/// Run the server daemon
async fn run_daemon() -> Result<()> {
    info!("parley server starting");

    let config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Falling back to default configuration: {}", e);
        AppConfig::default()
    });

    let addr: SocketAddr = config
        .server
        .listen_addr
        .parse()
        .map_err(|e| ParleyError::config(format!("Invalid listen_addr: {}", e)))?;

    let state = ServerState::new(config);

    // Bind failure is the only fatal error: no session exists yet
    let listener = server::bind(addr).await?;
    info!("Listening on {}", addr);

    // Admin console on stdin
    tokio::spawn(console::run_console(state.clone()));

    // Ctrl-C behaves like the console `logout`
    let signal_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_state.shutdown();
        }
    });

    server::run_accept_loop(listener, state.clone()).await;

    // No-op when the console already tore everything down
    state.shutdown();

    info!("parley server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    parley_utils::init_logging_with_config(LogConfig::server())?;

    run_daemon().await
}
