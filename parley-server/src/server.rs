//! Lifecycle coordination: listener, accept loop, shutdown
//!
//! Shared state handed to every connection task, plus the accept loop and
//! the idempotent server-wide shutdown sequence.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use parley_protocol::Message;
use parley_utils::{ParleyError, Result};

use crate::broadcast::Broadcaster;
use crate::config::AppConfig;
use crate::connection::handle_client;
use crate::registry::SessionRegistry;

/// Shared server state
///
/// Cloned into every connection task; all fields are handles.
#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<SessionRegistry>,
    pub broadcaster: Broadcaster,
    pub config: Arc<AppConfig>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
}

impl ServerState {
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            config: Arc::new(config),
            shutdown_tx,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Whether shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Tear the server down
    ///
    /// Idempotent; safe to call while the accept loop is running. Every
    /// active session gets a `Shutdown` frame queued before the signal
    /// that makes its dispatcher flush and close, then the registry is
    /// cleared.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return;
        }

        info!("Server shutting down");

        // Queue the notice first so dispatchers find it when they flush
        for (id, outbound) in self.registry.outbounds() {
            if outbound.try_send(Message::shutdown()).is_err() {
                debug!("Could not queue shutdown notice for {}", id);
            }
        }

        // Err just means no live receivers, which is fine at teardown
        let _ = self.shutdown_tx.send(());

        self.registry.clear();
    }
}

/// Bind the TCP listener
///
/// Failure here is fatal to the whole server; no session exists yet.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ParleyError::Bind { addr, source })
}

/// Run the accept loop until the shutdown signal fires
///
/// Each accepted connection gets its own spawned dispatcher task.
pub async fn run_accept_loop(listener: TcpListener, state: ServerState) {
    let mut shutdown_rx = state.subscribe_shutdown();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("New connection from {}", peer_addr);
                        let state = state.clone();
                        tokio::spawn(async move {
                            handle_client(stream, peer_addr, state).await;
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }
}
