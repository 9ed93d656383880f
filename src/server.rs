//! HTTP listener lifecycle.
//!
//! A [`Server`] owns at most one active listener. Starting it again first
//! shuts the previous listener down gracefully, then binds the requested
//! port. Starting is asynchronous: callers get a [`ReadySignal`] they can
//! await once to learn when the new listener accepts connections.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::api::{create_router, AppState};
use crate::config::is_loopback_host;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server start was abandoned before the listener was ready")]
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
}

/// One-shot notification that a start request finished.
///
/// Resolves to the bound address once the listener accepts connections, or
/// to the bind error.
#[derive(Debug)]
pub struct ReadySignal(oneshot::Receiver<Result<SocketAddr, ServerError>>);

impl ReadySignal {
    pub async fn wait(self) -> Result<SocketAddr, ServerError> {
        self.0.await.unwrap_or(Err(ServerError::Abandoned))
    }
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        tracing::info!(addr = %self.addr, "Shutting down listener");
        // The serve task may already have exited; nothing to signal then.
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Listener task failed: {}", e);
        }
    }
}

/// Service object owning the single active listener.
///
/// Clones share the same listener slot.
#[derive(Clone)]
pub struct Server {
    app: AppState,
    host: String,
    running: Arc<Mutex<Option<Running>>>,
    state: Arc<watch::Sender<ServerState>>,
}

impl Server {
    pub fn new(app: AppState, host: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ServerState::Stopped);
        Self {
            app,
            host: host.into(),
            running: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Address of the active listener, if any.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// Start listening on `port`, replacing any active listener.
    ///
    /// Returns immediately. Start requests are applied in the order their
    /// tasks acquire the listener slot. Port 0 binds an ephemeral port.
    pub fn start(&self, port: u16) -> ReadySignal {
        let (ready_tx, ready_rx) = oneshot::channel();
        let server = self.clone();

        tokio::spawn(async move {
            let result = server.replace_listener(port).await;
            // The caller may not care about readiness.
            let _ = ready_tx.send(result);
        });

        ReadySignal(ready_rx)
    }

    /// Stop the active listener, waiting for in-flight requests to finish.
    pub async fn shutdown(&self) {
        let mut slot = self.running.lock().await;
        if let Some(running) = slot.take() {
            running.stop().await;
        }
        self.state.send_replace(ServerState::Stopped);
    }

    async fn replace_listener(&self, port: u16) -> Result<SocketAddr, ServerError> {
        let mut slot = self.running.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        self.state.send_replace(ServerState::Starting);

        if !is_loopback_host(&self.host) {
            tracing::warn!(
                host = %self.host,
                "Listening beyond loopback: scripts can be listed and run by anyone who can reach this port (no auth, CORS open to any origin)"
            );
        }

        let listener = match TcpListener::bind((self.host.as_str(), port)).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state.send_replace(ServerState::Stopped);
                let addr = format!("{}:{}", self.host, port);
                tracing::error!(%addr, error = %source, "Failed to bind listener");
                return Err(ServerError::Bind { addr, source });
            }
        };
        let addr = listener.local_addr().map_err(|source| {
            self.state.send_replace(ServerState::Stopped);
            ServerError::Bind {
                addr: format!("{}:{}", self.host, port),
                source,
            }
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = create_router(self.app.clone());
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(%addr, "Listener stopped with error: {}", e);
            }
        });

        *slot = Some(Running {
            addr,
            shutdown: shutdown_tx,
            task,
        });
        self.state.send_replace(ServerState::Listening);
        tracing::info!("OpenDesk server listening on http://{}", addr);

        Ok(addr)
    }
}
