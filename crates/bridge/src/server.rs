//! Connection listener.
//!
//! Accepts TCP connections, upgrades each to a WebSocket and hands it to a
//! fresh [`Session`] on its own task. The listener keeps no per-connection
//! state; a failing session never reaches the accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError, SessionConfig};
use crate::session::{Session, SessionRegistry};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) cannot spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that stop the listener itself.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The configuration does not describe a bindable address.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// WebSocket listener that starts one session per connection.
pub struct BridgeServer {
    listener: TcpListener,
    session_config: Arc<SessionConfig>,
    registry: Arc<SessionRegistry>,
}

impl BridgeServer {
    /// Binds the listener on the configured address.
    ///
    /// Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            session_config: Arc::new(config.session.clone()),
            registry: Arc::new(SessionRegistry::new()),
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Live session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// On shutdown every live session is told to close, and this waits for
    /// them to finish.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let local_addr = self.local_addr()?;
        info!(
            addr = %local_addr,
            framing = %self.session_config.framing,
            "Terminal bridge listening"
        );

        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.on_connect(stream, peer, &tracker, &shutdown),
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        info!(live_sessions = self.registry.count(), "Listener stopping");
        tracker.close();
        tracker.wait().await;
        info!("All sessions closed");

        Ok(())
    }

    /// Starts a session for one accepted connection.
    fn on_connect(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        tracker: &TaskTracker,
        shutdown: &CancellationToken,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let token = shutdown.child_token();
        let session = Session::new(
            Arc::clone(&self.session_config),
            Arc::clone(&self.registry),
            token.clone(),
        )
        .with_peer(peer);
        debug!(peer = %peer, session_id = %session.id(), "Accepted connection");

        tracker.spawn(async move {
            let handshake = tokio::select! {
                _ = token.cancelled() => return,
                handshake = tokio_tungstenite::accept_async(stream) => handshake,
            };
            let ws = match handshake {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "WebSocket handshake failed");
                    return;
                }
            };
            session.run(ws).await;
        });
    }
}
