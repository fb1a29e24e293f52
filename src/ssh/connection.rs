//! Authenticated connections and the per-connection handler contract
//!
//! Once a handshake succeeds the acceptor builds an [`AuthenticatedConnection`]
//! and hands it, by value, to a [`ConnectionHandler`] running in its own task.
//! The engine session itself stays with the registry as a [`SessionTask`], so
//! it is closed when the handler ends however the handler ends.

use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh::server::{Handle, Msg, RunningSession};
use russh::{Channel, Disconnect};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::Permissions;
use super::handler::{Authenticated, SessionHandler};
use crate::error::SshGateError;

/// Identifier assigned to each accepted connection
pub type ConnectionId = u64;

/// Snapshot of an authenticated connection, kept by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub user: String,
    pub peer_addr: SocketAddr,
    pub fingerprint: String,
    pub connected_at: DateTime<Utc>,
}

/// An established, authenticated SSH connection
pub struct AuthenticatedConnection {
    info: ConnectionInfo,
    permissions: Permissions,
    handle: Handle,
    channels: mpsc::Receiver<Channel<Msg>>,
    ended: CancellationToken,
    shutdown: CancellationToken,
}

impl AuthenticatedConnection {
    /// Build the connection and start watching its engine session.
    ///
    /// The returned [`SessionTask`] owns the session and must outlive the
    /// handler; the registry closes it once the handler returns.
    pub(crate) fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        authenticated: Authenticated,
        channels: mpsc::Receiver<Channel<Msg>>,
        session: Pin<Box<RunningSession<SessionHandler>>>,
        shutdown: CancellationToken,
    ) -> (Self, SessionTask) {
        let handle = session.handle();
        let ended = CancellationToken::new();

        let watcher = ended.clone();
        let join = tokio::spawn(async move {
            let result = session.await;
            watcher.cancel();
            result
        });

        let connection = Self {
            info: ConnectionInfo {
                id,
                user: authenticated.user,
                peer_addr,
                fingerprint: authenticated.fingerprint,
                connected_at: Utc::now(),
            },
            permissions: authenticated.permissions,
            handle: handle.clone(),
            channels,
            ended,
            shutdown,
        };
        let task = SessionTask { id, handle, join };

        (connection, task)
    }

    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    /// Username the client authenticated as
    pub fn user(&self) -> &str {
        &self.info.user
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.info.peer_addr
    }

    /// SHA256 fingerprint of the key that authenticated
    pub fn fingerprint(&self) -> &str {
        &self.info.fingerprint
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Engine handle for out-of-band operations on this session
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Token cancelled when the server shuts down
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait for the client to open the next session channel.
    ///
    /// Returns `None` once the session has ended.
    pub async fn accept_channel(&mut self) -> Option<Channel<Msg>> {
        self.channels.recv().await
    }

    /// Ask the client to disconnect
    pub async fn disconnect(&self, description: &str) {
        if self
            .handle
            .disconnect(Disconnect::ByApplication, description.into(), "en".into())
            .await
            .is_err()
        {
            debug!("Session {} already gone", self.info.id);
        }
    }

    /// Wait for the session to end
    pub async fn closed(&self) {
        self.ended.cancelled().await;
    }
}

/// Engine session of an authenticated connection
pub struct SessionTask {
    id: ConnectionId,
    handle: Handle,
    join: JoinHandle<std::result::Result<(), russh::Error>>,
}

impl SessionTask {
    /// Disconnect the client unless the session already ended, then wait up
    /// to `grace` for the engine to finish.
    pub async fn close(mut self, grace: Duration) {
        if !self.join.is_finished()
            && self
                .handle
                .disconnect(
                    Disconnect::ByApplication,
                    "connection closed by server".into(),
                    "en".into(),
                )
                .await
                .is_err()
        {
            debug!("Session {} ended before disconnect was sent", self.id);
        }

        match tokio::time::timeout(grace, &mut self.join).await {
            Ok(Ok(Ok(()))) => debug!("Session {} closed", self.id),
            Ok(Ok(Err(e))) => debug!(
                "Session {}: {}",
                self.id,
                SshGateError::Session(e.to_string())
            ),
            Ok(Err(e)) => warn!("Session {} task failed: {}", self.id, e),
            Err(_) => {
                warn!(
                    "Session {} did not close within {}ms, dropping it",
                    self.id,
                    grace.as_millis()
                );
                self.join.abort();
            }
        }
    }
}

impl std::fmt::Debug for SessionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTask")
            .field("id", &self.id)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

impl std::fmt::Debug for AuthenticatedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedConnection")
            .field("id", &self.info.id)
            .field("user", &self.info.user)
            .field("peer_addr", &self.info.peer_addr)
            .field("fingerprint", &self.info.fingerprint)
            .finish()
    }
}

/// Per-connection session logic, run in its own task after authentication
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, connection: AuthenticatedConnection) -> anyhow::Result<()>;
}

/// Greets every session channel and closes it.
///
/// Used by the binary where no session semantics are configured.
#[derive(Debug, Clone, Default)]
pub struct GreetingHandler;

impl GreetingHandler {
    pub fn new() -> Self {
        Self
    }

    fn greeting(connection: &AuthenticatedConnection) -> String {
        format!(
            "Authenticated as {} from {}\r\n",
            connection.user(),
            connection.remote_addr()
        )
    }
}

#[async_trait]
impl ConnectionHandler for GreetingHandler {
    async fn handle(&self, mut connection: AuthenticatedConnection) -> anyhow::Result<()> {
        let shutdown = connection.shutdown_signal();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    connection.disconnect("server shutting down").await;
                    break;
                }
                channel = connection.accept_channel() => {
                    let Some(channel) = channel else { break };
                    let greeting = Self::greeting(&connection);
                    channel.data(greeting.as_bytes()).await?;
                    channel.eof().await?;
                    channel.close().await?;
                }
            }
        }

        info!(
            "Session {} for {}@{} finished",
            connection.id(),
            connection.user(),
            connection.remote_addr()
        );
        connection.closed().await;
        Ok(())
    }
}
