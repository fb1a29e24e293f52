//! Connection acceptor
//!
//! Owns the listening socket and runs the accept loop. Each accepted stream
//! goes through the SSH handshake inline; only after it concludes does the
//! loop accept again. Authenticated connections are handed to the registry,
//! which runs the per-connection handler in its own task. Failures of a
//! single accept or handshake are logged and never stop the loop.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::server::RunningSession;
use russh::Disconnect;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::AuthDecider;
use super::config::{ServeOptions, DEFAULT_SHUTDOWN_GRACE};
use super::connection::{AuthenticatedConnection, ConnectionHandler, SessionTask};
use super::handler::{SessionHandler, CHANNEL_BACKLOG};
use super::registry::ConnectionRegistry;
use crate::error::{Result, SshGateError};

/// Source of inbound transport connections
pub trait Listener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Lifecycle of the acceptor's listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Bound,
    Closed,
}

/// Accept loop plus handshake driver
pub struct ConnectionAcceptor<L: Listener, H: ConnectionHandler> {
    listener: Option<L>,
    state: ListenerState,
    engine: Arc<russh::server::Config>,
    decider: Arc<dyn AuthDecider>,
    handler: Arc<H>,
    registry: ConnectionRegistry,
    handshake_timeout: Option<Duration>,
    shutdown_grace: Duration,
    shutdown: CancellationToken,
}

impl<L: Listener, H: ConnectionHandler> ConnectionAcceptor<L, H> {
    /// Create an unbound acceptor
    pub fn new(
        engine: Arc<russh::server::Config>,
        decider: Arc<dyn AuthDecider>,
        handler: Arc<H>,
    ) -> Self {
        Self {
            listener: None,
            state: ListenerState::Unbound,
            engine,
            decider,
            handler,
            registry: ConnectionRegistry::default(),
            handshake_timeout: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use a shared registry for authenticated connections
    pub fn with_registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Stop serving when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Apply handshake timeout and shutdown grace from `options`
    pub fn with_options(mut self, options: &ServeOptions) -> Self {
        self.handshake_timeout = options.handshake_timeout;
        self.shutdown_grace = options.shutdown_grace;
        self
    }

    /// Take ownership of an already-bound listener
    pub fn attach(&mut self, listener: L) -> Result<()> {
        if self.state != ListenerState::Unbound {
            return Err(SshGateError::config(format!(
                "listener cannot be attached in state {:?}",
                self.state
            )));
        }
        self.listener = Some(listener);
        self.state = ListenerState::Bound;
        Ok(())
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(SshGateError::config("listener is not bound")),
        }
    }

    /// Run the accept loop until the shutdown token is cancelled.
    ///
    /// Accept and handshake failures are logged and the loop continues. On
    /// shutdown the listener is closed and running connection tasks are given
    /// the configured grace period to finish.
    pub async fn serve(&mut self) -> Result<()> {
        let mut listener = self
            .listener
            .take()
            .ok_or_else(|| SshGateError::config("listener is not bound"))?;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("{}", SshGateError::Accept(e));
                    continue;
                }
            };
            debug!("Accepted connection from: {}", peer_addr);

            let Some(slot) = self.registry.try_reserve() else {
                warn!(
                    "Connection limit reached, dropping connection from {}",
                    peer_addr
                );
                continue;
            };

            match self.handshake(stream, peer_addr).await {
                Ok((connection, session)) => {
                    info!(
                        "Authenticated client {}@{} (connection {}, key {})",
                        connection.user(),
                        connection.remote_addr(),
                        connection.id(),
                        connection.fingerprint()
                    );
                    self.registry
                        .spawn(self.handler.clone(), connection, session, slot);
                }
                Err(SshGateError::Cancelled) => break,
                Err(SshGateError::HandshakeEof) => {
                    debug!("Connection from {} closed by remote host", peer_addr);
                }
                Err(e) => debug!("Connection from {}: {}", peer_addr, e),
            }
        }

        drop(listener);
        self.state = ListenerState::Closed;
        info!("Listener closed");

        self.registry.drain(self.shutdown_grace).await;
        Ok(())
    }

    /// Negotiate and authenticate one connection.
    async fn handshake<S>(
        &self,
        stream: S,
        peer_addr: SocketAddr,
    ) -> Result<(AuthenticatedConnection, SessionTask)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let deadline = self.handshake_timeout.map(|timeout| Instant::now() + timeout);
        let (auth_tx, mut auth_rx) = oneshot::channel();
        let (channel_tx, channel_rx) = mpsc::channel(CHANNEL_BACKLOG);
        let rejections = Arc::new(AtomicUsize::new(0));
        let handler = SessionHandler::new(peer_addr, self.decider.clone(), auth_tx, channel_tx)
            .with_rejection_counter(rejections.clone());

        let running = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(SshGateError::Cancelled),
            _ = expired(deadline) => return Err(self.timeout_error()),
            started = russh::server::run_stream(self.engine.clone(), stream, handler) => {
                started.map_err(classify_engine_error)?
            }
        };
        let mut session = Box::pin(running);

        let authenticated = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                abandon(&session, "server shutting down").await;
                return Err(SshGateError::Cancelled);
            }
            _ = expired(deadline) => {
                abandon(&session, "handshake timeout").await;
                return Err(self.timeout_error());
            }
            outcome = &mut auth_rx => outcome.ok(),
            ended = &mut session => {
                return Err(session_end_error(ended, rejections.load(Ordering::Relaxed)));
            }
        };

        // The handler is dropped without reporting when the session ends first
        let Some(authenticated) = authenticated else {
            let ended = session.await;
            return Err(session_end_error(ended, rejections.load(Ordering::Relaxed)));
        };

        Ok(AuthenticatedConnection::new(
            self.registry.next_id(),
            peer_addr,
            authenticated,
            channel_rx,
            session,
            self.shutdown.child_token(),
        ))
    }

    fn timeout_error(&self) -> SshGateError {
        let timeout = self.handshake_timeout.unwrap_or_default();
        SshGateError::HandshakeTimeout(timeout.as_millis() as u64)
    }
}

impl<H: ConnectionHandler> ConnectionAcceptor<TcpListener, H> {
    /// Bind a TCP listener on all interfaces.
    ///
    /// Returns the bound address (useful with port 0).
    pub async fn bind(&mut self, port: u16) -> Result<SocketAddr> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            debug!("Unable to listen: {}", source);
            SshGateError::Bind { port, source }
        })?;

        let local_addr = listener.local_addr()?;
        self.attach(listener)?;
        info!("Listening on {}", local_addr);
        Ok(local_addr)
    }
}

impl<L: Listener, H: ConnectionHandler> std::fmt::Debug for ConnectionAcceptor<L, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAcceptor")
            .field("state", &self.state)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("registry", &self.registry)
            .finish()
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn abandon(session: &RunningSession<SessionHandler>, reason: &str) {
    if session
        .handle()
        .disconnect(Disconnect::ByApplication, reason.into(), "en".into())
        .await
        .is_err()
    {
        debug!("Session ended before disconnect was sent");
    }
}

fn classify_engine_error(err: russh::Error) -> SshGateError {
    match err {
        russh::Error::Disconnect => SshGateError::HandshakeEof,
        russh::Error::IO(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            SshGateError::HandshakeEof
        }
        other => SshGateError::handshake(other.to_string()),
    }
}

/// Error for a session that ended before authentication succeeded.
///
/// A client that leaves after having keys rejected failed authentication; it
/// is only reported as EOF when it never had a key rejected.
fn session_end_error(
    ended: std::result::Result<(), russh::Error>,
    rejections: usize,
) -> SshGateError {
    let failure = match ended {
        Ok(()) => SshGateError::HandshakeEof,
        Err(e) => classify_engine_error(e),
    };

    match failure {
        SshGateError::HandshakeEof if rejections > 0 => SshGateError::handshake(format!(
            "authentication rejected for all offered keys ({} rejected attempt(s))",
            rejections
        )),
        other => other,
    }
}
