//! SSH server composition root
//!
//! Collects key material and options, then freezes them into the engine
//! configuration and an [`AuthorizedKeyDecider`] when serving starts. Taking
//! `self` by value at that point guarantees the trust configuration can no
//! longer change while handshakes are in flight.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Result, SshGateError};
use crate::ssh::{
    AuthDecider, AuthorizedKeyDecider, ConnectionAcceptor, ConnectionHandler, ConnectionRegistry,
    KeyStore, Listener, ServeOptions,
};

/// SSH server
///
/// Owns the key store, the per-connection handler and the shutdown signal.
pub struct Server<H: ConnectionHandler> {
    keys: KeyStore,
    options: ServeOptions,
    handler: Arc<H>,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
}

impl<H: ConnectionHandler> Server<H> {
    /// Create a server with default options
    pub fn new(handler: H) -> Self {
        Self::with_options(handler, ServeOptions::default())
    }

    pub fn with_options(handler: H, options: ServeOptions) -> Self {
        Self {
            keys: KeyStore::new(),
            registry: ConnectionRegistry::new(options.max_connections),
            options,
            handler: Arc::new(handler),
            shutdown: CancellationToken::new(),
        }
    }

    /// Add authorized_keys records; see [`KeyStore::add_authorized_keys`]
    pub fn add_authorized_keys(&mut self, raw: &[u8]) -> Result<usize> {
        self.keys.add_authorized_keys(raw)
    }

    /// Add one host key; see [`KeyStore::add_host_key`]
    pub fn add_host_key(&mut self, raw: &[u8]) -> bool {
        self.keys.add_host_key(raw)
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    pub fn options(&self) -> &ServeOptions {
        &self.options
    }

    /// Registry of active connections, shared with the acceptor
    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        info!("Shutting down SSH server...");
        self.shutdown.cancel();
    }

    /// Freeze the configuration into an unbound acceptor.
    ///
    /// Fails if no host key was loaded, since the server could not identify
    /// itself during negotiation.
    pub fn into_acceptor<L: Listener>(self) -> Result<ConnectionAcceptor<L, H>> {
        let (authorized, host) = self.keys.into_parts();

        if host.is_empty() {
            return Err(SshGateError::config(
                "no host key loaded; the server cannot identify itself",
            ));
        }
        if authorized.is_empty() {
            warn!("No authorized keys loaded; every authentication attempt will be rejected");
        }

        info!(
            "Host identity: {}; {} authorized key(s)",
            host.algorithms().join(", "),
            authorized.len()
        );

        let engine = Arc::new(self.options.engine_config(&host));
        let decider: Arc<dyn AuthDecider> =
            Arc::new(AuthorizedKeyDecider::new(Arc::new(authorized)));

        Ok(ConnectionAcceptor::new(engine, decider, self.handler)
            .with_registry(self.registry)
            .with_shutdown(self.shutdown)
            .with_options(&self.options))
    }

    /// Freeze the configuration and bind a TCP listener on all interfaces
    pub async fn bind(self, port: u16) -> Result<ConnectionAcceptor<TcpListener, H>> {
        let mut acceptor = self.into_acceptor()?;
        acceptor.bind(port).await?;
        Ok(acceptor)
    }

    /// Bind `port` and serve until shutdown.
    ///
    /// Only configuration and bind failures are returned; per-connection
    /// failures are logged.
    pub async fn listen_and_serve(self, port: u16) -> Result<()> {
        let mut acceptor = self.bind(port).await?;
        acceptor.serve().await
    }
}

impl<H: ConnectionHandler> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("authorized_keys", &self.keys.authorized_keys().len())
            .field("host_keys", &self.keys.host_identity().len())
            .field("options", &self.options)
            .finish()
    }
}
