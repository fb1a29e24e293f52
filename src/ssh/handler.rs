//! SSH server handler implementation
//!
//! Implements the `russh::server::Handler` trait for one connection: routes
//! public-key authentication through the configured [`AuthDecider`], reports
//! the first successful authentication to the acceptor and forwards session
//! channels to the authenticated connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use russh::keys::PublicKey;
use russh::server::{Auth, Msg, Session};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::auth::{AuthDecider, ConnMetadata, Permissions};

/// Session channels buffered before the connection handler picks them up
pub const CHANNEL_BACKLOG: usize = 16;

/// Outcome of a successful authentication, reported once per connection
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: String,
    pub fingerprint: String,
    pub permissions: Permissions,
}

/// Per-connection SSH server handler
pub struct SessionHandler {
    peer_addr: SocketAddr,
    decider: Arc<dyn AuthDecider>,
    authenticated: Option<oneshot::Sender<Authenticated>>,
    channels: mpsc::Sender<Channel<Msg>>,
    rejections: Arc<AtomicUsize>,
}

impl SessionHandler {
    pub fn new(
        peer_addr: SocketAddr,
        decider: Arc<dyn AuthDecider>,
        authenticated: oneshot::Sender<Authenticated>,
        channels: mpsc::Sender<Channel<Msg>>,
    ) -> Self {
        Self {
            peer_addr,
            decider,
            authenticated: Some(authenticated),
            channels,
            rejections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Count rejected keys into `counter`, which outlives the handler
    pub fn with_rejection_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.rejections = counter;
        self
    }

    fn decide(&self, user: &str, public_key: &PublicKey) -> Option<Permissions> {
        let meta = ConnMetadata::new(user, self.peer_addr);
        match self.decider.decide(&meta, public_key) {
            Ok(permissions) => Some(permissions),
            Err(e) => {
                debug!("Rejected key for {}@{}: {}", user, self.peer_addr, e);
                self.rejections.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

impl russh::server::Handler for SessionHandler {
    type Error = russh::Error;

    /// Answer a key offered without a signature
    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        match self.decide(user, public_key) {
            Some(_) => Ok(Auth::Accept),
            None => Ok(reject()),
        }
    }

    /// Authenticate with a signed key; the engine has already verified the signature
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let Some(permissions) = self.decide(user, public_key) else {
            return Ok(reject());
        };

        if let Some(tx) = self.authenticated.take() {
            let outcome = Authenticated {
                user: user.to_string(),
                fingerprint: public_key.fingerprint(Default::default()).to_string(),
                permissions,
            };
            if tx.send(outcome).is_err() {
                debug!("Acceptor stopped waiting for {}", self.peer_addr);
            }
        }

        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        match self.channels.try_send(channel) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(
                    "Refusing session channel from {}: handler not accepting ({})",
                    self.peer_addr, e
                );
                Ok(false)
            }
        }
    }
}
