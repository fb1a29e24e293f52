//! Serving options
//!
//! Limits and timeouts for the acceptor, and the translation of those options
//! plus the host identity into the engine's server configuration.

use std::time::Duration;

use russh::{MethodKind, MethodSet, SshId};

use super::keys::HostIdentity;

/// Default delay before answering a rejected authentication attempt
pub const DEFAULT_AUTH_REJECTION_TIME: Duration = Duration::from_secs(1);

/// Default number of authentication attempts per connection
pub const DEFAULT_MAX_AUTH_ATTEMPTS: usize = 10;

/// Default time granted to connection tasks after shutdown is requested
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Acceptor and engine options
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Upper bound on negotiation + authentication (None = wait forever)
    pub handshake_timeout: Option<Duration>,

    /// Idle timeout applied by the engine to established sessions
    pub inactivity_timeout: Option<Duration>,

    /// Delay before a rejected authentication attempt is answered
    pub auth_rejection_time: Duration,

    /// Authentication attempts allowed per connection
    pub max_auth_attempts: usize,

    /// Maximum concurrently handled connections (None = unlimited)
    pub max_connections: Option<usize>,

    /// How long shutdown waits for connection tasks to finish
    pub shutdown_grace: Duration,

    /// Identification string sent to clients (must start with `SSH-2.0-`)
    pub server_id: String,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: None,
            inactivity_timeout: None,
            auth_rejection_time: DEFAULT_AUTH_REJECTION_TIME,
            max_auth_attempts: DEFAULT_MAX_AUTH_ATTEMPTS,
            max_connections: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            server_id: format!(
                "SSH-2.0-{}_{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl ServeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon handshakes that take longer than `timeout`
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Let the engine drop sessions idle for longer than `timeout`
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn with_auth_rejection_time(mut self, delay: Duration) -> Self {
        self.auth_rejection_time = delay;
        self
    }

    pub fn with_max_auth_attempts(mut self, attempts: usize) -> Self {
        self.max_auth_attempts = attempts;
        self
    }

    /// Cap the number of concurrently handled connections
    pub fn with_max_connections(mut self, limit: usize) -> Self {
        self.max_connections = Some(limit);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    /// Build the engine configuration.
    ///
    /// Public-key authentication is the only method offered.
    pub fn engine_config(&self, host: &HostIdentity) -> russh::server::Config {
        russh::server::Config {
            server_id: SshId::Standard(self.server_id.clone()),
            methods: MethodSet::from(&[MethodKind::PublicKey][..]),
            auth_rejection_time: self.auth_rejection_time,
            auth_rejection_time_initial: Some(Duration::ZERO),
            max_auth_attempts: self.max_auth_attempts,
            inactivity_timeout: self.inactivity_timeout,
            keys: host.keys().to_vec(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_options_builder() {
        let options = ServeOptions::new()
            .with_handshake_timeout(Duration::from_secs(5))
            .with_max_connections(16)
            .with_auth_rejection_time(Duration::from_millis(10));

        assert_eq!(options.handshake_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.max_connections, Some(16));
        assert_eq!(options.auth_rejection_time, Duration::from_millis(10));
        assert!(options.inactivity_timeout.is_none());
    }

    #[test]
    fn test_defaults_are_unbounded() {
        let options = ServeOptions::default();
        assert!(options.handshake_timeout.is_none());
        assert!(options.max_connections.is_none());
        assert_eq!(options.shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
        assert!(options.server_id.starts_with("SSH-2.0-ssh-gate_"));
    }

    #[test]
    fn test_engine_config_carries_host_keys() {
        use russh::keys::ssh_key::rand_core::OsRng;
        use russh::keys::{Algorithm, PrivateKey};

        let mut host = HostIdentity::new();
        host.push(PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap());

        let config = ServeOptions::new()
            .with_max_auth_attempts(3)
            .engine_config(&host);

        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.max_auth_attempts, 3);
        assert_eq!(config.auth_rejection_time, DEFAULT_AUTH_REJECTION_TIME);
    }
}
