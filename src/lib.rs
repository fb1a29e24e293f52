//! SSH gate - authentication and connection admission for an SSH server
//!
//! This crate holds the front door of an SSH server: it loads the server's
//! host identity and the set of trusted client public keys, listens for TCP
//! connections, runs the SSH handshake for each one and hands authenticated
//! connections to a caller-supplied [`ConnectionHandler`] in their own task.
//!
//! # Features
//!
//! - authorized_keys parsing, with option prefixes and comments
//! - Host keys in OpenSSH or PEM form, several algorithms side by side
//! - Public-key only authentication through a pluggable [`AuthDecider`]
//! - Sequential accept loop that survives accept and handshake failures
//! - Optional handshake timeout and connection limit
//! - Graceful shutdown with a drain period for running connections
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ssh-gate --port 2222 --host-key-dir /etc/ssh --authorized-keys ~/.ssh/authorized_keys
//! ```
//!
//! # Example Usage (library)
//!
//! ```no_run
//! use ssh_gate::{GreetingHandler, Server};
//!
//! # async fn run() -> ssh_gate::Result<()> {
//! let mut server = Server::new(GreetingHandler::new());
//! server.add_host_key(&std::fs::read("/etc/ssh/ssh_host_ed25519_key")?);
//! server.add_authorized_keys(&std::fs::read("/home/alice/.ssh/authorized_keys")?)?;
//! server.listen_and_serve(2222).await
//! # }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod ssh;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{Result, SshGateError};
pub use server::Server;
pub use ssh::{
    AuthDecider, AuthenticatedConnection, AuthorizedKeyDecider, ConnMetadata, ConnectionAcceptor,
    ConnectionHandler, ConnectionInfo, ConnectionRegistry, GreetingHandler, KeyStore, Listener,
    ListenerState, Permissions, ServeOptions,
};
