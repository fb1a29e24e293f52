//! SSH serving module
//!
//! Key material, the public-key authentication decision, the engine handler
//! and the accept loop that drives handshakes and hands authenticated
//! connections to their own tasks.

pub mod acceptor;
pub mod auth;
pub mod config;
pub mod connection;
pub mod handler;
pub mod keys;
pub mod registry;

// Re-exports
pub use acceptor::{ConnectionAcceptor, Listener, ListenerState};
pub use auth::{AuthDecider, AuthorizedKeyDecider, ConnMetadata, Permissions};
pub use config::ServeOptions;
pub use connection::{
    AuthenticatedConnection, ConnectionHandler, ConnectionId, ConnectionInfo, GreetingHandler,
    SessionTask,
};
pub use handler::{Authenticated, SessionHandler};
pub use keys::{AuthorizedKeySet, HostIdentity, KeyStore};
pub use registry::{ConnectionRegistry, ConnectionSlot};
