//! Public-key authentication decisions
//!
//! The SSH engine asks an [`AuthDecider`] about every key a client offers.
//! Decisions are pure reads of frozen configuration, so one decider is shared
//! by all in-flight handshakes.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::PublicKey;
use tracing::debug;

use super::keys::AuthorizedKeySet;
use crate::error::{Result, SshGateError};

/// Remote identity context available during authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnMetadata {
    user: String,
    remote_addr: SocketAddr,
}

impl ConnMetadata {
    pub fn new(user: impl Into<String>, remote_addr: SocketAddr) -> Self {
        Self {
            user: user.into(),
            remote_addr,
        }
    }

    /// Username requested by the client
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

/// Capabilities attached to a successful authentication.
///
/// Keys authorized through an [`AuthorizedKeySet`] carry none; restrictions
/// are left to the per-connection handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    /// Options the handler must enforce (e.g. `force-command`)
    pub critical_options: BTreeMap<String, String>,

    /// Informational extensions
    pub extensions: BTreeMap<String, String>,
}

impl Permissions {
    pub fn is_empty(&self) -> bool {
        self.critical_options.is_empty() && self.extensions.is_empty()
    }
}

/// Decides whether a presented public key may authenticate.
///
/// Invoked concurrently, possibly several times per connection when a client
/// offers more than one key. Implementations must not mutate shared state.
pub trait AuthDecider: Send + Sync {
    /// Return the granted permissions, or
    /// [`SshGateError::AuthenticationRejected`] when the key is not accepted.
    fn decide(&self, meta: &ConnMetadata, key: &PublicKey) -> Result<Permissions>;
}

/// Accepts exactly the keys of a frozen [`AuthorizedKeySet`]
#[derive(Debug, Clone)]
pub struct AuthorizedKeyDecider {
    keys: Arc<AuthorizedKeySet>,
}

impl AuthorizedKeyDecider {
    pub fn new(keys: Arc<AuthorizedKeySet>) -> Self {
        Self { keys }
    }

    pub fn authorized_keys(&self) -> &AuthorizedKeySet {
        &self.keys
    }
}

impl AuthDecider for AuthorizedKeyDecider {
    fn decide(&self, meta: &ConnMetadata, key: &PublicKey) -> Result<Permissions> {
        if self.keys.contains(key) {
            return Ok(Permissions::default());
        }

        debug!(
            "Key not found: {} {} offered by '{}' from {}",
            key.algorithm().as_str(),
            key.fingerprint(Default::default()),
            meta.user(),
            meta.remote_addr()
        );
        Err(SshGateError::auth_rejected("No valid key found"))
    }
}

impl<T: AuthDecider + ?Sized> AuthDecider for Arc<T> {
    fn decide(&self, meta: &ConnMetadata, key: &PublicKey) -> Result<Permissions> {
        (**self).decide(meta, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::ssh_key::rand_core::OsRng;
    use russh::keys::{Algorithm, PrivateKey};

    fn random_public_key() -> PublicKey {
        PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .unwrap()
            .public_key()
            .clone()
    }

    fn meta() -> ConnMetadata {
        ConnMetadata::new("alice", "127.0.0.1:50000".parse().unwrap())
    }

    fn decider_for(keys: &[&PublicKey]) -> AuthorizedKeyDecider {
        let mut set = AuthorizedKeySet::new();
        for key in keys {
            set.insert(key);
        }
        AuthorizedKeyDecider::new(Arc::new(set))
    }

    #[test]
    fn test_empty_set_rejects_everything() {
        let decider = decider_for(&[]);
        let err = decider.decide(&meta(), &random_public_key()).unwrap_err();
        assert!(matches!(err, SshGateError::AuthenticationRejected(_)));
    }

    #[test]
    fn test_authorized_key_accepted_with_empty_permissions() {
        let key = random_public_key();
        let decider = decider_for(&[&key]);

        let permissions = decider.decide(&meta(), &key).unwrap();
        assert!(permissions.is_empty());
        assert_eq!(permissions, Permissions::default());
    }

    #[test]
    fn test_other_key_of_same_type_rejected() {
        let key = random_public_key();
        let decider = decider_for(&[&key]);

        assert!(decider.decide(&meta(), &random_public_key()).is_err());
    }

    #[test]
    fn test_comment_is_ignored_for_matching() {
        let key = random_public_key();
        let decider = decider_for(&[&key]);

        let mut presented = key.clone();
        presented.set_comment("somebody@elsewhere");
        assert!(decider.decide(&meta(), &presented).is_ok());
    }

    #[test]
    fn test_decider_does_not_mutate_set() {
        let key = random_public_key();
        let decider = decider_for(&[&key]);

        for _ in 0..3 {
            let _ = decider.decide(&meta(), &random_public_key());
        }
        assert_eq!(decider.authorized_keys().len(), 1);
    }

    #[test]
    fn test_shared_decider_through_arc() {
        let key = random_public_key();
        let decider: Arc<dyn AuthDecider> = Arc::new(decider_for(&[&key]));
        assert!(decider.decide(&meta(), &key).is_ok());
    }

    #[test]
    fn test_conn_metadata_accessors() {
        let meta = meta();
        assert_eq!(meta.user(), "alice");
        assert_eq!(meta.remote_addr().port(), 50000);
    }
}
