//! Registry of active connections
//!
//! Every authenticated connection runs its handler in a dedicated task. The
//! registry tracks those tasks so the server can report what is connected,
//! enforce an optional connection limit and drain on shutdown. A handler that
//! fails or panics is logged and removed; it never reaches the acceptor. When
//! the handler ends the client is disconnected, and the connection's slot is
//! held until the engine session has finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::connection::{
    AuthenticatedConnection, ConnectionHandler, ConnectionId, ConnectionInfo, SessionTask,
};

/// Time a session gets to finish after its handler has returned
pub const SESSION_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Capacity reserved for one connection, released when its task ends
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Shared view of the connections currently being handled
#[derive(Clone)]
pub struct ConnectionRegistry {
    active: Arc<DashMap<ConnectionId, ConnectionInfo>>,
    tracker: TaskTracker,
    limit: Option<Arc<Semaphore>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    /// Create a registry; `max_connections` of None means unlimited
    pub fn new(max_connections: Option<usize>) -> Self {
        Self {
            active: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
            limit: max_connections.map(|n| Arc::new(Semaphore::new(n))),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserve room for one more connection, or None if the limit is reached
    pub fn try_reserve(&self) -> Option<ConnectionSlot> {
        match &self.limit {
            None => Some(ConnectionSlot { _permit: None }),
            Some(limit) => limit
                .clone()
                .try_acquire_owned()
                .ok()
                .map(|permit| ConnectionSlot {
                    _permit: Some(permit),
                }),
        }
    }

    /// Run `handler` on `connection` in its own supervised task.
    ///
    /// `session` is closed once the handler returns, fails or panics.
    pub fn spawn<H: ConnectionHandler>(
        &self,
        handler: Arc<H>,
        connection: AuthenticatedConnection,
        session: SessionTask,
        slot: ConnectionSlot,
    ) {
        let id = connection.id();
        self.active.insert(id, connection.info().clone());

        let active = self.active.clone();
        self.tracker.spawn(async move {
            let task = tokio::spawn(async move { handler.handle(connection).await });

            match task.await {
                Ok(Ok(())) => debug!("Connection {} handler finished", id),
                Ok(Err(e)) => warn!("Connection {} handler failed: {:#}", id, e),
                Err(e) if e.is_panic() => error!("Connection {} handler panicked", id),
                Err(e) => warn!("Connection {} handler aborted: {}", id, e),
            }

            session.close(SESSION_CLOSE_GRACE).await;
            active.remove(&id);
            drop(slot);
        });
    }

    /// Number of connections currently being handled
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.active.contains_key(&id)
    }

    /// Snapshot of the active connections, ordered by id
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> =
            self.active.iter().map(|entry| entry.value().clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Stop accepting new tasks and wait up to `grace` for running ones.
    ///
    /// Returns true if every connection task finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();

        if self.tracker.is_empty() {
            return true;
        }

        info!(
            "Waiting up to {}s for {} connection(s) to finish",
            grace.as_secs(),
            self.tracker.len()
        );
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "{} connection(s) still running after shutdown grace",
                    self.tracker.len()
                );
                false
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("active", &self.active.len())
            .field(
                "available",
                &self.limit.as_ref().map(|limit| limit.available_permits()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_registry_always_reserves() {
        let registry = ConnectionRegistry::new(None);
        let slots: Vec<_> = (0..100).map(|_| registry.try_reserve()).collect();
        assert!(slots.iter().all(Option::is_some));
    }

    #[test]
    fn test_limit_releases_on_drop() {
        let registry = ConnectionRegistry::new(Some(2));

        let first = registry.try_reserve();
        let second = registry.try_reserve();
        assert!(first.is_some() && second.is_some());
        assert!(registry.try_reserve().is_none());

        drop(first);
        assert!(registry.try_reserve().is_some());
    }

    #[test]
    fn test_ids_are_unique_across_clones() {
        let registry = ConnectionRegistry::default();
        let clone = registry.clone();

        let a = registry.next_id();
        let b = clone.next_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_drain_empty_registry() {
        let registry = ConnectionRegistry::default();
        assert!(registry.drain(Duration::from_millis(10)).await);
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
