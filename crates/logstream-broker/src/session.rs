//! Client Sessions and Dispatch Ownership
//!
//! The registry is the explicit, synchronized table behind two rules:
//!
//! - A client id has at most one live dispatch task. A `CID` rebind cancels
//!   the previous one before the new connection takes over delivery.
//! - Dispatch handles are generation-tagged so a task (or a closing
//!   connection) only deregisters the handle it actually owns, never a
//!   successor installed after a rebind.
//!
//! Sessions survive connection churn: the heartbeat clock and committed
//! offsets belong to the client id, not the socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct ClientSession {
    id: String,
    last_heartbeat: Mutex<Instant>,
}

impl ClientSession {
    fn new(id: String) -> Self {
        Self {
            id,
            last_heartbeat: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Refresh the heartbeat clock (`PNG`, and identity binding).
    pub fn touch(&self) {
        *self.last_heartbeat.lock().unwrap() = Instant::now();
    }

    pub fn since_heartbeat(&self) -> Duration {
        self.last_heartbeat.lock().unwrap().elapsed()
    }
}

struct DispatchSlot {
    generation: u64,
    /// Which connection's writer the task delivers to.
    conn_id: u64,
    /// Absent between reservation and installation.
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<ClientSession>>,
    dispatch: HashMap<String, DispatchSlot>,
    next_generation: u64,
}

#[derive(Default)]
pub struct ClientRegistry {
    inner: Mutex<Inner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the session for a client id, refreshing its heartbeat.
    pub fn session(&self, client_id: &str) -> Arc<ClientSession> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(ClientSession::new(client_id.to_string())))
            .clone();
        session.touch();
        session
    }

    /// Reserve the dispatch slot for a client if no task is live, returning
    /// the generation for the task about to be spawned.
    pub fn reserve_dispatch(&self, client_id: &str, conn_id: u64) -> Option<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.dispatch.contains_key(client_id) {
            return None;
        }
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.dispatch.insert(
            client_id.to_string(),
            DispatchSlot {
                generation,
                conn_id,
                handle: None,
            },
        );
        Some(generation)
    }

    /// Attach the spawned task's handle to its reserved slot. If the slot
    /// was cancelled between reservation and spawn, the task is aborted.
    pub fn install_dispatch(&self, client_id: &str, generation: u64, handle: JoinHandle<()>) {
        let mut inner = self.inner.lock().unwrap();
        match inner.dispatch.get_mut(client_id) {
            Some(slot) if slot.generation == generation => slot.handle = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Cancel any live dispatch for this client (`CID` rebind).
    pub fn cancel_dispatch(&self, client_id: &str) {
        let slot = self.inner.lock().unwrap().dispatch.remove(client_id);
        if let Some(slot) = slot {
            if let Some(handle) = slot.handle {
                handle.abort();
            }
            debug!(client = client_id, "cancelled dispatch task");
        }
    }

    /// Cancel the dispatch bound to a specific connection, if it still is.
    /// Used when a connection closes without an explicit rebind.
    pub fn cancel_dispatch_for_conn(&self, client_id: &str, conn_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        let owned = matches!(
            inner.dispatch.get(client_id),
            Some(slot) if slot.conn_id == conn_id
        );
        if owned {
            if let Some(slot) = inner.dispatch.remove(client_id) {
                if let Some(handle) = slot.handle {
                    handle.abort();
                }
            }
        }
    }

    /// Self-deregistration on task exit; a stale generation is a no-op so a
    /// replacement task installed meanwhile is left alone.
    pub fn finish_dispatch(&self, client_id: &str, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        let matches = matches!(
            inner.dispatch.get(client_id),
            Some(slot) if slot.generation == generation
        );
        if matches {
            inner.dispatch.remove(client_id);
        }
    }

    pub fn has_dispatch(&self, client_id: &str) -> bool {
        self.inner.lock().unwrap().dispatch.contains_key(client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_heartbeat() {
        let registry = ClientRegistry::new();
        let session = registry.session("c1");
        assert_eq!(session.id(), "c1");
        assert!(session.since_heartbeat() < Duration::from_secs(1));

        // Same id returns the same session.
        let again = registry.session("c1");
        assert!(Arc::ptr_eq(&session, &again));
    }

    #[tokio::test]
    async fn test_reserve_is_exclusive() {
        let registry = ClientRegistry::new();
        let gen1 = registry.reserve_dispatch("c1", 1);
        assert!(gen1.is_some());
        assert!(registry.reserve_dispatch("c1", 2).is_none());
        assert!(registry.has_dispatch("c1"));

        registry.cancel_dispatch("c1");
        assert!(!registry.has_dispatch("c1"));
        assert!(registry.reserve_dispatch("c1", 2).is_some());
    }

    #[tokio::test]
    async fn test_finish_ignores_stale_generation() {
        let registry = ClientRegistry::new();
        let gen1 = registry.reserve_dispatch("c1", 1).unwrap();
        registry.cancel_dispatch("c1");
        let gen2 = registry.reserve_dispatch("c1", 2).unwrap();
        assert_ne!(gen1, gen2);

        // The dead task's deregistration must not evict its successor.
        registry.finish_dispatch("c1", gen1);
        assert!(registry.has_dispatch("c1"));
        registry.finish_dispatch("c1", gen2);
        assert!(!registry.has_dispatch("c1"));
    }

    #[tokio::test]
    async fn test_cancel_for_conn_only_matches_owner() {
        let registry = ClientRegistry::new();
        registry.reserve_dispatch("c1", 7).unwrap();
        registry.cancel_dispatch_for_conn("c1", 8);
        assert!(registry.has_dispatch("c1"), "other connection must not cancel");
        registry.cancel_dispatch_for_conn("c1", 7);
        assert!(!registry.has_dispatch("c1"));
    }

    #[tokio::test]
    async fn test_install_after_cancel_aborts_task() {
        let registry = ClientRegistry::new();
        let generation = registry.reserve_dispatch("c1", 1).unwrap();
        registry.cancel_dispatch("c1");

        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        registry.install_dispatch("c1", generation, handle);
        // The slot was gone, so the handle must have been aborted.
        assert!(!registry.has_dispatch("c1"));
    }
}
