//! Registry of open connections.
//!
//! Every connection is registered from the start of its handshake until it is
//! closed or its handshake fails. Diagnostics reads the registry for stats;
//! shutdown drains it.
//!
//! Lock order: an entry's session lock is always taken before the registry
//! lock, never the other way round.

use crate::db::driver::Session;
use crate::models::{ConnectionSnapshot, ConnectionState, ConnectionStats};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// One registered connection.
pub struct ConnectionEntry {
    id: u64,
    state: AtomicU8,
    pub(crate) session: Mutex<Option<Box<dyn Session>>>,
}

impl ConnectionEntry {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
            session: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.state();
        ConnectionSnapshot {
            id: self.id,
            connected: state == ConnectionState::Connected,
            connecting: state == ConnectionState::Connecting,
        }
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Shared set of open connections. Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<BTreeMap<u64, Arc<ConnectionEntry>>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new entry in `Connecting` state.
    pub async fn register(&self) -> Arc<ConnectionEntry> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = Arc::new(ConnectionEntry::new(id));
        self.entries.write().await.insert(id, entry.clone());
        debug!(connection_id = id, "Connection registered");
        entry
    }

    /// Install a freshly opened session.
    ///
    /// Succeeds only if the entry is still registered and still connecting.
    /// Otherwise the session is handed back for the caller to close.
    pub(crate) async fn activate(
        &self,
        entry: &ConnectionEntry,
        session: Box<dyn Session>,
    ) -> Result<(), Box<dyn Session>> {
        let mut slot = entry.session.lock().await;
        let entries = self.entries.read().await;
        if entries.contains_key(&entry.id) && entry.state() == ConnectionState::Connecting {
            *slot = Some(session);
            entry.set_state(ConnectionState::Connected);
            Ok(())
        } else {
            Err(session)
        }
    }

    /// Remove an entry. Returns false if it was already gone.
    pub async fn remove(&self, id: u64) -> bool {
        let removed = self.entries.write().await.remove(&id).is_some();
        if removed {
            debug!(connection_id = id, "Connection unregistered");
        }
        removed
    }

    /// Take every entry out of the registry.
    pub(crate) async fn drain(&self) -> Vec<Arc<ConnectionEntry>> {
        let mut entries = self.entries.write().await;
        std::mem::take(&mut *entries).into_values().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.entries.read().await.contains_key(&id)
    }

    /// Point-in-time view, ordered by id.
    pub async fn stats(&self) -> ConnectionStats {
        let entries = self.entries.read().await;
        ConnectionStats {
            open_connection_count: entries.len(),
            connections: entries.values().map(|e| e.snapshot()).collect(),
        }
    }
}
