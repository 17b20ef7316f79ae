//! Connection table: id → logical connection.
//!
//! The table is the only shared mutable state in a session. Every insert,
//! lookup and removal goes through the same async mutex, including the
//! dispatch loop's dial-and-register path, so two registrations for one id
//! can never interleave.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, MutexGuard};

use crate::constants::{ID_PROBE_LIMIT, UNASSIGNED_ID};
use crate::error::MuxError;

/// Write half of a logical connection's stream.
pub type ConnWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared, serialised handle to a connection's write half.
pub type SharedWriter = Arc<Mutex<ConnWriter>>;

/// One multiplexed stream.
pub struct LogicalConnection {
    id: u32,
    serial: u64,
    writer: SharedWriter,
}

impl std::fmt::Debug for LogicalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalConnection")
            .field("id", &format_args!("{:08x}", self.id))
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl LogicalConnection {
    /// Connection id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Insertion token, unique per process.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Handle to the write half.
    pub fn writer(&self) -> SharedWriter {
        Arc::clone(&self.writer)
    }
}

/// Map of live connections.
#[derive(Debug, Default, Clone)]
pub struct ConnectionTable {
    entries: Arc<Mutex<HashMap<u32, LogicalConnection>>>,
    next_serial: Arc<AtomicU64>,
}

/// Locked view of the table.
#[derive(Debug)]
pub struct TableGuard<'a> {
    entries: MutexGuard<'a, HashMap<u32, LogicalConnection>>,
    next_serial: &'a AtomicU64,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the table lock.
    pub async fn lock(&self) -> TableGuard<'_> {
        TableGuard {
            entries: self.entries.lock().await,
            next_serial: &self.next_serial,
        }
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: u32) -> bool {
        self.entries.lock().await.contains_key(&id)
    }

    /// Registered ids, unordered.
    pub async fn ids(&self) -> Vec<u32> {
        self.entries.lock().await.keys().copied().collect()
    }

    /// Remove `id` only if it still holds the entry inserted as `serial`.
    ///
    /// Returns whether an entry was removed.
    pub async fn remove_if_current(&self, id: u32, serial: u64) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(&id) {
            Some(conn) if conn.serial == serial => {
                entries.remove(&id);
                true
            }
            _ => false,
        }
    }
}

impl TableGuard<'_> {
    /// Entry for `id`, if registered.
    pub fn get(&self, id: u32) -> Option<&LogicalConnection> {
        self.entries.get(&id)
    }

    /// Draw a random id not present in the table.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::IdSpaceExhausted`] after [`ID_PROBE_LIMIT`]
    /// colliding draws.
    pub fn allocate_id(&self) -> Result<u32, MuxError> {
        self.allocate_with(rand::random::<u32>)
    }

    fn allocate_with(&self, mut draw: impl FnMut() -> u32) -> Result<u32, MuxError> {
        for _ in 0..ID_PROBE_LIMIT {
            let candidate = draw();
            if candidate != UNASSIGNED_ID && !self.entries.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(MuxError::IdSpaceExhausted(ID_PROBE_LIMIT))
    }

    /// Insert a connection under `id`, replacing any existing entry.
    pub fn insert(&mut self, id: u32, writer: ConnWriter) -> &LogicalConnection {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let conn = LogicalConnection {
            id,
            serial,
            writer: Arc::new(Mutex::new(writer)),
        };
        match self.entries.entry(id) {
            Entry::Occupied(mut slot) => {
                log::debug!("[Table] conn={:08x} replaced existing entry", id);
                slot.insert(conn);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(conn),
        }
    }
}
