//! Bounded registry of connected clients.
//!
//! Records live in a [`Slab`] sized to `max_clients`, so finding a vacant
//! slot is O(1). Every operation takes the one registry mutex and finishes
//! without awaiting; fan-out happens while the lock is held, which makes
//! "who receives this message" and "who is registered" a single atomic view.
//!
//! Invariants, checked on every mutation in debug builds:
//!
//! - `count` equals the number of records with `active == true`
//! - `count <= occupied <= capacity`
//! - no two records share a connection id

use crate::broadcast::departure_notice;
use crate::connection::{Connection, ConnectionId};
use crate::protocol::Username;
use chrono::{DateTime, Local};
use slab::Slab;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Index of a record inside the registry.
pub type SlotId = usize;

/// Registration failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry is full")]
    Full,

    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("registry is shut down")]
    Closed,
}

/// One registered client.
#[derive(Debug)]
pub(crate) struct ClientRecord {
    pub(crate) connection: Connection,
    pub(crate) username: Username,
    pub(crate) peer_address: SocketAddr,
    pub(crate) connected_at: DateTime<Local>,
    /// Cancels the task driving this connection, at shutdown or when the
    /// client stops draining its mailbox.
    pub(crate) worker: CancellationToken,
    pub(crate) active: bool,
    pub(crate) disconnect_notified: bool,
}

impl ClientRecord {
    fn info(&self, slot: SlotId) -> ClientInfo {
        ClientInfo {
            id: self.connection.id(),
            slot,
            username: self.username.clone(),
            peer_address: self.peer_address,
            connected_at: self.connected_at,
            active: self.active,
        }
    }
}

/// Read-only summary of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ConnectionId,
    pub slot: SlotId,
    pub username: Username,
    pub peer_address: SocketAddr,
    pub connected_at: DateTime<Local>,
    pub active: bool,
}

/// Outcome of [`ClientRegistry::remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Removed {
        info: ClientInfo,
        /// Deliveries of the departure notice, or `None` if it had
        /// already been announced.
        notified: Option<usize>,
    },
    NotFound,
}

#[derive(Debug)]
pub(crate) struct RegistryState {
    pub(crate) slots: Slab<ClientRecord>,
    pub(crate) count: usize,
    pub(crate) closed: bool,
}

impl RegistryState {
    fn slot_of(&self, id: ConnectionId) -> Option<SlotId> {
        self.slots
            .iter()
            .find(|(_, record)| record.connection.id() == id)
            .map(|(slot, _)| slot)
    }

    #[cfg(debug_assertions)]
    fn check(&self, capacity: usize) {
        let active = self.slots.iter().filter(|(_, r)| r.active).count();
        debug_assert_eq!(self.count, active);
        debug_assert!(self.count <= self.slots.len());
        debug_assert!(self.slots.len() <= capacity);
    }

    #[cfg(not(debug_assertions))]
    fn check(&self, _capacity: usize) {}
}

/// Thread-safe client registry.
#[derive(Debug)]
pub struct ClientRegistry {
    state: Mutex<RegistryState>,
    capacity: usize,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                slots: Slab::with_capacity(capacity),
                count: 0,
                closed: false,
            }),
            capacity,
        }
    }

    /// A panicking holder cannot leave the state half-updated in a way later
    /// callers care about, so poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a client.
    pub fn add(
        &self,
        connection: Connection,
        peer_address: SocketAddr,
        username: Username,
        worker: CancellationToken,
    ) -> Result<SlotId, RegistryError> {
        let mut state = self.lock();

        if state.closed {
            return Err(RegistryError::Closed);
        }
        if state.count >= self.capacity || state.slots.len() >= self.capacity {
            return Err(RegistryError::Full);
        }
        let id = connection.id();
        if state.slot_of(id).is_some() {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        let slot = state.slots.insert(ClientRecord {
            connection,
            username,
            peer_address,
            connected_at: Local::now(),
            worker,
            active: true,
            disconnect_notified: false,
        });
        state.count += 1;
        state.check(self.capacity);

        info!(
            conn_id = %id,
            slot,
            username = %state.slots[slot].username,
            peer = %peer_address,
            clients = state.count,
            "Client registered"
        );
        Ok(slot)
    }

    /// Deregister a client, announcing its departure unless that already
    /// happened. Safe to call more than once.
    pub fn remove(&self, id: ConnectionId) -> Removal {
        let mut state = self.lock();

        let Some(slot) = state.slot_of(id) else {
            return Removal::NotFound;
        };

        let notified = if state.slots[slot].disconnect_notified {
            None
        } else {
            state.slots[slot].disconnect_notified = true;
            let notice = departure_notice(state.slots[slot].username.as_str()).encode();
            Some(state.fan_out(&notice, Some(id)))
        };

        let record = state.slots.remove(slot);
        if record.active {
            state.count -= 1;
        }
        state.check(self.capacity);

        info!(
            conn_id = %id,
            username = %record.username,
            clients = state.count,
            "Client removed"
        );
        Removal::Removed {
            info: record.info(slot),
            notified,
        }
    }

    /// Announce an explicit departure to everyone else.
    ///
    /// Returns the number of deliveries, or `None` if the client is unknown
    /// or was already announced.
    pub fn announce_departure(&self, id: ConnectionId) -> Option<usize> {
        let mut state = self.lock();

        let slot = state.slot_of(id)?;
        if state.slots[slot].disconnect_notified {
            return None;
        }
        state.slots[slot].disconnect_notified = true;
        let notice = departure_notice(state.slots[slot].username.as_str()).encode();
        Some(state.fan_out(&notice, Some(id)))
    }

    /// Look up an active client.
    pub fn find(&self, id: ConnectionId) -> Option<ClientInfo> {
        let state = self.lock();
        let slot = state.slot_of(id)?;
        let record = &state.slots[slot];
        record.active.then(|| record.info(slot))
    }

    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.find(id).is_some()
    }

    /// All active clients, in slot order.
    pub fn snapshot(&self) -> Vec<ClientInfo> {
        self.lock()
            .slots
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(slot, record)| record.info(slot))
            .collect()
    }

    /// Number of active clients.
    pub fn count(&self) -> usize {
        self.lock().count
    }

    /// Number of occupied slots, active or not.
    pub fn occupied(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close the registry: cancel every worker and drop every record.
    ///
    /// No departure notices are sent. Later `add` calls fail with
    /// [`RegistryError::Closed`] and later `remove` calls find nothing.
    pub fn shutdown(&self) -> Vec<ClientInfo> {
        let mut state = self.lock();
        state.closed = true;

        let drained: Vec<ClientInfo> = state
            .slots
            .iter()
            .map(|(slot, record)| {
                record.worker.cancel();
                record.info(slot)
            })
            .collect();
        state.slots.clear();
        state.count = 0;
        state.check(self.capacity);

        debug!(closed = drained.len(), "Registry shut down");
        drained
    }
}
