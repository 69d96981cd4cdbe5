//! Subscription registry.
//!
//! The registry is the single source of truth for what the application wants
//! to hear, independent of whether a connection exists. The supervisor
//! replays it after every handshake.
//!
//! Each entry owns a [`Slot`] that gates delivery. Unsubscribing clears the
//! slot's `active` flag and then takes its gate once, so by the time
//! unsubscribe returns no handler call for it is running or can start.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashMap;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::identifiers::{Generation, SubscriptionId};
use crate::protocol::Message;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for every message on a subscribed destination.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Registry shared by channel handles and the supervisor.
pub(crate) type SharedRegistry = Arc<Mutex<SubscriptionRegistry>>;

// ============================================================================
// SubscriptionHandle
// ============================================================================

/// Receipt returned by `subscribe`, passed back to `unsubscribe`.
///
/// Subscribing twice to one destination returns equal handles. A handle
/// kept across an unsubscribe/subscribe cycle no longer matches the entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    destination: String,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    /// Returns the subscribed destination.
    #[inline]
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Returns the wire subscription id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

// ============================================================================
// Slot
// ============================================================================

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Handler ran to completion.
    Delivered,
    /// Slot was deactivated before the handler could run.
    Inactive,
    /// Handler panicked; the panic was contained.
    Panicked,
}

/// Delivery endpoint of one registry entry.
pub(crate) struct Slot {
    destination: String,
    id: SubscriptionId,
    active: AtomicBool,
    handler: Mutex<Handler>,
    gate: ReentrantMutex<()>,
}

impl Slot {
    fn new(destination: String, id: SubscriptionId, handler: Handler) -> Self {
        Self {
            destination,
            id,
            active: AtomicBool::new(true),
            handler: Mutex::new(handler),
            gate: ReentrantMutex::new(()),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Runs the handler once for `message` if the slot is still active.
    pub(crate) fn deliver(&self, message: &Message) -> Delivery {
        let _gate = self.gate.lock();
        if !self.is_active() {
            return Delivery::Inactive;
        }

        let handler = Arc::clone(&self.handler.lock());
        match catch_unwind(AssertUnwindSafe(|| handler(message))) {
            Ok(()) => Delivery::Delivered,
            Err(_) => {
                let e = Error::handler_panicked(&self.destination);
                error!(destination = %self.destination, error = %e, "Subscription handler panicked");
                Delivery::Panicked
            }
        }
    }

    /// Waits for an in-flight delivery to finish.
    ///
    /// Re-entrant, so a handler may unsubscribe itself.
    pub(crate) fn quiesce(&self) {
        drop(self.gate.lock());
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("destination", &self.destination)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SubscriptionRegistry
// ============================================================================

#[derive(Debug)]
struct Entry {
    slot: Arc<Slot>,
    /// Insertion order, used for replay.
    seq: u64,
    /// Generation the entry was last subscribed on the wire under.
    wire: Option<Generation>,
}

/// Entry removed by [`SubscriptionRegistry::remove`].
#[derive(Debug)]
pub(crate) struct Removed {
    pub(crate) slot: Arc<Slot>,
    pub(crate) wire: Option<Generation>,
}

/// Destination → subscription map.
#[derive(Debug)]
pub(crate) struct SubscriptionRegistry {
    entries: FxHashMap<String, Entry>,
    next_seq: u64,
    /// The supervisor owns the wire subscription for this destination.
    personal: String,
}

impl SubscriptionRegistry {
    pub(crate) fn new(personal: impl Into<String>) -> Self {
        Self {
            entries: FxHashMap::default(),
            next_seq: 0,
            personal: personal.into(),
        }
    }

    /// Wraps a registry for sharing.
    pub(crate) fn shared(personal: impl Into<String>) -> SharedRegistry {
        Arc::new(Mutex::new(Self::new(personal)))
    }

    /// Adds or updates the entry for `destination`.
    ///
    /// An existing entry keeps its id and wire state; only its handler is
    /// replaced.
    pub(crate) fn insert(&mut self, destination: &str, handler: Handler) -> SubscriptionHandle {
        if let Some(entry) = self.entries.get(destination) {
            *entry.slot.handler.lock() = handler;
            debug!(destination, id = %entry.slot.id, "Subscription handler replaced");
            return SubscriptionHandle {
                destination: destination.to_string(),
                id: entry.slot.id,
            };
        }

        let id = SubscriptionId::next();
        let seq = self.next_seq;
        self.next_seq += 1;

        let slot = Arc::new(Slot::new(destination.to_string(), id, handler));
        self.entries.insert(
            destination.to_string(),
            Entry {
                slot,
                seq,
                wire: None,
            },
        );

        debug!(destination, %id, "Subscription registered");
        SubscriptionHandle {
            destination: destination.to_string(),
            id,
        }
    }

    /// Removes the entry matching `handle` and marks it inactive.
    ///
    /// Returns `None` if the handle is stale. The caller must call
    /// [`Slot::quiesce`] after releasing the registry lock.
    pub(crate) fn remove(&mut self, handle: &SubscriptionHandle) -> Option<Removed> {
        let matches = self
            .entries
            .get(&handle.destination)
            .is_some_and(|entry| entry.slot.id == handle.id);
        if !matches {
            debug!(destination = %handle.destination, id = %handle.id, "Ignoring stale subscription handle");
            return None;
        }

        let entry = self.entries.remove(&handle.destination)?;
        entry.slot.deactivate();
        debug!(destination = %handle.destination, id = %handle.id, "Subscription removed");

        Some(Removed {
            slot: entry.slot,
            wire: entry.wire,
        })
    }

    /// Returns the delivery slot for `destination`.
    pub(crate) fn slot(&self, destination: &str) -> Option<Arc<Slot>> {
        self.entries.get(destination).map(|e| Arc::clone(&e.slot))
    }

    /// Claims the wire subscription for `destination` on `generation`.
    ///
    /// Returns the id to SUBSCRIBE with, or `None` if the entry is gone,
    /// already live on this generation, or the personal destination.
    pub(crate) fn claim(&mut self, destination: &str, generation: Generation) -> Option<SubscriptionId> {
        if destination == self.personal {
            return None;
        }
        let entry = self.entries.get_mut(destination)?;
        if entry.wire == Some(generation) || !entry.slot.is_active() {
            return None;
        }
        entry.wire = Some(generation);
        Some(entry.slot.id)
    }

    /// Subscribes every active entry in insertion order.
    ///
    /// `send` is called once per entry not yet live on `generation`. Stops
    /// at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error from `send`.
    pub(crate) fn replay<F>(&mut self, generation: Generation, mut send: F) -> Result<usize>
    where
        F: FnMut(&str, SubscriptionId) -> Result<()>,
    {
        let mut ordered: Vec<_> = self
            .entries
            .iter_mut()
            .filter(|(destination, _)| **destination != self.personal)
            .collect();
        ordered.sort_by_key(|(_, entry)| entry.seq);

        let mut sent = 0;
        for (destination, entry) in ordered {
            if entry.wire == Some(generation) || !entry.slot.is_active() {
                continue;
            }
            send(destination, entry.slot.id)?;
            entry.wire = Some(generation);
            sent += 1;
        }

        Ok(sent)
    }

    /// Forgets which generation each entry is live on.
    pub(crate) fn reset_wire(&mut self) {
        for entry in self.entries.values_mut() {
            entry.wire = None;
        }
    }

    /// Deactivates and drops every entry.
    pub(crate) fn clear(&mut self) -> Vec<Arc<Slot>> {
        self.entries
            .drain()
            .map(|(_, entry)| {
                entry.slot.deactivate();
                entry.slot
            })
            .collect()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub(crate) fn contains(&self, destination: &str) -> bool {
        self.entries.contains_key(destination)
    }

    /// Returns destinations in insertion order.
    pub(crate) fn destinations(&self) -> Vec<String> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries.into_iter().map(|(d, _)| d.clone()).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
