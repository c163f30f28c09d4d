//! In-flight query table shared by sender, receiver and timeout scanner
//!
//! The table maps live 16-bit transaction identifiers to their pending
//! queries. It is the synchronization point of the pipeline: the sender
//! inserts, the receiver completes, the scanner expires. Sharded-map
//! removal guarantees an entry is consumed by exactly one of the two.
//!
//! Size is bounded by admission control: the sender must [`reserve`] a
//! slot before inserting, and a slot returns to the pool when the receiver
//! completes an entry or the scanner drops one permanently. Moving an
//! entry to a fresh identifier for retransmission keeps its slot.
//!
//! [`reserve`]: RetryTable::reserve

use anyhow::{Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::generator::Candidate;

/// In-flight state for one outbound packet.
#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub candidate: Candidate,
    /// Resolver the query was sent to; replies from anyone else are
    /// ignored.
    pub resolver: SocketAddr,
    /// Monotonic instant after which the query counts as lost.
    pub deadline: Instant,
}

pub struct RetryTable {
    entries: DashMap<u16, PendingQuery>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl RetryTable {
    /// Creates a table admitting at most `capacity` outstanding queries.
    /// The ceiling is clamped well below the 16-bit id space so identifier
    /// allocation terminates quickly even at full load.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, 60_000);
        Self {
            entries: DashMap::new(),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waits for a free slot. The permit is consumed by [`insert`].
    ///
    /// [`insert`]: RetryTable::insert
    pub async fn reserve(&self) -> Result<OwnedSemaphorePermit> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .context("retry table closed")
    }

    /// Registers a new query under a fresh transaction identifier,
    /// consuming the reservation.
    pub fn insert(&self, pending: PendingQuery, permit: OwnedSemaphorePermit) -> u16 {
        let id = self.insert_inner(pending);
        permit.forget();
        id
    }

    /// Re-registers a retransmitted entry under a fresh identifier. The
    /// caller already owns the slot, obtained through [`expire`].
    ///
    /// [`expire`]: RetryTable::expire
    pub fn reinsert(&self, pending: PendingQuery) -> u16 {
        self.insert_inner(pending)
    }

    fn insert_inner(&self, pending: PendingQuery) -> u16 {
        // Random ids, skipping the occupied set. Admission keeps occupancy
        // under 60k of 65536, so the expected number of draws stays small.
        let mut pending = Some(pending);
        loop {
            let id = rand::random::<u16>();
            match self.entries.entry(id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    if let Some(p) = pending.take() {
                        slot.insert(p);
                    }
                    return id;
                }
            }
        }
    }

    /// Removes the entry for a matching reply and frees its slot. Returns
    /// the entry only when `from` is the resolver the query was sent to;
    /// late or spurious replies leave the table untouched.
    pub fn complete(&self, id: u16, from: SocketAddr) -> Option<PendingQuery> {
        let (_, pending) = self.entries.remove_if(&id, |_, p| p.resolver == from)?;
        self.slots.add_permits(1);
        Some(pending)
    }

    /// Removes every entry whose deadline has passed. Slots are NOT
    /// released: for each returned entry the scanner either [`reinsert`]s
    /// it or calls [`release`] after a permanent drop.
    ///
    /// [`reinsert`]: RetryTable::reinsert
    /// [`release`]: RetryTable::release
    pub fn expire(&self, now: Instant) -> Vec<PendingQuery> {
        let expired: Vec<u16> = self
            .entries
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| *entry.key())
            .collect();
        let mut out = Vec::with_capacity(expired.len());
        for id in expired {
            // remove_if re-checks the deadline, so a reply that raced in
            // between is not stolen from the receiver.
            if let Some((_, pending)) = self.entries.remove_if(&id, |_, p| p.deadline <= now) {
                out.push(pending);
            }
        }
        out
    }

    /// Returns a slot after a permanent drop.
    pub fn release(&self) {
        self.slots.add_permits(1);
    }
}
