// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed-capacity table of station records, indexed both by association ID and by hardware
//! address.
//!
//! Records live in an arena of slots addressed by association ID. Each slot also carries the
//! index of the next slot in its hash chain, so address lookups walk indices rather than
//! pointers. A record is reachable through its hash chain if and only if its slot is `Added`.
//!
//! Deletion is ordered: the record is first marked invalid, then its slot moves to `TearingDown`,
//! then it is unlinked from its chain and the slot is emptied. Records are reference counted, and
//! `delete` does not return until any dispatcher currently holding the record's lock has released
//! it.

use {
    crate::{
        error::PeerTableError,
        frame::{MacAddr, MacFmt, Mpdu},
        peer::{Peer, PeerKind},
        timer::EventId,
    },
    log::{error, info},
    parking_lot::RwLock,
    std::sync::Arc,
};

#[derive(Debug)]
enum SlotState {
    Empty,
    Added(Arc<Peer>),
    TearingDown(Arc<Peer>),
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    next: Option<usize>,
}

#[derive(Debug)]
struct TableInner {
    slots: Vec<Slot>,
    buckets: Vec<Option<usize>>,
    next_generation: u64,
}

impl TableInner {
    fn bucket(&self, addr: &MacAddr) -> usize {
        addr.iter().map(|b| *b as usize).sum::<usize>() % self.buckets.len()
    }

    /// Walks the chain of `addr`'s bucket. The walk is bounded by the number of slots so that a
    /// corrupted chain cannot loop forever.
    fn chain(&self, addr: &MacAddr) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.buckets[self.bucket(addr)];
        std::iter::from_fn(move || {
            let index = cursor?;
            cursor = self.slots.get(index).and_then(|slot| slot.next);
            Some(index)
        })
        .take(self.slots.len())
    }

    fn unlink(&mut self, index: usize, addr: &MacAddr) -> bool {
        let bucket = self.bucket(addr);
        let mut prev = None;
        let mut found = false;
        for cursor in self.chain(addr) {
            if cursor == index {
                found = true;
                break;
            }
            prev = Some(cursor);
        }
        if !found {
            return false;
        }
        let next = self.slots[index].next.take();
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.buckets[bucket] = next,
        }
        true
    }
}

#[derive(Debug)]
pub struct PeerTable {
    inner: RwLock<TableInner>,
}

impl PeerTable {
    /// Creates a table for association IDs `0..capacity`.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot { state: SlotState::Empty, next: None });
        let buckets = vec![None; capacity.max(1)];
        Self { inner: RwLock::new(TableInner { slots, buckets, next_generation: 0 }) }
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().slots.len()
    }

    /// Number of added peers.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Added(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&self, addr: MacAddr, assoc_id: u16) -> Result<Arc<Peer>, PeerTableError> {
        let mut inner = self.inner.write();
        let index = assoc_id as usize;
        match inner.slots.get(index) {
            None => return Err(PeerTableError::InvalidId(assoc_id)),
            Some(Slot { state: SlotState::Empty, .. }) => (),
            Some(_) => return Err(PeerTableError::DuplicateId(assoc_id)),
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let peer = Arc::new(Peer::new(addr, assoc_id, generation, PeerKind::Station));

        let bucket = inner.bucket(&addr);
        let head = inner.buckets[bucket];
        inner.slots[index] = Slot { state: SlotState::Added(peer.clone()), next: head };
        inner.buckets[bucket] = Some(index);
        info!("peer {} added with association ID {}", addr.to_mac_string(), assoc_id);
        Ok(peer)
    }

    pub fn lookup_by_address(&self, addr: &MacAddr) -> Option<Arc<Peer>> {
        let inner = self.inner.read();
        let found = inner.chain(addr).find_map(|index| match &inner.slots[index].state {
            SlotState::Added(peer) if peer.addr() == *addr => Some(peer.clone()),
            _ => None,
        });
        found
    }

    pub fn lookup_by_assoc_id(&self, assoc_id: u16) -> Option<Arc<Peer>> {
        match &self.inner.read().slots.get(assoc_id as usize)?.state {
            SlotState::Added(peer) => Some(peer.clone()),
            _ => None,
        }
    }

    /// Resolves the peer ID carried by an rx indication. Peer IDs are association IDs.
    pub fn find_peer_by_id(&self, peer_id: u16) -> Option<Arc<Peer>> {
        self.lookup_by_assoc_id(peer_id)
    }

    /// Returns true if `peer` is still the record added under its association ID.
    pub fn is_current(&self, peer: &Peer) -> bool {
        self.lookup_by_assoc_id(peer.assoc_id())
            .map_or(false, |current| current.generation() == peer.generation())
    }

    /// Returns a record's receive state to its just-associated form. Buffered MPDUs and armed
    /// reorder timeouts are handed back for the caller to dispose of.
    pub fn init_station_state(&self, peer: &Peer) -> (Vec<Mpdu>, Vec<EventId>) {
        peer.lock_rx().reset()
    }

    /// Deletes the record added under `assoc_id`, which must have address `addr`.
    ///
    /// Returns the removed record once no dispatcher holds its lock. If the record cannot be
    /// found in its hash chain the slot is left in teardown, so it is neither returned by lookups
    /// nor reusable, and `ChainCorrupt` is returned.
    pub fn delete(&self, addr: &MacAddr, assoc_id: u16) -> Result<Arc<Peer>, PeerTableError> {
        let peer = {
            let mut inner = self.inner.write();
            let index = assoc_id as usize;
            let peer = match inner.slots.get(index).map(|slot| &slot.state) {
                Some(SlotState::Added(peer)) if peer.addr() == *addr => peer.clone(),
                _ => return Err(PeerTableError::NotFound(assoc_id)),
            };

            peer.invalidate();
            inner.slots[index].state = SlotState::TearingDown(peer.clone());
            if !inner.unlink(index, addr) {
                error!(
                    "peer {} (association ID {}) missing from its hash chain",
                    addr.to_mac_string(),
                    assoc_id
                );
                return Err(PeerTableError::ChainCorrupt(assoc_id));
            }
            inner.slots[index].state = SlotState::Empty;
            peer
        };

        // Wait for in-flight dispatchers.
        drop(peer.lock_rx());
        info!("peer {} deleted (association ID {})", addr.to_mac_string(), assoc_id);
        Ok(peer)
    }

    /// Removes every record. Used when the interface is torn down.
    pub fn clear(&self) -> Vec<Arc<Peer>> {
        let removed = {
            let mut inner = self.inner.write();
            let mut removed = vec![];
            for slot in inner.slots.iter_mut() {
                match std::mem::replace(&mut slot.state, SlotState::Empty) {
                    SlotState::Added(peer) | SlotState::TearingDown(peer) => {
                        peer.invalidate();
                        removed.push(peer);
                    }
                    SlotState::Empty => (),
                }
                slot.next = None;
            }
            inner.buckets.iter_mut().for_each(|bucket| *bucket = None);
            removed
        };
        for peer in &removed {
            drop(peer.lock_rx());
        }
        removed
    }
}
