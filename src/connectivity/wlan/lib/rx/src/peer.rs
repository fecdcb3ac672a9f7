// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Station records kept in the [`PeerTable`](crate::peer_table::PeerTable).

use {
    crate::{
        frame::{MacAddr, Mpdu},
        reorder::{ReorderWindow, WindowState},
        security::PeerSecurity,
        seq,
        signal::{EwmaSignalStrength, PEER_SIGNAL_WEIGHT},
        timer::EventId,
        NUM_TIDS,
    },
    parking_lot::{Mutex, MutexGuard},
    std::sync::atomic::{AtomicBool, Ordering},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerKind {
    /// An associated station.
    Station,
    /// Catch-all record used in monitor mode for frames from unknown transmitters.
    Monitor,
}

/// Outcome of the host-side sequence number check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqCheck {
    Ok,
    Duplicate,
    OutOfBounds,
}

#[derive(Debug, Default)]
pub struct TidState {
    /// Last sequence number accepted on this TID, `None` until the first frame.
    pub(crate) last_seq: Option<u16>,
    pub(crate) reorder: ReorderWindow,
    /// Reorder timeout armed for this TID.
    pub(crate) timeout: Option<EventId>,
}

impl TidState {
    /// Rejects MPDUs the reorder window cannot be trusted to catch.
    ///
    /// An active window is checked against its bounds only when the host is the reorder
    /// authority. A disabled window falls back to a last-sequence check: a repeat of the last
    /// sequence number is a duplicate and anything preceding it is out of bounds.
    pub fn check_sequence(&mut self, seq_num: u16, host_authority: bool) -> SeqCheck {
        let verdict = match self.reorder.state() {
            WindowState::Active if !host_authority => SeqCheck::Ok,
            WindowState::Active => {
                if self.reorder.is_released(seq_num) {
                    SeqCheck::Duplicate
                } else if !self.reorder.is_in_window(seq_num) {
                    SeqCheck::OutOfBounds
                } else {
                    SeqCheck::Ok
                }
            }
            WindowState::Disabled => match self.last_seq {
                Some(last) if last == seq_num => SeqCheck::Duplicate,
                Some(last) if seq::precedes(seq_num, last) => SeqCheck::OutOfBounds,
                _ => SeqCheck::Ok,
            },
        };
        if verdict == SeqCheck::Ok {
            self.last_seq = Some(seq_num);
        }
        verdict
    }

    pub fn window(&self) -> &ReorderWindow {
        &self.reorder
    }
}

/// Receive state of one peer. Only accessed with the peer's lock held.
#[derive(Debug)]
pub struct PeerRxState {
    pub(crate) security: PeerSecurity,
    pub(crate) tids: Vec<TidState>,
    pub(crate) signal: Option<EwmaSignalStrength>,
}

impl Default for PeerRxState {
    fn default() -> Self {
        let mut tids = Vec::with_capacity(NUM_TIDS);
        tids.resize_with(NUM_TIDS, TidState::default);
        Self { security: PeerSecurity::default(), tids, signal: None }
    }
}

impl PeerRxState {
    /// Returns the state to its just-associated form: no keys, no sequence history, disabled
    /// windows. Buffered MPDUs and armed timeouts are handed back to the caller.
    pub(crate) fn reset(&mut self) -> (Vec<Mpdu>, Vec<EventId>) {
        let mut buffered = vec![];
        let mut timeouts = vec![];
        for tid in self.tids.iter_mut() {
            buffered.extend(tid.reorder.flush_all());
            timeouts.extend(tid.timeout.take());
            *tid = TidState::default();
        }
        self.security = PeerSecurity::default();
        self.signal = None;
        (buffered, timeouts)
    }

    pub(crate) fn update_signal(&mut self, rssi_dbm: Option<i8>) {
        if let Some(dbm) = rssi_dbm {
            match &mut self.signal {
                Some(signal) => signal.update_average(dbm),
                None => self.signal = Some(EwmaSignalStrength::new(PEER_SIGNAL_WEIGHT, dbm)),
            }
        }
    }

    pub fn security(&self) -> &PeerSecurity {
        &self.security
    }

    pub fn tid(&self, tid: usize) -> Option<&TidState> {
        self.tids.get(tid)
    }
}

#[derive(Debug)]
pub struct Peer {
    addr: MacAddr,
    assoc_id: u16,
    generation: u64,
    kind: PeerKind,
    valid: AtomicBool,
    rx: Mutex<PeerRxState>,
}

impl Peer {
    pub(crate) fn new(addr: MacAddr, assoc_id: u16, generation: u64, kind: PeerKind) -> Self {
        Self {
            addr,
            assoc_id,
            generation,
            kind,
            valid: AtomicBool::new(true),
            rx: Mutex::new(PeerRxState::default()),
        }
    }

    pub fn addr(&self) -> MacAddr {
        self.addr
    }

    pub fn assoc_id(&self) -> u16 {
        self.assoc_id
    }

    /// Distinguishes successive records added under the same association ID.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    /// Cleared as the first step of deletion. A dispatcher holding a reference must re-check this
    /// after taking the peer's lock.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn lock_rx(&self) -> MutexGuard<'_, PeerRxState> {
        self.rx.lock()
    }

    /// Averaged receive signal strength, if any frame carried one.
    pub fn signal_dbm(&self) -> Option<i8> {
        self.rx.lock().signal.as_ref().map(|signal| signal.dbm())
    }

    pub fn security(&self) -> PeerSecurity {
        self.rx.lock().security.clone()
    }
}
