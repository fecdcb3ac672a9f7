// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Indication dispatcher.
//!
//! [`RxContext`] consumes one [`InboundBatch`] at a time: it resolves the peer, runs each MPDU
//! through the replay check, the sequence number backstop and the reorder window, applies any
//! release request carried by the batch, filters the resulting frames and delivers them. Batches
//! for different peers may be dispatched concurrently; batches for the same peer are serialized
//! by the peer's lock, which is held from ingest until release.
//!
//! Lock order: peer receive state, then filter, then timer.

use {
    crate::{
        config::RxConfig,
        delivery::RxDelivery,
        device::{DeliverySink, KeyManagement, MicFailure, RxTransport},
        error::Error,
        filter::{FilterVerdict, PrivacyExemption, PrivacyFilter},
        frame::{FlushRequest, InboundBatch, MacAddr, MacFmt, Mpdu, MpduStatus, RxFrame},
        peer::{Peer, PeerKind, PeerRxState, SeqCheck, TidState},
        peer_table::PeerTable,
        reorder::{self, ReorderWindow, StoreResult},
        security::{KeyDirection, PnCheck, SecurityIndication},
        stats::{DropReason, RxStats, RxStatsSnapshot},
        timer::{EventId, Scheduler, Timer},
        VdevId, NUM_TIDS,
    },
    log::{debug, error, info, trace, warn},
    parking_lot::{Mutex, RwLock},
    std::{sync::Arc, time::Instant},
};

const MONITOR_PEER_ADDR: MacAddr = [0xff; 6];

/// Reorder timeout armed for one (peer, TID). The generation ties the event to one incarnation
/// of the peer, so an event outliving its peer is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ReorderTimeout {
    assoc_id: u16,
    generation: u64,
    tid: u8,
}

/// What happened to one indication.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndicationSummary {
    /// Frames handed to the delivery sink.
    pub delivered: usize,
    /// MPDUs newly held in a reorder window.
    pub buffered: usize,
    /// MPDUs and frames discarded.
    pub dropped: usize,
}

#[derive(Default)]
struct BatchState {
    pending: Vec<Mpdu>,
    mic_failures: Vec<MicFailure>,
    summary: IndicationSummary,
}

fn drop_reason(status: MpduStatus) -> DropReason {
    match status {
        MpduStatus::DupError => DropReason::Duplicate,
        MpduStatus::ReplayError => DropReason::Replay,
        MpduStatus::TkipMicError | MpduStatus::DecryptError => DropReason::IntegrityFailure,
        MpduStatus::InvalidPeer | MpduStatus::UnauthorizedPeer => DropReason::PeerNotFound,
        _ => DropReason::RxError,
    }
}

/// Rejects a batch before any of it is committed to peer state.
fn check_batch(batch: &InboundBatch) -> Result<(), Error> {
    if batch.tid() as usize >= NUM_TIDS {
        return Err(Error::InvalidTid(batch.tid()));
    }
    if let Some(FlushRequest::Release { tid, .. }) = batch.flush() {
        if tid as usize >= NUM_TIDS {
            return Err(Error::InvalidTid(tid));
        }
    }
    batch.check_ranges()
}

/// Receive path state of one logical interface.
pub struct RxContext {
    vdev_id: VdevId,
    config: RxConfig,
    peers: Arc<PeerTable>,
    monitor_peer: Option<Arc<Peer>>,
    transport: Arc<dyn RxTransport>,
    key_mgmt: Arc<dyn KeyManagement>,
    sink: Arc<dyn DeliverySink>,
    delivery: Box<dyn RxDelivery>,
    filter: RwLock<PrivacyFilter>,
    timer: Mutex<Timer<ReorderTimeout>>,
    stats: RxStats,
}

impl RxContext {
    pub fn new(
        vdev_id: VdevId,
        config: RxConfig,
        transport: Arc<dyn RxTransport>,
        key_mgmt: Arc<dyn KeyManagement>,
        sink: Arc<dyn DeliverySink>,
        scheduler: Box<dyn Scheduler>,
    ) -> Result<Self, Error> {
        config.validate().map_err(Error::Config)?;
        let monitor_peer = if config.monitor_mode {
            Some(Arc::new(Peer::new(MONITOR_PEER_ADDR, u16::MAX, u64::MAX, PeerKind::Monitor)))
        } else {
            None
        };
        Ok(Self {
            vdev_id,
            peers: Arc::new(PeerTable::new(config.peer_capacity)),
            monitor_peer,
            transport,
            key_mgmt,
            sink,
            delivery: config.delivery_mode.handler(),
            filter: RwLock::new(PrivacyFilter::new(
                config.drop_unencrypted,
                config.privacy_exemptions.clone(),
            )),
            timer: Mutex::new(Timer::new(scheduler)),
            stats: RxStats::new(),
            config,
        })
    }

    pub fn vdev_id(&self) -> VdevId {
        self.vdev_id
    }

    pub fn config(&self) -> &RxConfig {
        &self.config
    }

    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    pub fn stats(&self) -> RxStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn handle_indication(&self, batch: InboundBatch) -> Result<IndicationSummary, Error> {
        self.handle_indication_at(batch, Instant::now())
    }

    /// Processes one indication as of `now`.
    ///
    /// Every MPDU of the batch is either delivered, buffered or returned to the transport, and
    /// the transport is asked to replenish its buffers exactly once, whatever the outcome.
    pub fn handle_indication_at(
        &self,
        batch: InboundBatch,
        now: Instant,
    ) -> Result<IndicationSummary, Error> {
        self.stats.record_batch();
        let transport = &self.transport;
        let mut batch = scopeguard::guard(batch, |mut batch| {
            for mpdu in batch.drain_mpdus() {
                transport.free_mpdu(mpdu);
            }
            transport.replenish_buffers();
        });
        let peer_id = batch.peer_id();

        let peer = match self.resolve_peer(peer_id) {
            Some(peer) => peer,
            None => {
                let dropped = batch.remaining_mpdus();
                debug!("rx indication for unknown peer {}: dropping {} MPDUs", peer_id, dropped);
                self.stats.record_drop(DropReason::PeerNotFound, dropped);
                return Ok(IndicationSummary { dropped, ..Default::default() });
            }
        };
        if let Err(e) = check_batch(&batch) {
            warn!("rejecting rx indication for peer {}: {}", peer_id, e);
            self.stats.record_malformed();
            self.stats.record_drop(DropReason::RxError, batch.remaining_mpdus());
            return Err(e);
        }

        let mut state = BatchState::default();
        let result = {
            let mut rx = peer.lock_rx();
            if !peer.is_valid() {
                // Deleted between lookup and lock.
                let dropped = batch.remaining_mpdus();
                debug!("peer {} removed during rx: dropping {} MPDUs", peer_id, dropped);
                self.stats.record_drop(DropReason::PeerRemoved, dropped);
                return Ok(IndicationSummary { dropped, ..Default::default() });
            }
            self.ingest(&peer, &mut rx, &mut batch, now, &mut state)
                .map(|()| self.filter_mpdus(&rx, std::mem::take(&mut state.pending), &mut state))
        };

        for failure in state.mic_failures.drain(..) {
            self.key_mgmt.on_mic_failure(failure);
        }

        let frames = match result {
            Ok(frames) => frames,
            Err(e) => {
                self.stats.record_malformed();
                let discarded = state.pending.len() + batch.remaining_mpdus();
                self.stats.record_drop(DropReason::RxError, discarded);
                for mpdu in state.pending.drain(..) {
                    self.transport.free_mpdu(mpdu);
                }
                return Err(e);
            }
        };

        let leftover = batch.remaining_mpdus();
        if leftover > 0 {
            warn!("rx indication for peer {} has {} MPDUs outside any range", peer_id, leftover);
            self.stats.record_drop(DropReason::RxError, leftover);
            state.summary.dropped += leftover;
        }
        // Frees anything left in the batch and replenishes before delivery.
        drop(batch);

        state.summary.delivered = self.deliver(&peer, frames);
        Ok(state.summary)
    }

    /// Falls back to the monitor record for unknown transmitters in monitor mode.
    fn resolve_peer(&self, peer_id: u16) -> Option<Arc<Peer>> {
        self.peers.find_peer_by_id(peer_id).or_else(|| self.monitor_peer.clone())
    }

    fn discard(&self, state: &mut BatchState, mpdu: Mpdu, reason: DropReason) {
        self.stats.record_drop(reason, 1);
        state.summary.dropped += 1;
        self.transport.free_mpdu(mpdu);
    }

    fn ingest(
        &self,
        peer: &Peer,
        rx: &mut PeerRxState,
        batch: &mut InboundBatch,
        now: Instant,
        state: &mut BatchState,
    ) -> Result<(), Error> {
        let tid = batch.tid();
        let flush = batch.take_flush();

        if let Some(FlushRequest::Desync) = flush {
            warn!(
                "reorder state for peer {} out of sync with the target, discarding buffered frames",
                peer.addr().to_mac_string()
            );
            for tid_state in rx.tids.iter_mut() {
                for mpdu in tid_state.reorder.flush_all() {
                    self.discard(state, mpdu, DropReason::DesyncRecovery);
                }
                if let Some(id) = tid_state.timeout.take() {
                    self.timer.lock().cancel_event(id);
                }
            }
        }

        for index in 0..batch.num_ranges() {
            let range = match batch.mpdu_range_info(index) {
                Some(range) => range,
                None => break,
            };
            for _ in 0..range.mpdu_count {
                let mpdu = batch.pop_mpdu()?;
                match range.status {
                    MpduStatus::Ok => self.accept_mpdu(peer, rx, tid, mpdu, now, state),
                    MpduStatus::TkipMicError => {
                        if peer.kind() == PeerKind::Station {
                            state.mic_failures.push(MicFailure {
                                vdev_id: self.vdev_id,
                                peer_addr: peer.addr(),
                                tid,
                                pn: mpdu.pn(),
                                key_index: mpdu.key_index(),
                            });
                        } else {
                            error!("TKIP MIC failure on TID {} from an unknown peer", tid);
                        }
                        self.discard(state, mpdu, DropReason::IntegrityFailure);
                    }
                    status => {
                        trace!("dropping MPDU {} with status {:?}", mpdu.seq_num(), status);
                        self.discard(state, mpdu, drop_reason(status));
                    }
                }
            }
        }

        if let Some(FlushRequest::Release { tid: release_tid, seq_start, seq_end }) = flush {
            let tid_state =
                rx.tids.get_mut(release_tid as usize).ok_or(Error::InvalidTid(release_tid))?;
            state.pending.extend(tid_state.reorder.release_range(seq_start, seq_end));
            self.update_timeout(peer, release_tid, tid_state);
        }
        Ok(())
    }

    fn accept_mpdu(
        &self,
        peer: &Peer,
        rx: &mut PeerRxState,
        tid: u8,
        mpdu: Mpdu,
        now: Instant,
        state: &mut BatchState,
    ) {
        let tid_index = tid as usize;
        if mpdu.is_protected() {
            let direction = KeyDirection::for_frame(mpdu.is_multicast());
            if rx.security.check_and_update_pn(direction, tid_index, mpdu.pn()) == PnCheck::Replay
            {
                trace!("replayed PN {} on TID {}", mpdu.pn(), tid);
                self.discard(state, mpdu, DropReason::Replay);
                return;
            }
        }

        // Every unknown transmitter shares the monitor record, so it keeps no sequence or
        // signal history.
        if peer.kind() == PeerKind::Station {
            let host_authority = self.config.host_reorder_authority;
            match rx.tids[tid_index].check_sequence(mpdu.seq_num(), host_authority) {
                SeqCheck::Ok => (),
                SeqCheck::Duplicate => {
                    trace!("duplicate sequence number {} on TID {}", mpdu.seq_num(), tid);
                    self.discard(state, mpdu, DropReason::Duplicate);
                    return;
                }
                SeqCheck::OutOfBounds => {
                    debug!("sequence number {} on TID {} outside the window", mpdu.seq_num(), tid);
                    self.discard(state, mpdu, DropReason::OutOfBoundsSequence);
                    return;
                }
            }
            rx.update_signal(mpdu.rssi_dbm());
        }

        let tid_state = &mut rx.tids[tid_index];
        match tid_state.reorder.store(mpdu, now) {
            StoreResult::Stored => {
                state.summary.buffered += 1;
                if tid_state.timeout.is_none() {
                    self.update_timeout(peer, tid, tid_state);
                }
            }
            StoreResult::Duplicate(mpdu) => {
                trace!("sequence number {} on TID {} already buffered", mpdu.seq_num(), tid);
                self.discard(state, mpdu, DropReason::Duplicate);
            }
            StoreResult::NotBuffered(mpdu) => state.pending.push(mpdu),
        }
    }

    /// Re-arms the reorder timeout of one TID for its oldest buffered MPDU, or disarms it if
    /// nothing is buffered.
    fn update_timeout(&self, peer: &Peer, tid: u8, tid_state: &mut TidState) {
        let deadline = tid_state.reorder.next_deadline(self.config.reorder_timeout.for_tid(tid));
        if tid_state.timeout.is_none() && deadline.is_none() {
            return;
        }
        let mut timer = self.timer.lock();
        if let Some(id) = tid_state.timeout.take() {
            timer.cancel_event(id);
        }
        if let Some(deadline) = deadline {
            let event =
                ReorderTimeout { assoc_id: peer.assoc_id(), generation: peer.generation(), tid };
            tid_state.timeout = Some(timer.schedule_event(deadline, event));
        }
    }

    /// Runs the privacy filter over every frame of `mpdus`. Rejected frames are freed without
    /// holding up the ones after them.
    fn filter_mpdus(
        &self,
        rx: &PeerRxState,
        mpdus: Vec<Mpdu>,
        state: &mut BatchState,
    ) -> Vec<RxFrame> {
        let filter = self.filter.read();
        let mut admitted = vec![];
        for mpdu in mpdus {
            let encrypted = mpdu.is_protected();
            for frame in mpdu.into_frames() {
                match filter.classify(&rx.security, &frame, encrypted) {
                    FilterVerdict::Accept => admitted.push(frame),
                    FilterVerdict::Reject => {
                        trace!("privacy filter rejected ethertype {:?}", frame.ether_type());
                        self.stats.record_drop(DropReason::Filtered, 1);
                        state.summary.dropped += 1;
                        self.transport.free_frame(frame);
                    }
                }
            }
        }
        admitted
    }

    fn deliver(&self, peer: &Peer, frames: Vec<RxFrame>) -> usize {
        let count = frames.len();
        if count > 0 {
            self.stats.record_delivered(count);
            self.delivery.deliver(self.sink.as_ref(), self.vdev_id, peer.addr(), frames);
        }
        count
    }

    fn free_all(&self, mpdus: Vec<Mpdu>, reason: DropReason) {
        self.stats.record_drop(reason, mpdus.len());
        for mpdu in mpdus {
            self.transport.free_mpdu(mpdu);
        }
    }

    fn lookup(&self, peer_id: u16) -> Result<Arc<Peer>, Error> {
        self.peers.find_peer_by_id(peer_id).ok_or(Error::PeerNotFound(peer_id))
    }

    /// Adds a newly associated station.
    pub fn add_peer(&self, addr: MacAddr, assoc_id: u16) -> Result<Arc<Peer>, Error> {
        let peer = self.peers.add(addr, assoc_id)?;
        let (buffered, timeouts) = self.peers.init_station_state(&peer);
        self.free_all(buffered, DropReason::PeerRemoved);
        self.cancel_timeouts(timeouts);
        Ok(peer)
    }

    /// Removes a station. Frames still buffered for it are discarded.
    pub fn remove_peer(&self, addr: MacAddr, assoc_id: u16) -> Result<(), Error> {
        let peer = self.peers.delete(&addr, assoc_id)?;
        let (buffered, timeouts) = peer.lock_rx().reset();
        if !buffered.is_empty() {
            debug!("discarding {} buffered MPDUs of peer {}", buffered.len(), addr.to_mac_string());
        }
        self.free_all(buffered, DropReason::PeerRemoved);
        self.cancel_timeouts(timeouts);
        Ok(())
    }

    fn cancel_timeouts(&self, timeouts: Vec<EventId>) {
        if timeouts.is_empty() {
            return;
        }
        let mut timer = self.timer.lock();
        for id in timeouts {
            timer.cancel_event(id);
        }
    }

    /// Installs the cipher and key material negotiated for one direction of a peer's traffic.
    pub fn handle_security_indication(
        &self,
        peer_id: u16,
        indication: &SecurityIndication,
    ) -> Result<(), Error> {
        let peer = self.lookup(peer_id)?;
        peer.lock_rx().security.update_on_security_indication(indication);
        info!(
            "{} key installed for peer {}: {:?}",
            if indication.is_unicast { "pairwise" } else { "group" },
            peer.addr().to_mac_string(),
            indication.sec_type
        );
        Ok(())
    }

    /// Replaces the reorder window of a TID when a block ack agreement is established. Anything
    /// buffered under the previous agreement is released in order first.
    pub fn handle_addba(
        &self,
        peer_id: u16,
        tid: u8,
        win_size: u16,
        start_seq: u16,
    ) -> Result<(), Error> {
        let size = reorder::normalize_size(win_size, self.config.max_reorder_window);
        let mut window = ReorderWindow::new(size);
        if size > 0 {
            window.set_start(start_seq);
        }
        let peer = self.replace_window(peer_id, tid, window)?;
        info!(
            "block ack session with {} on TID {}: window {} starting at {}",
            peer.addr().to_mac_string(),
            tid,
            size,
            start_seq
        );
        Ok(())
    }

    /// Tears down a block ack agreement. Buffered frames are released in order and later frames
    /// bypass reordering.
    pub fn handle_delba(&self, peer_id: u16, tid: u8) -> Result<(), Error> {
        let peer = self.replace_window(peer_id, tid, ReorderWindow::disabled())?;
        info!("block ack session with {} on TID {} closed", peer.addr().to_mac_string(), tid);
        Ok(())
    }

    fn replace_window(
        &self,
        peer_id: u16,
        tid: u8,
        window: ReorderWindow,
    ) -> Result<Arc<Peer>, Error> {
        if tid as usize >= NUM_TIDS {
            return Err(Error::InvalidTid(tid));
        }
        let peer = self.lookup(peer_id)?;
        let frames = {
            let mut rx = peer.lock_rx();
            let tid_state = &mut rx.tids[tid as usize];
            let last_released = tid_state.reorder.last_released();
            let released = tid_state.reorder.drain_in_order();
            // The backstop resumes from the highest sequence number the old window let through.
            if let Some(last) = released.last().map(Mpdu::seq_num).or(last_released) {
                tid_state.last_seq = Some(last);
            }
            tid_state.reorder = window;
            self.update_timeout(&peer, tid, tid_state);
            let mut state = BatchState::default();
            self.filter_mpdus(&rx, released, &mut state)
        };
        self.deliver(&peer, frames);
        Ok(peer)
    }

    /// Forces progress on a stalled reorder window. Returns the number of frames delivered.
    pub fn timeout_tick(&self, peer_id: u16, tid: u8) -> Result<usize, Error> {
        self.timeout_tick_at(peer_id, tid, Instant::now())
    }

    pub fn timeout_tick_at(&self, peer_id: u16, tid: u8, now: Instant) -> Result<usize, Error> {
        if tid as usize >= NUM_TIDS {
            return Err(Error::InvalidTid(tid));
        }
        let peer = self.lookup(peer_id)?;
        Ok(self.release_timed_out(&peer, tid, now))
    }

    fn release_timed_out(&self, peer: &Peer, tid: u8, now: Instant) -> usize {
        let frames = {
            let mut rx = peer.lock_rx();
            if !peer.is_valid() {
                return 0;
            }
            let timeout = self.config.reorder_timeout.for_tid(tid);
            let tid_state = &mut rx.tids[tid as usize];
            let released = tid_state.reorder.timeout_tick(now, timeout);
            if !released.is_empty() {
                debug!(
                    "reorder timeout on TID {} of {}: releasing {} MPDUs",
                    tid,
                    peer.addr().to_mac_string(),
                    released.len()
                );
            }
            // An early tick leaves the armed event alone.
            if !released.is_empty() || tid_state.timeout.is_none() {
                self.update_timeout(peer, tid, tid_state);
            }
            let mut state = BatchState::default();
            self.filter_mpdus(&rx, released, &mut state)
        };
        self.deliver(peer, frames)
    }

    /// Called by the scheduler's owner when a scheduled reorder timeout expires.
    pub fn handle_timeout(&self, event_id: EventId) {
        self.handle_timeout_at(event_id, Instant::now())
    }

    pub fn handle_timeout_at(&self, event_id: EventId, now: Instant) {
        let event = match self.timer.lock().triggered(&event_id) {
            Some(event) => event,
            None => return,
        };
        let peer = match self.peers.lookup_by_assoc_id(event.assoc_id) {
            Some(peer) if peer.generation() == event.generation => peer,
            _ => {
                debug!("ignoring reorder timeout for departed peer {}", event.assoc_id);
                return;
            }
        };
        {
            let mut rx = peer.lock_rx();
            let tid_state = &mut rx.tids[event.tid as usize];
            if tid_state.timeout != Some(event_id) {
                return;
            }
            tid_state.timeout = None;
        }
        self.release_timed_out(&peer, event.tid, now);
    }

    pub fn set_privacy_exemptions(&self, exemptions: Vec<PrivacyExemption>) {
        self.filter.write().set_exemptions(exemptions);
    }

    pub fn set_drop_unencrypted(&self, drop_unencrypted: bool) {
        self.filter.write().set_drop_unencrypted(drop_unencrypted);
    }

    /// Removes every peer and discards everything buffered. The context stays usable.
    pub fn shutdown(&self) {
        let peers = self.peers.clear();
        let count = peers.len();
        for peer in peers.iter().chain(self.monitor_peer.iter()) {
            let (buffered, _) = peer.lock_rx().reset();
            self.free_all(buffered, DropReason::PeerRemoved);
        }
        self.timer.lock().cancel_all();
        info!("rx context for vdev {} shut down, {} peers removed", self.vdev_id, count);
    }
}
