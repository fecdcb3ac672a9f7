// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Frame containers handed over by the lower layer.
//!
//! An [`InboundBatch`] owns every MPDU of one rx indication. MPDUs own their network buffers
//! ([`RxFrame`]s, one per MSDU), so moving an MPDU into the reorder window, the delivery list or
//! back to the transport transfers the buffers with it.

use {
    crate::{error::Error, seq},
    byteorder::{BigEndian, ByteOrder},
    num_derive::FromPrimitive,
    num_traits::FromPrimitive,
    std::collections::VecDeque,
};

pub type MacAddr = [u8; 6];

// IEEE Std 802.3-2015, 3.1.1
pub const ETH_HDR_LEN: usize = 14;
const ETH_TYPE_OFFSET: usize = 12;

pub trait MacFmt {
    fn to_mac_string(&self) -> String;
}

impl MacFmt for MacAddr {
    fn to_mac_string(&self) -> String {
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self[0], self[1], self[2], self[3], self[4], self[5]
        )
    }
}

/// Receive descriptor fields the lower layer attaches to each buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxInfo {
    pub rssi_dbm: Option<i8>,
    pub channel_mhz: u16,
    /// Data rate in units of 500 kbps.
    pub data_rate: u8,
}

/// One network buffer carrying an MSDU in Ethernet II framing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxFrame {
    data: Vec<u8>,
    info: RxInfo,
}

impl RxFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, info: RxInfo::default() }
    }

    pub fn with_info(data: Vec<u8>, info: RxInfo) -> Self {
        Self { data, info }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn info(&self) -> &RxInfo {
        &self.info
    }

    pub fn dst_addr(&self) -> Option<MacAddr> {
        let mut addr = [0u8; 6];
        addr.copy_from_slice(self.data.get(0..6)?);
        Some(addr)
    }

    /// Group-addressed frames have the I/G bit of the destination address set.
    pub fn is_multicast(&self) -> bool {
        self.data.first().map_or(false, |b| b & 0x01 != 0)
    }

    pub fn ether_type(&self) -> Option<u16> {
        self.data.get(ETH_TYPE_OFFSET..ETH_HDR_LEN).map(|bytes| BigEndian::read_u16(bytes))
    }
}

/// One MPDU and the MSDUs it carried (more than one for A-MSDU).
#[derive(Debug, PartialEq, Eq)]
pub struct Mpdu {
    seq_num: u16,
    pn: u128,
    key_index: u8,
    protected: bool,
    multicast: bool,
    frames: Vec<RxFrame>,
}

impl Mpdu {
    /// Sequence numbers are truncated to the 12-bit sequence number subfield.
    pub fn new(seq_num: u16, frames: Vec<RxFrame>) -> Self {
        Self {
            seq_num: seq_num & seq::SEQ_MASK,
            pn: 0,
            key_index: 0,
            protected: false,
            multicast: false,
            frames,
        }
    }

    /// Marks the MPDU as decrypted by hardware with the given packet number and key index.
    pub fn protected(mut self, pn: u128, key_index: u8) -> Self {
        self.protected = true;
        self.pn = pn;
        self.key_index = key_index;
        self
    }

    pub fn multicast(mut self, multicast: bool) -> Self {
        self.multicast = multicast;
        self
    }

    pub fn seq_num(&self) -> u16 {
        self.seq_num
    }

    pub fn pn(&self) -> u128 {
        self.pn
    }

    pub fn key_index(&self) -> u8 {
        self.key_index
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn is_multicast(&self) -> bool {
        self.multicast
    }

    pub fn rssi_dbm(&self) -> Option<i8> {
        self.frames.first().and_then(|frame| frame.info.rssi_dbm)
    }

    pub fn frames(&self) -> &[RxFrame] {
        &self.frames[..]
    }

    pub fn into_frames(self) -> Vec<RxFrame> {
        self.frames
    }
}

/// Per-range MPDU status reported by the target. Values follow the HTT rx indication encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum MpduStatus {
    Ok = 1,
    FcsError = 2,
    DupError = 3,
    ReplayError = 4,
    InvalidPeer = 5,
    UnauthorizedPeer = 6,
    OutOfSync = 7,
    MgmtCtrl = 8,
    TkipMicError = 9,
    DecryptError = 10,
    LengthError = 11,
    EncryptRequired = 12,
    PrivacyError = 13,
}

impl MpduStatus {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::from_u8(raw)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MpduRange {
    pub status: MpduStatus,
    pub mpdu_count: usize,
}

/// Out-of-band release request carried by an indication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushRequest {
    /// Host and target reorder state no longer agree. Everything buffered for the peer is
    /// discarded.
    Desync,
    /// Release every buffered MPDU of `tid` in `[seq_start, seq_end]`.
    Release { tid: u8, seq_start: u16, seq_end: u16 },
}

/// One rx indication: every MPDU the target reported for a (peer, TID) in a single message.
#[derive(Debug)]
pub struct InboundBatch {
    peer_id: u16,
    tid: u8,
    ranges: Vec<MpduRange>,
    mpdus: VecDeque<Mpdu>,
    flush: Option<FlushRequest>,
}

impl InboundBatch {
    pub fn new(peer_id: u16, tid: u8) -> Self {
        Self { peer_id, tid, ranges: vec![], mpdus: VecDeque::new(), flush: None }
    }

    /// Builds a batch from raw lower-layer parts. The range counts are not checked against the
    /// number of MPDUs; a shortfall is reported while the batch is processed.
    pub fn from_parts(
        peer_id: u16,
        tid: u8,
        ranges: Vec<MpduRange>,
        mpdus: Vec<Mpdu>,
        flush: Option<FlushRequest>,
    ) -> Self {
        Self { peer_id, tid, ranges, mpdus: mpdus.into(), flush }
    }

    /// Appends a range of MPDUs sharing one status.
    pub fn with_range(mut self, status: MpduStatus, mpdus: Vec<Mpdu>) -> Self {
        self.ranges.push(MpduRange { status, mpdu_count: mpdus.len() });
        self.mpdus.extend(mpdus);
        self
    }

    pub fn with_flush(mut self, flush: FlushRequest) -> Self {
        self.flush = Some(flush);
        self
    }

    pub fn peer_id(&self) -> u16 {
        self.peer_id
    }

    pub fn tid(&self) -> u8 {
        self.tid
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn mpdu_range_info(&self, index: usize) -> Option<MpduRange> {
        self.ranges.get(index).copied()
    }

    pub fn remaining_mpdus(&self) -> usize {
        self.mpdus.len()
    }

    pub fn flush(&self) -> Option<FlushRequest> {
        self.flush
    }

    /// Fails if the ranges claim more MPDUs than the batch carries.
    pub fn check_ranges(&self) -> Result<(), Error> {
        let claimed =
            self.ranges.iter().fold(0usize, |total, range| total.saturating_add(range.mpdu_count));
        if claimed > self.mpdus.len() {
            return Err(Error::malformed(format!(
                "MPDU ranges of peer {} TID {} claim {} MPDUs, {} supplied",
                self.peer_id,
                self.tid,
                claimed,
                self.mpdus.len()
            )));
        }
        Ok(())
    }

    pub(crate) fn take_flush(&mut self) -> Option<FlushRequest> {
        self.flush.take()
    }

    /// Pops the next MPDU in arrival order.
    pub fn pop_mpdu(&mut self) -> Result<Mpdu, Error> {
        self.mpdus.pop_front().ok_or_else(|| {
            Error::malformed(format!(
                "MPDU ranges of peer {} TID {} exceed the MPDUs supplied",
                self.peer_id, self.tid
            ))
        })
    }

    pub(crate) fn drain_mpdus(&mut self) -> impl Iterator<Item = Mpdu> + '_ {
        self.mpdus.drain(..)
    }
}
