// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-interface delivery paths. One is selected when the receive context is created.

use {
    crate::{
        device::DeliverySink,
        frame::{MacAddr, RxFrame, ETH_HDR_LEN},
        VdevId,
    },
    byteorder::{BigEndian, ByteOrder, LittleEndian},
    log::trace,
    serde::{Deserialize, Serialize},
};

/// Ethertype given to frames carrying an OCB rx stats header.
pub const ETHER_TYPE_OCB_RX: u16 = 0x8151;

pub const OCB_RX_STATS_VERSION: u8 = 1;
pub const OCB_RX_STATS_HDR_LEN: usize = 10;

/// Reported in place of an RSSI when the descriptor carried none.
const RSSI_UNKNOWN: i8 = i8::MIN;

pub trait RxDelivery: Send + Sync {
    fn deliver(
        &self,
        sink: &dyn DeliverySink,
        vdev_id: VdevId,
        peer: MacAddr,
        frames: Vec<RxFrame>,
    );
}

/// Hands frames to the networking stack unchanged.
pub struct NormalDelivery;

impl RxDelivery for NormalDelivery {
    fn deliver(
        &self,
        sink: &dyn DeliverySink,
        vdev_id: VdevId,
        peer: MacAddr,
        frames: Vec<RxFrame>,
    ) {
        sink.deliver(vdev_id, peer, frames)
    }
}

/// Outside-the-context-of-a-BSS delivery. Every frame gets an rx stats header so applications can
/// see per-packet channel, signal and rate.
pub struct OcbDelivery;

impl OcbDelivery {
    /// Inserts the rx stats header right after the Ethernet header:
    ///
    /// ```text
    /// | version | length | channel MHz (LE) | rssi | rate | original ethertype (BE) | reserved |
    /// |    1    |   1    |        2         |  1   |  1   |            2            |    2     |
    /// ```
    ///
    /// The Ethernet header's ethertype becomes [`ETHER_TYPE_OCB_RX`].
    pub fn add_rx_stats_header(frame: &mut RxFrame) {
        let info = *frame.info();
        let data = frame.data_mut();
        if data.len() < ETH_HDR_LEN {
            trace!("OCB frame too short for an rx stats header: {} bytes", data.len());
            return;
        }
        let mut hdr = [0u8; OCB_RX_STATS_HDR_LEN];
        hdr[0] = OCB_RX_STATS_VERSION;
        hdr[1] = OCB_RX_STATS_HDR_LEN as u8;
        LittleEndian::write_u16(&mut hdr[2..4], info.channel_mhz);
        hdr[4] = info.rssi_dbm.unwrap_or(RSSI_UNKNOWN) as u8;
        hdr[5] = info.data_rate;
        hdr[6..8].copy_from_slice(&data[ETH_HDR_LEN - 2..ETH_HDR_LEN]);

        data.splice(ETH_HDR_LEN..ETH_HDR_LEN, hdr.iter().copied());
        BigEndian::write_u16(&mut data[ETH_HDR_LEN - 2..ETH_HDR_LEN], ETHER_TYPE_OCB_RX);
    }
}

impl RxDelivery for OcbDelivery {
    fn deliver(
        &self,
        sink: &dyn DeliverySink,
        vdev_id: VdevId,
        peer: MacAddr,
        mut frames: Vec<RxFrame>,
    ) {
        frames.iter_mut().for_each(Self::add_rx_stats_header);
        sink.deliver(vdev_id, peer, frames)
    }
}

/// Hands frames to a network stack that runs its own receive processing.
pub struct OffloadDelivery;

impl RxDelivery for OffloadDelivery {
    fn deliver(
        &self,
        sink: &dyn DeliverySink,
        vdev_id: VdevId,
        peer: MacAddr,
        frames: Vec<RxFrame>,
    ) {
        sink.deliver_offload(vdev_id, peer, frames)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Normal,
    Ocb,
    Offload,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Normal
    }
}

impl DeliveryMode {
    pub fn handler(&self) -> Box<dyn RxDelivery> {
        match self {
            DeliveryMode::Normal => Box::new(NormalDelivery),
            DeliveryMode::Ocb => Box::new(OcbDelivery),
            DeliveryMode::Offload => Box::new(OffloadDelivery),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{device::FakeSink, frame::RxInfo},
    };

    const PEER: MacAddr = [0x02, 1, 2, 3, 4, 5];

    #[rustfmt::skip]
    const IPV4_FRAME: &[u8] = &[
        0x02, 0x00, 0x00, 0x00, 0x00, 0x01, // dst_addr
        0x02, 0x01, 0x02, 0x03, 0x04, 0x05, // src_addr
        0x08, 0x00, // ether_type
        0x45, 0x00, // payload
    ];

    fn info() -> RxInfo {
        RxInfo { rssi_dbm: Some(-40), channel_mhz: 5860, data_rate: 12 }
    }

    #[test]
    fn normal_delivery_unchanged() {
        let sink = FakeSink::new();
        let frame = RxFrame::with_info(IPV4_FRAME.to_vec(), info());
        DeliveryMode::Normal.handler().deliver(&sink, 1, PEER, vec![frame.clone()]);
        assert_eq!(sink.delivered(), vec![(1, PEER, vec![frame])]);
        assert!(sink.offloaded().is_empty());
    }

    #[test]
    fn offload_delivery_uses_offload_path() {
        let sink = FakeSink::new();
        let frame = RxFrame::new(IPV4_FRAME.to_vec());
        DeliveryMode::Offload.handler().deliver(&sink, 2, PEER, vec![frame.clone()]);
        assert!(sink.delivered().is_empty());
        assert_eq!(sink.offloaded(), vec![(2, PEER, vec![frame])]);
    }

    #[test]
    fn ocb_delivery_adds_rx_stats_header() {
        let sink = FakeSink::new();
        let frame = RxFrame::with_info(IPV4_FRAME.to_vec(), info());
        DeliveryMode::Ocb.handler().deliver(&sink, 0, PEER, vec![frame]);

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        let frames = &delivered[0].2;
        #[rustfmt::skip]
        let expected = vec![
            0x02, 0x00, 0x00, 0x00, 0x00, 0x01, // dst_addr
            0x02, 0x01, 0x02, 0x03, 0x04, 0x05, // src_addr
            0x81, 0x51, // ether_type
            1, 10, // version, length
            0xe4, 0x16, // channel 5860 MHz
            0xd8, // rssi -40 dBm
            12, // rate
            0x08, 0x00, // original ether_type
            0x00, 0x00, // reserved
            0x45, 0x00, // payload
        ];
        assert_eq!(frames[0].data(), &expected[..]);
        assert_eq!(frames[0].ether_type(), Some(ETHER_TYPE_OCB_RX));
    }

    #[test]
    fn ocb_header_skips_short_frames() {
        let mut frame = RxFrame::new(vec![0x02, 0, 0]);
        OcbDelivery::add_rx_stats_header(&mut frame);
        assert_eq!(frame.data(), &[0x02, 0, 0]);
    }

    #[test]
    fn ocb_header_without_rssi() {
        let mut frame = RxFrame::new(IPV4_FRAME.to_vec());
        OcbDelivery::add_rx_stats_header(&mut frame);
        assert_eq!(frame.data()[ETH_HDR_LEN + 4], 0x80);
    }
}
