// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        device::{DeliverySink, KeyManagement, MicFailure, RxTransport},
        frame::{MacAddr, RxFrame},
        VdevId,
    },
    parking_lot::Mutex,
    std::sync::atomic::{AtomicUsize, Ordering},
};

pub type Delivery = (VdevId, MacAddr, Vec<RxFrame>);

#[derive(Default)]
pub struct FakeTransport {
    freed: Mutex<Vec<RxFrame>>,
    replenish_count: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn freed(&self) -> Vec<RxFrame> {
        self.freed.lock().clone()
    }

    pub fn freed_count(&self) -> usize {
        self.freed.lock().len()
    }

    pub fn replenish_count(&self) -> usize {
        self.replenish_count.load(Ordering::SeqCst)
    }
}

impl RxTransport for FakeTransport {
    fn free_frame(&self, frame: RxFrame) {
        self.freed.lock().push(frame);
    }

    fn replenish_buffers(&self) {
        self.replenish_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeSink {
    delivered: Mutex<Vec<Delivery>>,
    offloaded: Mutex<Vec<Delivery>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.delivered.lock().clone()
    }

    pub fn offloaded(&self) -> Vec<Delivery> {
        self.offloaded.lock().clone()
    }

    /// Every delivered frame's first payload byte after the Ethernet header, in delivery order.
    /// Test frames carry their sequence number there.
    pub fn delivered_tags(&self) -> Vec<u8> {
        self.delivered
            .lock()
            .iter()
            .flat_map(|(_, _, frames)| frames.iter())
            .filter_map(|frame| frame.data().get(crate::frame::ETH_HDR_LEN).copied())
            .collect()
    }
}

impl DeliverySink for FakeSink {
    fn deliver(&self, vdev_id: VdevId, peer: MacAddr, frames: Vec<RxFrame>) {
        self.delivered.lock().push((vdev_id, peer, frames));
    }

    fn deliver_offload(&self, vdev_id: VdevId, peer: MacAddr, frames: Vec<RxFrame>) {
        self.offloaded.lock().push((vdev_id, peer, frames));
    }
}

#[derive(Default)]
pub struct FakeKeyManagement {
    mic_failures: Mutex<Vec<MicFailure>>,
}

impl FakeKeyManagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mic_failures(&self) -> Vec<MicFailure> {
        self.mic_failures.lock().clone()
    }
}

impl KeyManagement for FakeKeyManagement {
    fn on_mic_failure(&self, failure: MicFailure) {
        self.mic_failures.lock().push(failure);
    }
}
