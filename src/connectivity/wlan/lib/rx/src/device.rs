// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Collaborators the receive path calls out to.

use crate::{
    frame::{MacAddr, Mpdu, RxFrame},
    VdevId,
};

#[cfg(test)]
pub use crate::test_utils::{FakeKeyManagement, FakeSink, FakeTransport};

/// Lower layer that owns the receive buffers.
pub trait RxTransport: Send + Sync {
    /// Returns a buffer that will not be delivered.
    fn free_frame(&self, frame: RxFrame);

    /// Requests the lower layer to queue fresh receive buffers to the hardware. Called exactly
    /// once per indication.
    fn replenish_buffers(&self);

    fn free_mpdu(&self, mpdu: Mpdu) {
        for frame in mpdu.into_frames() {
            self.free_frame(frame);
        }
    }
}

/// A TKIP Michael MIC failure detected by the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MicFailure {
    pub vdev_id: VdevId,
    pub peer_addr: MacAddr,
    pub tid: u8,
    pub pn: u128,
    pub key_index: u8,
}

/// Key management layer. Counts MIC failures and runs countermeasures; this crate only reports
/// them.
pub trait KeyManagement: Send + Sync {
    fn on_mic_failure(&self, failure: MicFailure);
}

/// Upper networking layer.
pub trait DeliverySink: Send + Sync {
    /// Hands over frames admitted for `peer`, in delivery order.
    fn deliver(&self, vdev_id: VdevId, peer: MacAddr, frames: Vec<RxFrame>);

    /// Hands over frames for a stack that performs its own rx processing (e.g. an offloaded
    /// network stack).
    fn deliver_offload(&self, vdev_id: VdevId, peer: MacAddr, frames: Vec<RxFrame>) {
        self.deliver(vdev_id, peer, frames)
    }
}
