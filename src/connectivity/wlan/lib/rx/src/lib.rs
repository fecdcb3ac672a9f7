// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Receive data path of a WLAN host driver.
//!
//! Hardware or firmware hands the host batches of MPDUs ("indications") tagged with a peer ID, a
//! TID and per-range status. This crate turns those batches into ordered, filtered deliveries to
//! the networking stack. It owns:
//!
//! * the [`peer_table`], a fixed-capacity table of associated stations keyed by address and
//!   association ID,
//! * per-(peer, TID) [`reorder`] windows,
//! * per-peer [`security`] state used to reject replayed frames,
//! * the privacy [`filter`], and
//! * the indication dispatcher, [`RxContext`], which ties all of the above together.
//!
//! Collaborators outside this crate (bus transport, key management, upper networking layer,
//! timer) are reached through the traits in [`device`] and [`timer`].

pub mod config;
pub mod delivery;
pub mod device;
pub mod error;
pub mod filter;
pub mod frame;
pub mod peer;
pub mod peer_table;
pub mod reorder;
mod rx;
pub mod security;
mod seq;
pub mod signal;
pub mod stats;
pub mod timer;

#[cfg(test)]
mod test_utils;

pub use {
    config::RxConfig,
    error::{Error, PeerTableError},
    frame::{FlushRequest, InboundBatch, MacAddr, Mpdu, MpduRange, MpduStatus, RxFrame, RxInfo},
    rx::{IndicationSummary, RxContext},
};

/// Number of traffic identifiers tracked per peer. TIDs 0-7 are traffic categories and 8-15 are
/// traffic streams. See IEEE Std 802.11-2016, 9.2.4.5.2.
pub const NUM_TIDS: usize = 16;

/// Identifies the logical interface (vdev) frames are delivered on.
pub type VdevId = u8;
