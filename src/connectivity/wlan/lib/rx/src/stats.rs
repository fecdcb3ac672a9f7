// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Receive path counters.

use {
    serde::Serialize,
    std::sync::atomic::{AtomicU64, Ordering},
};

/// Why a received MPDU or frame was not delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    PeerNotFound,
    Replay,
    Duplicate,
    IntegrityFailure,
    OutOfBoundsSequence,
    DesyncRecovery,
    Filtered,
    RxError,
    PeerRemoved,
}

const NUM_DROP_REASONS: usize = 9;

impl DropReason {
    pub const ALL: [DropReason; NUM_DROP_REASONS] = [
        DropReason::PeerNotFound,
        DropReason::Replay,
        DropReason::Duplicate,
        DropReason::IntegrityFailure,
        DropReason::OutOfBoundsSequence,
        DropReason::DesyncRecovery,
        DropReason::Filtered,
        DropReason::RxError,
        DropReason::PeerRemoved,
    ];

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Counters updated concurrently by every dispatcher.
#[derive(Debug, Default)]
pub struct RxStats {
    batches: AtomicU64,
    malformed_batches: AtomicU64,
    delivered: AtomicU64,
    dropped: [AtomicU64; NUM_DROP_REASONS],
}

impl RxStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason, count: usize) {
        self.dropped[reason.index()].fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RxStatsSnapshot {
        RxStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            malformed_batches: self.malformed_batches.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: DropReason::ALL
                .iter()
                .map(|reason| (*reason, self.dropped[reason.index()].load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Point-in-time copy of [`RxStats`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RxStatsSnapshot {
    pub batches: u64,
    pub malformed_batches: u64,
    pub delivered: u64,
    pub dropped: Vec<(DropReason, u64)>,
}

impl RxStatsSnapshot {
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped.iter().find(|(r, _)| *r == reason).map_or(0, |(_, count)| *count)
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.iter().map(|(_, count)| count).sum()
    }
}
