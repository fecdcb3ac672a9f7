// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-(peer, TID) receive reorder buffer.
//!
//! A window is either disabled, in which case MPDUs bypass it in arrival order, or active with a
//! power-of-two number of slots. An MPDU is stored in slot `seq % size` and held until a release
//! request, a timeout or a flush removes it. Released MPDUs are always returned in ascending
//! sequence order (modulo wraparound) except for [`ReorderWindow::flush_all`].

use {
    crate::{frame::Mpdu, seq},
    std::{
        cmp::Ordering,
        time::{Duration, Instant},
    },
};

/// Largest window this implementation will allocate (IEEE Std 802.11ax block ack window).
pub const MAX_WINDOW_SIZE: usize = 256;

#[derive(Debug)]
struct Slot {
    seq: u16,
    mpdu: Mpdu,
    stored_at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowState {
    Disabled,
    Active,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StoreResult {
    Stored,
    /// The sequence number was already released or is already buffered. The rejected MPDU is
    /// handed back; the buffered one is kept.
    Duplicate(Mpdu),
    /// The window is disabled and the MPDU should be delivered immediately.
    NotBuffered(Mpdu),
}

/// Rounds a negotiated buffer size up to a power of two, capped at `max`. Zero disables the
/// window.
pub fn normalize_size(requested: u16, max: usize) -> usize {
    match requested {
        0 => 0,
        n => (n as usize).next_power_of_two().min(max).min(MAX_WINDOW_SIZE),
    }
}

#[derive(Debug)]
pub struct ReorderWindow {
    slots: Vec<Option<Slot>>,
    occupied: usize,
    last_released: Option<u16>,
}

impl Default for ReorderWindow {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ReorderWindow {
    pub fn disabled() -> Self {
        Self { slots: vec![], occupied: 0, last_released: None }
    }

    /// Creates an active window. `size` must be zero or a power of two no larger than
    /// [`MAX_WINDOW_SIZE`]; anything else is normalized first.
    pub fn new(size: usize) -> Self {
        let size = match size {
            0 => 0,
            n => n.next_power_of_two().min(MAX_WINDOW_SIZE),
        };
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Self { slots, occupied: 0, last_released: None }
    }

    pub fn state(&self) -> WindowState {
        if self.slots.is_empty() {
            WindowState::Disabled
        } else {
            WindowState::Active
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn last_released(&self) -> Option<u16> {
        self.last_released
    }

    /// Sequence number the window is waiting for, if known.
    pub fn next_expected(&self) -> Option<u16> {
        self.last_released.map(|last| seq::add(last, 1))
    }

    /// Seeds the window start, e.g. from the starting sequence number of a block ack agreement.
    pub fn set_start(&mut self, start_seq: u16) {
        self.last_released = Some(seq::add(start_seq, seq::SEQ_MASK));
    }

    /// Returns true if `seq` was already released. Always false until the window start is known.
    pub fn is_released(&self, seq: u16) -> bool {
        match self.last_released {
            Some(last) => !seq::precedes(last, seq),
            None => false,
        }
    }

    /// Returns true if `seq` lies within `size` sequence numbers of the next expected one. Always
    /// true until the window start is known.
    pub fn is_in_window(&self, seq: u16) -> bool {
        match self.next_expected() {
            Some(next) => (seq::distance(next, seq) as usize) < self.size(),
            None => true,
        }
    }

    fn slot_index(&self, seq: u16) -> usize {
        seq as usize & (self.slots.len() - 1)
    }

    pub fn store(&mut self, mpdu: Mpdu, now: Instant) -> StoreResult {
        if self.state() == WindowState::Disabled {
            return StoreResult::NotBuffered(mpdu);
        }
        let seq = mpdu.seq_num();
        if self.is_released(seq) {
            return StoreResult::Duplicate(mpdu);
        }
        let index = self.slot_index(seq);
        let slot = &mut self.slots[index];
        if slot.is_some() {
            return StoreResult::Duplicate(mpdu);
        }
        *slot = Some(Slot { seq, mpdu, stored_at: now });
        self.occupied += 1;
        StoreResult::Stored
    }

    /// Removes every buffered MPDU whose sequence number satisfies `pred` and returns them in
    /// ascending order starting from `base`.
    fn take_where<F: Fn(u16) -> bool>(&mut self, base: u16, pred: F) -> Vec<Mpdu> {
        let mut taken: Vec<Slot> = vec![];
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map_or(false, |s| pred(s.seq)) {
                taken.extend(slot.take());
            }
        }
        self.occupied -= taken.len();
        taken.sort_by_key(|s| seq::distance(base, s.seq));
        taken.into_iter().map(|s| s.mpdu).collect()
    }

    /// Releases every buffered MPDU in the inclusive range `[start, end]`, in ascending order, and
    /// advances the window past `end`.
    pub fn release_range(&mut self, start: u16, end: u16) -> Vec<Mpdu> {
        let (start, end) = (start & seq::SEQ_MASK, end & seq::SEQ_MASK);
        let released = self.take_where(start, |s| seq::in_range(s, start, end));
        match self.last_released {
            Some(last) if !seq::precedes(last, end) => (),
            _ => self.last_released = Some(end),
        }
        released
    }

    /// Removes everything buffered and forgets the window position. Frames come back in slot
    /// order, not sequence order.
    pub fn flush_all(&mut self) -> Vec<Mpdu> {
        self.last_released = None;
        if self.occupied == 0 {
            return vec![];
        }
        self.occupied = 0;
        self.slots.iter_mut().filter_map(|slot| slot.take()).map(|s| s.mpdu).collect()
    }

    /// Removes everything buffered in sequence order and forgets the window position.
    pub fn drain_in_order(&mut self) -> Vec<Mpdu> {
        let base = match self.next_expected().or_else(|| self.earliest_seq()) {
            Some(base) => base,
            None => return self.flush_all(),
        };
        let drained = self.take_where(base, |_| true);
        self.last_released = None;
        drained
    }

    fn earliest_seq(&self) -> Option<u16> {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.seq)
            .min_by(|a, b| match (seq::precedes(*a, *b), a == b) {
                (_, true) => Ordering::Equal,
                (true, _) => Ordering::Less,
                (false, _) => Ordering::Greater,
            })
    }

    fn oldest(&self) -> Option<&Slot> {
        self.slots.iter().flatten().min_by_key(|s| s.stored_at)
    }

    /// Time at which the oldest buffered MPDU times out.
    pub fn next_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.oldest().map(|s| s.stored_at + timeout)
    }

    /// Releases up to and including the oldest buffered MPDU if it has waited at least `timeout`.
    /// Returns an empty list otherwise.
    pub fn timeout_tick(&mut self, now: Instant, timeout: Duration) -> Vec<Mpdu> {
        let (oldest_seq, stored_at) = match self.oldest() {
            Some(slot) => (slot.seq, slot.stored_at),
            None => return vec![],
        };
        if now.saturating_duration_since(stored_at) < timeout {
            return vec![];
        }
        let start = self.next_expected().unwrap_or_else(|| {
            let span = (self.size() as u16).saturating_sub(1);
            seq::add(oldest_seq, seq::SEQ_MODULUS - span)
        });
        self.release_range(start, oldest_seq)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::frame::RxFrame, assert_matches::assert_matches, test_case::test_case};

    fn mpdu(seq: u16) -> Mpdu {
        Mpdu::new(seq, vec![RxFrame::new(vec![seq as u8])])
    }

    fn seqs(mpdus: &[Mpdu]) -> Vec<u16> {
        mpdus.iter().map(|m| m.seq_num()).collect()
    }

    #[test_case(0, 64 => 0 ; "disabled")]
    #[test_case(1, 64 => 1 ; "one")]
    #[test_case(5, 64 => 8 ; "rounded up")]
    #[test_case(64, 64 => 64 ; "exact")]
    #[test_case(100, 64 => 64 ; "clamped to max")]
    #[test_case(1024, 1024 => 256 ; "clamped to hard limit")]
    fn normalize(requested: u16, max: usize) -> usize {
        normalize_size(requested, max)
    }

    #[test]
    fn disabled_window_passes_through() {
        let mut window = ReorderWindow::disabled();
        assert_eq!(window.state(), WindowState::Disabled);
        assert_matches!(window.store(mpdu(3), Instant::now()), StoreResult::NotBuffered(m) => {
            assert_eq!(m.seq_num(), 3);
        });
        assert!(window.is_empty());
        assert!(window.flush_all().is_empty());
    }

    #[test]
    fn out_of_order_released_in_order() {
        let mut window = ReorderWindow::new(8);
        let now = Instant::now();
        for s in [5, 3, 4] {
            assert_eq!(window.store(mpdu(s), now), StoreResult::Stored);
        }
        assert_eq!(window.len(), 3);
        let released = window.release_range(3, 5);
        assert_eq!(seqs(&released), vec![3, 4, 5]);
        assert!(window.is_empty());
        assert_eq!(window.last_released(), Some(5));
    }

    #[test_case(&[2, 0, 1], 0 ; "short permutation")]
    #[test_case(&[0, 1, 2, 3, 4, 5, 6, 7], 100 ; "full window in order")]
    #[test_case(&[7, 6, 5, 4, 3, 2, 1, 0], 100 ; "full window reversed")]
    #[test_case(&[3, 7, 0, 5], 2047 ; "with gaps")]
    #[test_case(&[2, 0, 7, 1], 4090 ; "across wraparound")]
    #[test_case(&[6, 4, 5], 4092 ; "after wraparound")]
    #[test_case(&[3, 0, 5, 1, 6], 4095 ; "from last sequence number")]
    fn release_range_orders_distinct_sequences(offsets: &[u16], base: u16) {
        let mut window = ReorderWindow::new(8);
        let now = Instant::now();
        for offset in offsets {
            let s = seq::add(base, *offset);
            assert_eq!(window.store(mpdu(s), now), StoreResult::Stored);
        }
        let mut sorted = offsets.to_vec();
        sorted.sort_unstable();
        let (first, last) = (sorted[0], sorted[sorted.len() - 1]);

        let released = window.release_range(seq::add(base, first), seq::add(base, last));
        let expected: Vec<u16> = sorted.iter().map(|offset| seq::add(base, *offset)).collect();
        assert_eq!(seqs(&released), expected);
        assert!(window.is_empty());
        assert_eq!(window.last_released(), Some(seq::add(base, last)));
    }

    #[test]
    fn release_across_wraparound() {
        let mut window = ReorderWindow::new(8);
        let now = Instant::now();
        for s in [1, 4094, 0, 4095] {
            assert_eq!(window.store(mpdu(s), now), StoreResult::Stored);
        }
        let released = window.release_range(4094, 1);
        assert_eq!(seqs(&released), vec![4094, 4095, 0, 1]);
    }

    #[test]
    fn release_range_leaves_outside_frames() {
        let mut window = ReorderWindow::new(8);
        let now = Instant::now();
        for s in [10, 11, 14] {
            assert_eq!(window.store(mpdu(s), now), StoreResult::Stored);
        }
        assert_eq!(seqs(&window.release_range(10, 12)), vec![10, 11]);
        assert_eq!(window.len(), 1);
        assert_eq!(window.next_expected(), Some(13));
        assert_eq!(seqs(&window.release_range(13, 14)), vec![14]);
    }

    #[test]
    fn duplicate_keeps_first_frame() {
        let mut window = ReorderWindow::new(8);
        let now = Instant::now();
        let first = Mpdu::new(6, vec![RxFrame::new(vec![1])]);
        let second = Mpdu::new(6, vec![RxFrame::new(vec![2])]);
        assert_eq!(window.store(first, now), StoreResult::Stored);
        assert_matches!(window.store(second, now), StoreResult::Duplicate(m) => {
            assert_eq!(m.frames()[0].data(), &[2]);
        });
        let released = window.release_range(6, 6);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].frames()[0].data(), &[1]);
    }

    #[test]
    fn released_sequence_is_duplicate() {
        let mut window = ReorderWindow::new(8);
        let now = Instant::now();
        assert_eq!(window.store(mpdu(20), now), StoreResult::Stored);
        window.release_range(20, 20);
        assert_matches!(window.store(mpdu(20), now), StoreResult::Duplicate(_));
        assert_matches!(window.store(mpdu(18), now), StoreResult::Duplicate(_));
        assert_eq!(window.store(mpdu(21), now), StoreResult::Stored);
    }

    #[test]
    fn release_never_moves_backwards() {
        let mut window = ReorderWindow::new(8);
        window.release_range(30, 40);
        window.release_range(30, 35);
        assert_eq!(window.last_released(), Some(40));
    }

    #[test]
    fn flush_all_idempotent() {
        let mut window = ReorderWindow::new(8);
        assert!(window.flush_all().is_empty());
        assert!(window.flush_all().is_empty());

        let now = Instant::now();
        window.store(mpdu(1), now);
        window.store(mpdu(2), now);
        window.release_range(0, 0);
        assert_eq!(window.flush_all().len(), 2);
        assert!(window.is_empty());
        assert_eq!(window.last_released(), None);
        assert!(window.flush_all().is_empty());
    }

    #[test]
    fn window_bounds() {
        let mut window = ReorderWindow::new(8);
        assert!(window.is_in_window(1000));
        window.set_start(100);
        assert_eq!(window.next_expected(), Some(100));
        assert!(window.is_in_window(100));
        assert!(window.is_in_window(107));
        assert!(!window.is_in_window(108));
        assert!(!window.is_in_window(99));
        assert!(window.is_released(99));
        assert!(!window.is_released(100));

        window.set_start(0);
        assert_eq!(window.last_released(), Some(4095));
        assert!(window.is_in_window(0));
    }

    #[test]
    fn timeout_releases_up_to_oldest() {
        let mut window = ReorderWindow::new(8);
        let timeout = Duration::from_millis(100);
        let t0 = Instant::now();
        window.set_start(10);
        assert_eq!(window.store(mpdu(12), t0), StoreResult::Stored);
        assert_eq!(window.store(mpdu(14), t0 + Duration::from_millis(50)), StoreResult::Stored);

        assert_eq!(window.next_deadline(timeout), Some(t0 + timeout));
        assert!(window.timeout_tick(t0 + Duration::from_millis(99), timeout).is_empty());

        let released = window.timeout_tick(t0 + timeout, timeout);
        assert_eq!(seqs(&released), vec![12]);
        assert_eq!(window.next_expected(), Some(13));
        assert_eq!(window.next_deadline(timeout), Some(t0 + Duration::from_millis(150)));

        let released = window.timeout_tick(t0 + Duration::from_millis(150), timeout);
        assert_eq!(seqs(&released), vec![14]);
        assert!(window.is_empty());
        assert_eq!(window.next_deadline(timeout), None);
    }

    #[test]
    fn timeout_without_known_start() {
        let mut window = ReorderWindow::new(4);
        let timeout = Duration::from_millis(10);
        let t0 = Instant::now();
        window.store(mpdu(2), t0 + Duration::from_millis(1));
        window.store(mpdu(1), t0);
        let released = window.timeout_tick(t0 + timeout, timeout);
        assert_eq!(seqs(&released), vec![1]);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn drain_in_order_sorts_from_earliest() {
        let mut window = ReorderWindow::new(8);
        let now = Instant::now();
        for s in [4095, 2, 0] {
            window.store(mpdu(s), now);
        }
        assert_eq!(seqs(&window.drain_in_order()), vec![4095, 0, 2]);
        assert!(window.is_empty());
        assert_eq!(window.last_released(), None);
    }
}
