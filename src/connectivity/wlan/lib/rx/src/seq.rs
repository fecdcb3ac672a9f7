// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Modular arithmetic on 802.11 sequence numbers.
//!
//! The sequence number subfield is 12 bits wide (IEEE Std 802.11-2016, 9.2.4.4), so all
//! comparisons are performed modulo 4096. A sequence number `a` is considered to precede `b` when
//! `b` lies less than half the sequence space ahead of `a`.

pub const SEQ_MODULUS: u16 = 1 << 12;
pub const SEQ_MASK: u16 = SEQ_MODULUS - 1;

pub fn add(seq: u16, n: u16) -> u16 {
    seq.wrapping_add(n) & SEQ_MASK
}

/// Forward distance from `from` to `to`.
pub fn distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from) & SEQ_MASK
}

/// Returns true if `a` strictly precedes `b`.
pub fn precedes(a: u16, b: u16) -> bool {
    let d = distance(a, b);
    d != 0 && d < SEQ_MODULUS / 2
}

/// Returns true if `seq` lies in the inclusive range `[start, end]`, walking forward from `start`.
pub fn in_range(seq: u16, start: u16, end: u16) -> bool {
    distance(start, seq) <= distance(start, end)
}
