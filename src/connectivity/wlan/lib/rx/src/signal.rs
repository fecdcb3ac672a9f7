// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Weighting used for the per-peer receive signal average.
pub const PEER_SIGNAL_WEIGHT: usize = 10;

/// Exponentially weighted moving average of a peer's receive signal strength.
///
/// Rx descriptors report RSSI as an integer dBm value. The average is kept as an f64 so that small
/// but persistent changes (e.g. -50 followed by a stream of -51) still move the reported value.
#[derive(Clone, Debug, PartialEq)]
pub struct EwmaSignalStrength {
    current: f64,
    weighting_factor: f64,
}

impl EwmaSignalStrength {
    pub fn new(n: usize, initial_dbm: i8) -> Self {
        Self { current: initial_dbm.into(), weighting_factor: n as f64 }
    }

    pub fn dbm(&self) -> i8 {
        self.current.round() as i8
    }

    pub fn update_average(&mut self, dbm: i8) {
        let weight = 2.0 / (1.0 + self.weighting_factor);
        self.current = weight * f64::from(dbm) + (1.0 - weight) * self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_toward_new_samples() {
        let mut signal = EwmaSignalStrength::new(10, -50);
        assert_eq!(signal.dbm(), -50);

        signal.update_average(-60);
        assert_eq!(signal.dbm(), -52);

        for _ in 0..15 {
            signal.update_average(-60);
        }
        assert_eq!(signal.dbm(), -60);
    }

    #[test]
    fn small_variation_moves_internal_average() {
        let mut signal = EwmaSignalStrength::new(5, -90);

        // -91 does not move the rounded value after one sample.
        signal.update_average(-91);
        assert_eq!(signal.dbm(), -90);
        assert!(signal.current < -90.0);

        for _ in 0..5 {
            signal.update_average(-91);
        }
        assert_eq!(signal.dbm(), -91);
    }
}
