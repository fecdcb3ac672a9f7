// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{delivery::DeliveryMode, filter::PrivacyExemption, reorder::MAX_WINDOW_SIZE},
    anyhow::{ensure, Context as _},
    serde::{Deserialize, Serialize},
    std::{fs, io, path, time::Duration},
};

/// Per access category reorder timeouts, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReorderTimeouts {
    pub voice_ms: u64,
    pub video_ms: u64,
    pub best_effort_ms: u64,
    pub background_ms: u64,
}

impl Default for ReorderTimeouts {
    fn default() -> Self {
        Self { voice_ms: 40, video_ms: 100, best_effort_ms: 100, background_ms: 100 }
    }
}

impl ReorderTimeouts {
    /// Maps a TID to its access category (IEEE Std 802.11-2016, Table 10-1). Traffic stream TIDs
    /// use the best effort timeout.
    pub fn for_tid(&self, tid: u8) -> Duration {
        let ms = match tid {
            1 | 2 => self.background_ms,
            4 | 5 => self.video_ms,
            6 | 7 => self.voice_ms,
            _ => self.best_effort_ms,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RxConfig {
    /// Number of association IDs the peer table can hold.
    pub peer_capacity: usize,
    /// Deliver frames from unknown peers through a catch-all monitor record.
    pub monitor_mode: bool,
    /// The host, not the target, decides whether an MPDU lies inside the reorder window.
    pub host_reorder_authority: bool,
    pub drop_unencrypted: bool,
    pub privacy_exemptions: Vec<PrivacyExemption>,
    pub delivery_mode: DeliveryMode,
    /// Upper bound for negotiated reorder windows. Must be a power of two.
    pub max_reorder_window: usize,
    pub reorder_timeout: ReorderTimeouts,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            peer_capacity: 33,
            monitor_mode: false,
            host_reorder_authority: false,
            drop_unencrypted: false,
            privacy_exemptions: vec![],
            delivery_mode: DeliveryMode::default(),
            max_reorder_window: 64,
            reorder_timeout: ReorderTimeouts::default(),
        }
    }
}

impl RxConfig {
    pub fn load<P: AsRef<path::Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let file = fs::File::open(path)
            .with_context(|| format!("could not open the config file {}", path.display()))?;
        let config: Self = serde_json::from_reader(io::BufReader::new(file))
            .with_context(|| format!("could not deserialize the config file {}", path.display()))?;
        config.validate().with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, anyhow::Error> {
        let config: Self = serde_json::from_str(json).context("could not deserialize config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        ensure!(self.peer_capacity > 0, "peer_capacity must be non-zero");
        ensure!(
            self.peer_capacity <= u16::MAX as usize,
            "peer_capacity {} exceeds the association ID space",
            self.peer_capacity
        );
        ensure!(
            self.max_reorder_window.is_power_of_two()
                && self.max_reorder_window <= MAX_WINDOW_SIZE,
            "max_reorder_window must be a power of two no larger than {}, got {}",
            MAX_WINDOW_SIZE,
            self.max_reorder_window
        );
        let timeouts = &self.reorder_timeout;
        ensure!(
            [timeouts.voice_ms, timeouts.video_ms, timeouts.best_effort_ms, timeouts.background_ms]
                .iter()
                .all(|ms| *ms > 0),
            "reorder timeouts must be non-zero"
        );
        Ok(())
    }
}
