// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

/// Errors reported by the peer table to the management state machine. None of these are retried
/// by this crate.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PeerTableError {
    #[error("association ID {0} exceeds the table capacity")]
    InvalidId(u16),
    #[error("association ID {0} is already in use")]
    DuplicateId(u16),
    #[error("no peer added with association ID {0}")]
    NotFound(u16),
    /// The slot is marked added but the peer is not reachable through its hash chain.
    #[error("hash chain corrupted for association ID {0}")]
    ChainCorrupt(u16),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("peer table error: {0}")]
    PeerTable(#[from] PeerTableError),
    #[error("malformed rx indication: {0}")]
    MalformedBatch(String),
    #[error("invalid TID {0}")]
    InvalidTid(u8),
    #[error("no peer with ID {0}")]
    PeerNotFound(u16),
    #[error("invalid configuration: {0:#}")]
    Config(#[source] anyhow::Error),
}

impl Error {
    pub(crate) fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedBatch(msg.into())
    }
}
