// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-peer security state and the packet number (PN) replay gate.
//!
//! Each peer carries one [`SecurityContext`] for unicast traffic and one for group-addressed
//! traffic. A context records the negotiated cipher and, for ciphers that carry a PN, the last PN
//! accepted on every TID.

use {
    crate::NUM_TIDS,
    num_derive::FromPrimitive,
    num_traits::FromPrimitive,
    serde::{Deserialize, Serialize},
};

/// Cipher negotiated for a key. Values follow the HTT security type encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum SecurityType {
    None = 0,
    Wep128 = 1,
    Wep104 = 2,
    Wep40 = 3,
    Tkip = 4,
    TkipNoMic = 5,
    Ccmp = 6,
    Wapi = 7,
    Ccmp256 = 8,
    Gcmp = 9,
    Gcmp256 = 10,
}

impl SecurityType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::from_u8(raw)
    }

    /// Width in bits of the cipher's replay counter, or `None` if the cipher has no replay
    /// counter.
    pub fn pn_bits(&self) -> Option<u32> {
        match self {
            SecurityType::None
            | SecurityType::Wep128
            | SecurityType::Wep104
            | SecurityType::Wep40 => None,
            SecurityType::Tkip
            | SecurityType::TkipNoMic
            | SecurityType::Ccmp
            | SecurityType::Ccmp256
            | SecurityType::Gcmp
            | SecurityType::Gcmp256 => Some(48),
            SecurityType::Wapi => Some(128),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyDirection {
    Unicast,
    Multicast,
}

impl KeyDirection {
    pub fn for_frame(multicast: bool) -> Self {
        if multicast {
            KeyDirection::Multicast
        } else {
            KeyDirection::Unicast
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PnCheck {
    Accept,
    Replay,
}

/// Key installation event from the key management layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityIndication {
    pub sec_type: SecurityType,
    pub is_unicast: bool,
    /// Key material delivered with the indication, e.g. the TKIP Michael key.
    pub key: Vec<u8>,
    /// Starting PN. Only consulted by ciphers that require PN continuity across rekeying.
    pub initial_pn: u128,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityContext {
    sec_type: SecurityType,
    key: Vec<u8>,
    last_pn: [Option<u128>; NUM_TIDS],
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self { sec_type: SecurityType::None, key: vec![], last_pn: [None; NUM_TIDS] }
    }
}

impl SecurityContext {
    pub fn sec_type(&self) -> SecurityType {
        self.sec_type
    }

    pub fn key(&self) -> &[u8] {
        &self.key[..]
    }

    pub fn is_key_installed(&self) -> bool {
        self.sec_type != SecurityType::None
    }

    pub fn last_pn(&self, tid: usize) -> Option<u128> {
        self.last_pn.get(tid).copied().flatten()
    }

    /// Applies a security indication to this context.
    ///
    /// WAPI requires PN continuity across rekeying: existing PN state is preserved unless this is
    /// the group key or TID 0 already has a valid PN, in which case every TID is seeded with the
    /// indicated PN. Every other cipher restarts PN tracking.
    fn update(&mut self, indication: &SecurityIndication) {
        self.sec_type = indication.sec_type;
        self.key = indication.key.clone();
        match indication.sec_type {
            SecurityType::Wapi => {
                if !indication.is_unicast || self.last_pn[0].is_some() {
                    self.last_pn = [Some(indication.initial_pn); NUM_TIDS];
                }
            }
            _ => self.last_pn = [None; NUM_TIDS],
        }
    }

    /// Accepts `pn` if it is the first PN seen on `tid` or strictly greater than the last accepted
    /// PN, and records it. Ciphers without a replay counter accept everything.
    pub fn check_and_update_pn(&mut self, tid: usize, pn: u128) -> PnCheck {
        let bits = match self.sec_type.pn_bits() {
            Some(bits) => bits,
            None => return PnCheck::Accept,
        };
        let pn = if bits >= 128 { pn } else { pn & ((1u128 << bits) - 1) };
        let slot = match self.last_pn.get_mut(tid) {
            Some(slot) => slot,
            None => return PnCheck::Replay,
        };
        match *slot {
            Some(last) if pn <= last => PnCheck::Replay,
            _ => {
                *slot = Some(pn);
                PnCheck::Accept
            }
        }
    }
}

/// Unicast and multicast security contexts of one peer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerSecurity {
    unicast: SecurityContext,
    multicast: SecurityContext,
}

impl PeerSecurity {
    pub fn context(&self, direction: KeyDirection) -> &SecurityContext {
        match direction {
            KeyDirection::Unicast => &self.unicast,
            KeyDirection::Multicast => &self.multicast,
        }
    }

    fn context_mut(&mut self, direction: KeyDirection) -> &mut SecurityContext {
        match direction {
            KeyDirection::Unicast => &mut self.unicast,
            KeyDirection::Multicast => &mut self.multicast,
        }
    }

    pub fn update_on_security_indication(&mut self, indication: &SecurityIndication) {
        let direction = if indication.is_unicast {
            KeyDirection::Unicast
        } else {
            KeyDirection::Multicast
        };
        self.context_mut(direction).update(indication);
    }

    pub fn check_and_update_pn(
        &mut self,
        direction: KeyDirection,
        tid: usize,
        pn: u128,
    ) -> PnCheck {
        self.context_mut(direction).check_and_update_pn(tid, pn)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    fn indication(
        sec_type: SecurityType,
        is_unicast: bool,
        initial_pn: u128,
    ) -> SecurityIndication {
        SecurityIndication { sec_type, is_unicast, key: vec![0xaa; 16], initial_pn }
    }

    #[test]
    fn default_context_enforces_nothing() {
        let mut security = PeerSecurity::default();
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 0, 10), PnCheck::Accept);
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 0, 10), PnCheck::Accept);
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 0, 1), PnCheck::Accept);
        assert!(!security.context(KeyDirection::Unicast).is_key_installed());
    }

    #[test_case(SecurityType::Ccmp ; "ccmp")]
    #[test_case(SecurityType::Tkip ; "tkip")]
    #[test_case(SecurityType::Gcmp256 ; "gcmp256")]
    #[test_case(SecurityType::Wapi ; "wapi")]
    fn replayed_pn_rejected(sec_type: SecurityType) {
        let mut security = PeerSecurity::default();
        security.update_on_security_indication(&indication(sec_type, true, 0));
        if sec_type == SecurityType::Wapi {
            // A fresh unicast WAPI key leaves PN tracking to start with the first frame.
            assert_eq!(security.context(KeyDirection::Unicast).last_pn(0), None);
        }
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 2, 100), PnCheck::Accept);
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 2, 100), PnCheck::Replay);
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 2, 99), PnCheck::Replay);
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 2, 101), PnCheck::Accept);
        // Other TIDs are tracked independently.
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 3, 5), PnCheck::Accept);
        // So is the other direction.
        assert_eq!(security.check_and_update_pn(KeyDirection::Multicast, 2, 1), PnCheck::Accept);
    }

    #[test]
    fn rekey_restarts_pn_tracking() {
        let mut security = PeerSecurity::default();
        security.update_on_security_indication(&indication(SecurityType::Ccmp, true, 0));
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 0, 500), PnCheck::Accept);
        security.update_on_security_indication(&indication(SecurityType::Ccmp, true, 0));
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 0, 1), PnCheck::Accept);
    }

    #[test]
    fn pn_compared_within_cipher_width() {
        let mut security = PeerSecurity::default();
        security.update_on_security_indication(&indication(SecurityType::Ccmp, true, 0));
        assert_eq!(
            security.check_and_update_pn(KeyDirection::Unicast, 0, (1 << 48) - 1),
            PnCheck::Accept
        );
        // Bits above the 48-bit counter are ignored, so this is PN 5.
        assert_eq!(
            security.check_and_update_pn(KeyDirection::Unicast, 0, (1 << 48) | 5),
            PnCheck::Replay
        );
    }

    #[test]
    fn wapi_group_key_seeds_initial_pn() {
        let mut security = PeerSecurity::default();
        security.update_on_security_indication(&indication(SecurityType::Wapi, false, 1000));
        let multicast = security.context(KeyDirection::Multicast);
        assert!((0..NUM_TIDS).all(|tid| multicast.last_pn(tid) == Some(1000)));
        assert_eq!(
            security.check_and_update_pn(KeyDirection::Multicast, 4, 1000),
            PnCheck::Replay
        );
        assert_eq!(
            security.check_and_update_pn(KeyDirection::Multicast, 4, 1002),
            PnCheck::Accept
        );
    }

    #[test]
    fn wapi_unicast_rekey_seeds_when_tid0_valid() {
        let mut security = PeerSecurity::default();
        security.update_on_security_indication(&indication(SecurityType::Wapi, true, 0));
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 0, 10), PnCheck::Accept);
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 1, 30), PnCheck::Accept);

        security.update_on_security_indication(&indication(SecurityType::Wapi, true, 20));
        let unicast = security.context(KeyDirection::Unicast);
        assert_eq!(unicast.last_pn(0), Some(20));
        assert_eq!(unicast.last_pn(1), Some(20));
        assert_eq!(unicast.last_pn(15), Some(20));
    }

    #[test]
    fn wapi_unicast_rekey_preserves_pn_when_tid0_invalid() {
        let mut security = PeerSecurity::default();
        security.update_on_security_indication(&indication(SecurityType::Wapi, true, 0));
        assert_eq!(security.check_and_update_pn(KeyDirection::Unicast, 5, 70), PnCheck::Accept);

        security.update_on_security_indication(&indication(SecurityType::Wapi, true, 20));
        let unicast = security.context(KeyDirection::Unicast);
        assert_eq!(unicast.last_pn(0), None);
        assert_eq!(unicast.last_pn(5), Some(70));
    }

    #[test]
    fn security_type_from_raw() {
        assert_eq!(SecurityType::from_raw(6), Some(SecurityType::Ccmp));
        assert_eq!(SecurityType::from_raw(7), Some(SecurityType::Wapi));
        assert_eq!(SecurityType::from_raw(11), None);
        assert_eq!(SecurityType::Wep40.pn_bits(), None);
        assert_eq!(SecurityType::Wapi.pn_bits(), Some(128));
    }
}
