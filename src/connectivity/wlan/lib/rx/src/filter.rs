// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Privacy filter applied to every frame before delivery.

use {
    crate::{
        frame::RxFrame,
        security::{KeyDirection, PeerSecurity},
    },
    serde::{Deserialize, Serialize},
};

// IEEE Std 802.11-2016, 12.6.1.1.1 (EAPOL) and GB 15629.11 (WAI).
pub const ETHER_TYPE_EAPOL: u16 = 0x888e;
pub const ETHER_TYPE_WAI: u16 = 0x88b4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemptionPolicy {
    /// Admit matching frames whether or not they were encrypted.
    Always,
    /// Admit a matching unencrypted frame only while no key is installed for its direction.
    KeyUnavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    Unicast,
    Multicast,
    Any,
}

impl PacketType {
    fn matches(&self, multicast: bool) -> bool {
        match self {
            PacketType::Unicast => !multicast,
            PacketType::Multicast => multicast,
            PacketType::Any => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyExemption {
    pub ether_type: u16,
    pub policy: ExemptionPolicy,
    pub packet_type: PacketType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    Reject,
}

/// Admits or rejects frames according to the interface's privacy policy. Independent of the
/// replay check: a frame must pass both.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrivacyFilter {
    drop_unencrypted: bool,
    exemptions: Vec<PrivacyExemption>,
}

impl PrivacyFilter {
    pub fn new(drop_unencrypted: bool, exemptions: Vec<PrivacyExemption>) -> Self {
        Self { drop_unencrypted, exemptions }
    }

    pub fn drop_unencrypted(&self) -> bool {
        self.drop_unencrypted
    }

    pub fn set_drop_unencrypted(&mut self, drop_unencrypted: bool) {
        self.drop_unencrypted = drop_unencrypted;
    }

    pub fn exemptions(&self) -> &[PrivacyExemption] {
        &self.exemptions[..]
    }

    pub fn set_exemptions(&mut self, exemptions: Vec<PrivacyExemption>) {
        self.exemptions = exemptions;
    }

    pub fn classify(
        &self,
        security: &PeerSecurity,
        frame: &RxFrame,
        encrypted: bool,
    ) -> FilterVerdict {
        let multicast = frame.is_multicast();
        let direction = KeyDirection::for_frame(multicast);
        let context = security.context(direction);

        let exemption = frame.ether_type().and_then(|ether_type| {
            self.exemptions
                .iter()
                .find(|e| e.ether_type == ether_type && e.packet_type.matches(multicast))
        });
        if let Some(exemption) = exemption {
            return match exemption.policy {
                ExemptionPolicy::Always => FilterVerdict::Accept,
                ExemptionPolicy::KeyUnavailable if encrypted || !context.is_key_installed() => {
                    FilterVerdict::Accept
                }
                ExemptionPolicy::KeyUnavailable => FilterVerdict::Reject,
            };
        }

        if self.drop_unencrypted && !encrypted && context.is_key_installed() {
            return FilterVerdict::Reject;
        }
        FilterVerdict::Accept
    }
}
