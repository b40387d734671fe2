use crate::error::BgpError;
use crate::models::*;
use ipnet::Ipv4Net;
use log::warn;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

/// BGP message types.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BgpMessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    KeepAlive = 4,
}

/// A parsed BGP message.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BgpMessage {
    Open(BgpOpenMessage),
    Update(BgpUpdateMessage),
    Notification(BgpNotificationMessage),
    KeepAlive,
}

impl BgpMessage {
    pub fn msg_type(&self) -> BgpMessageType {
        match self {
            BgpMessage::Open(_) => BgpMessageType::Open,
            BgpMessage::Update(_) => BgpMessageType::Update,
            BgpMessage::Notification(_) => BgpMessageType::Notification,
            BgpMessage::KeepAlive => BgpMessageType::KeepAlive,
        }
    }
}

/// BGP OPEN message (RFC 4271 §4.2).
///
/// `asn` is the two-octet wire field: a speaker with a four-octet ASN puts
/// AS_TRANS there and carries the true number in the capability.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BgpOpenMessage {
    pub version: u8,
    pub asn: u16,
    pub hold_time: u16,
    pub bgp_id: Ipv4Addr,
    pub opt_params: Vec<OptParam>,
}

impl BgpOpenMessage {
    /// Builds an OPEN advertising the given ASN and, when `use_4b_asn` is
    /// set, the four-octet-ASN capability carrying the true value.
    pub fn new(
        use_4b_asn: bool,
        asn: Asn,
        hold_time: u16,
        bgp_id: Ipv4Addr,
        families: &[(Afi, Safi)],
    ) -> Self {
        let wire_asn = if asn.to_u32() > u16::MAX as u32 {
            Asn::TRANSITION.to_u32() as u16
        } else {
            asn.to_u32() as u16
        };

        let mut caps: Vec<Capability> = families
            .iter()
            .map(|(afi, safi)| Capability::multiprotocol(*afi, *safi))
            .collect();
        if use_4b_asn {
            caps.push(Capability::FourOctetAs(asn));
        }

        let opt_params = if caps.is_empty() {
            vec![]
        } else {
            vec![OptParam::Capabilities(caps)]
        };

        BgpOpenMessage {
            version: 4,
            asn: wire_asn,
            hold_time,
            bgp_id,
            opt_params,
        }
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.opt_params.iter().flat_map(|param| match param {
            OptParam::Capabilities(caps) => caps.as_slice(),
            OptParam::Raw { .. } => &[],
        })
    }

    /// The peer's true ASN: the four-octet capability value when present,
    /// the two-octet header field otherwise.
    pub fn true_asn(&self) -> Asn {
        self.capabilities()
            .find_map(|cap| match cap {
                Capability::FourOctetAs(asn) => Some(*asn),
                _ => None,
            })
            .unwrap_or(Asn::new_16bit(self.asn))
    }

    pub fn has_four_octet_as(&self) -> bool {
        self.capabilities()
            .any(|cap| matches!(cap, Capability::FourOctetAs(_)))
    }

    pub fn supports_family(&self, afi: Afi, safi: Safi) -> bool {
        self.capabilities()
            .any(|cap| cap.family() == Some((afi, safi)))
    }
}

/// BGP UPDATE message (RFC 4271 §4.3).
///
/// Withdrawn routes and NLRI cover IPv4 only; IPv6 reachability travels in
/// the MP_REACH_NLRI/MP_UNREACH_NLRI attributes.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BgpUpdateMessage {
    pub withdrawn: Vec<Ipv4Net>,
    pub attributes: Attributes,
    pub announced: Vec<Ipv4Net>,
}

impl BgpUpdateMessage {
    /// Prepends the local ASN to AS_PATH (spec §4.2.2 of RFC 4271 usage).
    ///
    /// In two-octet mode a four-octet ASN is written as AS_TRANS and the
    /// true value is mirrored into AS4_PATH so the receiver can restore it.
    pub fn prepend(&mut self, asn: Asn, four_byte: bool) {
        if four_byte {
            let mut path = self.attributes.as_path().cloned().unwrap_or_default();
            path.prepend(asn, true);
            self.attributes.upsert(AttributeValue::AsPath {
                path,
                is_as4: false,
            });
            return;
        }

        let wire_asn = if asn.to_u32() > u16::MAX as u32 {
            Asn::TRANSITION
        } else {
            asn
        };

        let path = self.attributes.as_path().cloned().unwrap_or_default();
        let needs_as4 =
            wire_asn == Asn::TRANSITION || self.attributes.as4_path().is_some();
        if needs_as4 {
            // AS4_PATH mirrors the full path so restoration stays aligned.
            let mut as4 = self
                .attributes
                .as4_path()
                .cloned()
                .unwrap_or_else(|| path.clone());
            as4.prepend(asn, true);
            self.attributes
                .upsert(AttributeValue::AsPath {
                    path: as4,
                    is_as4: true,
                });
        }

        let mut path = path;
        path.prepend(wire_asn, false);
        self.attributes.upsert(AttributeValue::AsPath {
            path,
            is_as4: false,
        });
    }

    /// Rewrites AS_TRANS placeholders in AS_PATH from AS4_PATH and drops
    /// AS4_PATH. Used on receive when the session negotiated two-octet
    /// ASNs but the attributes carry four-octet recovery data (RFC 6793).
    pub fn restore_as_path(&mut self) {
        let as4: Vec<Asn> = match self.attributes.as4_path() {
            Some(path) => path.sequence_asns().collect(),
            None => {
                if let Some(path) = self.attributes.as_path() {
                    if path.count_asn(Asn::TRANSITION) > 0 {
                        warn!("AS_TRANS found in AS_PATH but no AS4_PATH to restore from");
                    }
                }
                return;
            }
        };

        if let Some(path) = self.attributes.as_path() {
            let mut path = path.clone();
            let seq_len = path.route_len();
            // AS4_PATH may be shorter when old speakers in the middle
            // stripped it; align it against the tail of AS_PATH.
            let offset = seq_len.saturating_sub(as4.len());
            let mut idx = 0usize;
            for seg in path.segments.iter_mut().filter(|s| s.is_sequence()) {
                for asn in seg.asns.iter_mut() {
                    if idx >= offset {
                        let replacement = as4[idx - offset];
                        if *asn == Asn::TRANSITION {
                            *asn = replacement;
                        } else if *asn != replacement {
                            warn!("AS_PATH and AS4_PATH do not match");
                        }
                    } else if *asn == Asn::TRANSITION {
                        warn!("AS_TRANS before the range AS4_PATH covers");
                    }
                    idx += 1;
                }
            }
            self.attributes.upsert(AttributeValue::AsPath {
                path,
                is_as4: false,
            });
        }

        self.attributes.remove(AttrType::AS4_PATH);
    }

    /// Replaces four-octet ASNs in AS_PATH with AS_TRANS and records the
    /// true path in AS4_PATH. Used on send toward a two-octet peer.
    pub fn downgrade_as_path(&mut self) {
        let path = match self.attributes.as_path() {
            Some(p) => p.clone(),
            None => return,
        };
        if path.is_two_byte_clean() {
            return;
        }

        let mut downgraded = path.clone();
        for seg in downgraded.segments.iter_mut() {
            for asn in seg.asns.iter_mut() {
                if asn.to_u32() > u16::MAX as u32 {
                    *asn = Asn::TRANSITION;
                }
            }
        }

        self.attributes.upsert(AttributeValue::AsPath {
            path,
            is_as4: true,
        });
        self.attributes.upsert(AttributeValue::AsPath {
            path: downgraded,
            is_as4: false,
        });
    }

    /// Restores a four-octet AGGREGATOR from AS4_AGGREGATOR, dropping the
    /// latter. Without an AS_TRANS placeholder to replace, AS4_AGGREGATOR
    /// is simply discarded.
    pub fn restore_aggregator(&mut self) {
        let as4 = match self.attributes.remove(AttrType::AS4_AGGREGATOR) {
            Some(attr) => attr,
            None => return,
        };
        let current = match self.attributes.get(AttrType::AGGREGATOR) {
            Some(attr) => match attr.value {
                AttributeValue::Aggregator { asn, .. } => asn,
                _ => return,
            },
            None => return,
        };
        if current != Asn::TRANSITION {
            return;
        }
        if let AttributeValue::Aggregator { asn, id, .. } = as4.value {
            self.attributes.upsert(AttributeValue::Aggregator {
                asn,
                id,
                is_as4: false,
            });
        }
    }

    /// Downgrades a four-octet AGGREGATOR to AS_TRANS, adding
    /// AS4_AGGREGATOR with the true ASN.
    pub fn downgrade_aggregator(&mut self) {
        let (asn, id) = match self.attributes.get(AttrType::AGGREGATOR) {
            Some(attr) => match attr.value {
                AttributeValue::Aggregator { asn, id, .. } => (asn, id),
                _ => return,
            },
            None => return,
        };
        if asn.to_u32() <= u16::MAX as u32 {
            return;
        }

        self.attributes.upsert(AttributeValue::Aggregator {
            asn,
            id,
            is_as4: true,
        });
        self.attributes.upsert(AttributeValue::Aggregator {
            asn: Asn::TRANSITION,
            id,
            is_as4: false,
        });
    }
}

/// BGP NOTIFICATION message (RFC 4271 §4.5): a protocol error triple.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BgpNotificationMessage {
    pub error: BgpError,
}

impl From<BgpError> for BgpNotificationMessage {
    fn from(error: BgpError) -> Self {
        BgpNotificationMessage { error }
    }
}

impl Display for BgpNotificationMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}
